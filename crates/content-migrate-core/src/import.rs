//! Phased import of an export payload into a destination store.
//!
//! Phases run strictly in order: pages, generic tables, file references, files. Each
//! record's new uid is registered before any later record is prepared, which is what lets
//! parent and file references be rewritten without a general dependency graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result as AnyResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::files::{decode_embedded, FileWriteError, FileWriter, WriteOutcome};
use crate::mapping::{IdMapping, MappingError};
use crate::payload::ExportPayload;
use crate::prepare::{FieldSchema, RecordPreparer};
use crate::{
    field_id, field_text, Record, FILE_REFERENCE_TABLE, FILE_TABLE, PAGES_TABLE, UID_FIELD,
};

/// Destination storage: inserts one row and reports the identifier it assigned.
pub trait RecordStore: FieldSchema {
    /// # Errors
    /// Returns an error when the insert fails; the import aborts on the first failure.
    fn insert_record(&mut self, table: &str, record: &Record) -> AnyResult<i64>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Pages,
    Records,
    FileReferences,
    Files,
}

impl ImportPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pages => "pages",
            Self::Records => "records",
            Self::FileReferences => "file_references",
            Self::Files => "files",
        }
    }
}

impl Display for ImportPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("payload file not found: {}", .0.display())]
    PayloadNotFound(PathBuf),
    #[error("failed to read payload file {}", path.display())]
    PayloadRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode payload: {0}")]
    PayloadDecode(String),
    #[error("payload contains no pages to import")]
    MissingPages,
    #[error("record {index} of table {table} has no uid")]
    MissingSourceId { table: String, index: usize },
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("{phase} phase: failed to inspect destination schema of {table} (record uid {uid})")]
    Schema {
        phase: ImportPhase,
        table: String,
        uid: i64,
        #[source]
        source: anyhow::Error,
    },
    #[error("{phase} phase: failed to insert {table} record uid {uid}")]
    Storage {
        phase: ImportPhase,
        table: String,
        uid: i64,
        #[source]
        source: anyhow::Error,
    },
    #[error("files phase: failed to write {path}")]
    File {
        path: String,
        #[source]
        source: FileWriteError,
    },
}

/// What to do when one attachment cannot be written.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileErrorPolicy {
    #[default]
    Abort,
    Continue,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Destination page the imported tree is grafted under.
    pub destination_pid: i64,
    /// Generic tables to leave out. `pages` and `sys_file_reference` are always imported.
    pub excluded_tables: BTreeSet<String>,
    pub overwrite_files: bool,
    pub file_errors: FileErrorPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReport {
    pub run_id: String,
    pub payload_sha256: Option<String>,
    pub destination_pid: i64,
    pub modified_at: i64,
    pub imported: BTreeMap<String, usize>,
    pub files_written: usize,
    pub files_skipped: usize,
    pub file_failures: Vec<FileFailure>,
}

impl ImportReport {
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.imported.values().sum()
    }
}

pub struct Importer<'a, S: RecordStore, W: FileWriter> {
    store: &'a mut S,
    files: &'a mut W,
    options: ImportOptions,
    mapping: IdMapping,
    preparer: RecordPreparer,
    imported: BTreeMap<String, usize>,
}

impl<'a, S: RecordStore, W: FileWriter> Importer<'a, S, W> {
    #[must_use]
    pub fn new(store: &'a mut S, files: &'a mut W, options: ImportOptions) -> Self {
        Self {
            store,
            files,
            options,
            mapping: IdMapping::new(),
            preparer: RecordPreparer::new(OffsetDateTime::now_utc().unix_timestamp()),
            imported: BTreeMap::new(),
        }
    }

    /// Use a fixed modification timestamp instead of the current time.
    #[must_use]
    pub fn with_modified_at(mut self, modified_at: i64) -> Self {
        self.preparer = RecordPreparer::new(modified_at);
        self
    }

    #[must_use]
    pub fn mapping(&self) -> &IdMapping {
        &self.mapping
    }

    /// Import `payload` phase by phase.
    ///
    /// # Errors
    /// Input and mapping errors are reported before anything is written. Storage errors
    /// abort the run at the failing record; rollback is left to the store.
    pub fn run(&mut self, payload: &ExportPayload) -> Result<ImportReport, ImportError> {
        payload.validate()?;

        let root_pid = payload.root_parent_id()?;
        self.mapping.register(PAGES_TABLE, root_pid, self.options.destination_pid)?;
        self.preparer = self.preparer.with_graft(root_pid, self.options.destination_pid);
        info!(
            root_pid,
            destination_pid = self.options.destination_pid,
            "grafting page tree under destination page"
        );

        self.import_pages(payload)?;
        self.import_records(payload)?;
        self.import_file_references(payload)?;
        let (files_written, files_skipped, file_failures) = self.import_files(payload)?;

        Ok(ImportReport {
            run_id: Ulid::new().to_string(),
            payload_sha256: None,
            destination_pid: self.options.destination_pid,
            modified_at: self.preparer.modified_at(),
            imported: std::mem::take(&mut self.imported),
            files_written,
            files_skipped,
            file_failures,
        })
    }

    fn import_pages(&mut self, payload: &ExportPayload) -> Result<(), ImportError> {
        let records = payload.records(PAGES_TABLE);
        for record in records {
            self.insert_record(ImportPhase::Pages, PAGES_TABLE, record.clone())?;
        }
        info!(phase = %ImportPhase::Pages, records = records.len(), "phase finished");
        Ok(())
    }

    fn import_records(&mut self, payload: &ExportPayload) -> Result<(), ImportError> {
        let mut total = 0_usize;
        for entry in payload.tables() {
            let table = entry.table.as_str();
            if table == PAGES_TABLE || table == FILE_REFERENCE_TABLE {
                continue;
            }
            if self.options.excluded_tables.contains(table) {
                info!(table, records = entry.records.len(), "skipping excluded table");
                continue;
            }

            for record in &entry.records {
                self.insert_record(ImportPhase::Records, table, record.clone())?;
            }
            debug!(table, records = entry.records.len(), "table imported");
            total += entry.records.len();
        }
        info!(phase = %ImportPhase::Records, records = total, "phase finished");
        Ok(())
    }

    fn import_file_references(&mut self, payload: &ExportPayload) -> Result<(), ImportError> {
        let records = payload.records(FILE_REFERENCE_TABLE);
        for record in records {
            let rewritten = self.rewrite_file_reference(record.clone());
            self.insert_record(ImportPhase::FileReferences, FILE_REFERENCE_TABLE, rewritten)?;
        }
        info!(phase = %ImportPhase::FileReferences, records = records.len(), "phase finished");
        Ok(())
    }

    fn import_files(
        &mut self,
        payload: &ExportPayload,
    ) -> Result<(usize, usize, Vec<FileFailure>), ImportError> {
        let mut written = 0_usize;
        let mut skipped = 0_usize;
        let mut failures = Vec::new();

        for descriptor in &payload.files {
            let outcome = decode_embedded(&descriptor.base64).and_then(|bytes| {
                self.files.write_binary(&descriptor.path, &bytes, self.options.overwrite_files)
            });

            match outcome {
                Ok(WriteOutcome::Written) => written += 1,
                Ok(WriteOutcome::SkippedExisting) => {
                    debug!(path = %descriptor.path, "file exists, skipped");
                    skipped += 1;
                }
                Err(source) => match self.options.file_errors {
                    FileErrorPolicy::Abort => {
                        return Err(ImportError::File { path: descriptor.path.clone(), source });
                    }
                    FileErrorPolicy::Continue => {
                        warn!(path = %descriptor.path, error = %source, "file write failed");
                        failures.push(FileFailure {
                            path: descriptor.path.clone(),
                            error: source.to_string(),
                        });
                    }
                },
            }
        }

        info!(
            phase = %ImportPhase::Files,
            written,
            skipped,
            failed = failures.len(),
            "phase finished"
        );
        Ok((written, skipped, failures))
    }

    /// `uid_local` points at `sys_file`; `uid_foreign` points at the table named in the
    /// record's `tablenames`. Unresolved references keep their exported value.
    fn rewrite_file_reference(&self, mut record: Record) -> Record {
        let uid_local = field_id(&record, "uid_local");
        match self.mapping.resolve(FILE_TABLE, uid_local) {
            Some(new_uid) => {
                record.insert("uid_local".to_string(), Value::from(new_uid));
            }
            None => warn!(
                uid = field_id(&record, UID_FIELD),
                uid_local, "file reference points at a file outside the payload"
            ),
        }

        let foreign_table = field_text(&record, "tablenames");
        let uid_foreign = field_id(&record, "uid_foreign");
        match self.mapping.resolve(&foreign_table, uid_foreign) {
            Some(new_uid) => {
                record.insert("uid_foreign".to_string(), Value::from(new_uid));
            }
            None => warn!(
                uid = field_id(&record, UID_FIELD),
                tablenames = %foreign_table,
                uid_foreign,
                "file reference points at a record outside the payload"
            ),
        }

        record
    }

    fn insert_record(
        &mut self,
        phase: ImportPhase,
        table: &str,
        record: Record,
    ) -> Result<i64, ImportError> {
        let old_uid = field_id(&record, UID_FIELD);
        let prepared = self
            .preparer
            .prepare(record, table, &mut *self.store, &self.mapping)
            .map_err(|source| ImportError::Schema {
                phase,
                table: table.to_string(),
                uid: old_uid,
                source,
            })?;

        let new_uid =
            self.store.insert_record(table, &prepared).map_err(|source| ImportError::Storage {
                phase,
                table: table.to_string(),
                uid: old_uid,
                source,
            })?;

        self.mapping.register(table, old_uid, new_uid)?;
        *self.imported.entry(table.to_string()).or_default() += 1;
        debug!(%phase, table, old_uid, new_uid, "record imported");
        Ok(new_uid)
    }
}

/// Read the export at `path` and import it.
///
/// # Errors
/// Returns [`ImportError::PayloadNotFound`] before touching the store when `path` is not a
/// file, and otherwise any error of [`Importer::run`].
pub fn import_file<S: RecordStore, W: FileWriter>(
    path: &Path,
    options: ImportOptions,
    store: &mut S,
    files: &mut W,
) -> Result<ImportReport, ImportError> {
    if !path.is_file() {
        return Err(ImportError::PayloadNotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path)
        .map_err(|source| ImportError::PayloadRead { path: path.to_path_buf(), source })?;
    let digest = format!("{:x}", Sha256::digest(&bytes));
    let payload = ExportPayload::from_slice(&bytes)?;
    info!(
        path = %path.display(),
        tables = payload.tables().len(),
        records = payload.record_count(),
        files = payload.files.len(),
        "payload loaded"
    );

    let mut report = Importer::new(store, files, options).run(&payload)?;
    report.payload_sha256 = Some(digest);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use anyhow::anyhow;
    use serde_json::json;

    use super::*;

    /// In-memory destination that hands out sequential ids and records every call.
    struct MemoryStore {
        schema: BTreeMap<String, BTreeSet<String>>,
        next_id: i64,
        rows: Vec<(String, i64, Record)>,
        calls: Vec<(String, String)>,
        fail_on: Option<(String, usize)>,
    }

    impl MemoryStore {
        fn new(next_id: i64) -> Self {
            let mut schema = BTreeMap::new();
            for (table, fields) in [
                ("pages", vec!["pid", "tstamp", "title"]),
                ("tt_content", vec!["pid", "tstamp", "header"]),
                ("sys_file", vec!["pid", "identifier"]),
                ("sys_category", vec!["pid", "title"]),
                (
                    "sys_file_reference",
                    vec!["pid", "uid_local", "uid_foreign", "tablenames", "fieldname"],
                ),
            ] {
                schema.insert(
                    table.to_string(),
                    fields.into_iter().map(str::to_string).collect::<BTreeSet<_>>(),
                );
            }
            Self { schema, next_id, rows: Vec::new(), calls: Vec::new(), fail_on: None }
        }

        fn row(&self, table: &str, new_uid: i64) -> &Record {
            match self.rows.iter().find(|(t, id, _)| t == table && *id == new_uid) {
                Some((_, _, record)) => record,
                None => panic!("no {table} row with uid {new_uid}"),
            }
        }

        fn rows_of(&self, table: &str) -> Vec<&Record> {
            self.rows.iter().filter(|(t, _, _)| t == table).map(|(_, _, r)| r).collect()
        }
    }

    impl FieldSchema for MemoryStore {
        fn field_exists(&mut self, table: &str, field: &str) -> AnyResult<bool> {
            self.calls.push(("schema".to_string(), table.to_string()));
            Ok(self.schema.get(table).is_some_and(|fields| fields.contains(field)))
        }
    }

    impl RecordStore for MemoryStore {
        fn insert_record(&mut self, table: &str, record: &Record) -> AnyResult<i64> {
            if let Some((fail_table, after)) = &self.fail_on {
                if fail_table == table && self.rows_of(table).len() == *after {
                    return Err(anyhow!("constraint violation"));
                }
            }
            self.calls.push(("insert".to_string(), table.to_string()));
            let id = self.next_id;
            self.next_id += 1;
            self.rows.push((table.to_string(), id, record.clone()));
            Ok(id)
        }
    }

    #[derive(Default)]
    struct MemoryFiles {
        written: BTreeMap<String, Vec<u8>>,
        reject: BTreeSet<String>,
    }

    impl FileWriter for MemoryFiles {
        fn write_binary(
            &mut self,
            path: &str,
            bytes: &[u8],
            overwrite: bool,
        ) -> Result<WriteOutcome, FileWriteError> {
            if self.reject.contains(path) {
                return Err(FileWriteError::PathEscapesRoot(path.to_string()));
            }
            if self.written.contains_key(path) && !overwrite {
                return Ok(WriteOutcome::SkippedExisting);
            }
            self.written.insert(path.to_string(), bytes.to_vec());
            Ok(WriteOutcome::Written)
        }
    }

    fn payload(value: serde_json::Value) -> ExportPayload {
        match ExportPayload::from_slice(value.to_string().as_bytes()) {
            Ok(payload) => payload,
            Err(err) => panic!("invalid payload fixture: {err}"),
        }
    }

    fn options(destination_pid: i64) -> ImportOptions {
        ImportOptions { destination_pid, ..ImportOptions::default() }
    }

    #[test]
    fn grafts_tree_and_remaps_child_parent() -> Result<(), ImportError> {
        let mut store = MemoryStore::new(900);
        let mut files = MemoryFiles::default();
        let export = payload(json!({
            "records": {
                "pages": [{"uid": 10, "pid": 1, "title": "Root"}],
                "tt_content": [{"uid": 3, "pid": 10, "header": "Child"}]
            }
        }));

        let report = Importer::new(&mut store, &mut files, options(500))
            .with_modified_at(1_700_000_000)
            .run(&export)?;

        assert_eq!(store.row("pages", 900).get("pid"), Some(&json!(500)));
        assert_eq!(store.row("tt_content", 901).get("pid"), Some(&json!(900)));
        assert_eq!(store.row("tt_content", 901).get("tstamp"), Some(&json!(1_700_000_000)));
        assert_eq!(report.imported.get("pages"), Some(&1));
        assert_eq!(report.imported.get("tt_content"), Some(&1));
        assert_eq!(report.destination_pid, 500);
        assert_eq!(report.total_records(), 2);
        Ok(())
    }

    #[test]
    fn grafts_under_top_level_page_zero() -> Result<(), ImportError> {
        let mut store = MemoryStore::new(900);
        let mut files = MemoryFiles::default();
        let export = payload(json!({
            "records": {
                "pages": [{"uid": 10, "pid": 1, "title": "Root"}],
                "tt_content": [
                    {"uid": 3, "pid": 10, "header": "Child"},
                    {"uid": 4, "pid": 1, "header": "Beside the root"}
                ]
            }
        }));

        let report = Importer::new(&mut store, &mut files, options(0)).run(&export)?;

        assert_eq!(store.row("pages", 900).get("pid"), Some(&json!(0)));
        assert_eq!(store.row("tt_content", 901).get("pid"), Some(&json!(900)));
        assert_eq!(store.row("tt_content", 902).get("pid"), Some(&json!(0)));
        assert_eq!(report.destination_pid, 0);
        Ok(())
    }

    #[test]
    fn root_page_gets_destination_pid_whatever_its_original_parent() -> Result<(), ImportError> {
        let cases = [0, 1, 77].into_iter().flat_map(|pid| [(pid, 0), (pid, 42)]);
        for (original_pid, destination_pid) in cases {
            let mut store = MemoryStore::new(1);
            let mut files = MemoryFiles::default();
            let export = payload(json!({
                "records": {"pages": [
                    {"uid": 200, "pid": original_pid, "title": "Root"},
                    {"uid": 201, "pid": 200, "title": "Sub"}
                ]}
            }));

            let mut importer = Importer::new(&mut store, &mut files, options(destination_pid));
            importer.run(&export)?;
            assert_eq!(importer.mapping().resolve_new_pid(200), Some(1));

            assert_eq!(
                store.row("pages", 1).get("pid"),
                Some(&json!(destination_pid)),
                "root exported under {original_pid}, grafted under {destination_pid}"
            );
            assert_eq!(store.row("pages", 2).get("pid"), Some(&json!(1)));
        }
        Ok(())
    }

    #[test]
    fn file_references_are_prepared_after_all_other_tables() -> Result<(), ImportError> {
        let mut store = MemoryStore::new(1);
        let mut files = MemoryFiles::default();
        let export = payload(json!({
            "records": {
                "sys_file_reference": [
                    {"uid": 1, "pid": 10, "uid_local": 5, "uid_foreign": 3,
                     "tablenames": "tt_content", "fieldname": "image"}
                ],
                "pages": [{"uid": 10, "pid": 0, "title": "Root"}],
                "tt_content": [{"uid": 3, "pid": 10, "header": "Image"}],
                "sys_file": [{"uid": 5, "pid": 0, "identifier": "/a.png"}]
            }
        }));

        Importer::new(&mut store, &mut files, options(1)).run(&export)?;

        let first_reference_call = store
            .calls
            .iter()
            .position(|(_, table)| table == "sys_file_reference")
            .unwrap_or(usize::MAX);
        let last_other_insert = store
            .calls
            .iter()
            .rposition(|(kind, table)| kind == "insert" && table != "sys_file_reference")
            .unwrap_or(0);
        assert!(last_other_insert < first_reference_call);

        let reference = store.rows_of("sys_file_reference")[0];
        let file_uid = store.rows.iter().find(|(t, _, _)| t == "sys_file").map(|(_, id, _)| *id);
        let content_uid =
            store.rows.iter().find(|(t, _, _)| t == "tt_content").map(|(_, id, _)| *id);
        assert_eq!(reference.get("uid_local").map(crate::value_as_id), file_uid);
        assert_eq!(reference.get("uid_foreign").map(crate::value_as_id), content_uid);
        Ok(())
    }

    #[test]
    fn unresolved_file_reference_targets_keep_their_values() -> Result<(), ImportError> {
        let mut store = MemoryStore::new(1);
        let mut files = MemoryFiles::default();
        let export = payload(json!({
            "records": {
                "pages": [{"uid": 10, "pid": 0}],
                "sys_file_reference": [
                    {"uid": 1, "pid": 10, "uid_local": 99, "uid_foreign": 98,
                     "tablenames": "tt_news", "fieldname": "image"}
                ]
            }
        }));

        Importer::new(&mut store, &mut files, options(50)).run(&export)?;

        let reference = store.rows_of("sys_file_reference")[0];
        assert_eq!(reference.get("uid_local"), Some(&json!(99)));
        assert_eq!(reference.get("uid_foreign"), Some(&json!(98)));
        assert_eq!(reference.get("pid"), Some(&json!(1)));
        Ok(())
    }

    #[test]
    fn excluded_tables_are_skipped_but_pages_never() -> Result<(), ImportError> {
        let mut store = MemoryStore::new(1);
        let mut files = MemoryFiles::default();
        let export = payload(json!({
            "records": {
                "pages": [{"uid": 10, "pid": 0}],
                "tt_content": [{"uid": 3, "pid": 10}],
                "sys_category": [{"uid": 4, "pid": 10}]
            }
        }));
        let mut opts = options(1);
        opts.excluded_tables =
            ["sys_category", "pages"].into_iter().map(str::to_string).collect();

        let report = Importer::new(&mut store, &mut files, opts).run(&export)?;

        assert_eq!(report.imported.get("pages"), Some(&1));
        assert_eq!(report.imported.get("tt_content"), Some(&1));
        assert_eq!(report.imported.get("sys_category"), None);
        Ok(())
    }

    #[test]
    fn storage_failure_reports_phase_table_and_record() {
        let mut store = MemoryStore::new(1);
        store.fail_on = Some(("tt_content".to_string(), 1));
        let mut files = MemoryFiles::default();
        let export = payload(json!({
            "records": {
                "pages": [{"uid": 10, "pid": 0}],
                "tt_content": [{"uid": 3, "pid": 10}, {"uid": 4, "pid": 10}, {"uid": 5, "pid": 10}]
            }
        }));

        let result = Importer::new(&mut store, &mut files, options(1)).run(&export);

        match result {
            Err(ImportError::Storage { phase, table, uid, .. }) => {
                assert_eq!(phase, ImportPhase::Records);
                assert_eq!(table, "tt_content");
                assert_eq!(uid, 4);
            }
            other => panic!("expected storage error, got {other:?}"),
        }
        assert_eq!(store.rows_of("tt_content").len(), 1);
    }

    #[test]
    fn duplicate_uid_fails_before_any_insert() {
        let mut store = MemoryStore::new(1);
        let mut files = MemoryFiles::default();
        let export = payload(json!({
            "records": {
                "pages": [{"uid": 10, "pid": 0}, {"uid": 10, "pid": 0}]
            }
        }));

        let result = Importer::new(&mut store, &mut files, options(1)).run(&export);

        assert!(matches!(result, Err(ImportError::Mapping(MappingError::Duplicate { .. }))));
        assert!(store.rows.is_empty());
    }

    #[test]
    fn files_are_decoded_and_written_with_overwrite_flag() -> Result<(), ImportError> {
        let mut store = MemoryStore::new(1);
        let mut files = MemoryFiles::default();
        files.written.insert("fileadmin/old.txt".to_string(), b"keep".to_vec());
        let export = payload(json!({
            "records": {"pages": [{"uid": 10, "pid": 0}]},
            "files": [
                {"path": "fileadmin/new.txt", "base64": "aGVsbG8="},
                {"path": "fileadmin/old.txt", "base64": "bmV3"}
            ]
        }));

        let report = Importer::new(&mut store, &mut files, options(1)).run(&export)?;

        assert_eq!(report.files_written, 1);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(files.written.get("fileadmin/new.txt"), Some(&b"hello".to_vec()));
        assert_eq!(files.written.get("fileadmin/old.txt"), Some(&b"keep".to_vec()));
        Ok(())
    }

    #[test]
    fn file_failures_abort_or_continue_by_policy() -> Result<(), ImportError> {
        let export = payload(json!({
            "records": {"pages": [{"uid": 10, "pid": 0}]},
            "files": [
                {"path": "bad.txt", "base64": "aGk="},
                {"path": "broken.txt", "base64": "not base64!"},
                {"path": "good.txt", "base64": "aGk="}
            ]
        }));

        let mut store = MemoryStore::new(1);
        let mut files = MemoryFiles::default();
        files.reject.insert("bad.txt".to_string());
        let aborted = Importer::new(&mut store, &mut files, options(1)).run(&export);
        assert!(matches!(aborted, Err(ImportError::File { ref path, .. }) if path == "bad.txt"));

        let mut store = MemoryStore::new(1);
        let mut files = MemoryFiles::default();
        files.reject.insert("bad.txt".to_string());
        let mut opts = options(1);
        opts.file_errors = FileErrorPolicy::Continue;
        let report = Importer::new(&mut store, &mut files, opts).run(&export)?;

        assert_eq!(report.files_written, 1);
        let failed = report.file_failures.iter().map(|f| f.path.as_str()).collect::<Vec<_>>();
        assert_eq!(failed, vec!["bad.txt", "broken.txt"]);
        Ok(())
    }

    #[test]
    fn import_file_rejects_missing_payload() {
        let mut store = MemoryStore::new(1);
        let mut files = MemoryFiles::default();
        let result =
            import_file(Path::new("/nonexistent/export.json"), options(1), &mut store, &mut files);
        assert!(matches!(result, Err(ImportError::PayloadNotFound(_))));
        assert!(store.calls.is_empty());
    }

    #[test]
    fn import_file_reports_payload_digest() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("export.json");
        fs::write(&path, br#"{"records": {"pages": [{"uid": 3, "pid": 0}]}, "files": []}"#)?;

        let mut store = MemoryStore::new(1);
        let mut files = MemoryFiles::default();
        let report = import_file(&path, options(9), &mut store, &mut files)?;

        assert_eq!(report.payload_sha256.as_ref().map(String::len), Some(64));
        assert_eq!(report.imported.get("pages"), Some(&1));
        Ok(())
    }
}
