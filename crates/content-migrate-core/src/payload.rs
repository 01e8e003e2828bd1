//! Decoded export payload: records per table plus embedded files.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::import::ImportError;
use crate::mapping::MappingError;
use crate::{field_id, Record, PAGES_TABLE, PARENT_FIELD, UID_FIELD};

/// A binary attachment shipped inside the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: String,
    pub base64: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRecords {
    pub table: String,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportPayload {
    tables: Vec<TableRecords>,
    pub files: Vec<FileDescriptor>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    records: serde_json::Map<String, Value>,
    #[serde(default)]
    files: Vec<FileDescriptor>,
}

impl ExportPayload {
    /// Decode a JSON export.
    ///
    /// Tables keep the order of the export file. A table may be encoded as a JSON array or
    /// as an object keyed by position; every entry must be an object.
    ///
    /// # Errors
    /// Returns [`ImportError::PayloadDecode`] for malformed JSON or non-object records.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ImportError> {
        let raw: RawPayload = serde_json::from_slice(bytes)
            .map_err(|err| ImportError::PayloadDecode(err.to_string()))?;

        let mut tables = Vec::with_capacity(raw.records.len());
        for (table, rows) in raw.records {
            let entries = match rows {
                Value::Array(entries) => entries,
                Value::Object(keyed) => keyed.into_iter().map(|(_, row)| row).collect(),
                Value::Null => Vec::new(),
                other => {
                    return Err(ImportError::PayloadDecode(format!(
                        "records of table {table} must be a list, got {other}"
                    )));
                }
            };

            let mut records = Vec::with_capacity(entries.len());
            for (index, entry) in entries.into_iter().enumerate() {
                let Value::Object(record) = entry else {
                    return Err(ImportError::PayloadDecode(format!(
                        "record {index} of table {table} is not an object"
                    )));
                };
                records.push(record);
            }
            tables.push(TableRecords { table, records });
        }

        Ok(Self { tables, files: raw.files })
    }

    #[must_use]
    pub fn tables(&self) -> &[TableRecords] {
        &self.tables
    }

    /// Records of `table`; empty when the export does not carry it.
    #[must_use]
    pub fn records(&self, table: &str) -> &[Record] {
        self.tables
            .iter()
            .find(|entry| entry.table == table)
            .map(|entry| entry.records.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.tables.iter().map(|entry| entry.records.len()).sum()
    }

    /// Parent id of the first page, the point the tree is grafted from.
    ///
    /// # Errors
    /// Returns [`ImportError::MissingPages`] when the payload has no pages.
    pub fn root_parent_id(&self) -> Result<i64, ImportError> {
        self.records(PAGES_TABLE)
            .first()
            .map(|root| field_id(root, PARENT_FIELD))
            .ok_or(ImportError::MissingPages)
    }

    /// Check the invariants the import relies on before anything is written.
    ///
    /// Pages must be present, every record must carry a uid, and uids must be unique per
    /// table. The root's original parent id is reserved in `pages` as well, since it is
    /// mapped to the destination page before the tree is inserted.
    ///
    /// # Errors
    /// Returns the first violated invariant as an [`ImportError`].
    pub fn validate(&self) -> Result<(), ImportError> {
        let root_pid = self.root_parent_id()?;

        for entry in &self.tables {
            let mut seen = BTreeSet::new();
            if entry.table == PAGES_TABLE {
                seen.insert(root_pid);
            }
            for (index, record) in entry.records.iter().enumerate() {
                if !record.contains_key(UID_FIELD) {
                    return Err(ImportError::MissingSourceId { table: entry.table.clone(), index });
                }
                let uid = field_id(record, UID_FIELD);
                if !seen.insert(uid) {
                    return Err(ImportError::Mapping(MappingError::Duplicate {
                        table: entry.table.clone(),
                        old_id: uid,
                        existing: uid,
                    }));
                }
            }
        }

        Ok(())
    }
}
