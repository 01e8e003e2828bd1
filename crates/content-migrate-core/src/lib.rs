//! Record import and identifier remapping for hierarchical content trees.
//!
//! An export payload carries a page tree plus dependent rows from a source environment.
//! [`import::Importer`] grafts it under a destination page, inserting records in phases so
//! that every parent and file reference can be rewritten through the run-scoped
//! [`mapping::IdMapping`]. The [`transform`] module holds the pluggable field transformers
//! used to redact or adapt values while content moves between environments.

pub mod files;
pub mod import;
pub mod mapping;
pub mod payload;
pub mod prepare;
pub mod template;
pub mod transform;
pub mod typoscript;

use serde_json::Value;

pub use files::{FileWriteError, FileWriter, FsFileWriter, WriteOutcome};
pub use import::{
    import_file, FileErrorPolicy, FileFailure, ImportError, ImportOptions, ImportPhase,
    ImportReport, Importer, RecordStore,
};
pub use mapping::{IdMapping, MappingError};
pub use payload::{ExportPayload, FileDescriptor, TableRecords};
pub use prepare::{FieldSchema, RecordPreparer};
pub use template::{PlaceholderRenderer, TemplateRenderer};
pub use transform::{
    evaluate, Evaluation, PropertyChange, PropertyPipeline, PropertyRule, PropertyTransformer,
    RuleSet, TransformError, TransformerContext, TransformerRegistry,
};
pub use typoscript::{ConfigParseError, ConfigParser, ConfigTree, TypoScriptParser};

/// One exported row: field name to scalar value, in export order.
pub type Record = serde_json::Map<String, Value>;

pub const PAGES_TABLE: &str = "pages";
pub const FILE_REFERENCE_TABLE: &str = "sys_file_reference";
pub const FILE_TABLE: &str = "sys_file";

pub const UID_FIELD: &str = "uid";
pub const PARENT_FIELD: &str = "pid";
pub const MODIFIED_FIELD: &str = "tstamp";

/// Read an identifier the way exports carry them: JSON integers or numeric strings.
///
/// Anything that is not an integer reads as `0`, which callers treat as unmapped.
#[must_use]
pub fn value_as_id(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number.as_i64().unwrap_or(0),
        Value::String(raw) => raw.trim().parse::<i64>().unwrap_or(0),
        Value::Bool(flag) => i64::from(*flag),
        Value::Null | Value::Array(_) | Value::Object(_) => 0,
    }
}

/// Identifier stored in `field`, or `0` when the field is missing.
#[must_use]
pub fn field_id(record: &Record, field: &str) -> i64 {
    record.get(field).map_or(0, value_as_id)
}

/// String form of a field value as used for comparisons, previews and templates.
#[must_use]
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// String form of `field`, empty when the record does not carry it.
#[must_use]
pub fn field_text(record: &Record, field: &str) -> String {
    record.get(field).map(value_to_text).unwrap_or_default()
}
