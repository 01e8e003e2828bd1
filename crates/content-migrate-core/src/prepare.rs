//! Shapes exported rows into insert-ready rows for the destination schema.

use anyhow::Result;
use serde_json::Value;

use crate::mapping::IdMapping;
use crate::{field_id, Record, MODIFIED_FIELD, PARENT_FIELD, UID_FIELD};

/// Destination schema lookups. Implementations may cache field sets for the run.
pub trait FieldSchema {
    /// Whether `table` in the destination has a column named `field`.
    ///
    /// # Errors
    /// Returns an error when the schema cannot be inspected.
    fn field_exists(&mut self, table: &str, field: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy)]
pub struct RecordPreparer {
    modified_at: i64,
    graft: Option<(i64, i64)>,
}

impl RecordPreparer {
    /// `modified_at` is stamped into every table that has a modification field.
    #[must_use]
    pub fn new(modified_at: i64) -> Self {
        Self { modified_at, graft: None }
    }

    /// Records whose parent is `source_pid` are moved under `destination_pid`, whatever
    /// the destination id is. Other parents go through the mapping.
    #[must_use]
    pub fn with_graft(mut self, source_pid: i64, destination_pid: i64) -> Self {
        self.graft = Some((source_pid, destination_pid));
        self
    }

    #[must_use]
    pub fn modified_at(&self) -> i64 {
        self.modified_at
    }

    /// Produce the row to insert for `record` into `table`.
    ///
    /// The source uid is dropped, the modification time overwritten, the parent reference
    /// rewritten when the mapping knows it, and any field the destination table lacks is
    /// removed. Field order follows the exported record.
    ///
    /// # Errors
    /// Returns an error when the schema lookup fails.
    pub fn prepare<S>(
        &self,
        mut record: Record,
        table: &str,
        schema: &mut S,
        mapping: &IdMapping,
    ) -> Result<Record>
    where
        S: FieldSchema + ?Sized,
    {
        if schema.field_exists(table, MODIFIED_FIELD)? {
            record.insert(MODIFIED_FIELD.to_string(), Value::from(self.modified_at));
        }

        if schema.field_exists(table, PARENT_FIELD)? {
            let old_pid = field_id(&record, PARENT_FIELD);
            let new_pid = match self.graft {
                Some((source_pid, destination_pid)) if source_pid == old_pid => {
                    Some(destination_pid)
                }
                _ => mapping.resolve_new_pid(old_pid).filter(|pid| *pid > 0),
            };
            if let Some(new_pid) = new_pid {
                record.insert(PARENT_FIELD.to_string(), Value::from(new_pid));
            }
        }

        let mut prepared = Record::new();
        for (field, value) in record {
            if field == UID_FIELD || !schema.field_exists(table, &field)? {
                continue;
            }
            prepared.insert(field, value);
        }

        Ok(prepared)
    }
}
