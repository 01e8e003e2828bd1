//! Applies a [`RuleSet`] to records already stored in the destination.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{PropertyChange, PropertyPipeline, RuleSet, TransformError, TransformerRegistry};
use crate::{field_id, field_text, Record, UID_FIELD};

/// Read/write access to stored records for the rule runner.
pub trait RecordRepository {
    /// # Errors
    /// Returns an error when the table cannot be read.
    fn load_records(&mut self, table: &str) -> anyhow::Result<Vec<Record>>;

    /// # Errors
    /// Returns an error when the update fails.
    fn update_field(&mut self, table: &str, uid: i64, field: &str, value: &str)
        -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum RuleRunError {
    #[error("rules for table {table} are invalid")]
    Compile {
        table: String,
        #[source]
        source: TransformError,
    },
    #[error("failed to load records of {table}")]
    Load {
        table: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to transform {table} uid {uid}")]
    Transform {
        table: String,
        uid: i64,
        #[source]
        source: TransformError,
    },
    #[error("failed to store {table}.{field} for uid {uid}")]
    Persist {
        table: String,
        uid: i64,
        field: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedChange {
    pub uid: i64,
    #[serde(flatten)]
    pub change: PropertyChange,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableTransformSummary {
    pub records_seen: usize,
    pub records_changed: usize,
    pub fields_changed: usize,
    pub changes: Vec<AppliedChange>,
}

/// Run every table's pipeline over its stored records.
///
/// All pipelines are compiled before the first record is loaded. With `dry_run` the
/// changes are computed and reported but nothing is written back.
///
/// # Errors
/// Returns the first compile, load, transform or persist failure.
pub fn run_rules<R: RecordRepository + ?Sized>(
    registry: &TransformerRegistry,
    rules: &RuleSet,
    repository: &mut R,
    dry_run: bool,
) -> Result<BTreeMap<String, TableTransformSummary>, RuleRunError> {
    let pipelines = rules
        .tables
        .iter()
        .map(|(table, table_rules)| {
            PropertyPipeline::compile(registry, table_rules)
                .map(|pipeline| (table.as_str(), pipeline))
                .map_err(|source| RuleRunError::Compile { table: table.clone(), source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut summaries = BTreeMap::new();
    for (table, pipeline) in pipelines {
        let records = repository
            .load_records(table)
            .map_err(|source| RuleRunError::Load { table: table.to_string(), source })?;
        let mut summary = TableTransformSummary::default();

        for mut record in records {
            summary.records_seen += 1;
            let uid = field_id(&record, UID_FIELD);
            let changes = pipeline.run(&mut record).map_err(|source| RuleRunError::Transform {
                table: table.to_string(),
                uid,
                source,
            })?;
            if changes.is_empty() {
                continue;
            }

            let fields: BTreeSet<&str> = changes.iter().map(|change| change.field.as_str()).collect();
            if !dry_run {
                for field in &fields {
                    repository
                        .update_field(table, uid, field, &field_text(&record, field))
                        .map_err(|source| RuleRunError::Persist {
                            table: table.to_string(),
                            uid,
                            field: (*field).to_string(),
                            source,
                        })?;
                }
            }
            summary.records_changed += 1;
            summary.fields_changed += fields.len();
            summary
                .changes
                .extend(changes.into_iter().map(|change| AppliedChange { uid, change }));
        }

        info!(
            table,
            records_seen = summary.records_seen,
            records_changed = summary.records_changed,
            dry_run,
            "transform rules applied"
        );
        summaries.insert(table.to_string(), summary);
    }
    Ok(summaries)
}
