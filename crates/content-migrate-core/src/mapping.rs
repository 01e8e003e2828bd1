//! Run-scoped registry of `(table, old_id) -> new_id` associations.

use std::collections::BTreeMap;

use crate::PAGES_TABLE;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum MappingError {
    #[error("identifier mapping for {table}:{old_id} is already registered (new id {existing})")]
    Duplicate { table: String, old_id: i64, existing: i64 },
}

/// Old-identifier to new-identifier table for one import run.
///
/// Entries are write-once. A second registration for the same `(table, old_id)` means the
/// payload is corrupt or the caller is broken, so it fails instead of overwriting.
#[derive(Debug, Clone, Default)]
pub struct IdMapping {
    tables: BTreeMap<String, BTreeMap<i64, i64>>,
}

impl IdMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `old_id` in `table` now lives at `new_id`.
    ///
    /// # Errors
    /// Returns [`MappingError::Duplicate`] when `(table, old_id)` is already mapped.
    pub fn register(&mut self, table: &str, old_id: i64, new_id: i64) -> Result<(), MappingError> {
        let entries = self.tables.entry(table.to_string()).or_default();
        if let Some(existing) = entries.get(&old_id) {
            return Err(MappingError::Duplicate {
                table: table.to_string(),
                old_id,
                existing: *existing,
            });
        }
        entries.insert(old_id, new_id);
        Ok(())
    }

    /// New identifier for `old_id`, or `None` when the row was not part of this run.
    ///
    /// Unmapped is not an error: references may point at content that already exists in the
    /// destination.
    #[must_use]
    pub fn resolve(&self, table: &str, old_id: i64) -> Option<i64> {
        self.tables.get(table).and_then(|entries| entries.get(&old_id)).copied()
    }

    #[must_use]
    pub fn resolve_new_pid(&self, old_pid: i64) -> Option<i64> {
        self.resolve(PAGES_TABLE, old_pid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn registered_ids_resolve_per_table() -> Result<(), MappingError> {
        let mut mapping = IdMapping::new();
        mapping.register("pages", 10, 501)?;
        mapping.register("tt_content", 10, 77)?;

        assert_eq!(mapping.resolve("pages", 10), Some(501));
        assert_eq!(mapping.resolve("tt_content", 10), Some(77));
        assert_eq!(mapping.resolve_new_pid(10), Some(501));
        assert_eq!(mapping.len(), 2);
        Ok(())
    }

    #[test]
    fn unknown_ids_are_unmapped() {
        let mapping = IdMapping::new();
        assert!(mapping.is_empty());
        assert_eq!(mapping.resolve("pages", 3), None);
        assert_eq!(mapping.resolve_new_pid(3), None);
    }

    #[test]
    fn second_registration_for_same_key_is_rejected() -> Result<(), MappingError> {
        let mut mapping = IdMapping::new();
        mapping.register("sys_file", 4, 40)?;

        let err = mapping.register("sys_file", 4, 41);
        assert_eq!(
            err,
            Err(MappingError::Duplicate { table: "sys_file".to_string(), old_id: 4, existing: 40 })
        );
        assert_eq!(mapping.resolve("sys_file", 4), Some(40));
        Ok(())
    }

    proptest! {
        #[test]
        fn property_distinct_keys_round_trip(ids in proptest::collection::btree_set(1_i64..10_000, 1..64)) {
            let mut mapping = IdMapping::new();
            for old_id in &ids {
                prop_assert!(mapping.register("tt_content", *old_id, old_id + 100_000).is_ok());
            }
            for old_id in &ids {
                prop_assert_eq!(mapping.resolve("tt_content", *old_id), Some(old_id + 100_000));
            }
            prop_assert_eq!(mapping.len(), ids.len());
        }

        #[test]
        fn property_any_repeated_key_fails(ids in proptest::collection::vec(1_i64..32, 2..48)) {
            let mut mapping = IdMapping::new();
            let mut seen = BTreeSet::new();
            for old_id in ids {
                let result = mapping.register("pages", old_id, 1);
                prop_assert_eq!(result.is_err(), !seen.insert(old_id));
            }
        }
    }
}
