//! SQLite destination for content imports and rule runs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use content_migrate_core::transform::RecordRepository;
use content_migrate_core::{FieldSchema, Record, RecordStore, UID_FIELD};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::debug;

/// Columns, row count and name of one destination table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: i64,
}

pub struct SqliteStore {
    conn: Connection,
    columns: BTreeMap<String, BTreeSet<String>>,
}

impl SqliteStore {
    /// Open the destination database and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;
        Self::configure(conn)
    }

    /// # Errors
    /// Returns an error when pragmas cannot be applied.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite")?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;
        Ok(Self { conn, columns: BTreeMap::new() })
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `work` inside one write transaction, committing on success and rolling back on
    /// any error.
    ///
    /// # Errors
    /// Returns the error of `work`, or a failure to begin or commit.
    pub fn in_transaction<T>(&mut self, work: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.conn.execute_batch("BEGIN IMMEDIATE").context("failed to start transaction")?;
        match work(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT").context("failed to commit transaction")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    return Err(err.context(format!("rollback failed: {rollback}")));
                }
                // cached column sets may describe tables created by the rolled back work
                self.columns.clear();
                Err(err)
            }
        }
    }

    /// Column names of `table` in declaration order. Unknown tables have none.
    ///
    /// # Errors
    /// Returns an error when the table info cannot be read.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))
            .with_context(|| format!("failed to inspect table_info for {table}"))?;
        let mut rows = stmt.query([])?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next()? {
            columns.push(row.get::<_, String>(1)?);
        }
        Ok(columns)
    }

    /// User tables of the database, sorted by name.
    ///
    /// # Errors
    /// Returns an error when the catalog cannot be read.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )
            .context("failed to prepare table listing")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list tables")?;
        Ok(names)
    }

    /// # Errors
    /// Returns an error when the table cannot be counted.
    pub fn row_count(&self, table: &str) -> Result<i64> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote_identifier(table)), [], |row| {
                row.get(0)
            })
            .with_context(|| format!("failed to count rows of {table}"))
    }

    /// Every user table with its columns and row count.
    ///
    /// # Errors
    /// Returns an error when any table cannot be inspected.
    pub fn describe(&self) -> Result<Vec<TableSchema>> {
        self.table_names()?
            .into_iter()
            .map(|name| {
                Ok(TableSchema {
                    columns: self.table_columns(&name)?,
                    rows: self.row_count(&name)?,
                    name,
                })
            })
            .collect()
    }

    /// All rows of `table` in rowid order.
    ///
    /// # Errors
    /// Returns an error when the table cannot be read.
    pub fn list_records(&self, table: &str) -> Result<Vec<Record>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} ORDER BY rowid", quote_identifier(table)))
            .with_context(|| format!("failed to read table {table}"))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (index, name) in names.iter().enumerate() {
                record.insert(name.clone(), json_from_sql(row.get_ref(index)?));
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Set one text field of the row identified by `uid`.
    ///
    /// # Errors
    /// Returns an error when the update fails or matches no row.
    pub fn update_field(&self, table: &str, uid: i64, field: &str, value: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            quote_identifier(table),
            quote_identifier(field),
            quote_identifier(UID_FIELD)
        );
        let changed = self
            .conn
            .execute(&sql, params![value, uid])
            .with_context(|| format!("failed to update {table}.{field} for uid {uid}"))?;
        if changed == 0 {
            return Err(anyhow!("{table} has no row with uid {uid}"));
        }
        Ok(())
    }
}

impl FieldSchema for SqliteStore {
    fn field_exists(&mut self, table: &str, field: &str) -> Result<bool> {
        if !self.columns.contains_key(table) {
            let columns = self.table_columns(table)?;
            debug!(table, columns = columns.len(), "cached destination columns");
            self.columns.insert(table.to_string(), columns.into_iter().collect());
        }
        Ok(self.columns.get(table).is_some_and(|columns| columns.contains(field)))
    }
}

impl RecordStore for SqliteStore {
    fn insert_record(&mut self, table: &str, record: &Record) -> Result<i64> {
        let sql = if record.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_identifier(table))
        } else {
            let columns = record.keys().map(|key| quote_identifier(key)).collect::<Vec<_>>();
            let placeholders = (1..=columns.len()).map(|n| format!("?{n}")).collect::<Vec<_>>();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_identifier(table),
                columns.join(", "),
                placeholders.join(", ")
            )
        };

        self.conn
            .execute(&sql, params_from_iter(record.values().map(sql_from_json)))
            .with_context(|| format!("failed to insert into {table}"))?;
        Ok(self.conn.last_insert_rowid())
    }
}

impl RecordRepository for SqliteStore {
    fn load_records(&mut self, table: &str) -> Result<Vec<Record>> {
        self.list_records(table)
    }

    fn update_field(&mut self, table: &str, uid: i64, field: &str, value: &str) -> Result<()> {
        SqliteStore::update_field(self, table, uid, field, value)
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_from_json(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => number.as_i64().map_or_else(
            || SqlValue::Real(number.as_f64().unwrap_or_default()),
            SqlValue::Integer,
        ),
        Value::String(text) => SqlValue::Text(text.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn json_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => Value::from(number),
        ValueRef::Real(number) => Number::from_f64(number).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
