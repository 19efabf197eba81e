//! `SQLite` driver adapter over `rusqlite`.
//!
//! - params: conversion from engine values to `rusqlite` values
//! - query: row extraction and native error mapping
//!
//! Statements are re-fetched from the connection's prepared-statement cache on
//! every execution, so a handle never borrows the connection between calls.

pub mod params;
pub mod query;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::types::Value;

use crate::driver::{MaterializedCursor, NativeConnection, NativeOutcome, NativeStatement};
use crate::error::{NativeError, SqlEngineError};
use crate::types::RowValues;

pub use params::row_value_to_sqlite_value;
pub use query::{native_error, sqlite_extract_value};

type SharedConnection = Arc<Mutex<Connection>>;

fn lock(conn: &SharedConnection) -> MutexGuard<'_, Connection> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A `rusqlite` connection usable as a [`NativeConnection`].
#[derive(Debug, Clone)]
pub struct SqliteConnection {
    conn: SharedConnection,
}

impl SqliteConnection {
    /// # Errors
    /// Returns [`SqlEngineError::SqliteError`] if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqlEngineError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// # Errors
    /// Returns [`SqlEngineError::SqliteError`] if the database cannot be opened.
    pub fn open_in_memory() -> Result<Self, SqlEngineError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run several `;`-separated statements without parameters, e.g. a schema.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::SqliteError`] if any statement fails.
    pub fn execute_script(&self, sql: &str) -> Result<(), SqlEngineError> {
        lock(&self.conn).execute_batch(sql)?;
        Ok(())
    }

    #[must_use]
    pub fn boxed(self) -> Box<dyn NativeConnection> {
        Box::new(self)
    }
}

impl NativeConnection for SqliteConnection {
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn NativeStatement>, NativeError> {
        // compile once up front so syntax errors surface at prepare time
        lock(&self.conn).prepare_cached(sql).map_err(native_error)?;
        Ok(Box::new(SqliteStatement {
            conn: Arc::clone(&self.conn),
            sql: sql.to_string(),
            bindings: BTreeMap::new(),
            max_rows: None,
            timeout: None,
        }))
    }
}

struct SqliteStatement {
    conn: SharedConnection,
    sql: String,
    bindings: BTreeMap<usize, Value>,
    max_rows: Option<u64>,
    timeout: Option<Duration>,
}

impl SqliteStatement {
    fn apply_timeout(&self, conn: &Connection) -> Result<(), NativeError> {
        match self.timeout {
            Some(timeout) => conn.busy_timeout(timeout).map_err(native_error),
            None => Ok(()),
        }
    }
}

fn bind_all(
    stmt: &mut rusqlite::Statement<'_>,
    values: impl IntoIterator<Item = (usize, Value)>,
) -> Result<(), NativeError> {
    for (index, value) in values {
        stmt.raw_bind_parameter(index, value).map_err(native_error)?;
    }
    Ok(())
}

impl NativeStatement for SqliteStatement {
    fn bind(&mut self, index: usize, value: &RowValues) -> Result<(), NativeError> {
        if index == 0 {
            return Err(NativeError::new(None, 25, "placeholder index is 1-based"));
        }
        self.bindings.insert(index, row_value_to_sqlite_value(value));
        Ok(())
    }

    fn clear_bindings(&mut self) {
        self.bindings.clear();
    }

    fn execute(&mut self) -> Result<NativeOutcome, NativeError> {
        let conn = lock(&self.conn);
        self.apply_timeout(&conn)?;
        let mut stmt = conn.prepare_cached(&self.sql).map_err(native_error)?;
        bind_all(&mut stmt, self.bindings.iter().map(|(i, v)| (*i, v.clone())))?;

        if stmt.column_count() == 0 {
            let changed = stmt.raw_execute().map_err(native_error)?;
            return Ok(NativeOutcome::UpdateCount(changed as u64));
        }

        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect();
        let col_count = columns.len();
        let cap = self.max_rows.unwrap_or(u64::MAX);
        let mut rows = Vec::new();
        let mut cursor = stmt.raw_query();
        while (rows.len() as u64) < cap {
            let Some(row) = cursor.next().map_err(native_error)? else {
                break;
            };
            let mut values = Vec::with_capacity(col_count);
            for idx in 0..col_count {
                values.push(sqlite_extract_value(row, idx)?);
            }
            rows.push(values);
        }
        Ok(NativeOutcome::Rows(Box::new(MaterializedCursor::new(
            columns, rows,
        ))))
    }

    /// All entries run inside one savepoint; any failure rolls every entry back.
    fn execute_batch(&mut self, entries: &[Vec<RowValues>]) -> Result<Vec<u64>, NativeError> {
        let mut conn = lock(&self.conn);
        self.apply_timeout(&conn)?;
        let savepoint = conn.savepoint().map_err(native_error)?;
        let mut counts = Vec::with_capacity(entries.len());
        {
            let mut stmt = savepoint.prepare_cached(&self.sql).map_err(native_error)?;
            for entry in entries {
                bind_all(
                    &mut stmt,
                    entry
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (i + 1, row_value_to_sqlite_value(v))),
                )?;
                let changed = stmt.raw_execute().map_err(native_error)?;
                counts.push(changed as u64);
            }
        }
        savepoint.commit().map_err(native_error)?;
        Ok(counts)
    }

    fn set_max_rows(&mut self, max_rows: Option<u64>) {
        self.max_rows = max_rows;
    }

    fn query_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn close(&mut self) -> Result<(), NativeError> {
        self.bindings.clear();
        Ok(())
    }
}
