//! The native driver boundary.
//!
//! The engine only needs a prepared-statement primitive and a row cursor. A
//! backend implements [`NativeConnection`], [`NativeStatement`] and
//! [`NativeCursor`]; failures are reported as [`NativeError`] and classified by
//! the dialect.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::NativeError;
use crate::types::RowValues;

/// Forward-only row cursor.
pub trait NativeCursor: Send {
    fn columns(&self) -> &[String];

    /// Next row in column order, `None` once exhausted.
    ///
    /// # Errors
    /// Returns the driver's error if fetching fails.
    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, NativeError>;
}

/// What a statement execution produced.
pub enum NativeOutcome {
    Rows(Box<dyn NativeCursor>),
    UpdateCount(u64),
}

impl std::fmt::Debug for NativeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeOutcome::Rows(cursor) => f
                .debug_tuple("Rows")
                .field(&cursor.columns())
                .finish(),
            NativeOutcome::UpdateCount(n) => f.debug_tuple("UpdateCount").field(n).finish(),
        }
    }
}

/// A prepared statement owned by the driver.
pub trait NativeStatement: Send {
    /// Bind `value` to the 1-based placeholder `index`.
    ///
    /// # Errors
    /// Returns the driver's error if the value cannot be bound.
    fn bind(&mut self, index: usize, value: &RowValues) -> Result<(), NativeError>;

    fn clear_bindings(&mut self);

    /// # Errors
    /// Returns the driver's error if execution fails.
    fn execute(&mut self) -> Result<NativeOutcome, NativeError>;

    /// Submit every entry as one unit. Returns one update count per entry.
    ///
    /// The default binds and executes entries one at a time and is only atomic if
    /// the caller already runs inside a transaction; drivers with a native batch
    /// primitive should override it.
    ///
    /// # Errors
    /// Returns the first driver error; the batch is then considered failed as a whole.
    fn execute_batch(&mut self, entries: &[Vec<RowValues>]) -> Result<Vec<u64>, NativeError> {
        let mut counts = Vec::with_capacity(entries.len());
        for entry in entries {
            self.clear_bindings();
            for (i, value) in entry.iter().enumerate() {
                self.bind(i + 1, value)?;
            }
            match self.execute()? {
                NativeOutcome::UpdateCount(n) => counts.push(n),
                NativeOutcome::Rows(_) => counts.push(0),
            }
        }
        self.clear_bindings();
        Ok(counts)
    }

    /// Cap on rows the driver produces. `None` means unbounded.
    fn set_max_rows(&mut self, max_rows: Option<u64>);

    fn query_timeout(&self) -> Option<Duration>;

    fn set_query_timeout(&mut self, timeout: Option<Duration>);

    /// # Errors
    /// Returns the driver's error if releasing the handle fails.
    fn close(&mut self) -> Result<(), NativeError>;
}

/// A physical connection able to prepare statements.
pub trait NativeConnection: Send {
    /// # Errors
    /// Returns the driver's error if the SQL cannot be prepared.
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn NativeStatement>, NativeError>;
}

/// Cursor over rows that were already fetched into memory.
#[derive(Debug, Clone, Default)]
pub struct MaterializedCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<RowValues>>,
}

impl MaterializedCursor {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<RowValues>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }
}

impl NativeCursor for MaterializedCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, NativeError> {
        Ok(self.rows.pop_front())
    }
}
