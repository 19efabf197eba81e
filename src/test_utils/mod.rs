//! In-memory driver for tests: a scripted connection that replays canned
//! responses and records every call the engine makes against it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::ManualClock;
use crate::driver::{
    MaterializedCursor, NativeConnection, NativeCursor, NativeOutcome, NativeStatement,
};
use crate::error::NativeError;
use crate::types::RowValues;

/// What the next `execute` (or batch) call answers with.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<RowValues>>,
    },
    Update(u64),
    Error(NativeError),
    /// Advance the shared [`ManualClock`] by `delay`, then answer with `then`.
    AfterDelay {
        delay: chrono::Duration,
        then: Box<ScriptedResponse>,
    },
}

impl ScriptedResponse {
    #[must_use]
    pub fn rows(columns: &[&str], rows: Vec<Vec<RowValues>>) -> Self {
        ScriptedResponse::Rows {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows,
        }
    }

    /// Single-column rows of integers `from..=to`.
    #[must_use]
    pub fn int_rows(column: &str, from: i64, to: i64) -> Self {
        Self::rows(&[column], (from..=to).map(|i| vec![RowValues::Int(i)]).collect())
    }

    #[must_use]
    pub fn after_delay(self, delay: chrono::Duration) -> Self {
        ScriptedResponse::AfterDelay {
            delay,
            then: Box::new(self),
        }
    }
}

/// One call to `execute`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub sql: String,
    pub values: Vec<RowValues>,
    pub max_rows: Option<u64>,
    pub timeout: Option<Duration>,
}

/// One call to `execute_batch`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    pub sql: String,
    pub entries: Vec<Vec<RowValues>>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<ScriptedResponse>,
    prepared: Vec<String>,
    executions: Vec<ExecutionRecord>,
    batches: Vec<BatchRecord>,
    closed: usize,
    prepare_failure: Option<NativeError>,
    close_failure: Option<NativeError>,
    default_timeout: Option<Duration>,
}

/// Shared view of a [`ScriptedConnection`]: queue responses, inspect calls.
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
    clock: Option<Arc<ManualClock>>,
}

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, Script> {
        match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn push(&self, response: ScriptedResponse) -> &Self {
        self.lock().responses.push_back(response);
        self
    }

    /// Next `prepare` fails with `err`.
    pub fn fail_next_prepare(&self, err: NativeError) {
        self.lock().prepare_failure = Some(err);
    }

    /// Every `close` fails with `err` until cleared with `None`.
    pub fn fail_close(&self, err: Option<NativeError>) {
        self.lock().close_failure = err;
    }

    /// Timeout every newly prepared statement starts with.
    pub fn set_default_timeout(&self, timeout: Option<Duration>) {
        self.lock().default_timeout = timeout;
    }

    #[must_use]
    pub fn prepared(&self) -> Vec<String> {
        self.lock().prepared.clone()
    }

    #[must_use]
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.lock().executions.clone()
    }

    #[must_use]
    pub fn last_execution(&self) -> Option<ExecutionRecord> {
        self.lock().executions.last().cloned()
    }

    #[must_use]
    pub fn batches(&self) -> Vec<BatchRecord> {
        self.lock().batches.clone()
    }

    #[must_use]
    pub fn closed_count(&self) -> usize {
        self.lock().closed
    }

    #[must_use]
    pub fn pending_responses(&self) -> usize {
        self.lock().responses.len()
    }

    fn next_response(&self) -> Option<ScriptedResponse> {
        let mut response = self.lock().responses.pop_front();
        while let Some(ScriptedResponse::AfterDelay { delay, then }) = response {
            if let Some(clock) = &self.clock {
                clock.advance(delay);
            }
            response = Some(*then);
        }
        response
    }
}

/// Fake [`NativeConnection`]. Unscripted executions answer `Update(0)`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnection {
    handle: ScriptHandle,
}

impl ScriptedConnection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection whose [`ScriptedResponse::AfterDelay`] responses move `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self {
            handle: ScriptHandle {
                script: Arc::default(),
                clock: Some(clock),
            },
        }
    }

    #[must_use]
    pub fn handle(&self) -> ScriptHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn boxed(self) -> Box<dyn NativeConnection> {
        Box::new(self)
    }
}

impl NativeConnection for ScriptedConnection {
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn NativeStatement>, NativeError> {
        let mut script = self.handle.lock();
        if let Some(err) = script.prepare_failure.take() {
            return Err(err);
        }
        script.prepared.push(sql.to_string());
        let timeout = script.default_timeout;
        drop(script);
        Ok(Box::new(ScriptedStatement {
            sql: sql.to_string(),
            bindings: BTreeMap::new(),
            max_rows: None,
            timeout,
            handle: self.handle.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// Cursor that fails once its statement has been closed, like a driver that
/// fetches lazily.
struct ScriptedCursor {
    rows: MaterializedCursor,
    closed: Arc<AtomicBool>,
}

impl NativeCursor for ScriptedCursor {
    fn columns(&self) -> &[String] {
        self.rows.columns()
    }

    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, NativeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NativeError::new(None, 21, "cursor read after its statement was closed"));
        }
        self.rows.next_row()
    }
}

struct ScriptedStatement {
    sql: String,
    bindings: BTreeMap<usize, RowValues>,
    max_rows: Option<u64>,
    timeout: Option<Duration>,
    handle: ScriptHandle,
    closed: Arc<AtomicBool>,
}

impl ScriptedStatement {
    fn bound_values(&self) -> Vec<RowValues> {
        let len = self.bindings.keys().next_back().copied().unwrap_or(0);
        (1..=len)
            .map(|i| self.bindings.get(&i).cloned().unwrap_or(RowValues::Null))
            .collect()
    }
}

impl NativeStatement for ScriptedStatement {
    fn bind(&mut self, index: usize, value: &RowValues) -> Result<(), NativeError> {
        if index == 0 {
            return Err(NativeError::new(Some("07009"), 0, "placeholder index is 1-based"));
        }
        self.bindings.insert(index, value.clone());
        Ok(())
    }

    fn clear_bindings(&mut self) {
        self.bindings.clear();
    }

    fn execute(&mut self) -> Result<NativeOutcome, NativeError> {
        self.handle.lock().executions.push(ExecutionRecord {
            sql: self.sql.clone(),
            values: self.bound_values(),
            max_rows: self.max_rows,
            timeout: self.timeout,
        });
        match self.handle.next_response() {
            None => Ok(NativeOutcome::UpdateCount(0)),
            Some(ScriptedResponse::Update(n)) => Ok(NativeOutcome::UpdateCount(n)),
            Some(ScriptedResponse::Error(err)) => Err(err),
            Some(ScriptedResponse::Rows { columns, mut rows }) => {
                if let Some(cap) = self.max_rows {
                    rows.truncate(usize::try_from(cap).unwrap_or(usize::MAX));
                }
                Ok(NativeOutcome::Rows(Box::new(ScriptedCursor {
                    rows: MaterializedCursor::new(columns, rows),
                    closed: Arc::clone(&self.closed),
                })))
            }
            Some(ScriptedResponse::AfterDelay { .. }) => Ok(NativeOutcome::UpdateCount(0)),
        }
    }

    fn execute_batch(&mut self, entries: &[Vec<RowValues>]) -> Result<Vec<u64>, NativeError> {
        self.handle.lock().batches.push(BatchRecord {
            sql: self.sql.clone(),
            entries: entries.to_vec(),
            timeout: self.timeout,
        });
        match self.handle.next_response() {
            Some(ScriptedResponse::Error(err)) => Err(err),
            _ => Ok(vec![1; entries.len()]),
        }
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
        let mut script = self.handle.lock();
        if let Some(err) = &script.close_failure {
            return Err(err.clone());
        }
        script.closed += 1;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
