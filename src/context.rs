//! A logical connection bound to one dialect, owning every native statement
//! handle created through it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{EngineOptions, validate_timeout_secs};
use crate::convert::ValueType;
use crate::dialect::{Dialect, SelectOption};
use crate::driver::{NativeConnection, NativeOutcome, NativeStatement};
use crate::error::{DriverFailure, NativeError, SqlEngineError};
use crate::statement::{StatementExecutor, classify_native_error};
use crate::template::catalog::TemplateCatalog;
use crate::template::{ParsedTemplate, SqlTemplateParser};
use crate::types::RowValues;

/// Identifier of a native statement handle inside its owning context.
pub type HandleId = u64;

/// Absolute instant after which statements of a transaction must fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionDeadline {
    begin: DateTime<Utc>,
    timeout: Duration,
}

impl TransactionDeadline {
    #[must_use]
    pub fn new(begin: DateTime<Utc>, timeout: Duration) -> Self {
        Self { begin, timeout }
    }

    /// # Errors
    /// Returns [`SqlEngineError::Config`] if `secs` is zero or negative.
    pub fn from_secs(begin: DateTime<Utc>, secs: i64) -> Result<Self, SqlEngineError> {
        validate_timeout_secs(secs)?;
        Ok(Self::new(begin, Duration::seconds(secs)))
    }

    #[must_use]
    pub fn begin(&self) -> DateTime<Utc> {
        self.begin
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.begin + self.timeout
    }

    /// Time left at `now`; zero or negative once expired.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at() - now
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now) <= Duration::zero()
    }
}

#[derive(Debug, Default)]
struct TransactionState {
    deadline: Option<Arc<TransactionDeadline>>,
}

#[derive(Default)]
struct HandleRegistry {
    next_id: HandleId,
    open: HashMap<HandleId, Box<dyn NativeStatement>>,
}

/// One logical connection: its dialect, options, native connection and open handles.
///
/// Statements borrow the context, so none can outlive it. [`ConnectionContext::terminate`]
/// (also run on drop) closes whatever handles are still open.
pub struct ConnectionContext {
    name: String,
    dialect: Dialect,
    options: EngineOptions,
    parser: SqlTemplateParser,
    connection: Mutex<Box<dyn NativeConnection>>,
    handles: Mutex<HandleRegistry>,
    templates: Mutex<HashMap<String, Arc<ParsedTemplate>>>,
    transaction: Mutex<Option<TransactionState>>,
    clock: Arc<dyn Clock>,
    terminated: AtomicBool,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("name", &self.name)
            .field("dialect", &self.dialect)
            .field("open_handles", &self.open_handle_count())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ConnectionContext {
    /// # Errors
    /// Returns [`SqlEngineError::Config`] if `options` are invalid.
    pub fn new(
        name: impl Into<String>,
        connection: Box<dyn NativeConnection>,
        options: EngineOptions,
    ) -> Result<Self, SqlEngineError> {
        options.validate()?;
        Ok(Self {
            name: name.into(),
            dialect: Dialect::from_family(options.family),
            parser: options.parser(),
            options,
            connection: Mutex::new(connection),
            handles: Mutex::new(HandleRegistry::default()),
            templates: Mutex::new(HashMap::new()),
            transaction: Mutex::new(None),
            clock: Arc::new(SystemClock),
            terminated: AtomicBool::new(false),
        })
    }

    /// Replace the clock used for transaction deadlines.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), SqlEngineError> {
        if self.is_terminated() {
            return Err(SqlEngineError::State(format!(
                "connection context '{}' has been terminated",
                self.name
            )));
        }
        Ok(())
    }

    /// Parse `sql` with this context's parser, reusing an earlier parse of the same text.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Parse`] for malformed parameter syntax.
    pub fn template(&self, sql: &str) -> Result<Arc<ParsedTemplate>, SqlEngineError> {
        if let Some(found) = lock(&self.templates).get(sql) {
            return Ok(Arc::clone(found));
        }
        let parsed = Arc::new(self.parser.parse(sql)?);
        Ok(Arc::clone(
            lock(&self.templates)
                .entry(sql.to_string())
                .or_insert(parsed),
        ))
    }

    /// Prepare a statement from template text.
    ///
    /// With a [`SelectOption`] the pagination strategy is fixed here: SQL-level when
    /// the dialect supports offsets, client-side skipping otherwise.
    ///
    /// # Errors
    /// Returns a parse error for a bad template, [`SqlEngineError::State`] after
    /// termination, or the classified driver error if preparing fails.
    pub fn statement(
        &self,
        sql: &str,
        select: Option<SelectOption>,
    ) -> Result<StatementExecutor<'_>, SqlEngineError> {
        let template = self.template(sql)?;
        self.statement_for(template, select)
    }

    /// Prepare a statement from an already parsed template.
    ///
    /// # Errors
    /// See [`ConnectionContext::statement`].
    pub fn statement_for(
        &self,
        template: Arc<ParsedTemplate>,
        select: Option<SelectOption>,
    ) -> Result<StatementExecutor<'_>, SqlEngineError> {
        self.ensure_open()?;
        StatementExecutor::new(self, template, select)
    }

    /// Prepare a catalog statement. Its statement id is `resource#statement`.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Catalog`] if the statement is unknown, otherwise as
    /// [`ConnectionContext::statement`].
    pub fn catalog_statement(
        &self,
        catalog: &TemplateCatalog,
        resource_id: &str,
        statement_id: &str,
        select: Option<SelectOption>,
    ) -> Result<StatementExecutor<'_>, SqlEngineError> {
        let template = catalog.template(resource_id, statement_id)?;
        Ok(self
            .statement_for(template, select)?
            .with_statement_id(TemplateCatalog::statement_key(resource_id, statement_id)))
    }

    /// Prepare `sql` on the native connection and register the handle.
    pub(crate) fn open_handle(&self, sql: &str) -> Result<HandleId, SqlEngineError> {
        self.ensure_open()?;
        self.prepare_handle(sql)
    }

    fn prepare_handle(&self, sql: &str) -> Result<HandleId, SqlEngineError> {
        let stmt = lock(&self.connection)
            .prepare(sql)
            .map_err(|native| self.wrap_native(sql, native))?;
        let mut registry = lock(&self.handles);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.open.insert(id, stmt);
        debug!(context = %self.name, handle = id, "opened statement handle");
        Ok(id)
    }

    /// Run `op` against an open handle.
    pub(crate) fn with_handle<T>(
        &self,
        id: HandleId,
        op: impl FnOnce(&mut dyn NativeStatement) -> T,
    ) -> Result<T, SqlEngineError> {
        let mut registry = lock(&self.handles);
        let Some(stmt) = registry.open.get_mut(&id) else {
            return Err(SqlEngineError::State(format!(
                "statement handle {id} is no longer open on '{}'",
                self.name
            )));
        };
        Ok(op(stmt.as_mut()))
    }

    /// Close and deregister a handle. Releasing a handle that is already gone is a no-op.
    ///
    /// # Errors
    /// Returns the classified driver error if the native close fails; the handle is
    /// deregistered either way.
    pub(crate) fn release(&self, id: HandleId, sql: &str) -> Result<(), SqlEngineError> {
        let stmt = lock(&self.handles).open.remove(&id);
        match stmt {
            Some(mut stmt) => stmt.close().map_err(|native| self.wrap_native(sql, native)),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn open_handle_count(&self) -> usize {
        lock(&self.handles).open.len()
    }

    fn wrap_native(&self, sql: &str, native: NativeError) -> SqlEngineError {
        classify_native_error(self.dialect, sql, None, native)
    }

    /// Deadline of the running transaction, if it has one.
    #[must_use]
    pub fn deadline(&self) -> Option<Arc<TransactionDeadline>> {
        lock(&self.transaction)
            .as_ref()
            .and_then(|tx| tx.deadline.clone())
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        lock(&self.transaction).is_some()
    }

    /// Prepare, run and close a parameterless statement outside deadline control.
    ///
    /// Returns the first row when the statement produced rows. It is fetched before
    /// the handle is released.
    fn run_direct(&self, sql: &str) -> Result<Option<Vec<RowValues>>, SqlEngineError> {
        self.ensure_open()?;
        self.run_direct_unchecked(sql)
    }

    fn run_direct_unchecked(&self, sql: &str) -> Result<Option<Vec<RowValues>>, SqlEngineError> {
        let id = self.prepare_handle(sql)?;
        let outcome = self
            .with_handle(id, |stmt| match stmt.execute()? {
                NativeOutcome::Rows(mut cursor) => cursor.next_row(),
                NativeOutcome::UpdateCount(_) => Ok(None),
            })?
            .map_err(|native| self.wrap_native(sql, native));
        let closed = self.release(id, sql);
        match (outcome, closed) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                warn!(
                    context = %self.name,
                    error = %close_err,
                    "failed to close statement after error",
                );
                Err(err)
            }
        }
    }

    /// Start a transaction. `timeout_secs` falls back to the configured default;
    /// without either the transaction has no deadline.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Config`] for a non-positive timeout,
    /// [`SqlEngineError::IllegalUsage`] if a transaction is already running, or the
    /// classified driver error from the begin statement.
    pub fn begin_transaction(&self, timeout_secs: Option<i64>) -> Result<(), SqlEngineError> {
        self.ensure_open()?;
        let timeout_secs = timeout_secs.or(self.options.transaction_timeout_secs);
        if let Some(secs) = timeout_secs {
            validate_timeout_secs(secs)?;
        }
        if self.in_transaction() {
            return Err(SqlEngineError::IllegalUsage(format!(
                "transaction already running on '{}'",
                self.name
            )));
        }
        if let Some(sql) = self.dialect.begin_transaction_sql() {
            self.run_direct(sql)?;
        }
        let begin = self.clock.now();
        let deadline = match timeout_secs {
            Some(secs) => Some(Arc::new(TransactionDeadline::from_secs(begin, secs)?)),
            None => None,
        };
        debug!(context = %self.name, timeout_secs, "transaction started");
        *lock(&self.transaction) = Some(TransactionState { deadline });
        Ok(())
    }

    /// # Errors
    /// Returns [`SqlEngineError::IllegalUsage`] without a running transaction, or the
    /// classified driver error. The transaction is over either way.
    pub fn commit(&self) -> Result<(), SqlEngineError> {
        self.finish_transaction("COMMIT")
    }

    /// # Errors
    /// See [`ConnectionContext::commit`].
    pub fn rollback(&self) -> Result<(), SqlEngineError> {
        self.finish_transaction("ROLLBACK")
    }

    fn finish_transaction(&self, sql: &'static str) -> Result<(), SqlEngineError> {
        if lock(&self.transaction).take().is_none() {
            return Err(SqlEngineError::IllegalUsage(format!(
                "{sql} without a running transaction on '{}'",
                self.name
            )));
        }
        debug!(context = %self.name, "{sql}");
        self.run_direct(sql).map(|_| ())
    }

    /// Run `body` inside a transaction: commit on success, roll back on error.
    ///
    /// A rollback failure after `body` failed is logged and the original error returned.
    ///
    /// # Errors
    /// Returns the error of `body`, of begin, or of commit.
    pub fn with_transaction<T>(
        &self,
        timeout_secs: Option<i64>,
        body: impl FnOnce(&ConnectionContext) -> Result<T, SqlEngineError>,
    ) -> Result<T, SqlEngineError> {
        self.begin_transaction(timeout_secs)?;
        match body(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(
                        context = %self.name,
                        error = %rollback_err,
                        "rollback failed after error",
                    );
                }
                Err(err)
            }
        }
    }

    /// Run the dialect's liveness probe.
    ///
    /// # Errors
    /// Returns the classified driver error if the probe fails.
    pub fn ping(&self) -> Result<(), SqlEngineError> {
        self.run_direct(self.dialect.liveness_probe_sql())
            .map(|_| ())
    }

    /// Fetch the next value of `sequence`.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::IllegalUsage`] when the dialect has no sequences, or the
    /// classified driver error.
    pub fn next_sequence_value(&self, sequence: &str) -> Result<i64, SqlEngineError> {
        let Some(sql) = self.dialect.sequence_next_value_sql(sequence) else {
            return Err(SqlEngineError::IllegalUsage(format!(
                "{:?} does not support sequences",
                self.dialect.family()
            )));
        };
        let Some(row) = self.run_direct(&sql)? else {
            return Err(SqlEngineError::State(format!("sequence query returned no rows: {sql}")));
        };
        let first = row.into_iter().next().unwrap_or(RowValues::Null);
        match self.dialect.convert_from_storage(&first, ValueType::Integer)? {
            RowValues::Int(value) => Ok(value),
            _ => Err(SqlEngineError::State(format!("sequence query returned NULL: {sql}"))),
        }
    }

    /// Roll back a running transaction, close every handle still open and refuse
    /// further work.
    ///
    /// Every step is attempted. The first failure is returned, later ones are
    /// logged. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns the first driver error raised while rolling back or closing.
    pub fn terminate(&self) -> Result<(), SqlEngineError> {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        let rolled_back = lock(&self.transaction).take().is_some();
        if rolled_back && let Err(err) = self.run_direct_unchecked("ROLLBACK") {
            first_error = Some(err);
        }
        let handles: Vec<_> = lock(&self.handles).open.drain().collect();
        debug!(context = %self.name, open = handles.len(), rolled_back, "terminating context");

        for (id, mut stmt) in handles {
            if let Err(native) = stmt.close() {
                let err = SqlEngineError::Access(Box::new(DriverFailure {
                    sql: format!("<close handle {id}>"),
                    params: None,
                    native,
                }));
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    warn!(
                        context = %self.name,
                        handle = id,
                        error = %err,
                        "failed to close statement handle",
                    );
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            warn!(context = %self.name, error = %err, "failed to terminate connection context");
        }
    }
}
