//! Statement execution: parameter binding, pagination, batching, deadlines.
//!
//! A [`StatementExecutor`] wraps one native handle owned by its
//! [`ConnectionContext`]. It is reusable until closed: bind, execute, bind again.

use std::fmt;
use std::sync::Arc;

use chrono::Duration as TtlDuration;
use tracing::{debug, warn};

use crate::cache::{CacheKey, ResultSetCache};
use crate::context::{ConnectionContext, HandleId};
use crate::convert::ValueType;
use crate::dialect::{Dialect, SelectOption};
use crate::driver::{MaterializedCursor, NativeOutcome, NativeStatement};
use crate::error::{DriverFailure, NativeError, SqlEngineError, TimeoutFailure};
use crate::hooks::PreBindHook;
use crate::params::{BoundParameters, ParamKey, ParamValue};
use crate::results::{ResultRow, ResultSet};
use crate::template::{BoundStatement, ParsedTemplate, bind_template};
use crate::types::RowValues;

mod cursor;
mod deadline;
mod logging;

pub use cursor::RowCursor;
pub use deadline::tightened_timeout;
pub use logging::STATEMENT_TARGET;

use deadline::{Budget, DeadlineGuard};
use logging::{ExecutionKind, ExecutionLog};

/// Map a driver error to the engine taxonomy using the dialect's tables.
pub(crate) fn classify_native_error(
    dialect: Dialect,
    sql: &str,
    params: Option<String>,
    native: NativeError,
) -> SqlEngineError {
    if dialect.is_duplicate_key_error(&native) {
        SqlEngineError::DuplicateKey(Box::new(DriverFailure {
            sql: sql.to_string(),
            params,
            native,
        }))
    } else if dialect.is_timeout_error(&native) {
        SqlEngineError::Timeout(Box::new(TimeoutFailure {
            sql: sql.to_string(),
            params,
            cause: Some(native),
        }))
    } else {
        SqlEngineError::Access(Box::new(DriverFailure {
            sql: sql.to_string(),
            params,
            native,
        }))
    }
}

/// How a paginated statement applies its window. Fixed when the statement is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// No window bound.
    None,
    /// The window is part of the SQL text.
    SqlLevel,
    /// The driver caps rows at `offset + limit` and the first `offset` rows are discarded.
    ClientSide,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    skip: u64,
    limit: Option<u64>,
    max_rows: Option<u64>,
}

impl Window {
    const ALL: Window = Window {
        skip: 0,
        limit: None,
        max_rows: None,
    };

    fn client_side(option: &SelectOption) -> Self {
        Self {
            skip: option.offset(),
            limit: option.limit(),
            max_rows: option.max_rows(),
        }
    }

    fn first_row(self) -> Self {
        let needed = self.skip + 1;
        Self {
            skip: self.skip,
            limit: Some(1),
            max_rows: Some(self.max_rows.map_or(needed, |cap| cap.min(needed))),
        }
    }
}

#[derive(Debug, Clone)]
struct CachePolicy {
    cache: Arc<ResultSetCache>,
    ttl: Option<TtlDuration>,
}

impl CachePolicy {
    fn store(&self, key: CacheKey, rows: &ResultSet) -> Result<(), SqlEngineError> {
        match self.ttl {
            Some(ttl) => self.cache.put(key, rows, self.cache.now() + ttl),
            None => self.cache.put_with_default_ttl(key, rows),
        }
    }
}

/// A prepared statement bound to a [`ConnectionContext`].
///
/// Dropping an open executor closes it; a failure to release the native handle
/// is then only logged.
pub struct StatementExecutor<'ctx> {
    ctx: &'ctx ConnectionContext,
    template: Arc<ParsedTemplate>,
    statement_id: String,
    select: Option<SelectOption>,
    pagination: Pagination,
    handle: Option<(HandleId, String)>,
    params: BoundParameters,
    batch: Vec<BoundStatement>,
    hooks: Vec<Arc<dyn PreBindHook>>,
    cache: Option<CachePolicy>,
    closed: bool,
}

impl fmt::Debug for StatementExecutor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementExecutor")
            .field("context", &self.ctx.name())
            .field("statement_id", &self.statement_id)
            .field("pagination", &self.pagination)
            .field("select", &self.select)
            .field("pending_batch", &self.batch.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<'ctx> StatementExecutor<'ctx> {
    pub(crate) fn new(
        ctx: &'ctx ConnectionContext,
        template: Arc<ParsedTemplate>,
        select: Option<SelectOption>,
    ) -> Result<Self, SqlEngineError> {
        let pagination = match &select {
            None => Pagination::None,
            Some(_) if ctx.dialect().supports_offset() => Pagination::SqlLevel,
            Some(_) => Pagination::ClientSide,
        };
        let mut executor = Self {
            ctx,
            statement_id: template.source().to_string(),
            template,
            select,
            pagination,
            handle: None,
            params: BoundParameters::new(),
            batch: Vec::new(),
            hooks: Vec::new(),
            cache: None,
            closed: false,
        };
        // Templates with `[]` slots change shape per execution and are prepared lazily.
        if !executor.template.has_deferred_arrays() {
            let sql = executor.executable_sql(executor.template.sql());
            executor.ensure_handle(&sql)?;
        }
        Ok(executor)
    }

    /// Identity used in cache keys and log events. Defaults to the template text.
    #[must_use]
    pub fn with_statement_id(mut self, statement_id: impl Into<String>) -> Self {
        self.statement_id = statement_id.into();
        self
    }

    /// Serve `retrieve` calls from `cache`, storing misses for the cache's default ttl.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ResultSetCache>) -> Self {
        self.cache = Some(CachePolicy { cache, ttl: None });
        self
    }

    /// Like [`StatementExecutor::with_cache`] with an explicit time-to-live.
    #[must_use]
    pub fn with_cache_ttl(mut self, cache: Arc<ResultSetCache>, ttl: TtlDuration) -> Self {
        self.cache = Some(CachePolicy {
            cache,
            ttl: Some(ttl),
        });
        self
    }

    /// Run `hook` on a copy of the bound parameters before every execution.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PreBindHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    #[must_use]
    pub fn statement_id(&self) -> &str {
        &self.statement_id
    }

    #[must_use]
    pub fn template(&self) -> &Arc<ParsedTemplate> {
        &self.template
    }

    #[must_use]
    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    #[must_use]
    pub fn select_option(&self) -> Option<&SelectOption> {
        self.select.as_ref()
    }

    #[must_use]
    pub fn parameters(&self) -> &BoundParameters {
        &self.params
    }

    #[must_use]
    pub fn pending_batch_count(&self) -> usize {
        self.batch.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), SqlEngineError> {
        if self.closed {
            return Err(SqlEngineError::State(format!(
                "statement '{}' is closed",
                self.statement_id
            )));
        }
        Ok(())
    }

    /// Bind one value by name or 1-based position.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::State`] once the statement is closed.
    pub fn bind(
        &mut self,
        key: impl Into<ParamKey>,
        value: impl Into<ParamValue>,
    ) -> Result<&mut Self, SqlEngineError> {
        self.ensure_open()?;
        self.params.insert(key.into(), value.into());
        Ok(self)
    }

    /// Bind every entry of `params`, replacing values bound under the same keys.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::State`] once the statement is closed.
    pub fn bind_all(&mut self, params: BoundParameters) -> Result<&mut Self, SqlEngineError> {
        self.ensure_open()?;
        for (key, value) in params.iter() {
            self.params.insert(key.clone(), value.clone());
        }
        Ok(self)
    }

    pub fn clear_parameters(&mut self) {
        self.params.clear();
    }

    fn executable_sql(&self, bound_sql: &str) -> String {
        match (&self.select, self.pagination) {
            (Some(option), Pagination::SqlLevel) => {
                self.ctx.dialect().convert_pagination_sql(bound_sql, option)
            }
            _ => bound_sql.to_string(),
        }
    }

    fn base_window(&self) -> Window {
        match (&self.select, self.pagination) {
            (Some(option), Pagination::SqlLevel) => Window {
                skip: 0,
                limit: option.limit(),
                max_rows: option.limit(),
            },
            (Some(option), Pagination::ClientSide) => Window::client_side(option),
            _ => Window::ALL,
        }
    }

    /// Handle prepared for `sql`, re-preparing when the text changed since the last execution.
    fn ensure_handle(&mut self, sql: &str) -> Result<HandleId, SqlEngineError> {
        if let Some((id, prepared)) = &self.handle
            && prepared == sql
        {
            return Ok(*id);
        }
        if let Some((old, old_sql)) = self.handle.take() {
            self.ctx.release(old, &old_sql)?;
        }
        let id = self.ctx.open_handle(sql)?;
        self.handle = Some((id, sql.to_string()));
        Ok(id)
    }

    /// Live parameters after hooks, and the template resolved against them.
    fn resolve(&self) -> Result<(BoundParameters, BoundStatement), SqlEngineError> {
        let mut params = self.params.clone();
        for hook in &self.hooks {
            hook.apply(&mut params)?;
        }
        let bound = bind_template(&self.template, &params)?;
        Ok((params, bound))
    }

    fn snapshot(&self, params: &BoundParameters) -> Option<String> {
        self.ctx
            .options()
            .log_parameters
            .then(|| params.render())
    }

    fn storage_values(&self, values: &[RowValues]) -> Result<Vec<RowValues>, SqlEngineError> {
        let dialect = self.ctx.dialect();
        values.iter().map(|v| dialect.to_bind_value(v)).collect()
    }

    fn timeout_error(
        sql: &str,
        params: Option<String>,
        cause: Option<NativeError>,
    ) -> SqlEngineError {
        SqlEngineError::Timeout(Box::new(TimeoutFailure {
            sql: sql.to_string(),
            params,
            cause,
        }))
    }

    /// Fail with a timeout, before anything is prepared, once the deadline has passed.
    fn check_deadline(
        &self,
        sql: &str,
        params: &dyn Fn() -> Option<String>,
    ) -> Result<(), SqlEngineError> {
        let deadline = self.ctx.deadline();
        let guard = DeadlineGuard::new(deadline.as_deref(), self.ctx.clock().as_ref());
        if guard.budget() == Budget::Exhausted {
            return Err(Self::timeout_error(sql, params(), None));
        }
        Ok(())
    }

    /// Run `op` on handle `id` under the transaction deadline.
    ///
    /// Before the call an exhausted deadline fails without touching the driver, and
    /// otherwise tightens the native timeout. After the call an expired deadline turns
    /// success, or a driver error the dialect sees as a timeout, into a timeout error.
    fn run_native<T>(
        &self,
        id: HandleId,
        sql: &str,
        params: &dyn Fn() -> Option<String>,
        op: impl FnOnce(&mut dyn NativeStatement) -> Result<T, NativeError>,
    ) -> Result<T, SqlEngineError> {
        let deadline = self.ctx.deadline();
        let guard = DeadlineGuard::new(deadline.as_deref(), self.ctx.clock().as_ref());
        let budget = guard.budget();
        if budget == Budget::Exhausted {
            return Err(Self::timeout_error(sql, params(), None));
        }

        let result = self.ctx.with_handle(id, |stmt| {
            if let Budget::Remaining(remaining) = budget {
                stmt.set_query_timeout(Some(tightened_timeout(stmt.query_timeout(), remaining)));
            }
            op(stmt)
        })?;

        let expired = guard.expired();
        match result {
            Ok(_) if expired => Err(Self::timeout_error(sql, params(), None)),
            Ok(value) => Ok(value),
            Err(native) if expired && self.ctx.dialect().is_timeout_error(&native) => {
                Err(Self::timeout_error(sql, params(), Some(native)))
            }
            Err(native) => Err(classify_native_error(
                self.ctx.dialect(),
                sql,
                params(),
                native,
            )),
        }
    }

    fn open_cursor(
        &mut self,
        kind: ExecutionKind,
        params: &BoundParameters,
        bound: BoundStatement,
        window: Window,
    ) -> Result<(RowCursor, ExecutionLog), SqlEngineError> {
        let values = self.storage_values(&bound.values)?;
        let sql = self.executable_sql(&bound.sql);
        self.check_deadline(&sql, &|| self.snapshot(params))?;
        let id = self.ensure_handle(&sql)?;
        let log = ExecutionLog::start(
            kind,
            &self.statement_id,
            &sql,
            Some((window.skip, window.limit)),
            || self.snapshot(params),
        );
        let outcome = self.run_native(id, &sql, &|| self.snapshot(params), |stmt| {
            stmt.clear_bindings();
            for (i, value) in values.iter().enumerate() {
                stmt.bind(i + 1, value)?;
            }
            stmt.set_max_rows(window.max_rows);
            stmt.execute()
        })?;
        let cursor = match outcome {
            NativeOutcome::Rows(native) => native,
            NativeOutcome::UpdateCount(_) => Box::new(MaterializedCursor::default()),
        };
        Ok((
            RowCursor::new(cursor, self.ctx.dialect(), sql, window.skip, window.limit),
            log,
        ))
    }

    fn fetch(
        &mut self,
        kind: ExecutionKind,
        params: &BoundParameters,
        bound: BoundStatement,
        window: Window,
    ) -> Result<ResultSet, SqlEngineError> {
        let (cursor, log) = self.open_cursor(kind, params, bound, window)?;
        let rows = cursor.into_result_set()?;
        log.finish(Some(rows.len() as u64));
        Ok(rows)
    }

    fn fetch_cached(
        &mut self,
        window: Window,
        key_window: Option<SelectOption>,
    ) -> Result<ResultSet, SqlEngineError> {
        let (params, bound) = self.resolve()?;
        let Some(policy) = self.cache.clone() else {
            return self.fetch(ExecutionKind::Retrieve, &params, bound, window);
        };
        let key = CacheKey::new(self.statement_id.clone(), params.clone(), key_window.as_ref());
        if let Some(hit) = policy.cache.get(&key)? {
            debug!(
                target: STATEMENT_TARGET,
                statement = %self.statement_id,
                rows = hit.len(),
                "cache hit",
            );
            return Ok(hit);
        }
        let rows = self.fetch(ExecutionKind::Retrieve, &params, bound, window)?;
        policy.store(key, &rows)?;
        Ok(rows)
    }

    /// Execute and materialize every row of the statement's window.
    ///
    /// # Errors
    /// Returns binding errors for unresolvable parameters, [`SqlEngineError::State`]
    /// once closed, or the classified driver/timeout error.
    pub fn retrieve(&mut self) -> Result<ResultSet, SqlEngineError> {
        self.ensure_open()?;
        let window = self.base_window();
        self.fetch_cached(window, self.select)
    }

    /// Execute and materialize at most `max_rows` rows starting at the 1-based
    /// `start_position`. Rows before the window are skipped on the client.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::IllegalUsage`] if the statement was created with a
    /// [`SelectOption`], [`SqlEngineError::Config`] for a start position of 0, otherwise
    /// as [`StatementExecutor::retrieve`].
    pub fn retrieve_range(
        &mut self,
        start_position: u64,
        max_rows: u64,
    ) -> Result<ResultSet, SqlEngineError> {
        self.ensure_open()?;
        if self.select.is_some() {
            return Err(SqlEngineError::IllegalUsage(format!(
                "statement '{}' was created with a select option; use retrieve()",
                self.statement_id
            )));
        }
        let option = SelectOption::new(start_position, Some(max_rows))?;
        self.fetch_cached(Window::client_side(&option), Some(option))
    }

    /// First row of the statement's window, if any. Never served from the cache.
    ///
    /// # Errors
    /// As [`StatementExecutor::retrieve`].
    pub fn retrieve_first(&mut self) -> Result<Option<ResultRow>, SqlEngineError> {
        self.ensure_open()?;
        let (params, bound) = self.resolve()?;
        let window = self.base_window().first_row();
        let (mut cursor, log) = self.open_cursor(ExecutionKind::Retrieve, &params, bound, window)?;
        let first = cursor.next().transpose()?;
        log.finish(Some(u64::from(first.is_some())));
        Ok(first)
    }

    /// Execute and return a lazy cursor over the window. Bypasses the cache.
    ///
    /// # Errors
    /// As [`StatementExecutor::retrieve`]; fetch errors surface from the cursor.
    pub fn query(&mut self) -> Result<RowCursor, SqlEngineError> {
        self.ensure_open()?;
        let (params, bound) = self.resolve()?;
        let window = self.base_window();
        let (cursor, log) = self.open_cursor(ExecutionKind::Query, &params, bound, window)?;
        log.finish(None);
        Ok(cursor)
    }

    /// Execute a data-modifying statement. Returns the update count.
    ///
    /// # Errors
    /// As [`StatementExecutor::retrieve`]; a duplicate key is reported as
    /// [`SqlEngineError::DuplicateKey`].
    pub fn execute_update(&mut self) -> Result<u64, SqlEngineError> {
        self.ensure_open()?;
        let (params, bound) = self.resolve()?;
        let values = self.storage_values(&bound.values)?;
        let sql = self.executable_sql(&bound.sql);
        self.check_deadline(&sql, &|| self.snapshot(&params))?;
        let id = self.ensure_handle(&sql)?;
        let log = ExecutionLog::start(ExecutionKind::Update, &self.statement_id, &sql, None, || {
            self.snapshot(&params)
        });
        let count = self.run_native(id, &sql, &|| self.snapshot(&params), |stmt| {
            stmt.clear_bindings();
            for (i, value) in values.iter().enumerate() {
                stmt.bind(i + 1, value)?;
            }
            stmt.set_max_rows(None);
            stmt.execute()
        })?;
        let count = match count {
            NativeOutcome::UpdateCount(n) => n,
            NativeOutcome::Rows(_) => 0,
        };
        log.finish(Some(count));
        Ok(count)
    }

    /// Number of rows the statement would return, ignoring its window.
    ///
    /// Runs the dialect's count rewrite on a transient handle.
    ///
    /// # Errors
    /// As [`StatementExecutor::retrieve`].
    pub fn count(&mut self) -> Result<u64, SqlEngineError> {
        self.ensure_open()?;
        let (params, bound) = self.resolve()?;
        let values = self.storage_values(&bound.values)?;
        let dialect = self.ctx.dialect();
        let sql = dialect.convert_count_sql(&bound.sql);
        self.check_deadline(&sql, &|| self.snapshot(&params))?;
        let id = self.ctx.open_handle(&sql)?;
        let log = ExecutionLog::start(ExecutionKind::Count, &self.statement_id, &sql, None, || {
            self.snapshot(&params)
        });

        let counted = self
            .run_native(id, &sql, &|| self.snapshot(&params), |stmt| {
                for (i, value) in values.iter().enumerate() {
                    stmt.bind(i + 1, value)?;
                }
                stmt.execute()
            })
            .and_then(|outcome| match outcome {
                NativeOutcome::Rows(cursor) => {
                    let mut rows = RowCursor::new(cursor, dialect, sql.clone(), 0, Some(1));
                    rows.next().transpose()
                }
                NativeOutcome::UpdateCount(_) => Ok(None),
            });
        let closed = self.ctx.release(id, &sql);

        let row = match (counted, closed) {
            (Ok(row), Ok(())) => row,
            (Ok(_), Err(close_err)) => return Err(close_err),
            (Err(err), Ok(())) => return Err(err),
            (Err(err), Err(close_err)) => {
                warn!(
                    statement = %self.statement_id,
                    error = %close_err,
                    "failed to close count statement after error",
                );
                return Err(err);
            }
        };
        let value = match row.map(|r| r.get_as_index(0, ValueType::Integer)).transpose()? {
            Some(RowValues::Int(n)) => u64::try_from(n).unwrap_or(0),
            _ => 0,
        };
        log.finish(Some(value));
        Ok(value)
    }

    /// Snapshot the live parameters as one batch entry and clear them for the next.
    ///
    /// # Errors
    /// Returns binding errors immediately, and [`SqlEngineError::Binding`] when an
    /// entry expands to different SQL than the entries before it.
    pub fn add_batch(&mut self) -> Result<(), SqlEngineError> {
        self.ensure_open()?;
        let (_, bound) = self.resolve()?;
        if let Some(first) = self.batch.first()
            && first.sql != bound.sql
        {
            return Err(SqlEngineError::Binding(format!(
                "batch entry expands to different SQL than earlier entries: {}",
                bound.sql
            )));
        }
        self.batch.push(bound);
        self.params.clear();
        Ok(())
    }

    /// Submit every pending entry as one unit. Returns one update count per entry.
    ///
    /// On success the pending count drops to zero. On failure nothing is counted
    /// as applied and the entries stay pending.
    ///
    /// # Errors
    /// Returns the classified driver or timeout error of the whole batch.
    pub fn execute_batch(&mut self) -> Result<Vec<u64>, SqlEngineError> {
        self.ensure_open()?;
        let Some(first) = self.batch.first() else {
            return Ok(Vec::new());
        };
        let sql = self.executable_sql(&first.sql);
        let entries = self
            .batch
            .iter()
            .map(|entry| self.storage_values(&entry.values))
            .collect::<Result<Vec<_>, _>>()?;
        let pending = entries.len();
        let log_parameters = self.ctx.options().log_parameters;
        let summary = || log_parameters.then(|| format!("{pending} entries"));
        self.check_deadline(&sql, &summary)?;
        let id = self.ensure_handle(&sql)?;
        let log = ExecutionLog::start(
            ExecutionKind::Batch,
            &self.statement_id,
            &sql,
            None,
            summary,
        );
        let counts = self.run_native(id, &sql, &summary, |stmt| stmt.execute_batch(&entries))?;
        self.batch.clear();
        log.finish(Some(counts.iter().sum()));
        Ok(counts)
    }

    /// Release the native handle and deregister it from the context.
    ///
    /// Closing twice, or after the context was terminated, does nothing.
    ///
    /// # Errors
    /// Returns the classified driver error if the native close fails.
    pub fn close(&mut self) -> Result<(), SqlEngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.params.clear();
        self.batch.clear();
        match self.handle.take() {
            Some((id, sql)) => self.ctx.release(id, &sql),
            None => Ok(()),
        }
    }
}

impl Drop for StatementExecutor<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(statement = %self.statement_id, error = %err, "failed to close statement");
        }
    }
}
