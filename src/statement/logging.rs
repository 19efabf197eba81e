use std::time::Instant;

use tracing::Level;

/// Target of statement start/end events.
pub const STATEMENT_TARGET: &str = "sql_template_middleware::statement";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionKind {
    Retrieve,
    Query,
    Update,
    Batch,
    Count,
}

impl ExecutionKind {
    fn as_str(self) -> &'static str {
        match self {
            ExecutionKind::Retrieve => "retrieve",
            ExecutionKind::Query => "query",
            ExecutionKind::Update => "update",
            ExecutionKind::Batch => "batch",
            ExecutionKind::Count => "count",
        }
    }
}

/// Start/end events of one execution. Inert when DEBUG is off for the target.
pub(crate) struct ExecutionLog {
    kind: ExecutionKind,
    started: Option<Instant>,
}

impl ExecutionLog {
    /// Emit the start event. `params` is only called when the event is actually recorded.
    pub(crate) fn start(
        kind: ExecutionKind,
        statement: &str,
        sql: &str,
        window: Option<(u64, Option<u64>)>,
        params: impl FnOnce() -> Option<String>,
    ) -> Self {
        if !tracing::enabled!(target: STATEMENT_TARGET, Level::DEBUG) {
            return Self {
                kind,
                started: None,
            };
        }
        let params = params();
        tracing::debug!(
            target: STATEMENT_TARGET,
            kind = kind.as_str(),
            statement,
            sql,
            params = params.as_deref(),
            offset = window.map(|(offset, _)| offset),
            limit = window.and_then(|(_, limit)| limit),
            "statement start"
        );
        Self {
            kind,
            started: Some(Instant::now()),
        }
    }

    /// Emit the end event with the row or update count, when known.
    pub(crate) fn finish(&self, count: Option<u64>) {
        if let Some(started) = self.started {
            tracing::debug!(
                target: STATEMENT_TARGET,
                kind = self.kind.as_str(),
                elapsed = ?started.elapsed(),
                count,
                "statement end"
            );
        }
    }
}
