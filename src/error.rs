use std::fmt;

use thiserror::Error;

/// Vendor error reported by the native driver.
///
/// The state/code pair is passed opaquely to the dialect classifiers; neither
/// field is interpreted anywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    /// Five character SQLSTATE, when the vendor reports one.
    pub sql_state: Option<String>,
    /// Vendor numeric error code.
    pub code: i64,
    pub message: String,
}

impl NativeError {
    #[must_use]
    pub fn new(sql_state: Option<&str>, code: i64, message: impl Into<String>) -> Self {
        Self {
            sql_state: sql_state.map(str::to_string),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "[{state}/{}] {}", self.code, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for NativeError {}

/// A driver failure wrapped with the statement it happened on.
#[derive(Debug, Clone)]
pub struct DriverFailure {
    pub sql: String,
    /// Rendered parameter snapshot; `None` when parameter logging is disabled.
    pub params: Option<String>,
    pub native: NativeError,
}

impl fmt::Display for DriverFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (sql: {}", self.native, self.sql)?;
        if let Some(params) = &self.params {
            write!(f, "; params: {params}")?;
        }
        f.write_str(")")
    }
}

/// Transaction deadline expiry, with the driver error that surfaced it if any.
#[derive(Debug, Clone)]
pub struct TimeoutFailure {
    pub sql: String,
    pub params: Option<String>,
    pub cause: Option<NativeError>,
}

impl fmt::Display for TimeoutFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transaction deadline exceeded (sql: {}", self.sql)?;
        if let Some(params) = &self.params {
            write!(f, "; params: {params}")?;
        }
        f.write_str(")")?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SqlEngineError {
    #[error("Template parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Parameter binding error: {0}")]
    Binding(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(Box<DriverFailure>),

    #[error("Timeout: {0}")]
    Timeout(Box<TimeoutFailure>),

    #[error("Database access error: {0}")]
    Access(Box<DriverFailure>),

    #[error("Illegal usage: {0}")]
    IllegalUsage(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Unsupported conversion from {from} to {to}")]
    UnsupportedConversion { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template catalog error: {0}")]
    Catalog(String),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),
}

impl SqlEngineError {
    /// The native error behind a driver-level failure, if this is one.
    #[must_use]
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            SqlEngineError::DuplicateKey(failure) | SqlEngineError::Access(failure) => {
                Some(&failure.native)
            }
            SqlEngineError::Timeout(failure) => failure.cause.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, SqlEngineError::Timeout(_))
    }

    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, SqlEngineError::DuplicateKey(_))
    }
}
