use serde::{Deserialize, Serialize};

use crate::error::SqlEngineError;
use crate::template::{DEFAULT_LIKE_ESCAPE, SqlTemplateParser};
use crate::types::DatabaseFamily;

/// Options for a [`crate::context::ConnectionContext`].
///
/// Deserializable so an application can keep them next to its own settings:
///
/// ```json
/// { "family": "postgres", "like_escape": "!", "log_parameters": true, "transaction_timeout_secs": 30 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub family: DatabaseFamily,
    /// Escape character emitted in `ESCAPE '<c>'` clauses for like parameters.
    pub like_escape: char,
    /// Render bound parameters into log events and error messages.
    pub log_parameters: bool,
    /// Default timeout for transactions opened without an explicit one.
    pub transaction_timeout_secs: Option<i64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            family: DatabaseFamily::Sqlite,
            like_escape: DEFAULT_LIKE_ESCAPE,
            log_parameters: false,
            transaction_timeout_secs: None,
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn new(family: DatabaseFamily) -> Self {
        Self {
            family,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn builder(family: DatabaseFamily) -> EngineOptionsBuilder {
        EngineOptionsBuilder::new(family)
    }

    /// Parse options from JSON and validate them.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Config`] for malformed JSON, an unknown family or invalid values.
    pub fn from_json(text: &str) -> Result<Self, SqlEngineError> {
        let opts: EngineOptions = serde_json::from_str(text)
            .map_err(|e| SqlEngineError::Config(format!("invalid engine options: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// # Errors
    /// Returns [`SqlEngineError::Config`] if the escape character is a quote or whitespace,
    /// or the transaction timeout is not positive.
    pub fn validate(&self) -> Result<(), SqlEngineError> {
        if self.like_escape == '\'' || self.like_escape.is_whitespace() {
            return Err(SqlEngineError::Config(format!(
                "invalid like escape character {:?}",
                self.like_escape
            )));
        }
        if let Some(secs) = self.transaction_timeout_secs {
            validate_timeout_secs(secs)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn parser(&self) -> SqlTemplateParser {
        SqlTemplateParser::with_escape(self.like_escape)
    }
}

pub(crate) fn validate_timeout_secs(secs: i64) -> Result<(), SqlEngineError> {
    if secs <= 0 {
        return Err(SqlEngineError::Config(format!(
            "transaction timeout must be a positive number of seconds, got {secs}"
        )));
    }
    Ok(())
}

/// Fluent builder for [`EngineOptions`].
#[derive(Debug, Clone)]
pub struct EngineOptionsBuilder {
    opts: EngineOptions,
}

impl EngineOptionsBuilder {
    #[must_use]
    pub fn new(family: DatabaseFamily) -> Self {
        Self {
            opts: EngineOptions::new(family),
        }
    }

    #[must_use]
    pub fn like_escape(mut self, escape: char) -> Self {
        self.opts.like_escape = escape;
        self
    }

    #[must_use]
    pub fn log_parameters(mut self, enabled: bool) -> Self {
        self.opts.log_parameters = enabled;
        self
    }

    #[must_use]
    pub fn transaction_timeout_secs(mut self, secs: i64) -> Self {
        self.opts.transaction_timeout_secs = Some(secs);
        self
    }

    /// # Errors
    /// Returns [`SqlEngineError::Config`] if the collected options are invalid.
    pub fn finish(self) -> Result<EngineOptions, SqlEngineError> {
        self.opts.validate()?;
        Ok(self.opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_json_fields() {
        let opts = EngineOptions::from_json(r#"{"family":"mssql"}"#).unwrap();
        assert_eq!(opts.family, DatabaseFamily::Mssql);
        assert_eq!(opts.like_escape, '\\');
        assert!(!opts.log_parameters);
        assert_eq!(opts.transaction_timeout_secs, None);
    }

    #[test]
    fn unknown_family_is_config_error() {
        let err = EngineOptions::from_json(r#"{"family":"db2"}"#).unwrap_err();
        assert!(matches!(err, SqlEngineError::Config(_)));
    }

    #[test]
    fn non_positive_timeout_rejected() {
        for secs in [0, -5] {
            let err = EngineOptions::builder(DatabaseFamily::Postgres)
                .transaction_timeout_secs(secs)
                .finish()
                .unwrap_err();
            assert!(matches!(err, SqlEngineError::Config(_)), "{secs}");
        }
    }

    #[test]
    fn builder_sets_fields() {
        let opts = EngineOptions::builder(DatabaseFamily::Oracle)
            .like_escape('!')
            .log_parameters(true)
            .transaction_timeout_secs(30)
            .finish()
            .unwrap();
        assert_eq!(opts.parser(), SqlTemplateParser::with_escape('!'));
        assert!(opts.log_parameters);
        assert_eq!(opts.transaction_timeout_secs, Some(30));
    }

    #[test]
    fn quote_escape_rejected() {
        assert!(
            EngineOptions::builder(DatabaseFamily::Sqlite)
                .like_escape('\'')
                .finish()
                .is_err()
        );
    }
}
