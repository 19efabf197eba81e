use chrono::{NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Values that can be stored in a database row or used as statement parameters.
///
/// The same enum is used for binding, for result rows and for cache snapshots:
/// ```rust
/// use sql_template_middleware::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Calendar date
    Date(NaiveDate),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Render the value for logs and error messages. Byte sequences are never dumped.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            RowValues::Int(i) => i.to_string(),
            RowValues::Float(f) => f.to_string(),
            RowValues::Text(s) => format!("'{s}'"),
            RowValues::Bool(b) => b.to_string(),
            RowValues::Date(d) => d.format("%F").to_string(),
            RowValues::Timestamp(ts) => ts.format("%F %T%.f").to_string(),
            RowValues::Null => "NULL".to_string(),
            RowValues::JSON(json) => json.to_string(),
            RowValues::Blob(_) => BINARY_PLACEHOLDER.to_string(),
        }
    }
}

pub(crate) const BINARY_PLACEHOLDER: &str = "<binary>";
pub(crate) const STREAM_PLACEHOLDER: &str = "<stream>";

pub(crate) fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    // "YYYY-MM-DD HH:MM:SS" with optional fraction, or the ISO 'T' form
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// Database families with a dialect implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseFamily {
    /// `PostgreSQL`
    Postgres,
    /// `SQLite`
    Sqlite,
    /// `MySQL` / `MariaDB`
    Mysql,
    /// SQL Server
    Mssql,
    /// Oracle
    Oracle,
}
