use rusqlite::types::Value;

use crate::error::NativeError;
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
/// Returns the mapped native error if the column cannot be read.
pub fn sqlite_extract_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<RowValues, NativeError> {
    let value: Value = row.get(idx).map_err(native_error)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Map a rusqlite error onto the vendor code the `SQLite` dialect classifies.
///
/// `SQLite` has no SQLSTATE; the extended result code is used so unique and
/// primary-key violations (2067, 1555) can be told apart from other constraint failures.
#[must_use]
pub fn native_error(err: rusqlite::Error) -> NativeError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message) => NativeError::new(
            None,
            i64::from(failure.extended_code),
            message.clone().unwrap_or_else(|| err.to_string()),
        ),
        _ => NativeError::new(None, -1, err.to_string()),
    }
}
