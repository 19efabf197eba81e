use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use crate::convert::ValueType;
use crate::dialect::Dialect;
use crate::error::SqlEngineError;
use crate::types::RowValues;

/// Canonical form used for column lookups: lowercase with `_`, `-` and spaces removed,
/// so `USER_NAME`, `user_name` and `userName` all resolve to the same column.
#[must_use]
pub fn normalize_column_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Column names of a result set plus the normalized lookup table, shared by all rows.
#[derive(Debug)]
pub(crate) struct ColumnIndex {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl ColumnIndex {
    pub(crate) fn new(names: Vec<String>) -> Self {
        let mut lookup = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            // first column wins when two names normalize to the same key
            lookup.entry(normalize_column_name(name)).or_insert(i);
        }
        Self { names, lookup }
    }

    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.lookup.get(&normalize_column_name(column)).copied()
    }
}

/// A row from a query result.
///
/// Rows are immutable. Every accessor hands out an owned copy of the value, so
/// byte buffers and date/time values read from one row are never shared between
/// two reads.
#[derive(Debug, Clone)]
pub struct ResultRow {
    columns: Arc<ColumnIndex>,
    values: Vec<RowValues>,
    dialect: Dialect,
}

impl ResultRow {
    pub(crate) fn new(columns: Arc<ColumnIndex>, values: Vec<RowValues>, dialect: Dialect) -> Self {
        Self {
            columns,
            values,
            dialect,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.columns.names()
    }

    /// Index of a column, matched case- and separator-insensitively.
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.columns.position(column_name)
    }

    /// Copy of the value in `column_name`.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.get_by_index(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<RowValues> {
        self.values.get(index).cloned()
    }

    /// Copy of every value in column order.
    #[must_use]
    pub fn values(&self) -> Vec<RowValues> {
        self.values.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of `column_name` converted to `requested` through the dialect's converters.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::IllegalUsage`] for an unknown column and
    /// [`SqlEngineError::UnsupportedConversion`] when the value cannot be converted.
    pub fn get_as(
        &self,
        column_name: &str,
        requested: ValueType,
    ) -> Result<RowValues, SqlEngineError> {
        let idx = self.get_column_index(column_name).ok_or_else(|| {
            SqlEngineError::IllegalUsage(format!(
                "no column '{column_name}' in row (columns: {})",
                self.columns.names().join(", ")
            ))
        })?;
        self.get_as_index(idx, requested)
    }

    /// Value at column `index` converted to `requested`.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::IllegalUsage`] for an index past the last column and
    /// [`SqlEngineError::UnsupportedConversion`] when the value cannot be converted.
    pub fn get_as_index(
        &self,
        index: usize,
        requested: ValueType,
    ) -> Result<RowValues, SqlEngineError> {
        let value = self.values.get(index).ok_or_else(|| {
            SqlEngineError::IllegalUsage(format!(
                "column index {index} out of range for a row of {} columns",
                self.values.len()
            ))
        })?;
        self.dialect.convert_from_storage(value, requested)
    }

    /// # Errors
    /// See [`ResultRow::get_as`].
    pub fn get_i64(&self, column_name: &str) -> Result<Option<i64>, SqlEngineError> {
        Ok(match self.get_as(column_name, ValueType::Integer)? {
            RowValues::Int(i) => Some(i),
            _ => None,
        })
    }

    /// # Errors
    /// See [`ResultRow::get_as`].
    pub fn get_string(&self, column_name: &str) -> Result<Option<String>, SqlEngineError> {
        Ok(match self.get_as(column_name, ValueType::Text)? {
            RowValues::Text(s) => Some(s),
            _ => None,
        })
    }

    /// # Errors
    /// See [`ResultRow::get_as`].
    pub fn get_bool(&self, column_name: &str) -> Result<Option<bool>, SqlEngineError> {
        Ok(match self.get_as(column_name, ValueType::Boolean)? {
            RowValues::Bool(b) => Some(b),
            _ => None,
        })
    }

    /// # Errors
    /// See [`ResultRow::get_as`].
    pub fn get_date(&self, column_name: &str) -> Result<Option<NaiveDate>, SqlEngineError> {
        Ok(match self.get_as(column_name, ValueType::Date)? {
            RowValues::Date(d) => Some(d),
            _ => None,
        })
    }

    /// # Errors
    /// See [`ResultRow::get_as`].
    pub fn get_timestamp(
        &self,
        column_name: &str,
    ) -> Result<Option<NaiveDateTime>, SqlEngineError> {
        Ok(match self.get_as(column_name, ValueType::Timestamp)? {
            RowValues::Timestamp(ts) => Some(ts),
            _ => None,
        })
    }

    /// # Errors
    /// See [`ResultRow::get_as`].
    pub fn get_bytes(&self, column_name: &str) -> Result<Option<Vec<u8>>, SqlEngineError> {
        Ok(match self.get_as(column_name, ValueType::Bytes)? {
            RowValues::Blob(b) => Some(b),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatabaseFamily;

    fn row(names: &[&str], values: Vec<RowValues>) -> ResultRow {
        let columns = Arc::new(ColumnIndex::new(
            names.iter().map(|s| (*s).to_string()).collect(),
        ));
        ResultRow::new(columns, values, Dialect::from_family(DatabaseFamily::Sqlite))
    }

    #[test]
    fn lookup_ignores_case_and_separators() {
        let r = row(&["USER_NAME", "id"], vec![RowValues::Text("ann".into()), RowValues::Int(4)]);
        assert_eq!(r.get("userName"), Some(RowValues::Text("ann".into())));
        assert_eq!(r.get("user_name"), Some(RowValues::Text("ann".into())));
        assert_eq!(r.get("ID"), Some(RowValues::Int(4)));
        assert_eq!(r.get("missing"), None);
    }

    #[test]
    fn reads_are_fresh_copies() {
        let r = row(&["data"], vec![RowValues::Blob(vec![1, 2, 3])]);
        let mut first = r.get_bytes("data").unwrap().unwrap();
        first[0] = 99;
        let second = r.get_bytes("data").unwrap().unwrap();
        assert_eq!(second, vec![1, 2, 3]);
        assert_ne!(first.as_ptr(), second.as_ptr());
    }

    #[test]
    fn converts_on_demand() {
        let r = row(
            &["active", "created"],
            vec![
                RowValues::Int(1),
                RowValues::Text("2024-01-02 03:04:05".into()),
            ],
        );
        assert_eq!(r.get_bool("active").unwrap(), Some(true));
        let ts = r.get_timestamp("created").unwrap().unwrap();
        assert_eq!(ts.to_string(), "2024-01-02 03:04:05");
        assert!(r.get_as("nope", ValueType::Text).is_err());
    }

    #[test]
    fn null_converts_to_none() {
        let r = row(&["n"], vec![RowValues::Null]);
        assert_eq!(r.get_i64("n").unwrap(), None);
    }
}
