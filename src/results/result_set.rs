use std::sync::Arc;

use crate::dialect::Dialect;
use crate::types::RowValues;

use super::row::{ColumnIndex, ResultRow};

/// A result set from a database query
///
/// Holds the materialized rows of a query. Cloning a result set copies every
/// row value.
#[derive(Debug, Clone)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<ResultRow>,
    columns: Arc<ColumnIndex>,
    dialect: Dialect,
}

impl ResultSet {
    /// Create an empty result set for the given columns.
    #[must_use]
    pub fn new(column_names: Vec<String>, dialect: Dialect) -> ResultSet {
        ResultSet {
            results: Vec::new(),
            columns: Arc::new(ColumnIndex::new(column_names)),
            dialect,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.columns.names()
    }

    /// Add a row to the result set
    ///
    /// # Arguments
    ///
    /// * `row_values` - The values for this row, in column order
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        self.results.push(ResultRow::new(
            Arc::clone(&self.columns),
            row_values,
            self.dialect,
        ));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&ResultRow> {
        self.results.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultRow> {
        self.results.iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a ResultRow;
    type IntoIter = std::slice::Iter<'a, ResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
