use std::fmt;
use std::sync::Arc;

use crate::dialect::Dialect;
use crate::driver::NativeCursor;
use crate::error::SqlEngineError;
use crate::results::row::ColumnIndex;
use crate::results::{ResultRow, ResultSet};
use crate::types::RowValues;

use super::classify_native_error;

/// Lazily fetched rows of one execution.
///
/// Client-side pagination happens here: the first `offset` rows are pulled and
/// discarded before the first row is yielded, and at most `limit` rows are yielded.
pub struct RowCursor {
    cursor: Box<dyn NativeCursor>,
    columns: Arc<ColumnIndex>,
    dialect: Dialect,
    sql: String,
    skip: u64,
    remaining: Option<u64>,
    done: bool,
}

impl fmt::Debug for RowCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowCursor")
            .field("columns", &self.columns.names())
            .field("sql", &self.sql)
            .field("skip", &self.skip)
            .field("remaining", &self.remaining)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl RowCursor {
    pub(crate) fn new(
        cursor: Box<dyn NativeCursor>,
        dialect: Dialect,
        sql: String,
        skip: u64,
        limit: Option<u64>,
    ) -> Self {
        let columns = Arc::new(ColumnIndex::new(cursor.columns().to_vec()));
        Self {
            cursor,
            columns,
            dialect,
            sql,
            skip,
            remaining: limit,
            done: false,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.columns.names()
    }

    fn fetch(&mut self) -> Result<Option<Vec<RowValues>>, SqlEngineError> {
        match self.cursor.next_row() {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(native) => {
                self.done = true;
                Err(classify_native_error(self.dialect, &self.sql, None, native))
            }
        }
    }

    fn next_values(&mut self) -> Result<Option<Vec<RowValues>>, SqlEngineError> {
        if self.done || self.remaining == Some(0) {
            return Ok(None);
        }
        while self.skip > 0 {
            if self.fetch()?.is_none() {
                return Ok(None);
            }
            self.skip -= 1;
        }
        let row = self.fetch()?;
        if row.is_some()
            && let Some(remaining) = self.remaining.as_mut()
        {
            *remaining -= 1;
        }
        Ok(row)
    }

    /// Drain the cursor into a materialized result set.
    ///
    /// # Errors
    /// Returns the classified driver error if fetching a row fails.
    pub fn into_result_set(mut self) -> Result<ResultSet, SqlEngineError> {
        let mut rs = ResultSet::new(self.columns.names().to_vec(), self.dialect);
        while let Some(values) = self.next_values()? {
            rs.add_row_values(values);
        }
        Ok(rs)
    }
}

impl Iterator for RowCursor {
    type Item = Result<ResultRow, SqlEngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_values() {
            Ok(Some(values)) => Some(Ok(ResultRow::new(
                Arc::clone(&self.columns),
                values,
                self.dialect,
            ))),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MaterializedCursor;
    use crate::error::NativeError;
    use crate::types::DatabaseFamily;

    fn cursor(rows: i64, skip: u64, limit: Option<u64>) -> RowCursor {
        let native = MaterializedCursor::new(
            vec!["N".into()],
            (1..=rows).map(|i| vec![RowValues::Int(i)]).collect(),
        );
        RowCursor::new(
            Box::new(native),
            Dialect::from_family(DatabaseFamily::Mssql),
            "SELECT n FROM t".into(),
            skip,
            limit,
        )
    }

    fn ints(c: RowCursor) -> Vec<i64> {
        c.map(|row| row.unwrap().get_i64("n").unwrap().unwrap())
            .collect()
    }

    #[test]
    fn skips_offset_then_limits() {
        assert_eq!(ints(cursor(10, 3, Some(4))), vec![4, 5, 6, 7]);
        assert_eq!(ints(cursor(10, 8, Some(4))), vec![9, 10]);
        assert_eq!(ints(cursor(3, 5, None)), Vec::<i64>::new());
        assert_eq!(ints(cursor(3, 0, None)), vec![1, 2, 3]);
    }

    #[test]
    fn materializes_window() {
        let rs = cursor(5, 1, Some(2)).into_result_set().unwrap();
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.column_names(), &["N".to_string()]);
    }

    struct Failing;

    impl NativeCursor for Failing {
        fn columns(&self) -> &[String] {
            &[]
        }

        fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, NativeError> {
            Err(NativeError::new(Some("HYT00"), 0, "query timeout"))
        }
    }

    #[test]
    fn fetch_errors_are_classified_once() {
        let mut c = RowCursor::new(
            Box::new(Failing),
            Dialect::from_family(DatabaseFamily::Mssql),
            "SELECT 1".into(),
            0,
            None,
        );
        assert!(matches!(c.next(), Some(Err(SqlEngineError::Timeout(_)))));
        assert!(c.next().is_none());
    }
}
