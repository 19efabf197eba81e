//! Per-vendor SQL rewriting, error classification and storage conversions.
//!
//! [`Dialect`] is a closed set of vendor variants; every variant implements
//! [`DialectOps`] and the enum delegates to it. The dialect is chosen once when a
//! connection context is configured and never changes afterwards.

use std::borrow::Cow;
use std::fmt::Debug;

use lazy_static::lazy_static;

mod mssql;
mod mysql;
mod oracle;
mod postgres;
mod sqlite;
mod sql_text;

pub use mssql::MssqlDialect;
pub use mysql::MysqlDialect;
pub use oracle::OracleDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;
pub use sql_text::strip_trailing_order_by;

use crate::convert::{AttributeConverterRegistry, SemanticType, ValueType};
use crate::error::{NativeError, SqlEngineError};
use crate::types::{DatabaseFamily, RowValues};

lazy_static! {
    static ref STANDARD_CONVERTERS: AttributeConverterRegistry =
        AttributeConverterRegistry::standard();
}

/// Pagination window attached to a statement when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectOption {
    start_position: u64,
    limit: Option<u64>,
}

impl SelectOption {
    /// `start_position` is 1-based. A limit of `None` or `Some(0)` means unbounded.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Config`] when `start_position` is 0.
    pub fn new(start_position: u64, limit: Option<u64>) -> Result<Self, SqlEngineError> {
        if start_position == 0 {
            return Err(SqlEngineError::Config(
                "select start position is 1-based; 0 is not valid".to_string(),
            ));
        }
        Ok(Self {
            start_position,
            limit: limit.filter(|l| *l > 0),
        })
    }

    /// Window from a 0-based offset.
    #[must_use]
    pub fn from_offset(offset: u64, limit: Option<u64>) -> Self {
        Self {
            start_position: offset + 1,
            limit: limit.filter(|l| *l > 0),
        }
    }

    #[must_use]
    pub fn start_position(&self) -> u64 {
        self.start_position
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.start_position - 1
    }

    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Rows the driver must produce for client-side skipping (`offset + limit`).
    #[must_use]
    pub fn max_rows(&self) -> Option<u64> {
        self.limit.map(|limit| self.offset().saturating_add(limit))
    }
}

/// `(state, code)` pattern for error classification. `None` matches anything.
#[derive(Debug, Clone, Copy)]
pub struct ErrorSignature {
    pub sql_state: Option<&'static str>,
    pub code: Option<i64>,
}

impl ErrorSignature {
    #[must_use]
    pub const fn new(sql_state: Option<&'static str>, code: Option<i64>) -> Self {
        Self { sql_state, code }
    }

    #[must_use]
    pub fn matches(&self, err: &NativeError) -> bool {
        let state_ok = self
            .sql_state
            .is_none_or(|state| err.sql_state.as_deref() == Some(state));
        let code_ok = self.code.is_none_or(|code| err.code == code);
        state_ok && code_ok
    }
}

fn matches_any(table: &[ErrorSignature], err: &NativeError) -> bool {
    table.iter().any(|sig| sig.matches(err))
}

/// Behaviour every vendor dialect provides.
pub trait DialectOps: Send + Sync + Debug {
    fn family(&self) -> DatabaseFamily;

    fn supports_offset(&self) -> bool;

    fn supports_sequence(&self) -> bool;

    /// Rewrite `sql` to fetch only the window. Must be the identity when
    /// [`DialectOps::supports_offset`] is false.
    fn convert_pagination_sql(&self, sql: &str, option: &SelectOption) -> String;

    fn convert_count_sql(&self, sql: &str) -> String {
        format!("SELECT COUNT(*) AS cnt FROM ({sql}) AS sub")
    }

    fn duplicate_key_signatures(&self) -> &'static [ErrorSignature];

    fn timeout_signatures(&self) -> &'static [ErrorSignature];

    fn liveness_probe_sql(&self) -> &'static str {
        "SELECT 1"
    }

    fn sequence_next_value_sql(&self, _sequence: &str) -> Option<String> {
        None
    }

    /// Statement opening an explicit transaction; `None` when transactions are implicit.
    fn begin_transaction_sql(&self) -> Option<&'static str> {
        Some("BEGIN")
    }

    /// Representation this vendor stores a semantic type as, when it differs from the canonical one.
    fn storage_type(&self, _semantic: SemanticType) -> Option<ValueType> {
        None
    }

    /// Vendor-specific adjustment applied to every written value.
    fn adjust_for_write<'a>(&self, value: &'a RowValues) -> Cow<'a, RowValues> {
        Cow::Borrowed(value)
    }
}

/// The dialect bound to a connection context.
///
/// ```rust
/// use sql_template_middleware::prelude::*;
///
/// let dialect = Dialect::from_family(DatabaseFamily::Mssql);
/// assert_eq!(
///     dialect.convert_count_sql("SELECT A FROM T ORDER BY A"),
///     "SELECT COUNT(*) AS cnt FROM (SELECT A FROM T ) AS sub"
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres(PostgresDialect),
    Sqlite(SqliteDialect),
    Mysql(MysqlDialect),
    Mssql(MssqlDialect),
    Oracle(OracleDialect),
}

impl Dialect {
    #[must_use]
    pub fn from_family(family: DatabaseFamily) -> Self {
        match family {
            DatabaseFamily::Postgres => Dialect::Postgres(PostgresDialect),
            DatabaseFamily::Sqlite => Dialect::Sqlite(SqliteDialect),
            DatabaseFamily::Mysql => Dialect::Mysql(MysqlDialect),
            DatabaseFamily::Mssql => Dialect::Mssql(MssqlDialect),
            DatabaseFamily::Oracle => Dialect::Oracle(OracleDialect),
        }
    }

    fn ops(&self) -> &dyn DialectOps {
        match self {
            Dialect::Postgres(d) => d,
            Dialect::Sqlite(d) => d,
            Dialect::Mysql(d) => d,
            Dialect::Mssql(d) => d,
            Dialect::Oracle(d) => d,
        }
    }

    #[must_use]
    pub fn family(&self) -> DatabaseFamily {
        self.ops().family()
    }

    #[must_use]
    pub fn supports_offset(&self) -> bool {
        self.ops().supports_offset()
    }

    #[must_use]
    pub fn supports_sequence(&self) -> bool {
        self.ops().supports_sequence()
    }

    #[must_use]
    pub fn convert_pagination_sql(&self, sql: &str, option: &SelectOption) -> String {
        if !self.supports_offset() {
            return sql.to_string();
        }
        self.ops().convert_pagination_sql(sql, option)
    }

    #[must_use]
    pub fn convert_count_sql(&self, sql: &str) -> String {
        self.ops().convert_count_sql(sql)
    }

    #[must_use]
    pub fn is_duplicate_key_error(&self, err: &NativeError) -> bool {
        matches_any(self.ops().duplicate_key_signatures(), err)
    }

    #[must_use]
    pub fn is_timeout_error(&self, err: &NativeError) -> bool {
        matches_any(self.ops().timeout_signatures(), err)
    }

    #[must_use]
    pub fn liveness_probe_sql(&self) -> &'static str {
        self.ops().liveness_probe_sql()
    }

    #[must_use]
    pub fn sequence_next_value_sql(&self, sequence: &str) -> Option<String> {
        if !self.supports_sequence() {
            return None;
        }
        self.ops().sequence_next_value_sql(sequence)
    }

    #[must_use]
    pub fn begin_transaction_sql(&self) -> Option<&'static str> {
        self.ops().begin_transaction_sql()
    }

    #[must_use]
    pub fn converters(&self) -> &'static AttributeConverterRegistry {
        &STANDARD_CONVERTERS
    }

    /// Convert a canonical value to the requested storage representation.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::UnsupportedConversion`] when the pair is not in the matrix.
    pub fn convert_to_storage(
        &self,
        value: &RowValues,
        requested: ValueType,
    ) -> Result<RowValues, SqlEngineError> {
        let adjusted = self.ops().adjust_for_write(value);
        self.converters().convert(&adjusted, requested)
    }

    /// Convert a stored value to the requested representation.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::UnsupportedConversion`] when the pair is not in the matrix.
    pub fn convert_from_storage(
        &self,
        value: &RowValues,
        requested: ValueType,
    ) -> Result<RowValues, SqlEngineError> {
        self.converters().convert(value, requested)
    }

    /// Value as it is handed to the driver: vendor write adjustments plus the
    /// vendor's preferred storage representation for its semantic type.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::UnsupportedConversion`] when the preferred
    /// representation cannot hold the value.
    pub fn to_bind_value(&self, value: &RowValues) -> Result<RowValues, SqlEngineError> {
        let adjusted = self.ops().adjust_for_write(value);
        match SemanticType::of(&adjusted).and_then(|s| self.ops().storage_type(s)) {
            Some(target) => self.converters().convert(&adjusted, target),
            None => Ok(adjusted.into_owned()),
        }
    }
}

impl From<DatabaseFamily> for Dialect {
    fn from(family: DatabaseFamily) -> Self {
        Dialect::from_family(family)
    }
}
