use crate::convert::{SemanticType, ValueType};
use crate::types::DatabaseFamily;

use super::{DialectOps, ErrorSignature, SelectOption, strip_trailing_order_by};

// 2627: PRIMARY KEY/UNIQUE constraint, 2601: unique index
static DUPLICATE_KEY: &[ErrorSignature] = &[
    ErrorSignature::new(Some("23000"), Some(2627)),
    ErrorSignature::new(Some("23000"), Some(2601)),
];

// client query timeout and lock request timeout
static TIMEOUT: &[ErrorSignature] = &[
    ErrorSignature::new(Some("HYT00"), None),
    ErrorSignature::new(None, Some(-2)),
    ErrorSignature::new(None, Some(1222)),
];

/// SQL Server. `OFFSET .. FETCH` needs an `ORDER BY`, so windows are applied
/// client-side instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MssqlDialect;

impl DialectOps for MssqlDialect {
    fn family(&self) -> DatabaseFamily {
        DatabaseFamily::Mssql
    }

    fn supports_offset(&self) -> bool {
        false
    }

    fn supports_sequence(&self) -> bool {
        true
    }

    fn convert_pagination_sql(&self, sql: &str, _option: &SelectOption) -> String {
        sql.to_string()
    }

    fn convert_count_sql(&self, sql: &str) -> String {
        // ORDER BY is rejected inside a derived table.
        format!(
            "SELECT COUNT(*) AS cnt FROM ({}) AS sub",
            strip_trailing_order_by(sql)
        )
    }

    fn duplicate_key_signatures(&self) -> &'static [ErrorSignature] {
        DUPLICATE_KEY
    }

    fn timeout_signatures(&self) -> &'static [ErrorSignature] {
        TIMEOUT
    }

    fn sequence_next_value_sql(&self, sequence: &str) -> Option<String> {
        Some(format!("SELECT NEXT VALUE FOR {sequence}"))
    }

    fn begin_transaction_sql(&self) -> Option<&'static str> {
        Some("BEGIN TRANSACTION")
    }

    fn storage_type(&self, semantic: SemanticType) -> Option<ValueType> {
        match semantic {
            SemanticType::Json => Some(ValueType::Text),
            _ => None,
        }
    }
}
