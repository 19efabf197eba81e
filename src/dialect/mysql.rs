use crate::convert::{SemanticType, ValueType};
use crate::types::DatabaseFamily;

use super::{DialectOps, ErrorSignature, SelectOption};

static DUPLICATE_KEY: &[ErrorSignature] = &[ErrorSignature::new(Some("23000"), Some(1062))];

// max_execution_time exceeded, lock wait timeout, query interrupted
static TIMEOUT: &[ErrorSignature] = &[
    ErrorSignature::new(Some("HY000"), Some(3024)),
    ErrorSignature::new(Some("HY000"), Some(1205)),
    ErrorSignature::new(Some("70100"), Some(1317)),
];

// Largest LIMIT MySQL accepts; used when only an offset is requested.
const UNBOUNDED_LIMIT: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MysqlDialect;

impl DialectOps for MysqlDialect {
    fn family(&self) -> DatabaseFamily {
        DatabaseFamily::Mysql
    }

    fn supports_offset(&self) -> bool {
        true
    }

    fn supports_sequence(&self) -> bool {
        false
    }

    fn convert_pagination_sql(&self, sql: &str, option: &SelectOption) -> String {
        match (option.limit(), option.offset()) {
            (Some(limit), 0) => format!("{sql} LIMIT {limit}"),
            (Some(limit), offset) => format!("{sql} LIMIT {limit} OFFSET {offset}"),
            (None, 0) => sql.to_string(),
            (None, offset) => format!("{sql} LIMIT {UNBOUNDED_LIMIT} OFFSET {offset}"),
        }
    }

    fn duplicate_key_signatures(&self) -> &'static [ErrorSignature] {
        DUPLICATE_KEY
    }

    fn timeout_signatures(&self) -> &'static [ErrorSignature] {
        TIMEOUT
    }

    fn begin_transaction_sql(&self) -> Option<&'static str> {
        Some("START TRANSACTION")
    }

    fn storage_type(&self, semantic: SemanticType) -> Option<ValueType> {
        match semantic {
            SemanticType::Json => Some(ValueType::Text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_only_uses_max_limit() {
        assert_eq!(
            MysqlDialect.convert_pagination_sql("SELECT 1", &SelectOption::from_offset(7, None)),
            "SELECT 1 LIMIT 18446744073709551615 OFFSET 7"
        );
    }
}
