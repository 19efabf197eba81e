use crate::convert::{SemanticType, ValueType};
use crate::types::DatabaseFamily;

use super::{DialectOps, ErrorSignature, SelectOption};

// Extended result codes: SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE.
static DUPLICATE_KEY: &[ErrorSignature] = &[
    ErrorSignature::new(None, Some(1555)),
    ErrorSignature::new(None, Some(2067)),
];

// SQLITE_BUSY and its extended forms, SQLITE_INTERRUPT.
static TIMEOUT: &[ErrorSignature] = &[
    ErrorSignature::new(None, Some(5)),
    ErrorSignature::new(None, Some(261)),
    ErrorSignature::new(None, Some(517)),
    ErrorSignature::new(None, Some(9)),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SqliteDialect;

impl DialectOps for SqliteDialect {
    fn family(&self) -> DatabaseFamily {
        DatabaseFamily::Sqlite
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
            // OFFSET is only legal after a LIMIT; -1 means unbounded.
            (None, offset) => format!("{sql} LIMIT -1 OFFSET {offset}"),
        }
    }

    fn duplicate_key_signatures(&self) -> &'static [ErrorSignature] {
        DUPLICATE_KEY
    }

    fn timeout_signatures(&self) -> &'static [ErrorSignature] {
        TIMEOUT
    }

    fn storage_type(&self, semantic: SemanticType) -> Option<ValueType> {
        match semantic {
            SemanticType::Boolean => Some(ValueType::Integer),
            SemanticType::Date | SemanticType::Timestamp | SemanticType::Json => {
                Some(ValueType::Text)
            }
            _ => None,
        }
    }
}
