use std::borrow::Cow;

use crate::convert::{SemanticType, ValueType};
use crate::types::{DatabaseFamily, RowValues};

use super::{DialectOps, ErrorSignature, SelectOption};

// ORA-00001 unique constraint violated
static DUPLICATE_KEY: &[ErrorSignature] = &[ErrorSignature::new(Some("23000"), Some(1))];

// ORA-01013 user requested cancel, ORA-30006 resource busy (wait timeout)
static TIMEOUT: &[ErrorSignature] = &[
    ErrorSignature::new(Some("72000"), Some(1013)),
    ErrorSignature::new(Some("61000"), Some(30006)),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OracleDialect;

impl DialectOps for OracleDialect {
    fn family(&self) -> DatabaseFamily {
        DatabaseFamily::Oracle
    }

    fn supports_offset(&self) -> bool {
        true
    }

    fn supports_sequence(&self) -> bool {
        true
    }

    fn convert_pagination_sql(&self, sql: &str, option: &SelectOption) -> String {
        match (option.limit(), option.offset()) {
            (None, 0) => sql.to_string(),
            (Some(limit), 0) => format!("SELECT * FROM ({sql}) WHERE ROWNUM <= {limit}"),
            (Some(_), offset) => format!(
                "SELECT * FROM (SELECT row_.*, ROWNUM rownum_ FROM ({sql}) row_ WHERE ROWNUM <= {}) WHERE rownum_ > {offset}",
                option.max_rows().unwrap_or(u64::MAX)
            ),
            (None, offset) => format!(
                "SELECT * FROM (SELECT row_.*, ROWNUM rownum_ FROM ({sql}) row_) WHERE rownum_ > {offset}"
            ),
        }
    }

    fn convert_count_sql(&self, sql: &str) -> String {
        // Oracle does not accept AS before a table alias.
        format!("SELECT COUNT(*) AS cnt FROM ({sql}) sub")
    }

    fn duplicate_key_signatures(&self) -> &'static [ErrorSignature] {
        DUPLICATE_KEY
    }

    fn timeout_signatures(&self) -> &'static [ErrorSignature] {
        TIMEOUT
    }

    fn liveness_probe_sql(&self) -> &'static str {
        "SELECT 1 FROM DUAL"
    }

    fn sequence_next_value_sql(&self, sequence: &str) -> Option<String> {
        Some(format!("SELECT {sequence}.NEXTVAL FROM DUAL"))
    }

    fn begin_transaction_sql(&self) -> Option<&'static str> {
        None
    }

    fn storage_type(&self, semantic: SemanticType) -> Option<ValueType> {
        match semantic {
            SemanticType::Boolean => Some(ValueType::Integer),
            SemanticType::Json => Some(ValueType::Text),
            _ => None,
        }
    }

    // Oracle stores '' as NULL.
    fn adjust_for_write<'a>(&self, value: &'a RowValues) -> Cow<'a, RowValues> {
        match value {
            RowValues::Text(s) if s.is_empty() => Cow::Owned(RowValues::Null),
            _ => Cow::Borrowed(value),
        }
    }
}
