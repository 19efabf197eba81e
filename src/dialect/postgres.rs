use crate::types::DatabaseFamily;

use super::{DialectOps, ErrorSignature, SelectOption};

static DUPLICATE_KEY: &[ErrorSignature] = &[ErrorSignature::new(Some("23505"), None)];

// query_canceled (statement_timeout) and lock_not_available (lock_timeout)
static TIMEOUT: &[ErrorSignature] = &[
    ErrorSignature::new(Some("57014"), None),
    ErrorSignature::new(Some("55P03"), None),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PostgresDialect;

impl DialectOps for PostgresDialect {
    fn family(&self) -> DatabaseFamily {
        DatabaseFamily::Postgres
    }

    fn supports_offset(&self) -> bool {
        true
    }

    fn supports_sequence(&self) -> bool {
        true
    }

    fn convert_pagination_sql(&self, sql: &str, option: &SelectOption) -> String {
        match (option.limit(), option.offset()) {
            (Some(limit), 0) => format!("{sql} LIMIT {limit}"),
            (Some(limit), offset) => format!("{sql} LIMIT {limit} OFFSET {offset}"),
            (None, 0) => sql.to_string(),
            (None, offset) => format!("{sql} OFFSET {offset}"),
        }
    }

    fn duplicate_key_signatures(&self) -> &'static [ErrorSignature] {
        DUPLICATE_KEY
    }

    fn timeout_signatures(&self) -> &'static [ErrorSignature] {
        TIMEOUT
    }

    fn sequence_next_value_sql(&self, sequence: &str) -> Option<String> {
        Some(format!("SELECT nextval('{sequence}')"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_offset_variants() {
        let d = PostgresDialect;
        let sql = "SELECT * FROM t";
        assert_eq!(
            d.convert_pagination_sql(sql, &SelectOption::from_offset(20, Some(10))),
            "SELECT * FROM t LIMIT 10 OFFSET 20"
        );
        assert_eq!(
            d.convert_pagination_sql(sql, &SelectOption::from_offset(0, Some(10))),
            "SELECT * FROM t LIMIT 10"
        );
        assert_eq!(
            d.convert_pagination_sql(sql, &SelectOption::from_offset(5, None)),
            "SELECT * FROM t OFFSET 5"
        );
    }

    #[test]
    fn count_keeps_order_by() {
        assert_eq!(
            PostgresDialect.convert_count_sql("SELECT a FROM t ORDER BY a"),
            "SELECT COUNT(*) AS cnt FROM (SELECT a FROM t ORDER BY a) AS sub"
        );
    }
}
