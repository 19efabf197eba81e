use crate::dialect::SelectOption;
use crate::params::BoundParameters;

/// Identity of a memoized result: statement, bound values and pagination window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    statement_id: String,
    params: BoundParameters,
    start_position: u64,
    limit: Option<u64>,
}

impl CacheKey {
    #[must_use]
    pub fn new(
        statement_id: impl Into<String>,
        params: BoundParameters,
        window: Option<&SelectOption>,
    ) -> Self {
        Self {
            statement_id: statement_id.into(),
            params,
            start_position: window.map_or(1, SelectOption::start_position),
            limit: window.and_then(SelectOption::limit),
        }
    }

    #[must_use]
    pub fn statement_id(&self) -> &str {
        &self.statement_id
    }

    #[must_use]
    pub fn params(&self) -> &BoundParameters {
        &self.params
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.start_position - 1
    }

    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Keys holding a stream marker never equal anything and are never stored.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        !self.params.contains_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::StreamMarker;

    fn params(id: i64) -> BoundParameters {
        [("id", id)].into_iter().collect()
    }

    #[test]
    fn equal_when_every_part_matches() {
        let w = SelectOption::new(1, Some(10)).unwrap();
        assert_eq!(
            CacheKey::new("q", params(1), Some(&w)),
            CacheKey::new("q", params(1), Some(&w))
        );
    }

    #[test]
    fn window_and_statement_are_part_of_identity() {
        let a = SelectOption::new(1, Some(10)).unwrap();
        let b = SelectOption::new(2, Some(10)).unwrap();
        let c = SelectOption::new(1, Some(20)).unwrap();
        let base = CacheKey::new("q", params(1), Some(&a));
        assert_ne!(base, CacheKey::new("q", params(1), Some(&b)));
        assert_ne!(base, CacheKey::new("q", params(1), Some(&c)));
        assert_ne!(base, CacheKey::new("other", params(1), Some(&a)));
        assert_ne!(base, CacheKey::new("q", params(2), Some(&a)));
    }

    #[test]
    fn stream_keys_are_not_cacheable() {
        let mut p = BoundParameters::new();
        p.set("body", StreamMarker::new(vec![1_u8]));
        let key = CacheKey::new("q", p, None);
        assert!(!key.is_cacheable());
        assert_ne!(key, key.clone());
    }
}
