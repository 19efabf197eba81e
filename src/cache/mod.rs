//! Bounded, expiring memo of materialized result sets.
//!
//! Eviction is strict FIFO on insertion order: reads never reorder entries and
//! overwriting an existing key keeps its position. Expired entries read as a
//! miss but stay in place until they are overwritten or evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

mod key;

pub use key::CacheKey;

use crate::clock::{Clock, SystemClock};
use crate::error::SqlEngineError;
use crate::results::ResultSet;

#[derive(Debug)]
struct CacheEntry {
    rows: ResultSet,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
    closed: bool,
}

/// Thread-safe result cache. One mutex guards the map and the FIFO queue together.
#[derive(Debug)]
pub struct ResultSetCache {
    capacity: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl ResultSetCache {
    /// Cache with the wall clock and a 60 second default time-to-live.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Config`] when `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self, SqlEngineError> {
        ResultSetCacheBuilder::new(capacity).build()
    }

    #[must_use]
    pub fn builder(capacity: usize) -> ResultSetCacheBuilder {
        ResultSetCacheBuilder::new(capacity)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>, SqlEngineError> {
        let guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.closed {
            return Err(SqlEngineError::State("result cache has been shut down".to_string()));
        }
        Ok(guard)
    }

    /// Copy of the rows stored under `key`, or `None` on a miss or an expired entry.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::State`] after [`ResultSetCache::shutdown`].
    pub fn get(&self, key: &CacheKey) -> Result<Option<ResultSet>, SqlEngineError> {
        let now = self.clock.now();
        let state = self.lock()?;
        if !key.is_cacheable() {
            return Ok(None);
        }
        Ok(state
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.rows.clone()))
    }

    /// Store a copy of `rows` until `expires_at`.
    ///
    /// Re-inserting an existing key replaces its entry. Inserting a new key into a
    /// full cache first evicts the oldest insertion. Keys carrying a stream marker
    /// are ignored.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::State`] after [`ResultSetCache::shutdown`].
    pub fn put(
        &self,
        key: CacheKey,
        rows: &ResultSet,
        expires_at: DateTime<Utc>,
    ) -> Result<(), SqlEngineError> {
        if !key.is_cacheable() {
            return self.lock().map(|_| ());
        }
        let entry = CacheEntry {
            rows: rows.clone(),
            expires_at,
        };
        let mut state = self.lock()?;
        if let Some(existing) = state.entries.get_mut(&key) {
            *existing = entry;
            return Ok(());
        }
        if state.entries.len() >= self.capacity
            && let Some(oldest) = state.order.pop_front()
        {
            state.entries.remove(&oldest);
        }
        state.order.push_back(key.clone());
        state.entries.insert(key, entry);
        Ok(())
    }

    /// [`ResultSetCache::put`] with an expiry of now plus the default time-to-live.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::State`] after [`ResultSetCache::shutdown`].
    pub fn put_with_default_ttl(
        &self,
        key: CacheKey,
        rows: &ResultSet,
    ) -> Result<(), SqlEngineError> {
        let expires_at = self.clock.now() + self.default_ttl;
        self.put(key, rows, expires_at)
    }

    /// Drop one entry. Returns whether it was present.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::State`] after [`ResultSetCache::shutdown`].
    pub fn remove(&self, key: &CacheKey) -> Result<bool, SqlEngineError> {
        let mut state = self.lock()?;
        if state.entries.remove(key).is_none() {
            return Ok(false);
        }
        if let Some(pos) = state.order.iter().position(|k| k == key) {
            state.order.remove(pos);
        }
        Ok(true)
    }

    /// Drop every entry belonging to `statement_id`. Returns how many were removed.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::State`] after [`ResultSetCache::shutdown`].
    pub fn invalidate_statement(&self, statement_id: &str) -> Result<usize, SqlEngineError> {
        let mut state = self.lock()?;
        let before = state.entries.len();
        state.entries.retain(|k, _| k.statement_id() != statement_id);
        state.order.retain(|k| k.statement_id() != statement_id);
        Ok(before - state.entries.len())
    }

    /// # Errors
    /// Returns [`SqlEngineError::State`] after [`ResultSetCache::shutdown`].
    pub fn clear(&self) -> Result<(), SqlEngineError> {
        let mut state = self.lock()?;
        state.entries.clear();
        state.order.clear();
        Ok(())
    }

    /// Number of stored entries, expired ones included.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::State`] after [`ResultSetCache::shutdown`].
    pub fn len(&self) -> Result<usize, SqlEngineError> {
        Ok(self.lock()?.entries.len())
    }

    /// # Errors
    /// Returns [`SqlEngineError::State`] after [`ResultSetCache::shutdown`].
    pub fn is_empty(&self) -> Result<bool, SqlEngineError> {
        Ok(self.lock()?.entries.is_empty())
    }

    /// Drop every entry; every later call fails with [`SqlEngineError::State`].
    /// Calling it twice is a no-op.
    pub fn shutdown(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.entries.clear();
        state.order.clear();
        state.closed = true;
    }
}

/// Builder for [`ResultSetCache`].
#[derive(Debug, Clone)]
pub struct ResultSetCacheBuilder {
    capacity: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResultSetCacheBuilder {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            default_ttl: Duration::seconds(60),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// # Errors
    /// Returns [`SqlEngineError::Config`] when the capacity is 0 or the ttl is not positive.
    pub fn build(self) -> Result<ResultSetCache, SqlEngineError> {
        if self.capacity == 0 {
            return Err(SqlEngineError::Config(
                "result cache capacity must be at least 1".to_string(),
            ));
        }
        if self.default_ttl <= Duration::zero() {
            return Err(SqlEngineError::Config(
                "result cache time-to-live must be positive".to_string(),
            ));
        }
        Ok(ResultSetCache {
            capacity: self.capacity,
            default_ttl: self.default_ttl,
            clock: self.clock,
            state: Mutex::new(CacheState::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dialect::Dialect;
    use crate::params::BoundParameters;
    use crate::types::{DatabaseFamily, RowValues};

    fn key(id: i64) -> CacheKey {
        let params: BoundParameters = [("id", id)].into_iter().collect();
        CacheKey::new("users.find", params, None)
    }

    fn rows(v: i64) -> ResultSet {
        let mut rs = ResultSet::new(vec!["v".into()], Dialect::from_family(DatabaseFamily::Sqlite));
        rs.add_row_values(vec![RowValues::Int(v)]);
        rs
    }

    fn cache(capacity: usize) -> (ResultSetCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = ResultSetCache::builder(capacity)
            .clock(clock.clone())
            .build()
            .unwrap();
        (cache, clock)
    }

    fn first_value(rs: &ResultSet) -> RowValues {
        rs.first().and_then(|r| r.get("v")).unwrap()
    }

    #[test]
    fn fifo_eviction_ignores_reads() {
        let (cache, clock) = cache(3);
        let far = clock.now() + Duration::hours(1);
        for id in 1..=3 {
            cache.put(key(id), &rows(id), far).unwrap();
        }
        // reading the oldest entry must not protect it
        assert!(cache.get(&key(1)).unwrap().is_some());
        cache.put(key(4), &rows(4), far).unwrap();

        assert!(cache.get(&key(1)).unwrap().is_none());
        for id in 2..=4 {
            assert!(cache.get(&key(id)).unwrap().is_some(), "key {id}");
        }
        assert_eq!(cache.len().unwrap(), 3);
    }

    #[test]
    fn overwrite_keeps_fifo_position() {
        let (cache, clock) = cache(2);
        let far = clock.now() + Duration::hours(1);
        cache.put(key(1), &rows(1), far).unwrap();
        cache.put(key(2), &rows(2), far).unwrap();
        cache.put(key(1), &rows(10), far).unwrap();
        assert_eq!(first_value(&cache.get(&key(1)).unwrap().unwrap()), RowValues::Int(10));

        cache.put(key(3), &rows(3), far).unwrap();
        assert!(cache.get(&key(1)).unwrap().is_none());
        assert!(cache.get(&key(2)).unwrap().is_some());
    }

    #[test]
    fn expiry_boundary() {
        let (cache, clock) = cache(4);
        let now = clock.now();
        cache.put(key(1), &rows(1), now).unwrap();

        clock.set(now - Duration::milliseconds(1));
        assert!(cache.get(&key(1)).unwrap().is_some());
        clock.set(now);
        assert!(cache.get(&key(1)).unwrap().is_none());
        clock.set(now + Duration::seconds(5));
        assert!(cache.get(&key(1)).unwrap().is_none());
        // expired entries are not removed by reads
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn default_ttl_from_injected_clock() {
        let clock = Arc::new(ManualClock::default());
        let cache = ResultSetCache::builder(2)
            .clock(clock.clone())
            .default_ttl(Duration::seconds(10))
            .build()
            .unwrap();
        cache.put_with_default_ttl(key(1), &rows(1)).unwrap();
        clock.advance(Duration::seconds(9));
        assert!(cache.get(&key(1)).unwrap().is_some());
        clock.advance(Duration::seconds(1));
        assert!(cache.get(&key(1)).unwrap().is_none());
    }

    #[test]
    fn remove_clear_and_invalidate() {
        let (cache, clock) = cache(4);
        let far = clock.now() + Duration::hours(1);
        cache.put(key(1), &rows(1), far).unwrap();
        cache.put(key(2), &rows(2), far).unwrap();
        assert!(cache.remove(&key(1)).unwrap());
        assert!(!cache.remove(&key(1)).unwrap());
        assert_eq!(cache.invalidate_statement("users.find").unwrap(), 1);
        cache.put(key(3), &rows(3), far).unwrap();
        cache.clear().unwrap();
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn stored_rows_are_snapshots() {
        let (cache, clock) = cache(2);
        let far = clock.now() + Duration::hours(1);
        let mut original = rows(1);
        cache.put(key(1), &original, far).unwrap();
        original.add_row_values(vec![RowValues::Int(2)]);
        let cached = cache.get(&key(1)).unwrap().unwrap();
        assert_eq!(cached.len(), 1);
    }

    #[test]
    fn shutdown_makes_cache_unusable() {
        let (cache, clock) = cache(2);
        cache.shutdown();
        cache.shutdown();
        assert!(matches!(cache.get(&key(1)), Err(SqlEngineError::State(_))));
        assert!(cache.put(key(1), &rows(1), clock.now()).is_err());
        assert!(cache.clear().is_err());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            ResultSetCache::new(0),
            Err(SqlEngineError::Config(_))
        ));
    }
}
