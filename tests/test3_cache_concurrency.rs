use std::sync::Arc;
use std::thread;

use chrono::Duration;
use sql_template_middleware::prelude::*;

const WORKERS: usize = 16;
const KEYS_PER_WORKER: i64 = 200;

fn key(statement: &str, id: i64) -> CacheKey {
    let params: BoundParameters = [("id", id)].into_iter().collect();
    CacheKey::new(statement, params, None)
}

fn rows(id: i64) -> ResultSet {
    let dialect = Dialect::from_family(DatabaseFamily::Sqlite);
    let mut rs = ResultSet::new(vec!["id".to_string()], dialect);
    rs.add_row_values(vec![RowValues::Int(id)]);
    rs
}

#[test]
fn capacity_holds_under_concurrent_puts() {
    let cache = Arc::new(ResultSetCache::new(64).unwrap());
    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for n in 0..KEYS_PER_WORKER {
                    let id = worker as i64 * KEYS_PER_WORKER + n;
                    cache.put_with_default_ttl(key("q", id), &rows(id)).unwrap();
                    assert!(cache.len().unwrap() <= 64);
                    // a hit must carry the rows stored under that key
                    if let Some(hit) = cache.get(&key("q", id)).unwrap() {
                        let first = hit.first().unwrap();
                        assert_eq!(first.get_i64("id").unwrap(), Some(id));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(cache.len().unwrap(), 64);
}

#[test]
fn readers_and_invalidation_interleave() {
    let clock = Arc::new(ManualClock::default());
    let cache = Arc::new(
        ResultSetCache::builder(1_000)
            .default_ttl(Duration::minutes(5))
            .clock(clock.clone())
            .build()
            .unwrap(),
    );
    for id in 0..500 {
        cache.put_with_default_ttl(key("hot", id), &rows(id)).unwrap();
    }

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let mut hits = 0usize;
                for id in 0..500 {
                    if worker % 4 == 0 {
                        cache.put_with_default_ttl(key("cold", id), &rows(id)).unwrap();
                    } else if cache.get(&key("hot", id)).unwrap().is_some() {
                        hits += 1;
                    }
                }
                hits
            })
        })
        .collect();
    let hits: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(hits, 12 * 500);
    assert_eq!(cache.len().unwrap(), 1_000);

    assert_eq!(cache.invalidate_statement("cold").unwrap(), 500);
    clock.advance(Duration::minutes(6));
    assert!(cache.get(&key("hot", 1)).unwrap().is_none());
}

#[test]
fn shutdown_is_seen_by_every_thread() {
    let cache = Arc::new(ResultSetCache::new(8).unwrap());
    cache.shutdown();
    let handles: Vec<_> = (0..WORKERS)
        .map(|id| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.put_with_default_ttl(key("q", id as i64), &rows(0)))
        })
        .collect();
    for handle in handles {
        assert!(matches!(
            handle.join().unwrap(),
            Err(SqlEngineError::State(_))
        ));
    }
    cache.shutdown();
}

#[cfg(feature = "sqlite")]
#[test]
fn statements_on_many_connections_share_one_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    SqliteConnection::open(&path)
        .unwrap()
        .execute_script(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);
             INSERT INTO t VALUES (1, 'one'), (2, 'two');",
        )
        .unwrap();

    let cache = Arc::new(ResultSetCache::new(16).unwrap());
    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let path = path.clone();
            thread::spawn(move || {
                let conn = SqliteConnection::open(&path).unwrap();
                let ctx = ConnectionContext::new(
                    format!("worker-{worker}"),
                    conn.boxed(),
                    EngineOptions::default(),
                )
                .unwrap();
                let mut stmt = ctx
                    .statement("SELECT v FROM t WHERE id = :id", None)
                    .unwrap()
                    .with_statement_id("t.by_id")
                    .with_cache(cache);
                stmt.bind("id", (worker % 2 + 1) as i64).unwrap();
                let rs = stmt.retrieve().unwrap();
                rs.first().unwrap().get_string("v").unwrap()
            })
        })
        .collect();
    for (worker, handle) in handles.into_iter().enumerate() {
        let expected = if worker % 2 == 0 { "one" } else { "two" };
        assert_eq!(handle.join().unwrap().as_deref(), Some(expected));
    }
    assert_eq!(cache.len().unwrap(), 2);
}
