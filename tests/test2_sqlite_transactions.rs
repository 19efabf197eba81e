#![cfg(feature = "sqlite")]
use std::sync::Arc;

use chrono::Duration;
use sql_template_middleware::prelude::*;

fn ledger(clock: Option<Arc<ManualClock>>) -> Result<ConnectionContext, SqlEngineError> {
    let conn = SqliteConnection::open_in_memory()?;
    conn.execute_script("CREATE TABLE ledger (id INTEGER PRIMARY KEY, amount INTEGER NOT NULL)")?;
    let ctx = ConnectionContext::new("ledger", conn.boxed(), EngineOptions::default())?;
    Ok(match clock {
        Some(clock) => ctx.with_clock(clock),
        None => ctx,
    })
}

fn row_count(ctx: &ConnectionContext) -> Result<u64, SqlEngineError> {
    ctx.statement("SELECT id FROM ledger", None)?.count()
}

#[test]
fn commit_and_rollback() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = ledger(None)?;

    ctx.with_transaction(None, |ctx| {
        let mut insert =
            ctx.statement("INSERT INTO ledger (id, amount) VALUES (:id, :amount)", None)?;
        insert.bind("id", 1)?.bind("amount", 100)?;
        insert.execute_update()
    })?;
    assert_eq!(row_count(&ctx)?, 1);

    let failed: Result<(), SqlEngineError> = ctx.with_transaction(Some(30), |ctx| {
        let mut insert =
            ctx.statement("INSERT INTO ledger (id, amount) VALUES (:id, :amount)", None)?;
        insert.bind("id", 2)?.bind("amount", 5)?;
        insert.execute_update()?;
        insert.bind("id", 1)?;
        insert.execute_update().map(|_| ())
    });
    assert!(failed.unwrap_err().is_duplicate_key());
    assert!(!ctx.in_transaction());
    assert_eq!(row_count(&ctx)?, 1);
    Ok(())
}

#[test]
fn nested_begin_is_illegal() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = ledger(None)?;
    ctx.begin_transaction(None)?;
    assert!(matches!(
        ctx.begin_transaction(None),
        Err(SqlEngineError::IllegalUsage(_))
    ));
    ctx.rollback()?;
    assert!(matches!(ctx.commit(), Err(SqlEngineError::IllegalUsage(_))));
    Ok(())
}

#[test]
fn expired_deadline_stops_statements() -> Result<(), Box<dyn std::error::Error>> {
    let clock = Arc::new(ManualClock::default());
    let ctx = ledger(Some(clock.clone()))?;
    ctx.begin_transaction(Some(2))?;

    let mut insert = ctx.statement("INSERT INTO ledger (id, amount) VALUES (:id, 1)", None)?;
    insert.bind("id", 1)?;
    assert_eq!(insert.execute_update()?, 1);

    clock.advance(Duration::seconds(3));
    insert.bind("id", 2)?;
    let err = insert.execute_update().unwrap_err();
    assert!(err.is_timeout(), "{err}");

    ctx.rollback()?;
    assert_eq!(row_count(&ctx)?, 0);
    Ok(())
}

#[test]
fn ping_and_unsupported_sequences() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = ledger(None)?;
    ctx.ping()?;
    assert!(matches!(
        ctx.next_sequence_value("ledger_seq"),
        Err(SqlEngineError::IllegalUsage(_))
    ));
    Ok(())
}

#[test]
fn terminate_closes_open_statements() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = ledger(None)?;
    let mut stmt = ctx.statement("SELECT id FROM ledger", None)?;
    assert_eq!(ctx.open_handle_count(), 1);
    ctx.terminate()?;
    assert_eq!(ctx.open_handle_count(), 0);
    assert!(ctx.is_terminated());
    assert!(matches!(stmt.retrieve(), Err(SqlEngineError::State(_))));
    assert!(matches!(
        ctx.statement("SELECT 1", None),
        Err(SqlEngineError::State(_))
    ));
    Ok(())
}

#[test]
fn unit_of_work_spans_contexts() -> Result<(), Box<dyn std::error::Error>> {
    let mut work = UnitOfWork::new();
    work.insert(ledger(None)?)?;
    let other = SqliteConnection::open_in_memory()?;
    work.insert(ConnectionContext::new("audit", other.boxed(), EngineOptions::default())?)?;
    assert_eq!(work.names(), vec!["audit", "ledger"]);

    let mut insert = work
        .get("ledger")?
        .statement("INSERT INTO ledger (id, amount) VALUES (1, 1)", None)?;
    assert_eq!(insert.execute_update()?, 1);
    drop(insert);
    assert!(matches!(work.get("missing"), Err(SqlEngineError::State(_))));
    work.close()?;
    Ok(())
}
