#![cfg(feature = "sqlite")]
use chrono::NaiveDate;
use sql_template_middleware::prelude::*;

fn sqlite_context(log_parameters: bool) -> Result<ConnectionContext, SqlEngineError> {
    let conn = SqliteConnection::open_in_memory()?;
    conn.execute_script(
        r"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            active INTEGER NOT NULL,
            joined TEXT
        );
        ",
    )?;
    let options = EngineOptions::builder(DatabaseFamily::Sqlite)
        .log_parameters(log_parameters)
        .finish()?;
    ConnectionContext::new("sqlite", conn.boxed(), options)
}

fn seed(ctx: &ConnectionContext, count: i64) -> Result<(), SqlEngineError> {
    let mut insert = ctx.statement(
        "INSERT INTO users (id, name, active, joined) VALUES (:id, :name, :active, :joined)",
        None,
    )?;
    let joined = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    for id in 1..=count {
        insert
            .bind("id", id)?
            .bind("name", format!("user_{id:02}"))?
            .bind("active", id % 2 == 0)?
            .bind("joined", joined)?;
        insert.add_batch()?;
    }
    let counts = insert.execute_batch()?;
    assert_eq!(counts.len() as i64, count);
    assert!(counts.iter().all(|c| *c == 1));
    Ok(())
}

fn ids(rs: &ResultSet) -> Vec<i64> {
    rs.iter()
        .map(|row| row.get_i64("id").unwrap().unwrap())
        .collect()
}

#[test]
fn like_parameters_escape_wildcards() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = sqlite_context(false)?;
    seed(&ctx, 3)?;
    let mut extra = ctx.statement(
        "INSERT INTO users (id, name, active) VALUES (:id, :name, 0)",
        None,
    )?;
    extra.bind("id", 100)?.bind("name", "50%_off")?;
    assert_eq!(extra.execute_update()?, 1);
    extra.bind("id", 101)?.bind("name", "500 off")?;
    assert_eq!(extra.execute_update()?, 1);

    let mut prefix =
        ctx.statement("SELECT id FROM users WHERE name LIKE :name% ORDER BY id", None)?;
    prefix.bind("name", "user_0")?;
    assert_eq!(ids(&prefix.retrieve()?), vec![1, 2, 3]);

    // '%' in the bound value must match literally
    prefix.bind("name", "50%")?;
    assert_eq!(ids(&prefix.retrieve()?), vec![100]);
    Ok(())
}

#[test]
fn values_round_trip_through_storage_form() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = sqlite_context(false)?;
    seed(&ctx, 2)?;
    let mut stmt =
        ctx.statement("SELECT id, name, active, joined FROM users WHERE id = :id", None)?;
    stmt.bind("id", 2)?;
    let row = stmt.retrieve_first()?.expect("row 2 exists");
    assert_eq!(row.get_string("name")?, Some("user_02".to_string()));
    assert_eq!(row.get_bool("active")?, Some(true));
    assert_eq!(row.get_date("joined")?, NaiveDate::from_ymd_opt(2024, 1, 15));
    assert_eq!(row.get("ACTIVE"), Some(RowValues::Int(1)));
    Ok(())
}

#[test]
fn pagination_and_count() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = sqlite_context(false)?;
    seed(&ctx, 25)?;

    let option = SelectOption::new(11, Some(5))?;
    let mut page = ctx.statement("SELECT id FROM users ORDER BY id", Some(option))?;
    assert_eq!(page.pagination(), Pagination::SqlLevel);
    assert_eq!(ids(&page.retrieve()?), vec![11, 12, 13, 14, 15]);

    let mut all = ctx.statement("SELECT id FROM users WHERE active = :active ORDER BY id", None)?;
    all.bind("active", true)?;
    assert_eq!(all.count()?, 12);
    assert_eq!(ids(&all.retrieve_range(3, 2)?), vec![6, 8]);

    let cursor = all.query()?;
    let total: i64 = cursor
        .map(|row| row.and_then(|r| r.get_i64("id")).map(Option::unwrap_or_default))
        .sum::<Result<i64, _>>()?;
    assert_eq!(total, (1..=12).map(|i| i * 2).sum::<i64>());
    Ok(())
}

#[test]
fn in_list_width_follows_bound_sequence() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = sqlite_context(false)?;
    seed(&ctx, 10)?;
    let mut stmt = ctx.statement("SELECT id FROM users WHERE id IN (:ids[]) ORDER BY id", None)?;

    stmt.bind("ids", vec![RowValues::Int(3), RowValues::Int(7)])?;
    assert_eq!(ids(&stmt.retrieve()?), vec![3, 7]);

    stmt.bind("ids", vec![RowValues::Int(1), RowValues::Int(2), RowValues::Int(9)])?;
    assert_eq!(ids(&stmt.retrieve()?), vec![1, 2, 9]);

    stmt.bind("ids", Vec::<RowValues>::new())?;
    assert!(matches!(stmt.retrieve(), Err(SqlEngineError::Binding(_))));
    Ok(())
}

#[test]
fn duplicate_key_is_classified() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = sqlite_context(true)?;
    seed(&ctx, 1)?;
    let mut insert = ctx.statement(
        "INSERT INTO users (id, name, active) VALUES (:id, :name, 1)",
        None,
    )?;
    insert.bind("id", 1)?.bind("name", "again")?;
    let err = insert.execute_update().unwrap_err();
    assert!(err.is_duplicate_key(), "{err}");
    let SqlEngineError::DuplicateKey(failure) = &err else {
        unreachable!()
    };
    assert!(failure.sql.starts_with("INSERT INTO users"));
    assert!(failure.params.as_deref().is_some_and(|p| p.contains("again")));

    // NOT NULL violation is not a duplicate key
    insert.bind("id", 2)?.bind("name", RowValues::Null)?;
    assert!(matches!(insert.execute_update(), Err(SqlEngineError::Access(_))));
    Ok(())
}

#[test]
fn failed_batch_leaves_no_rows_behind() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = sqlite_context(false)?;
    seed(&ctx, 1)?;
    let mut insert = ctx.statement(
        "INSERT INTO users (id, name, active) VALUES (:id, :name, 0)",
        None,
    )?;
    for id in [5, 6, 1] {
        insert.bind("id", id)?.bind("name", "batch")?;
        insert.add_batch()?;
    }
    assert!(insert.execute_batch().unwrap_err().is_duplicate_key());
    assert_eq!(insert.pending_batch_count(), 3);

    let mut count = ctx.statement("SELECT id FROM users", None)?;
    assert_eq!(count.count()?, 1);
    Ok(())
}

#[test]
fn file_backed_database_and_catalog() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("catalog.db");
    let sql_path = dir.path().join("users.sql");
    std::fs::write(
        &sql_path,
        "#create\nCREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)\n\n\
         #insert\nINSERT INTO users (id, name) VALUES (:id, :name)\n\n\
         #by_name\n-- lookup by exact name\nSELECT id FROM users\n WHERE name = :name\n",
    )?;

    let mut catalog = TemplateCatalog::new();
    assert_eq!(catalog.load_file(&sql_path)?, 3);

    let conn = SqliteConnection::open(&db_path)?;
    let ctx = ConnectionContext::new("file", conn.boxed(), EngineOptions::default())?;
    ctx.catalog_statement(&catalog, "users", "create", None)?
        .execute_update()?;

    let mut insert = ctx.catalog_statement(&catalog, "users", "insert", None)?;
    assert_eq!(insert.statement_id(), "users#insert");
    insert.bind("id", 7)?.bind("name", "ada")?;
    insert.execute_update()?;
    insert.close()?;

    let mut find = ctx.catalog_statement(&catalog, "users", "by_name", None)?;
    find.bind("name", "ada")?;
    assert_eq!(ids(&find.retrieve()?), vec![7]);
    Ok(())
}
