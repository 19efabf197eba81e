//! Named-parameter SQL templates, per-vendor dialects, deadline-aware statement
//! execution and a bounded result cache.
//!
//! ```no_run
//! use sql_template_middleware::prelude::*;
//!
//! # fn main() -> Result<(), SqlEngineError> {
//! let conn = SqliteConnection::open_in_memory()?;
//! conn.execute_script("CREATE TABLE users (id INTEGER, name TEXT)")?;
//! let options = EngineOptions::new(DatabaseFamily::Sqlite);
//! let ctx = ConnectionContext::new("main", conn.boxed(), options)?;
//!
//! let mut find = ctx.statement("SELECT id, name FROM users WHERE name LIKE :name%", None)?;
//! find.bind("name", "ad")?;
//! for row in &find.retrieve()? {
//!     println!("{:?}", row.get_string("name")?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod convert;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod params;
pub mod prelude;
pub mod results;
pub mod statement;
pub mod template;
pub mod types;
pub mod unit_of_work;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::SqlEngineError;
