//! Convenient imports for common functionality.

pub use crate::cache::{CacheKey, ResultSetCache, ResultSetCacheBuilder};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{EngineOptions, EngineOptionsBuilder};
pub use crate::context::{ConnectionContext, TransactionDeadline};
pub use crate::convert::{AttributeConverterRegistry, SemanticType, ValueType};
pub use crate::dialect::{Dialect, SelectOption};
pub use crate::driver::{NativeConnection, NativeCursor, NativeOutcome, NativeStatement};
pub use crate::error::{NativeError, SqlEngineError};
pub use crate::hooks::{AuditFieldsHook, PreBindHook};
pub use crate::params::{BoundParameters, ParamKey, ParamValue, StreamMarker};
pub use crate::results::{ResultRow, ResultSet};
pub use crate::statement::{Pagination, RowCursor, StatementExecutor};
pub use crate::template::catalog::TemplateCatalog;
pub use crate::template::{ParsedTemplate, SqlTemplateParser};
pub use crate::types::{DatabaseFamily, RowValues};
pub use crate::unit_of_work::UnitOfWork;

#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteConnection;
