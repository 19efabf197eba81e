mod result_set;
pub(crate) mod row;

pub use result_set::ResultSet;
pub use row::{ResultRow, normalize_column_name};
