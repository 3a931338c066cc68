mod cell;
mod row;
mod sql_value;

pub use cell::{value, value_at_first_row, ColumnLocator, FromCell};
pub use row::{Cell, RawQueryResult, ResultSet};
pub use sql_value::{BoundParams, SqlValue};
