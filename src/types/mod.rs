mod arg;
mod row;
mod sql_value;
pub mod type_desc;

pub use arg::Arg;
pub use row::{RawQueryResult, ResultCursor};
pub use sql_value::SqlValue;
pub use type_desc::{
    downcast, ty, CollectFn, Extracted, ScalarKind, SqlType, Ty, TypeDesc, TypeKind,
};
