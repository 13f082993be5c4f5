pub mod error;
pub mod types;
pub mod value;

pub use error::{RepoError, Result};
pub use types::{Column, EntitySchema, FetchMode, Relation, Row, Snapshot};
pub use value::{DataType, Value};
