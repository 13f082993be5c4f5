pub mod executor;
pub mod predicate;
pub mod projection;
pub mod relations;

pub use executor::{QueryExecutor, Window};
pub use predicate::RowContext;
pub use projection::{FromProjection, Projected};
pub use relations::RelationCache;
