//! Query methods: descriptors, derived-name resolution, explicit query
//! parsing and the per-repository registry that ties them together.

pub mod descriptor;
pub mod pattern;
pub mod registry;
pub mod resolver;
pub mod sort;
pub mod sql;

pub use descriptor::{
    Assignment, Clause, Comparator, FieldPath, NestedRelation, Operand, ParamRef, Predicate,
    Projection, QueryDescriptor, QueryKind, Selection, SetValue,
};
pub use registry::{
    BoundParams, LockMode, Params, QueryHints, QueryMethod, QueryRegistry, QuerySource,
    ResolvedQuery, ResultKind,
};
pub use resolver::MethodNameResolver;
pub use sort::{Direction, Order, Sort};
pub use sql::SqlQueryParser;
