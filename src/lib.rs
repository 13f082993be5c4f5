// ============================================================================
// memrepo Library
// ============================================================================
//
// Generic repositories over a snapshot-transactional store: CRUD, query
// methods derived from their names or declared with explicit query text,
// pages and slices, projections, query by example, and a unit of work that
// scopes the identity map to one transaction.
//
// ============================================================================

pub mod config;
pub mod core;
pub mod entity;
pub mod executor;
pub mod facade;
pub mod model;
pub mod page;
pub mod query;
pub mod repository;
pub mod storage;
pub mod transaction;

pub use config::RepositoryConfig;
pub use core::{Column, DataType, EntitySchema, FetchMode, RepoError, Result, Row, Value};
pub use entity::{Entity, FromValue, Related};
pub use executor::{FromProjection, Projected};
pub use facade::DataSource;
pub use page::{Page, PageRequest, Slice};
pub use query::{Direction, LockMode, Order, Params, Projection, QueryMethod, ResultKind, Sort};
pub use repository::{Example, ExampleMatcher, QueryOutcome, Repository, StringMatcher};
pub use transaction::{SessionStats, UnitOfWork};

/// Open a data source, save a member and read it back through a derived query.
///
/// ```no_run
/// use memrepo::model::{Member, demo_source, member_repository};
/// use memrepo::{RepositoryConfig, params};
///
/// # async fn demo() -> memrepo::Result<()> {
/// let source = demo_source(RepositoryConfig::default()).await?;
/// let members = member_repository(&source)?;
///
/// let mut uow = source.begin().await?;
/// members.save(&mut uow, &mut Member::new("aaa", 20)).await?;
/// let found = members
///     .find_list(&mut uow, "findByUsernameAndAgeGreaterThan", params!["aaa", 15])
///     .await?;
/// assert_eq!(found.len(), 1);
/// uow.commit().await?;
/// # Ok(())
/// # }
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
