use crate::core::{EntitySchema, Result, Row, Snapshot};
use async_trait::async_trait;
use std::time::Duration;

/// Storage engine trait - the persistence provider the repository layer sits on.
///
/// Every read and write is evaluated against a transaction snapshot; the
/// engine owns visibility, identifier sequences and row locks.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Create the table backing an entity schema
    async fn create_table(&self, schema: EntitySchema) -> Result<()>;

    /// Check if a table exists
    async fn table_exists(&self, table: &str) -> bool;

    /// All rows visible to the snapshot, in identifier order
    async fn scan(&self, table: &str, snapshot: &Snapshot) -> Result<Vec<Row>>;

    /// One row by identifier
    async fn get(&self, table: &str, id: i64, snapshot: &Snapshot) -> Result<Option<Row>>;

    /// Insert a row, assigning an identifier when the id column is NULL
    async fn insert(&self, table: &str, row: Row, snapshot: &Snapshot) -> Result<i64>;

    /// Replace the visible version of a row; `false` when no such row is visible
    async fn update(&self, table: &str, id: i64, row: Row, snapshot: &Snapshot) -> Result<bool>;

    /// Delete the visible version of a row; `false` when no such row is visible
    async fn delete(&self, table: &str, id: i64, snapshot: &Snapshot) -> Result<bool>;

    /// Acquire a pessimistic write lock, waiting at most `timeout`
    async fn lock_row(&self, table: &str, id: i64, owner: u64, timeout: Duration) -> Result<()>;

    /// Release every row lock held by `owner`
    async fn release_locks(&self, owner: u64) -> Result<usize>;
}
