use super::{StorageEngine, Table};
use crate::core::{EntitySchema, RepoError, Result, Row, Snapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{Level, event};

/// In-memory MVCC storage with per-table locks.
pub struct InMemoryStorage {
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
    /// How long a writer waits for a row lock held by another transaction
    write_lock_timeout: Duration,
    poll_interval: Duration,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            write_lock_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(5),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.write_lock_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub async fn get_table(&self, name: &str) -> Result<Arc<RwLock<Table>>> {
        self.tables
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RepoError::TableNotFound(name.to_string()))
    }

    pub async fn list_tables(&self) -> Vec<String> {
        self.tables.read().await.keys().cloned().collect()
    }

    /// Visible row count without materializing rows
    pub async fn row_count(&self, table: &str, snapshot: &Snapshot) -> Result<usize> {
        let handle = self.get_table(table).await?;
        let table = handle.read().await;
        Ok(table.row_count(snapshot))
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageEngine for InMemoryStorage {
    async fn create_table(&self, schema: EntitySchema) -> Result<()> {
        let mut tables = self.tables.write().await;
        let name = schema.table().to_string();

        if tables.contains_key(&name) {
            return Err(RepoError::TableExists(name));
        }

        tables.insert(name, Arc::new(RwLock::new(Table::new(schema))));
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> bool {
        self.tables.read().await.contains_key(table)
    }

    async fn scan(&self, table: &str, snapshot: &Snapshot) -> Result<Vec<Row>> {
        let handle = self.get_table(table).await?;
        let table = handle.read().await;
        Ok(table.scan(snapshot))
    }

    async fn get(&self, table: &str, id: i64, snapshot: &Snapshot) -> Result<Option<Row>> {
        let handle = self.get_table(table).await?;
        let table = handle.read().await;
        Ok(table.get(id, snapshot))
    }

    async fn insert(&self, table: &str, row: Row, snapshot: &Snapshot) -> Result<i64> {
        let handle = self.get_table(table).await?;
        let mut table = handle.write().await;
        table.insert(row, snapshot)
    }

    async fn update(&self, table: &str, id: i64, row: Row, snapshot: &Snapshot) -> Result<bool> {
        self.lock_row(table, id, snapshot.tx_id, self.write_lock_timeout)
            .await?;
        let handle = self.get_table(table).await?;
        let mut table = handle.write().await;
        table.update(id, row, snapshot)
    }

    async fn delete(&self, table: &str, id: i64, snapshot: &Snapshot) -> Result<bool> {
        self.lock_row(table, id, snapshot.tx_id, self.write_lock_timeout)
            .await?;
        let handle = self.get_table(table).await?;
        let mut table = handle.write().await;
        table.delete(id, snapshot)
    }

    async fn lock_row(&self, table: &str, id: i64, owner: u64, timeout: Duration) -> Result<()> {
        let handle = self.get_table(table).await?;
        let started = Instant::now();

        loop {
            let holder = {
                let mut guard = handle.write().await;
                if guard.try_lock(id, owner) {
                    return Ok(());
                }
                guard.lock_owner(id)
            };

            let waited = started.elapsed();
            if waited >= timeout {
                event!(Level::WARN, table, id, owner, ?holder, "row lock timed out");
                return Err(RepoError::LockTimeout {
                    table: table.to_string(),
                    id,
                    waited,
                });
            }

            event!(Level::TRACE, table, id, owner, ?holder, "waiting for row lock");
            tokio::time::sleep(self.poll_interval.min(timeout - waited)).await;
        }
    }

    async fn release_locks(&self, owner: u64) -> Result<usize> {
        let handles: Vec<_> = self.tables.read().await.values().cloned().collect();
        let mut released = 0;
        for handle in handles {
            released += handle.write().await.release_locks(owner);
        }
        Ok(released)
    }
}
