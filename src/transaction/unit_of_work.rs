// ============================================================================
// Unit of Work
// ============================================================================
//
// One transaction plus its identity map. Every repository call receives the
// unit of work by `&mut`; nothing here is process-wide.
//
// Entities loaded through the unit of work are "managed": later reads of the
// same identifier return the managed state, and changes staged with `save`
// are written on `flush` (explicit, before queries, or on commit). Bulk
// statements bypass the identity map, so managed state can go stale until
// the caller runs `clear` or `detach`.
//
// ============================================================================

use super::{TransactionId, TransactionManager, TransactionState};
use crate::config::RepositoryConfig;
use crate::core::{RepoError, Result, Row, Snapshot};
use crate::storage::StorageEngine;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntityKey {
    table: String,
    id: i64,
}

impl EntityKey {
    fn new(table: &str, id: i64) -> Self {
        Self {
            table: table.to_string(),
            id,
        }
    }
}

#[derive(Debug, Clone)]
struct Managed {
    /// State as last read from or written to the store
    loaded: Row,
    /// State the caller staged
    current: Row,
    /// Read-only entries are never written back
    read_only: bool,
}

impl Managed {
    fn is_dirty(&self) -> bool {
        self.loaded != self.current
    }
}

/// Counters for one unit of work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Statements sent to the store (scans, gets, writes)
    pub statements: u64,
    /// Related-entity lookups issued by the executor
    pub secondary_lookups: u64,
    /// Rows written by flush
    pub flushed_rows: u64,
    /// Row locks acquired
    pub locks_acquired: u64,
}

pub struct UnitOfWork {
    storage: Arc<dyn StorageEngine>,
    transactions: Arc<TransactionManager>,
    config: RepositoryConfig,
    txn_id: TransactionId,
    snapshot: Snapshot,
    state: TransactionState,
    identity_map: HashMap<EntityKey, Managed>,
    /// Rows locked by a pessimistic read; written against their latest version
    locked: HashSet<EntityKey>,
    stats: SessionStats,
}

impl UnitOfWork {
    pub async fn begin(
        storage: Arc<dyn StorageEngine>,
        transactions: Arc<TransactionManager>,
        config: RepositoryConfig,
    ) -> Result<Self> {
        let (txn_id, snapshot) = transactions.begin().await?;
        debug!("{} started", txn_id);

        Ok(Self {
            storage,
            transactions,
            config,
            txn_id,
            snapshot,
            state: TransactionState::Active,
            identity_map: HashMap::new(),
            locked: HashSet::new(),
            stats: SessionStats::default(),
        })
    }

    pub fn id(&self) -> TransactionId {
        self.txn_id
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_managed(&self, table: &str, id: i64) -> bool {
        self.identity_map.contains_key(&EntityKey::new(table, id))
    }

    pub fn is_read_only(&self, table: &str, id: i64) -> bool {
        self.identity_map
            .get(&EntityKey::new(table, id))
            .is_some_and(|managed| managed.read_only)
    }

    pub fn managed_count(&self) -> usize {
        self.identity_map.len()
    }

    /// Number of managed entities with staged, unflushed changes
    pub fn pending_changes(&self) -> usize {
        self.identity_map
            .values()
            .filter(|managed| managed.is_dirty() && !managed.read_only)
            .count()
    }

    /// Forget every managed entity. Unflushed changes are discarded.
    pub fn clear(&mut self) {
        let pending = self.pending_changes();
        if pending > 0 {
            warn!("{} clearing identity map with {} unflushed changes", self.txn_id, pending);
        }
        self.identity_map.clear();
    }

    /// Forget one managed entity so the next read goes to the store.
    pub fn detach(&mut self, table: &str, id: i64) -> bool {
        self.identity_map.remove(&EntityKey::new(table, id)).is_some()
    }

    /// Write every dirty, writable managed entity to the store.
    pub async fn flush(&mut self) -> Result<usize> {
        self.ensure_active()?;

        let mut dirty: Vec<(EntityKey, Row)> = Vec::new();
        for (key, managed) in self.identity_map.iter_mut() {
            if !managed.is_dirty() {
                continue;
            }
            if managed.read_only {
                warn!(
                    "{} dropping staged change to read-only {} row {}",
                    self.txn_id, key.table, key.id
                );
                managed.current = managed.loaded.clone();
                continue;
            }
            dirty.push((key.clone(), managed.current.clone()));
        }
        dirty.sort_by(|a, b| (&a.0.table, a.0.id).cmp(&(&b.0.table, b.0.id)));

        for (key, row) in &dirty {
            let snapshot = self.write_snapshot(&key.table, key.id).await?;
            self.stats.statements += 1;
            let written = self
                .storage
                .update(&key.table, key.id, row.clone(), &snapshot)
                .await?;
            if !written {
                return Err(RepoError::NotFound(format!(
                    "{} row {} was removed before flush",
                    key.table, key.id
                )));
            }
            if let Some(managed) = self.identity_map.get_mut(key) {
                managed.loaded = row.clone();
            }
        }

        self.stats.flushed_rows += dirty.len() as u64;
        if !dirty.is_empty() {
            debug!("{} flushed {} rows", self.txn_id, dirty.len());
        }
        Ok(dirty.len())
    }

    /// Flush, commit and release every row lock.
    pub async fn commit(mut self) -> Result<()> {
        self.flush().await?;
        self.transactions.commit(self.txn_id).await?;
        self.state = TransactionState::Committed;
        let released = self.storage.release_locks(self.txn_id.0).await?;
        debug!("{} committed, released {} locks", self.txn_id, released);
        Ok(())
    }

    /// Abort and release every row lock. Staged changes are dropped.
    pub async fn rollback(mut self) -> Result<()> {
        self.ensure_active()?;
        self.transactions.rollback(self.txn_id).await?;
        self.state = TransactionState::Aborted;
        self.identity_map.clear();
        let released = self.storage.release_locks(self.txn_id.0).await?;
        debug!("{} rolled back, released {} locks", self.txn_id, released);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Store access used by the executor and the repository facade
    // ------------------------------------------------------------------

    pub(crate) async fn scan(&mut self, table: &str) -> Result<Vec<Row>> {
        self.ensure_active()?;
        self.stats.statements += 1;
        self.storage.scan(table, &self.snapshot).await
    }

    /// Read through the identity map: a managed row never hits the store.
    pub(crate) async fn find(&mut self, table: &str, id: i64) -> Result<Option<Row>> {
        if let Some(row) = self.managed_row(table, id) {
            return Ok(Some(row.clone()));
        }
        self.ensure_active()?;
        self.stats.statements += 1;
        let row = self.storage.get(table, id, &self.snapshot).await?;
        if let Some(row) = &row {
            self.register_loaded(table, id, row.clone(), false);
        }
        Ok(row)
    }

    /// Like `find`, counted as a secondary (relation) lookup when it reaches the store.
    pub(crate) async fn find_related(&mut self, table: &str, id: i64) -> Result<Option<Row>> {
        if let Some(row) = self.managed_row(table, id) {
            return Ok(Some(row.clone()));
        }
        self.stats.secondary_lookups += 1;
        self.find(table, id).await
    }

    pub(crate) fn managed_row(&self, table: &str, id: i64) -> Option<&Row> {
        self.identity_map
            .get(&EntityKey::new(table, id))
            .map(|managed| &managed.current)
    }

    /// Register a row fetched by a query. An already managed entity keeps
    /// its state; the read-only flag only ever gets stricter.
    pub(crate) fn register_loaded(&mut self, table: &str, id: i64, row: Row, read_only: bool) {
        self.identity_map
            .entry(EntityKey::new(table, id))
            .and_modify(|managed| managed.read_only |= read_only)
            .or_insert_with(|| Managed {
                loaded: row.clone(),
                current: row,
                read_only,
            });
    }

    /// Stage a new state for a managed entity; written on the next flush.
    pub(crate) fn stage(&mut self, table: &str, id: i64, row: Row) -> bool {
        match self.identity_map.get_mut(&EntityKey::new(table, id)) {
            Some(managed) => {
                managed.current = row;
                true
            }
            None => false,
        }
    }

    pub(crate) async fn insert(&mut self, table: &str, row: Row) -> Result<i64> {
        self.ensure_active()?;
        self.stats.statements += 1;
        let id = self.storage.insert(table, row.clone(), &self.snapshot).await?;
        let stored = self.storage.get(table, id, &self.snapshot).await?.unwrap_or(row);
        self.register_loaded(table, id, stored, false);
        Ok(id)
    }

    /// Update when a visible row exists, insert under the given id otherwise.
    pub(crate) async fn upsert(&mut self, table: &str, id: i64, row: Row) -> Result<()> {
        self.ensure_active()?;
        self.stats.statements += 1;
        let exists = self.storage.get(table, id, &self.snapshot).await?.is_some();
        if exists {
            let snapshot = self.write_snapshot(table, id).await?;
            self.stats.statements += 1;
            self.storage.update(table, id, row.clone(), &snapshot).await?;
        } else {
            self.stats.statements += 1;
            self.storage.insert(table, row.clone(), &self.snapshot).await?;
        }
        self.identity_map.insert(
            EntityKey::new(table, id),
            Managed {
                loaded: row.clone(),
                current: row,
                read_only: false,
            },
        );
        Ok(())
    }

    /// Write a row straight to the store, bypassing the identity map.
    pub(crate) async fn write_through(&mut self, table: &str, id: i64, row: Row) -> Result<bool> {
        self.ensure_active()?;
        let snapshot = self.write_snapshot(table, id).await?;
        self.stats.statements += 1;
        self.storage.update(table, id, row, &snapshot).await
    }

    pub(crate) async fn delete(&mut self, table: &str, id: i64) -> Result<bool> {
        self.ensure_active()?;
        self.identity_map.remove(&EntityKey::new(table, id));
        let snapshot = self.write_snapshot(table, id).await?;
        self.stats.statements += 1;
        self.storage.delete(table, id, &snapshot).await
    }

    /// Delete a row from the store without touching the identity map.
    pub(crate) async fn delete_through(&mut self, table: &str, id: i64) -> Result<bool> {
        self.ensure_active()?;
        let snapshot = self.write_snapshot(table, id).await?;
        self.stats.statements += 1;
        self.storage.delete(table, id, &snapshot).await
    }

    /// Pessimistic write lock held until commit or rollback.
    pub(crate) async fn lock(&mut self, table: &str, id: i64) -> Result<()> {
        self.ensure_active()?;
        self.storage
            .lock_row(table, id, self.txn_id.0, self.config.lock_timeout)
            .await?;
        self.stats.locks_acquired += 1;
        self.locked.insert(EntityKey::new(table, id));
        Ok(())
    }

    /// Lock a row and read its latest committed version, which may be newer
    /// than this unit of work's snapshot. A managed entity without staged
    /// changes takes the new state. `None` when the row is gone.
    pub(crate) async fn lock_latest(&mut self, table: &str, id: i64) -> Result<Option<Row>> {
        self.lock(table, id).await?;
        let latest = self.transactions.latest_snapshot(&self.snapshot).await;
        self.stats.statements += 1;
        let row = self.storage.get(table, id, &latest).await?;

        if let Some(row) = &row
            && let Some(managed) = self.identity_map.get_mut(&EntityKey::new(table, id))
        {
            if !managed.is_dirty() {
                managed.current = row.clone();
            }
            managed.loaded = row.clone();
        }
        Ok(row)
    }

    /// Snapshot a write of `table`/`id` runs against, taken once the row lock
    /// is held. Rows locked by a pessimistic read see the latest committed
    /// version; other writes keep the begin snapshot and fail if a
    /// concurrent transaction changed the row first.
    async fn write_snapshot(&mut self, table: &str, id: i64) -> Result<Snapshot> {
        if self.locked.contains(&EntityKey::new(table, id)) {
            return Ok(self.transactions.latest_snapshot(&self.snapshot).await);
        }
        self.storage
            .lock_row(table, id, self.txn_id.0, self.config.lock_timeout)
            .await?;
        Ok(self.transactions.with_current_aborted(&self.snapshot).await)
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(RepoError::Transaction(format!(
                "{} is {}",
                self.txn_id, self.state
            )));
        }
        Ok(())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.state.is_active() {
            return;
        }
        warn!("{} dropped without commit, rolling back", self.txn_id);

        // Locks and the active-set entry would otherwise leak
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let storage = Arc::clone(&self.storage);
            let transactions = Arc::clone(&self.transactions);
            let txn_id = self.txn_id;
            handle.spawn(async move {
                let _ = transactions.rollback(txn_id).await;
                let _ = storage.release_locks(txn_id.0).await;
            });
        }
    }
}
