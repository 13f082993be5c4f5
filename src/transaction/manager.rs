// ============================================================================
// Transaction Manager
// ============================================================================

use super::{Transaction, TransactionId, TransactionState};
use crate::core::{RepoError, Result, Snapshot};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct TransactionManager {
    transactions: Arc<RwLock<HashMap<TransactionId, Transaction>>>,

    // Active and aborted ids are copy-on-write so snapshots share them
    active_ids: Arc<RwLock<Arc<HashSet<u64>>>>,
    aborted_ids: Arc<RwLock<Arc<HashSet<u64>>>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            transactions: Arc::new(RwLock::new(HashMap::new())),
            active_ids: Arc::new(RwLock::new(Arc::new(HashSet::new()))),
            aborted_ids: Arc::new(RwLock::new(Arc::new(HashSet::new()))),
        }
    }

    /// Start a transaction and freeze its snapshot (repeatable read)
    pub async fn begin(&self) -> Result<(TransactionId, Snapshot)> {
        // Id allocation and registration happen under the active-set lock so
        // a concurrent begin never sees a lower id as already committed
        let mut active_lock = self.active_ids.write().await;
        let transaction_id = TransactionId::new();
        let txn_id_val = transaction_id.0;

        let aborted = self.aborted_ids.read().await.clone();
        let snapshot = Snapshot {
            tx_id: txn_id_val,
            active: Arc::clone(&active_lock),
            aborted,
            max_tx_id: txn_id_val,
        };

        let mut new_set = (**active_lock).clone();
        new_set.insert(txn_id_val);
        *active_lock = Arc::new(new_set);
        drop(active_lock);

        let mut transactions = self.transactions.write().await;
        transactions.insert(transaction_id, Transaction::new(transaction_id, snapshot.clone()));

        Ok((transaction_id, snapshot))
    }

    /// Snapshot for `base`'s transaction that sees everything committed so
    /// far. Used for rows the transaction holds a write lock on.
    pub async fn latest_snapshot(&self, base: &Snapshot) -> Snapshot {
        // Active set before aborted set: rollback marks aborted first
        let active_lock = self.active_ids.read().await;
        let active = Arc::clone(&active_lock);
        let max_tx_id = TransactionId::peek_next();
        drop(active_lock);
        let aborted = self.aborted_ids.read().await.clone();

        Snapshot {
            tx_id: base.tx_id,
            active,
            aborted,
            max_tx_id,
        }
    }

    /// `base` with the current aborted set, so writes can tell a rolled
    /// back writer from a committed one.
    pub async fn with_current_aborted(&self, base: &Snapshot) -> Snapshot {
        Snapshot {
            aborted: self.aborted_ids.read().await.clone(),
            ..base.clone()
        }
    }

    pub async fn commit(&self, txn_id: TransactionId) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        let transaction = transactions
            .get_mut(&txn_id)
            .ok_or_else(|| RepoError::Transaction(format!("Transaction {} not found", txn_id)))?;

        transaction.commit()?;
        transactions.remove(&txn_id);
        drop(transactions);

        self.remove_active(txn_id).await;
        Ok(())
    }

    pub async fn rollback(&self, txn_id: TransactionId) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        let transaction = transactions
            .get_mut(&txn_id)
            .ok_or_else(|| RepoError::Transaction(format!("Transaction {} not found", txn_id)))?;

        transaction.rollback()?;
        transactions.remove(&txn_id);
        drop(transactions);

        // Mark aborted before leaving the active set
        {
            let mut aborted_lock = self.aborted_ids.write().await;
            let mut new_set = (**aborted_lock).clone();
            new_set.insert(txn_id.0);
            *aborted_lock = Arc::new(new_set);
        }

        self.remove_active(txn_id).await;
        Ok(())
    }

    pub async fn state(&self, txn_id: TransactionId) -> Option<TransactionState> {
        self.transactions
            .read()
            .await
            .get(&txn_id)
            .map(|txn| txn.state())
    }

    pub async fn active_count(&self) -> usize {
        self.active_ids.read().await.len()
    }

    async fn remove_active(&self, txn_id: TransactionId) {
        let mut active_lock = self.active_ids.write().await;
        if active_lock.contains(&txn_id.0) {
            let mut new_set = (**active_lock).clone();
            new_set.remove(&txn_id.0);
            *active_lock = Arc::new(new_set);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_begin_commit() {
        let manager = TransactionManager::new();
        let (id, snapshot) = manager.begin().await.unwrap();
        assert_eq!(snapshot.tx_id, id.0);
        assert_eq!(manager.state(id).await, Some(TransactionState::Active));
        assert_eq!(manager.active_count().await, 1);

        manager.commit(id).await.unwrap();
        assert_eq!(manager.state(id).await, None);
        assert_eq!(manager.active_count().await, 0);
        assert!(manager.commit(id).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_excludes_concurrent_transactions() {
        let manager = TransactionManager::new();
        let (first, _) = manager.begin().await.unwrap();
        let (_, second_snapshot) = manager.begin().await.unwrap();
        assert!(second_snapshot.active.contains(&first.0));

        manager.rollback(first).await.unwrap();
        let (_, third_snapshot) = manager.begin().await.unwrap();
        assert!(third_snapshot.aborted.contains(&first.0));
        assert!(!third_snapshot.active.contains(&first.0));
    }

    #[tokio::test]
    async fn test_latest_snapshot_sees_later_commits() {
        let manager = TransactionManager::new();
        let (reader, snapshot) = manager.begin().await.unwrap();
        let (writer, _) = manager.begin().await.unwrap();
        let (aborted, _) = manager.begin().await.unwrap();
        assert!(snapshot.max_tx_id <= writer.0);

        manager.commit(writer).await.unwrap();
        manager.rollback(aborted).await.unwrap();

        let latest = manager.latest_snapshot(&snapshot).await;
        assert_eq!(latest.tx_id, reader.0);
        assert!(latest.max_tx_id > aborted.0);
        assert!(!latest.active.contains(&writer.0));
        assert!(latest.aborted.contains(&aborted.0));

        let refreshed = manager.with_current_aborted(&snapshot).await;
        assert_eq!(refreshed.max_tx_id, snapshot.max_tx_id);
        assert!(refreshed.aborted.contains(&aborted.0));
        manager.commit(reader).await.unwrap();
    }
}
