use crate::config::RepositoryConfig;
use crate::core::{RepoError, Result};
use crate::entity::Entity;
use crate::storage::{Catalog, InMemoryStorage, StorageEngine};
use crate::transaction::{TransactionManager, UnitOfWork};
use log::debug;
use std::sync::Arc;

/// Entry point: the persistence provider, its catalog of entity schemas
/// and the transaction manager units of work are opened against.
///
/// Register every entity before creating repositories; a repository keeps
/// the catalog it was created with.
pub struct DataSource {
    storage: Arc<dyn StorageEngine>,
    transactions: Arc<TransactionManager>,
    catalog: Catalog,
    config: RepositoryConfig,
}

impl DataSource {
    /// An in-memory data source whose lock waits follow `config`.
    pub fn new(config: RepositoryConfig) -> Self {
        let storage = InMemoryStorage::new()
            .with_lock_timeout(config.lock_timeout)
            .with_poll_interval(config.lock_poll_interval);
        Self::with_storage(Arc::new(storage), config)
    }

    pub fn with_storage(storage: Arc<dyn StorageEngine>, config: RepositoryConfig) -> Self {
        Self {
            storage,
            transactions: Arc::new(TransactionManager::new()),
            catalog: Catalog::new(),
            config,
        }
    }

    /// Create the table of `E` and add its schema to the catalog.
    /// Relation targets must be registered first.
    pub async fn register<E: Entity>(&mut self) -> Result<()> {
        let schema = E::schema();
        for (field, relation) in schema.relations() {
            if !self.catalog.contains(&relation.target_table) {
                return Err(RepoError::TableNotFound(format!(
                    "{} (target of {}.{})",
                    relation.target_table,
                    schema.entity(),
                    field
                )));
            }
        }

        self.storage.create_table(schema.clone()).await?;
        self.catalog = self.catalog.clone().with_schema(schema.clone())?;
        debug!("registered entity {} as table {}", schema.entity(), schema.table());
        Ok(())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Open a unit of work: one transaction with its own identity map.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        UnitOfWork::begin(
            Arc::clone(&self.storage),
            Arc::clone(&self.transactions),
            self.config.clone(),
        )
        .await
    }
}

impl Default for DataSource {
    fn default() -> Self {
        Self::new(RepositoryConfig::default())
    }
}
