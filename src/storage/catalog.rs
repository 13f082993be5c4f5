use crate::core::{EntitySchema, RepoError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Catalog of registered entity schemas, keyed by table name.
/// Immutable once built: adding a schema returns a new catalog.
#[derive(Clone, Default)]
pub struct Catalog {
    tables: Arc<HashMap<String, EntitySchema>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a schema - returns a NEW catalog, the old one is unchanged
    pub fn with_schema(self, schema: EntitySchema) -> Result<Self> {
        let name = schema.table().to_string();

        if self.tables.contains_key(&name) {
            return Err(RepoError::TableExists(name));
        }

        let mut tables = (*self.tables).clone();
        tables.insert(name, schema);

        Ok(Self {
            tables: Arc::new(tables),
        })
    }

    pub fn get(&self, table: &str) -> Result<&EntitySchema> {
        self.tables
            .get(table)
            .ok_or_else(|| RepoError::TableNotFound(table.to_string()))
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Schema of the entity a relation field points at
    pub fn related(&self, owner: &EntitySchema, field: &str) -> Result<&EntitySchema> {
        let relation = owner
            .relation(field)
            .ok_or_else(|| RepoError::unknown_field(owner.entity(), field))?;
        self.get(&relation.target_table)
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}
