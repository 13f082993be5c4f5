use super::{DataType, RepoError, Result, Value};
use std::collections::HashSet;
use std::sync::Arc;

pub type Row = Vec<Value>;

/// How a relation is loaded when its owner is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Only the foreign key is read; the related entity is loaded on request.
    #[default]
    Lazy,
    /// The related entity is loaded together with its owner.
    Eager,
}

/// A shared, non-owning reference to another entity by identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub target_table: String,
    pub fetch: FetchMode,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub relation: Option<Relation>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            relation: None,
        }
    }

    /// A nullable foreign-key column referencing `target_table`.
    pub fn reference(name: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Integer,
            nullable: true,
            relation: Some(Relation {
                target_table: target_table.into(),
                fetch: FetchMode::Lazy,
            }),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn eager(mut self) -> Self {
        if let Some(relation) = self.relation.as_mut() {
            relation.fetch = FetchMode::Eager;
        }
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(RepoError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(RepoError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

/// Mapping of one entity type onto one table.
///
/// The identifier column is part of `columns` and is always an `INTEGER`.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    entity: String,
    table: String,
    id_field: String,
    columns: Vec<Column>,
}

impl EntitySchema {
    pub fn new(
        entity: impl Into<String>,
        table: impl Into<String>,
        id_field: impl Into<String>,
        columns: Vec<Column>,
    ) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            id_field: id_field.into(),
            columns,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    /// Like `find_column_index`, but unknown names are an error.
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.find_column_index(name)
            .ok_or_else(|| RepoError::unknown_field(&self.entity, name))
    }

    pub fn id_index(&self) -> usize {
        self.find_column_index(&self.id_field).unwrap_or(0)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.get_column(name).and_then(|col| col.relation.as_ref())
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &Relation)> {
        self.columns
            .iter()
            .filter_map(|col| col.relation.as_ref().map(|rel| (col.name.as_str(), rel)))
    }

    /// Extract the identifier of a row laid out by this schema.
    pub fn row_id(&self, row: &Row) -> Option<i64> {
        row.get(self.id_index()).and_then(Value::as_i64)
    }

    pub fn validate_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(RepoError::Execution(format!(
                "Expected {} columns for '{}', got {}",
                self.columns.len(),
                self.table,
                row.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(row.iter()) {
            if column.name == self.id_field {
                continue;
            }
            column.validate(value)?;
        }
        Ok(())
    }
}

/// Visibility information for MVCC reads.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tx_id: u64,
    pub active: Arc<HashSet<u64>>,
    pub aborted: Arc<HashSet<u64>>,
    pub max_tx_id: u64,
}

impl Snapshot {
    /// A snapshot that sees every committed version.
    pub fn latest() -> Self {
        Self {
            tx_id: u64::MAX,
            active: Arc::new(HashSet::new()),
            aborted: Arc::new(HashSet::new()),
            max_tx_id: u64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> EntitySchema {
        EntitySchema::new(
            "Member",
            "member",
            "id",
            vec![
                Column::new("id", DataType::Integer),
                Column::new("username", DataType::Text).not_null(),
                Column::reference("team", "team"),
            ],
        )
    }

    #[test]
    fn test_require_column_reports_entity() {
        let err = schema().require_column("nickname").unwrap_err();
        match err {
            RepoError::UnknownField { entity, field } => {
                assert_eq!(entity, "Member");
                assert_eq!(field, "nickname");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_relations() {
        let schema = schema();
        let relations: Vec<_> = schema.relations().collect();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].0, "team");
        assert_eq!(relations[0].1.target_table, "team");
        assert_eq!(relations[0].1.fetch, FetchMode::Lazy);
    }

    #[test]
    fn test_validate_row() {
        let schema = schema();
        assert!(schema
            .validate_row(&vec![Value::Null, "a".into(), Value::Null])
            .is_ok());
        assert!(schema
            .validate_row(&vec![Value::Null, Value::Null, Value::Null])
            .is_err());
        assert!(schema.validate_row(&vec![Value::Null]).is_err());
    }
}
