use crate::core::{EntitySchema, Result, Row, Value};
use crate::storage::Catalog;
use crate::transaction::UnitOfWork;
use std::collections::HashMap;

/// Related rows fetched for one statement, keyed by `(table, id)`.
///
/// Each distinct related id is looked up at most once per statement, and
/// the unit of work answers from its identity map before asking the store.
#[derive(Debug, Default)]
pub struct RelationCache {
    rows: HashMap<(String, i64), Option<Row>>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the targets of `relations` for every row that references one.
    pub async fn load<S: AsRef<str>>(
        &mut self,
        uow: &mut UnitOfWork,
        catalog: &Catalog,
        schema: &EntitySchema,
        rows: &[Row],
        relations: &[S],
    ) -> Result<()> {
        for relation in relations {
            let relation = relation.as_ref();
            let target = catalog.related(schema, relation)?.table().to_string();
            let idx = schema.require_column(relation)?;

            for row in rows {
                let Some(id) = row.get(idx).and_then(Value::as_i64) else {
                    continue;
                };
                let key = (target.clone(), id);
                if self.rows.contains_key(&key) {
                    continue;
                }
                let related = uow.find_related(&target, id).await?;
                self.rows.insert(key, related);
            }
        }
        Ok(())
    }

    pub fn get(&self, table: &str, id: i64) -> Option<&Row> {
        self.rows
            .get(&(table.to_string(), id))
            .and_then(Option::as_ref)
    }

    pub fn insert(&mut self, table: &str, id: i64, row: Row) {
        self.rows.insert((table.to_string(), id), Some(row));
    }

    /// Distinct related ids resolved so far
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
