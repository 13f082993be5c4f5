// ============================================================================
// Query executor
// ============================================================================
//
// Runs validated descriptors against one unit of work:
//
//   flush (if configured) -> scan -> load referenced relations -> filter
//   -> sort -> limit -> window -> lock -> resolve through identity map
//
// Bulk statements (update / delete) write straight to the store and do not
// refresh entities the unit of work already manages.
//
// ============================================================================

use super::predicate::RowContext;
use super::projection::{Projected, project_row};
use super::relations::RelationCache;
use crate::core::{EntitySchema, RepoError, Result, Row};
use crate::query::sort::sort_keyed;
use crate::query::{
    BoundParams, FieldPath, Order, Projection, QueryDescriptor, QueryHints, QueryKind, SetValue, Sort,
};
use crate::storage::Catalog;
use crate::transaction::UnitOfWork;
use std::collections::HashSet;
use tracing::{Instrument, Level, event, info_span};

/// Which part of the sorted match list a fetch returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    All,
    Range { offset: usize, limit: usize },
}

pub struct QueryExecutor<'a> {
    catalog: &'a Catalog,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Matching rows in result order. Rows already managed by the unit of
    /// work are returned in their managed state.
    pub async fn fetch(
        &self,
        uow: &mut UnitOfWork,
        query: &QueryDescriptor,
        params: &BoundParams,
        extra_sort: &Sort,
        window: Window,
        hints: &QueryHints,
    ) -> Result<Vec<Row>> {
        let span = info_span!("query.fetch", table = %query.table, kind = query.kind.name());
        async move {
            let schema = self.catalog.get(&query.table)?;
            let orders: Vec<Order> = query
                .sort
                .orders()
                .iter()
                .chain(extra_sort.orders())
                .cloned()
                .collect();
            let order_paths = self.sort_paths(schema, &orders)?;

            let (matched, mut relations) = self.matching(uow, query, params).await?;

            let sort_relations: Vec<&str> = order_paths
                .iter()
                .filter_map(|p| p.relation.as_deref())
                .collect();
            relations
                .load(uow, self.catalog, schema, &matched, &sort_relations)
                .await?;

            let ctx = RowContext::new(self.catalog, schema, &relations, params);
            let mut keyed = Vec::with_capacity(matched.len());
            for row in matched {
                let key = order_paths
                    .iter()
                    .map(|path| ctx.value_at(&row, path))
                    .collect::<Result<Vec<_>>>()?;
                keyed.push((key, row));
            }
            sort_keyed(&mut keyed, &orders)?;

            let limited = keyed
                .into_iter()
                .map(|(_, row)| row)
                .take(query.limit.unwrap_or(usize::MAX));
            let rows: Vec<Row> = match window {
                Window::All => limited.collect(),
                Window::Range { offset, limit } => limited.skip(offset).take(limit).collect(),
            };

            let mut resolved = Vec::with_capacity(rows.len());
            for row in rows {
                if let Some(row) = self.resolve_row(uow, schema, row, hints).await? {
                    resolved.push(row);
                }
            }

            event!(Level::DEBUG, rows = resolved.len(), "query fetched");
            Ok(resolved)
        }
        .instrument(span)
        .await
    }

    /// Number of rows matching the descriptor's filter.
    pub async fn count(&self, uow: &mut UnitOfWork, query: &QueryDescriptor, params: &BoundParams) -> Result<u64> {
        let (matched, _) = self.matching(uow, query, params).await?;
        let count = match query.limit {
            Some(limit) => matched.len().min(limit),
            None => matched.len(),
        };
        Ok(count as u64)
    }

    pub async fn exists(&self, uow: &mut UnitOfWork, query: &QueryDescriptor, params: &BoundParams) -> Result<bool> {
        Ok(self.count(uow, query, params).await? > 0)
    }

    /// Run a bulk update or delete; returns the number of rows touched.
    pub async fn execute_modifying(
        &self,
        uow: &mut UnitOfWork,
        query: &QueryDescriptor,
        params: &BoundParams,
    ) -> Result<u64> {
        let span = info_span!("query.modify", table = %query.table, kind = query.kind.name());
        async move {
            let schema = self.catalog.get(&query.table)?;
            let (matched, relations) = self.matching(uow, query, params).await?;
            let ctx = RowContext::new(self.catalog, schema, &relations, params);

            let mut touched = 0u64;
            for row in matched {
                let Some(id) = schema.row_id(&row) else {
                    continue;
                };
                // Work on the latest committed version and re-check it still matches
                let Some(row) = uow.lock_latest(schema.table(), id).await? else {
                    continue;
                };
                if let Some(predicate) = &query.predicate
                    && !ctx.matches(&row, predicate)?
                {
                    continue;
                }

                let written = match &query.kind {
                    QueryKind::Delete => uow.delete_through(schema.table(), id).await?,
                    QueryKind::Update(assignments) => {
                        let mut updated = row.clone();
                        for assignment in assignments {
                            let idx = schema.require_column(&assignment.field)?;
                            let current = &row[idx];
                            let value = match &assignment.value {
                                SetValue::Assign(op) => params.value(op)?,
                                SetValue::Add(op) => current.checked_add(&params.value(op)?)?,
                                SetValue::Subtract(op) => current.checked_sub(&params.value(op)?)?,
                            };
                            updated[idx] = value;
                        }
                        schema.validate_row(&updated)?;
                        uow.write_through(schema.table(), id, updated).await?
                    }
                    other => {
                        return Err(RepoError::Query(format!(
                            "{} statement is not modifying",
                            other.name()
                        )));
                    }
                };
                if written {
                    touched += 1;
                }
            }

            event!(
                Level::DEBUG,
                rows = touched,
                "bulk statement applied; managed entities keep their state"
            );
            Ok(touched)
        }
        .instrument(span)
        .await
    }

    /// Rows behind `relations` for each of `rows`, one list per row.
    pub async fn load_relations(
        &self,
        uow: &mut UnitOfWork,
        schema: &EntitySchema,
        rows: &[Row],
        relations: &[String],
    ) -> Result<Vec<Vec<(String, Row)>>> {
        let mut cache = RelationCache::new();
        cache.load(uow, self.catalog, schema, rows, relations).await?;

        let params = BoundParams::empty();
        let ctx = RowContext::new(self.catalog, schema, &cache, &params);
        rows.iter()
            .map(|row| {
                let mut loaded = Vec::new();
                for relation in relations {
                    if let Some(related) = ctx.related_row(row, relation)? {
                        loaded.push((relation.clone(), related.clone()));
                    }
                }
                Ok(loaded)
            })
            .collect()
    }

    /// Shape rows into projections, looking each related entity up once.
    pub async fn project(
        &self,
        uow: &mut UnitOfWork,
        schema: &EntitySchema,
        rows: &[Row],
        projection: &Projection,
        distinct: bool,
    ) -> Result<Vec<Projected>> {
        let mut cache = RelationCache::new();
        cache
            .load(uow, self.catalog, schema, rows, &projection.relations())
            .await?;

        let params = BoundParams::empty();
        let ctx = RowContext::new(self.catalog, schema, &cache, &params);
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let projected = project_row(&ctx, row, projection)?;
            if distinct && !seen.insert(projected.clone()) {
                continue;
            }
            out.push(projected);
        }
        Ok(out)
    }

    /// Scan and filter. Relations the predicate reads are loaded first.
    async fn matching(
        &self,
        uow: &mut UnitOfWork,
        query: &QueryDescriptor,
        params: &BoundParams,
    ) -> Result<(Vec<Row>, RelationCache)> {
        if uow.config().flush_before_query {
            uow.flush().await?;
        }

        let schema = self.catalog.get(&query.table)?;
        let rows = uow.scan(&query.table).await?;
        let mut relations = RelationCache::new();

        let Some(predicate) = &query.predicate else {
            return Ok((rows, relations));
        };

        let mut needed: Vec<&str> = predicate
            .clauses()
            .into_iter()
            .filter_map(|c| c.path.relation.as_deref())
            .collect();
        needed.sort_unstable();
        needed.dedup();
        relations
            .load(uow, self.catalog, schema, &rows, &needed)
            .await?;

        let ctx = RowContext::new(self.catalog, schema, &relations, params);
        let mut matched = Vec::new();
        for row in rows {
            if ctx.matches(&row, predicate)? {
                matched.push(row);
            }
        }
        Ok((matched, relations))
    }

    fn sort_paths(&self, schema: &EntitySchema, orders: &[Order]) -> Result<Vec<FieldPath>> {
        orders
            .iter()
            .map(|order| {
                let path = FieldPath::parse(&order.property);
                match &path.relation {
                    Some(relation) => {
                        self.catalog.related(schema, relation)?.require_column(&path.field)?;
                    }
                    None => {
                        schema.require_column(&path.field)?;
                    }
                }
                Ok(path)
            })
            .collect()
    }

    /// Lock if asked, then prefer the identity map's state for the row. A
    /// locked row is re-read at its latest committed version; `None` when a
    /// concurrent transaction deleted it meanwhile.
    async fn resolve_row(
        &self,
        uow: &mut UnitOfWork,
        schema: &EntitySchema,
        row: Row,
        hints: &QueryHints,
    ) -> Result<Option<Row>> {
        let Some(id) = schema.row_id(&row) else {
            return Ok(Some(row));
        };
        let row = if hints.lock.is_some() {
            match uow.lock_latest(schema.table(), id).await? {
                Some(latest) => latest,
                None => return Ok(None),
            }
        } else {
            row
        };
        uow.register_loaded(schema.table(), id, row.clone(), hints.read_only);
        Ok(Some(uow.managed_row(schema.table(), id).cloned().unwrap_or(row)))
    }
}
