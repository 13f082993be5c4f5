// ============================================================================
// Repository facade
// ============================================================================
//
// Typed CRUD and query methods for one entity type. The repository holds the
// resolved query table; every call takes the unit of work it runs in.
//
// ============================================================================

pub mod example;

pub use example::{Example, ExampleMatcher, StringMatcher};

use crate::core::{EntitySchema, FetchMode, RepoError, Result, Row};
use crate::entity::Entity;
use crate::executor::{FromProjection, Projected, QueryExecutor, Window};
use crate::facade::DataSource;
use crate::page::{Page, PageRequest, Slice};
use crate::query::registry::validate_projection;
use crate::query::{
    BoundParams, Params, Predicate, Projection, QueryDescriptor, QueryHints, QueryKind, QueryMethod,
    QueryRegistry, ResolvedQuery, ResultKind, Sort,
};
use crate::storage::Catalog;
use crate::transaction::UnitOfWork;
use log::{debug, warn};
use std::marker::PhantomData;
use tracing::{Instrument, info_span};

/// Result of invoking a query method by name
#[derive(Debug, Clone)]
pub enum QueryOutcome<E> {
    One(E),
    Optional(Option<E>),
    List(Vec<E>),
    Page(Page<E>),
    Slice(Slice<E>),
    Projected(Vec<Projected>),
    ProjectedPage(Page<Projected>),
    ProjectedSlice(Slice<Projected>),
    Count(u64),
    Exists(bool),
    /// Rows touched by a bulk statement
    Modified(u64),
}

impl<E> QueryOutcome<E> {
    fn kind(&self) -> &'static str {
        match self {
            Self::One(_) => "one",
            Self::Optional(_) => "optional",
            Self::List(_) => "list",
            Self::Page(_) => "page",
            Self::Slice(_) => "slice",
            Self::Projected(_) => "projected list",
            Self::ProjectedPage(_) => "projected page",
            Self::ProjectedSlice(_) => "projected slice",
            Self::Count(_) => "count",
            Self::Exists(_) => "exists",
            Self::Modified(_) => "modified count",
        }
    }
}

/// Repository for entity type `E`.
///
/// ```ignore
/// let members = Repository::<Member>::new(&source)?
///     .with_query(QueryMethod::derived("findByUsernameAndAgeGreaterThan"))?;
/// let found = members.find_list(&mut uow, "findByUsernameAndAgeGreaterThan", params!["aaa", 15]).await?;
/// ```
pub struct Repository<E: Entity> {
    catalog: Catalog,
    registry: QueryRegistry,
    max_page_size: usize,
    default_page_size: usize,
    _entity: PhantomData<E>,
}

impl<E: Entity> Repository<E> {
    /// `E` must already be registered with the data source.
    pub fn new(source: &DataSource) -> Result<Self> {
        let catalog = source.catalog().clone();
        catalog.get(E::schema().table())?;
        Ok(Self {
            catalog,
            registry: QueryRegistry::new(),
            max_page_size: source.config().max_page_size,
            default_page_size: source.config().default_page_size,
            _entity: PhantomData,
        })
    }

    /// Query text used by a derived method of the same name, registered as
    /// `<Entity>.<method>`. Must come before the method is registered.
    pub fn with_named_query(mut self, method: &str, sql: impl Into<String>) -> Self {
        self.registry
            .add_named_query(format!("{}.{}", E::schema().entity(), method), sql);
        self
    }

    pub fn with_query(mut self, method: QueryMethod) -> Result<Self> {
        self.register(method)?;
        Ok(self)
    }

    /// Resolve and validate a query method.
    pub fn register(&mut self, method: QueryMethod) -> Result<()> {
        let resolved = self.registry.register(&self.catalog, E::schema(), method)?;
        debug!(
            "{}: registered '{}' as {} returning {}",
            E::schema().entity(),
            resolved.name,
            resolved.descriptor.kind.name(),
            resolved.result.name()
        );
        Ok(())
    }

    pub fn queries(&self) -> &QueryRegistry {
        &self.registry
    }

    /// Page `page` at the configured default page size.
    pub fn page_request(&self, page: usize) -> Result<PageRequest> {
        PageRequest::of(page, self.default_page_size.min(self.max_page_size))
    }

    fn schema(&self) -> &'static EntitySchema {
        E::schema()
    }

    fn executor(&self) -> QueryExecutor<'_> {
        QueryExecutor::new(&self.catalog)
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Insert when `entity` has no id (and assign one); otherwise stage the
    /// new state of a managed entity, or upsert an unmanaged one.
    pub async fn save(&self, uow: &mut UnitOfWork, entity: &mut E) -> Result<i64> {
        let schema = self.schema();
        for (field, related_id, _) in entity.related_probes() {
            if related_id.is_none() {
                return Err(RepoError::ConstraintViolation(format!(
                    "{}.{} references an unsaved entity",
                    schema.entity(),
                    field
                )));
            }
        }

        let row = entity.to_row();
        schema.validate_row(&row)?;

        match entity.id() {
            None => {
                let id = uow.insert(schema.table(), row).await?;
                entity.set_id(id);
                debug!("{}: inserted id {}", schema.entity(), id);
                Ok(id)
            }
            Some(id) => {
                if !uow.stage(schema.table(), id, row.clone()) {
                    uow.upsert(schema.table(), id, row).await?;
                }
                Ok(id)
            }
        }
    }

    pub async fn save_all(&self, uow: &mut UnitOfWork, entities: &mut [E]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            ids.push(self.save(uow, entity).await?);
        }
        Ok(ids)
    }

    /// Managed state when the entity is already in the unit of work.
    pub async fn find_by_id(&self, uow: &mut UnitOfWork, id: i64) -> Result<Option<E>> {
        let Some(row) = uow.find(self.schema().table(), id).await? else {
            return Ok(None);
        };
        let mut entities = self.materialize(uow, vec![row], &[]).await?;
        Ok(entities.pop())
    }

    pub async fn exists_by_id(&self, uow: &mut UnitOfWork, id: i64) -> Result<bool> {
        Ok(uow.find(self.schema().table(), id).await?.is_some())
    }

    pub async fn find_all(&self, uow: &mut UnitOfWork) -> Result<Vec<E>> {
        self.find_all_sorted(uow, &Sort::unsorted()).await
    }

    pub async fn find_all_sorted(&self, uow: &mut UnitOfWork, sort: &Sort) -> Result<Vec<E>> {
        let query = QueryDescriptor::select_all(self.schema().table());
        let rows = self
            .executor()
            .fetch(uow, &query, &BoundParams::empty(), sort, Window::All, &QueryHints::default())
            .await?;
        self.materialize(uow, rows, &[]).await
    }

    pub async fn find_all_paged(&self, uow: &mut UnitOfWork, request: &PageRequest) -> Result<Page<E>> {
        let request = self.clamp(request);
        let query = QueryDescriptor::select_all(self.schema().table());
        let params = BoundParams::empty();
        let rows = self
            .executor()
            .fetch(uow, &query, &params, request.sort(), window(&request, 0), &QueryHints::default())
            .await?;
        let total = self.executor().count(uow, &query.to_count(), &params).await?;
        let content = self.materialize(uow, rows, &[]).await?;
        Ok(Page::new(content, &request, total))
    }

    pub async fn count(&self, uow: &mut UnitOfWork) -> Result<u64> {
        let query = QueryDescriptor::new(self.schema().table(), QueryKind::Count);
        self.executor().count(uow, &query, &BoundParams::empty()).await
    }

    /// `false` when no such row is visible.
    pub async fn delete_by_id(&self, uow: &mut UnitOfWork, id: i64) -> Result<bool> {
        uow.delete(self.schema().table(), id).await
    }

    pub async fn delete(&self, uow: &mut UnitOfWork, entity: &E) -> Result<bool> {
        match entity.id() {
            Some(id) => self.delete_by_id(uow, id).await,
            None => Ok(false),
        }
    }

    /// Delete every row one by one, evicting each from the identity map.
    pub async fn delete_all(&self, uow: &mut UnitOfWork) -> Result<u64> {
        let schema = self.schema();
        if uow.config().flush_before_query {
            uow.flush().await?;
        }
        let mut deleted = 0;
        for row in uow.scan(schema.table()).await? {
            if let Some(id) = schema.row_id(&row)
                && uow.delete(schema.table(), id).await?
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Explicitly load a deferred relation of `entity`. Returns `false` when
    /// the relation is unset or its target no longer exists.
    pub async fn load_related(&self, uow: &mut UnitOfWork, entity: &mut E, field: &str) -> Result<bool> {
        let schema = self.schema();
        let target = self.catalog.related(schema, field)?;
        let idx = schema.require_column(field)?;
        let Some(id) = entity.to_row().get(idx).and_then(|v| v.as_i64()) else {
            return Ok(false);
        };
        match uow.find_related(target.table(), id).await? {
            Some(row) => {
                entity.attach_related(field, &row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Query methods
    // ------------------------------------------------------------------

    /// Run a registered method and shape the result by its declared kind.
    /// Page and slice methods need `request`.
    pub async fn invoke(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        params: Params,
        request: Option<&PageRequest>,
    ) -> Result<QueryOutcome<E>> {
        let query = self.registry.get(name)?;
        let bound = query.bind(params)?;
        let span = info_span!(
            "repository.invoke",
            entity = self.schema().entity(),
            method = name,
            result = query.result.name()
        );
        self.run(uow, query, &bound, request).instrument(span).await
    }

    async fn run(
        &self,
        uow: &mut UnitOfWork,
        query: &ResolvedQuery,
        bound: &BoundParams,
        request: Option<&PageRequest>,
    ) -> Result<QueryOutcome<E>> {
        let exec = self.executor();
        let descriptor = &query.descriptor;
        let projected = !descriptor.projection.is_entity();

        match query.result {
            ResultKind::Count => Ok(QueryOutcome::Count(exec.count(uow, descriptor, bound).await?)),
            ResultKind::Exists => Ok(QueryOutcome::Exists(exec.exists(uow, descriptor, bound).await?)),
            ResultKind::Modifying => Ok(QueryOutcome::Modified(
                exec.execute_modifying(uow, descriptor, bound).await?,
            )),
            ResultKind::One | ResultKind::Optional | ResultKind::List => {
                let rows = exec
                    .fetch(uow, descriptor, bound, &Sort::unsorted(), Window::All, &query.hints)
                    .await?;
                if projected {
                    let content = self.project_rows(uow, descriptor, &rows).await?;
                    self.check_single(query, content.len())?;
                    return Ok(QueryOutcome::Projected(content));
                }
                self.check_single(query, rows.len())?;
                let mut entities = self.materialize(uow, rows, &query.hints.fetch).await?;
                Ok(match query.result {
                    ResultKind::List => QueryOutcome::List(entities),
                    ResultKind::Optional => QueryOutcome::Optional(entities.pop()),
                    _ => match entities.pop() {
                        Some(entity) => QueryOutcome::One(entity),
                        None => return Err(RepoError::NotFound(query.name.clone())),
                    },
                })
            }
            ResultKind::Page => {
                let request = self.clamp(self.require_request(query, request)?);
                if projected && descriptor.distinct {
                    let all = self.distinct_projections(uow, query, bound, &request).await?;
                    let total = match &query.count {
                        Some(count) => exec.count(uow, count, bound).await?,
                        None => all.len() as u64,
                    };
                    let content = all
                        .into_iter()
                        .skip(request.offset())
                        .take(request.size())
                        .collect();
                    return Ok(QueryOutcome::ProjectedPage(Page::new(content, &request, total)));
                }
                let rows = exec
                    .fetch(uow, descriptor, bound, request.sort(), window(&request, 0), &query.hints)
                    .await?;
                let count = match &query.count {
                    Some(count) => count.clone(),
                    None => descriptor.to_count(),
                };
                let total = exec.count(uow, &count, bound).await?;
                if projected {
                    let content = self.project_rows(uow, descriptor, &rows).await?;
                    return Ok(QueryOutcome::ProjectedPage(Page::new(content, &request, total)));
                }
                let content = self.materialize(uow, rows, &query.hints.fetch).await?;
                Ok(QueryOutcome::Page(Page::new(content, &request, total)))
            }
            ResultKind::Slice => {
                let request = self.clamp(self.require_request(query, request)?);
                if projected && descriptor.distinct {
                    let content = self
                        .distinct_projections(uow, query, bound, &request)
                        .await?
                        .into_iter()
                        .skip(request.offset())
                        .take(request.size().saturating_add(1))
                        .collect();
                    return Ok(QueryOutcome::ProjectedSlice(Slice::from_overfetch(content, &request)));
                }
                let rows = exec
                    .fetch(uow, descriptor, bound, request.sort(), window(&request, 1), &query.hints)
                    .await?;
                if projected {
                    let content = self.project_rows(uow, descriptor, &rows).await?;
                    return Ok(QueryOutcome::ProjectedSlice(Slice::from_overfetch(content, &request)));
                }
                let content = self.materialize(uow, rows, &query.hints.fetch).await?;
                Ok(QueryOutcome::Slice(Slice::from_overfetch(content, &request)))
            }
        }
    }

    /// Exactly one entity: `NotFound` on none, `AmbiguousResult` on several.
    pub async fn find_one(&self, uow: &mut UnitOfWork, name: &str, params: Params) -> Result<E> {
        match self.invoke(uow, name, params, None).await? {
            QueryOutcome::One(entity) => Ok(entity),
            other => Err(mismatch(name, "one", &other)),
        }
    }

    pub async fn find_optional(&self, uow: &mut UnitOfWork, name: &str, params: Params) -> Result<Option<E>> {
        match self.invoke(uow, name, params, None).await? {
            QueryOutcome::Optional(entity) => Ok(entity),
            other => Err(mismatch(name, "optional", &other)),
        }
    }

    pub async fn find_list(&self, uow: &mut UnitOfWork, name: &str, params: Params) -> Result<Vec<E>> {
        match self.invoke(uow, name, params, None).await? {
            QueryOutcome::List(entities) => Ok(entities),
            other => Err(mismatch(name, "list", &other)),
        }
    }

    pub async fn find_page(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        params: Params,
        request: &PageRequest,
    ) -> Result<Page<E>> {
        match self.invoke(uow, name, params, Some(request)).await? {
            QueryOutcome::Page(page) => Ok(page),
            other => Err(mismatch(name, "page", &other)),
        }
    }

    pub async fn find_slice(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        params: Params,
        request: &PageRequest,
    ) -> Result<Slice<E>> {
        match self.invoke(uow, name, params, Some(request)).await? {
            QueryOutcome::Slice(slice) => Ok(slice),
            other => Err(mismatch(name, "slice", &other)),
        }
    }

    /// Rows of a method that selects fields rather than entities.
    pub async fn find_projected(&self, uow: &mut UnitOfWork, name: &str, params: Params) -> Result<Vec<Projected>> {
        match self.invoke(uow, name, params, None).await? {
            QueryOutcome::Projected(rows) => Ok(rows),
            other => Err(mismatch(name, "projected list", &other)),
        }
    }

    pub async fn find_projected_slice(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        params: Params,
        request: &PageRequest,
    ) -> Result<Slice<Projected>> {
        match self.invoke(uow, name, params, Some(request)).await? {
            QueryOutcome::ProjectedSlice(slice) => Ok(slice),
            other => Err(mismatch(name, "projected slice", &other)),
        }
    }

    pub async fn find_projected_page(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        params: Params,
        request: &PageRequest,
    ) -> Result<Page<Projected>> {
        match self.invoke(uow, name, params, Some(request)).await? {
            QueryOutcome::ProjectedPage(page) => Ok(page),
            other => Err(mismatch(name, "projected page", &other)),
        }
    }

    /// Run a select method and shape each row as `P`, chosen by the caller.
    pub async fn find_projections<P: FromProjection>(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        params: Params,
    ) -> Result<Vec<P>> {
        let query = self.registry.get(name)?;
        if query.descriptor.kind != QueryKind::Select {
            return Err(RepoError::Query(format!(
                "'{}' is a {} query and cannot be projected",
                name,
                query.descriptor.kind.name()
            )));
        }
        let shape = P::shape();
        validate_projection(&self.catalog, self.schema(), &shape)?;

        let bound = query.bind(params)?;
        let rows = self
            .executor()
            .fetch(uow, &query.descriptor, &bound, &Sort::unsorted(), Window::All, &query.hints)
            .await?;
        let projected = self
            .executor()
            .project(uow, self.schema(), &rows, &shape, query.descriptor.distinct)
            .await?;
        projected.iter().map(P::from_projection).collect()
    }

    pub async fn count_by(&self, uow: &mut UnitOfWork, name: &str, params: Params) -> Result<u64> {
        match self.invoke(uow, name, params, None).await? {
            QueryOutcome::Count(count) => Ok(count),
            other => Err(mismatch(name, "count", &other)),
        }
    }

    pub async fn exists_by(&self, uow: &mut UnitOfWork, name: &str, params: Params) -> Result<bool> {
        match self.invoke(uow, name, params, None).await? {
            QueryOutcome::Exists(found) => Ok(found),
            QueryOutcome::Count(count) => Ok(count > 0),
            other => Err(mismatch(name, "exists", &other)),
        }
    }

    /// Run a bulk update or delete. Entities the unit of work already
    /// manages keep their old state until `clear` or `detach`.
    pub async fn execute_update(&self, uow: &mut UnitOfWork, name: &str, params: Params) -> Result<u64> {
        match self.invoke(uow, name, params, None).await? {
            QueryOutcome::Modified(count) => Ok(count),
            other => Err(mismatch(name, "modified count", &other)),
        }
    }

    /// Custom lookup: every entity for which `filter` holds.
    pub async fn find_with<F>(&self, uow: &mut UnitOfWork, filter: F) -> Result<Vec<E>>
    where
        F: Fn(&E) -> bool,
    {
        let all = self.find_all(uow).await?;
        Ok(all.into_iter().filter(|entity| filter(entity)).collect())
    }

    // ------------------------------------------------------------------
    // Query by example
    // ------------------------------------------------------------------

    pub async fn find_all_by_example(&self, uow: &mut UnitOfWork, example: &Example<E>) -> Result<Vec<E>> {
        let query = self.example_query(example)?;
        let rows = self
            .executor()
            .fetch(uow, &query, &BoundParams::empty(), &Sort::unsorted(), Window::All, &QueryHints::default())
            .await?;
        self.materialize(uow, rows, &[]).await
    }

    /// At most one match; several is `AmbiguousResult`.
    pub async fn find_one_by_example(&self, uow: &mut UnitOfWork, example: &Example<E>) -> Result<Option<E>> {
        let mut found = self.find_all_by_example(uow, example).await?;
        if found.len() > 1 {
            return Err(RepoError::AmbiguousResult {
                expected: ResultKind::Optional.name(),
                found: found.len(),
            });
        }
        Ok(found.pop())
    }

    pub async fn count_by_example(&self, uow: &mut UnitOfWork, example: &Example<E>) -> Result<u64> {
        let query = self.example_query(example)?.to_count();
        self.executor().count(uow, &query, &BoundParams::empty()).await
    }

    pub async fn exists_by_example(&self, uow: &mut UnitOfWork, example: &Example<E>) -> Result<bool> {
        Ok(self.count_by_example(uow, example).await? > 0)
    }

    fn example_query(&self, example: &Example<E>) -> Result<QueryDescriptor> {
        let predicate: Option<Predicate> = example.to_predicate(&self.catalog)?;
        Ok(QueryDescriptor::select_all(self.schema().table()).with_predicate(predicate))
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Rows to entities, attaching eager relations (schema-declared plus
    /// the method's fetch list).
    async fn materialize(&self, uow: &mut UnitOfWork, rows: Vec<Row>, fetch: &[String]) -> Result<Vec<E>> {
        let schema = self.schema();
        let mut relations: Vec<String> = schema
            .relations()
            .filter(|(_, relation)| relation.fetch == FetchMode::Eager)
            .map(|(field, _)| field.to_string())
            .collect();
        for field in fetch {
            if !relations.contains(field) {
                relations.push(field.clone());
            }
        }

        let mut entities = rows.iter().map(E::from_row).collect::<Result<Vec<_>>>()?;
        if relations.is_empty() || rows.is_empty() {
            return Ok(entities);
        }

        let loaded = self
            .executor()
            .load_relations(uow, schema, &rows, &relations)
            .await?;
        for (entity, related) in entities.iter_mut().zip(loaded) {
            for (field, row) in related {
                entity.attach_related(&field, &row)?;
            }
        }
        Ok(entities)
    }

    async fn project_rows(
        &self,
        uow: &mut UnitOfWork,
        descriptor: &QueryDescriptor,
        rows: &[Row],
    ) -> Result<Vec<Projected>> {
        let projection: &Projection = &descriptor.projection;
        self.executor()
            .project(uow, self.schema(), rows, projection, descriptor.distinct)
            .await
    }

    /// Every distinct projection in request order; pages and slices window
    /// this list so duplicates never shorten a window or skew its total.
    async fn distinct_projections(
        &self,
        uow: &mut UnitOfWork,
        query: &ResolvedQuery,
        bound: &BoundParams,
        request: &PageRequest,
    ) -> Result<Vec<Projected>> {
        let rows = self
            .executor()
            .fetch(uow, &query.descriptor, bound, request.sort(), Window::All, &query.hints)
            .await?;
        self.project_rows(uow, &query.descriptor, &rows).await
    }

    /// `NotFound` / `AmbiguousResult` for single-result methods.
    fn check_single(&self, query: &ResolvedQuery, found: usize) -> Result<()> {
        if query.result != ResultKind::List && found > 1 {
            return Err(RepoError::AmbiguousResult {
                expected: query.result.name(),
                found,
            });
        }
        if query.result == ResultKind::One && found == 0 {
            return Err(RepoError::NotFound(format!(
                "'{}' matched no {}",
                query.name,
                self.schema().entity()
            )));
        }
        Ok(())
    }

    fn require_request<'r>(&self, query: &ResolvedQuery, request: Option<&'r PageRequest>) -> Result<&'r PageRequest> {
        request.ok_or_else(|| {
            RepoError::InvalidPageRequest(format!("'{}' returns {} and needs a page request", query.name, query.result.name()))
        })
    }

    fn clamp(&self, request: &PageRequest) -> PageRequest {
        if request.size() > self.max_page_size {
            warn!(
                "{}: page size {} clamped to {}",
                self.schema().entity(),
                request.size(),
                self.max_page_size
            );
        }
        request.clamped(self.max_page_size)
    }
}

/// Window of a page request, fetching `extra` more rows than the page holds.
fn window(request: &PageRequest, extra: usize) -> Window {
    Window::Range {
        offset: request.offset(),
        limit: request.size() + extra,
    }
}

fn mismatch<E>(name: &str, wanted: &str, got: &QueryOutcome<E>) -> RepoError {
    RepoError::Query(format!(
        "'{}' returns a {} result, not a {}",
        name,
        got.kind(),
        wanted
    ))
}
