// ============================================================================
// Query method registry
// ============================================================================
//
// A repository declares its query methods once. Registration resolves each
// method (derived name, explicit query, or a named query registered for the
// entity), validates it against the catalog and fixes its result shape;
// nothing is re-parsed at call time.
//
// ============================================================================

use super::descriptor::{Operand, ParamRef, Projection, QueryDescriptor, QueryKind, SetValue};
use super::resolver::MethodNameResolver;
use super::sql::SqlQueryParser;
use crate::core::{EntitySchema, RepoError, Result, Value};
use crate::storage::Catalog;
use std::collections::HashMap;

/// Shape of a method's result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// Exactly one row
    One,
    /// Zero or one row
    Optional,
    List,
    /// A window plus the total count
    Page,
    /// A window plus whether a next one exists
    Slice,
    Count,
    Exists,
    /// Rows touched by a bulk update or delete
    Modifying,
}

impl ResultKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::One => "exactly one row",
            Self::Optional => "at most one row",
            Self::List => "a list",
            Self::Page => "a page",
            Self::Slice => "a slice",
            Self::Count => "a count",
            Self::Exists => "an existence check",
            Self::Modifying => "a modifying statement",
        }
    }

    fn accepts(&self, kind: &QueryKind) -> bool {
        match self {
            Self::One | Self::Optional | Self::List | Self::Page | Self::Slice => {
                matches!(kind, QueryKind::Select)
            }
            Self::Count => matches!(kind, QueryKind::Count),
            Self::Exists => matches!(kind, QueryKind::Exists | QueryKind::Count),
            Self::Modifying => kind.is_modifying(),
        }
    }

    fn default_for(kind: &QueryKind) -> Self {
        match kind {
            QueryKind::Select => Self::List,
            QueryKind::Count => Self::Count,
            QueryKind::Exists => Self::Exists,
            QueryKind::Delete | QueryKind::Update(_) => Self::Modifying,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Exclusive row lock held until the unit of work ends
    PessimisticWrite,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryHints {
    /// Returned entities are never written back on flush
    pub read_only: bool,
    pub lock: Option<LockMode>,
    /// Relations fetched together with the result rows
    pub fetch: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuerySource {
    /// Parse the method name
    Derived,
    /// Explicit query text
    Explicit(String),
}

/// Declaration of one repository query method.
#[derive(Debug, Clone)]
pub struct QueryMethod {
    name: String,
    source: QuerySource,
    result: Option<ResultKind>,
    params: Option<Vec<String>>,
    count_query: Option<String>,
    projection: Option<Projection>,
    hints: QueryHints,
}

impl QueryMethod {
    /// A method whose query comes from its name.
    pub fn derived(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: QuerySource::Derived,
            result: None,
            params: None,
            count_query: None,
            projection: None,
            hints: QueryHints::default(),
        }
    }

    /// A method backed by explicit query text.
    pub fn query(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            source: QuerySource::Explicit(sql.into()),
            ..Self::derived(name)
        }
    }

    pub fn returns(mut self, result: ResultKind) -> Self {
        self.result = Some(result);
        self
    }

    /// Declared parameter names, in call order.
    pub fn params(mut self, names: &[&str]) -> Self {
        self.params = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Query used for a page's total instead of counting the main query.
    pub fn count_query(mut self, sql: impl Into<String>) -> Self {
        self.count_query = Some(sql.into());
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.hints.read_only = true;
        self
    }

    pub fn lock(mut self, mode: LockMode) -> Self {
        self.hints.lock = Some(mode);
        self
    }

    pub fn fetch(mut self, relations: &[&str]) -> Self {
        self.hints.fetch = relations.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &QuerySource {
        &self.source
    }
}

/// Arguments of one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Params {
    pub fn none() -> Self {
        Self::Positional(Vec::new())
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Named(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Positional arguments: `params![name, 10]`
#[macro_export]
macro_rules! params {
    () => {
        $crate::query::Params::Positional(Vec::new())
    };
    ($($value:expr),+ $(,)?) => {
        $crate::query::Params::Positional(vec![$($crate::core::Value::from($value)),+])
    };
}

/// Named arguments: `named_params! { "username" => "member1" }`
#[macro_export]
macro_rules! named_params {
    ($($name:expr => $value:expr),* $(,)?) => {
        $crate::query::Params::Named(vec![$(($name.to_string(), $crate::core::Value::from($value))),*])
    };
}

/// Arguments resolved against a method's placeholders.
#[derive(Debug, Clone, Default)]
pub struct BoundParams {
    values: HashMap<ParamRef, Value>,
}

impl BoundParams {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn value(&self, operand: &Operand) -> Result<Value> {
        match operand {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Param(param) => self
                .values
                .get(param)
                .cloned()
                .ok_or_else(|| RepoError::ParameterBinding(format!("no value bound for {}", param))),
        }
    }
}

/// A method after registration: validated descriptors plus its contract.
#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    pub name: String,
    pub descriptor: QueryDescriptor,
    pub count: Option<QueryDescriptor>,
    pub result: ResultKind,
    pub hints: QueryHints,
    /// Parameter names in call order; empty for purely positional methods
    pub param_names: Vec<String>,
}

impl ResolvedQuery {
    pub fn arity(&self) -> usize {
        self.descriptor.parameters.len()
    }

    /// Map call arguments onto placeholders.
    pub fn bind(&self, params: Params) -> Result<BoundParams> {
        let arity = self.arity();
        if params.len() != arity {
            return Err(RepoError::ParameterBinding(format!(
                "'{}' takes {} argument(s), got {}",
                self.name,
                arity,
                params.len()
            )));
        }

        let mut values = HashMap::with_capacity(arity);
        match params {
            Params::Positional(args) => {
                for (idx, value) in args.into_iter().enumerate() {
                    let param = match self.param_names.get(idx) {
                        Some(name) if self.uses_names() => ParamRef::Named(name.clone()),
                        _ => ParamRef::Positional(idx),
                    };
                    values.insert(param, value);
                }
            }
            Params::Named(pairs) => {
                if self.param_names.is_empty() {
                    return Err(RepoError::ParameterBinding(format!(
                        "'{}' declares no parameter names; pass positional arguments",
                        self.name
                    )));
                }
                for (name, value) in pairs {
                    let Some(idx) = self.param_names.iter().position(|n| *n == name) else {
                        return Err(RepoError::ParameterBinding(format!(
                            "'{}' has no parameter '{}'",
                            self.name, name
                        )));
                    };
                    let param = if self.uses_names() {
                        ParamRef::Named(name)
                    } else {
                        ParamRef::Positional(idx)
                    };
                    if values.insert(param, value).is_some() {
                        return Err(RepoError::ParameterBinding(format!(
                            "'{}' received parameter '{}' twice",
                            self.name, self.param_names[idx]
                        )));
                    }
                }
            }
        }

        self.check_list_arguments(&values)?;
        Ok(BoundParams { values })
    }

    fn uses_names(&self) -> bool {
        self.descriptor
            .parameters
            .iter()
            .any(|p| matches!(p, ParamRef::Named(_)))
    }

    fn check_list_arguments(&self, values: &HashMap<ParamRef, Value>) -> Result<()> {
        let Some(predicate) = &self.descriptor.predicate else {
            return Ok(());
        };
        for clause in predicate.clauses() {
            if !clause.comparator.expects_list() {
                continue;
            }
            for operand in &clause.operands {
                if let Operand::Param(param) = operand
                    && let Some(value) = values.get(param)
                    && value.as_list().is_none()
                {
                    return Err(RepoError::ParameterBinding(format!(
                        "'{}' expects a list for {} ({})",
                        self.name, param, clause.path
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Resolved query methods of one repository.
#[derive(Debug, Clone, Default)]
pub struct QueryRegistry {
    methods: HashMap<String, ResolvedQuery>,
    named_queries: HashMap<String, String>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register query text under `<Entity>.<method>`; a derived method of
    /// that name uses it instead of parsing its own name.
    pub fn add_named_query(&mut self, name: impl Into<String>, sql: impl Into<String>) {
        self.named_queries.insert(name.into(), sql.into());
    }

    pub fn register(
        &mut self,
        catalog: &Catalog,
        schema: &EntitySchema,
        method: QueryMethod,
    ) -> Result<&ResolvedQuery> {
        let resolved = self.resolve(catalog, schema, method)?;
        let name = resolved.name.clone();
        self.methods.insert(name.clone(), resolved);
        self.get(&name)
    }

    pub fn get(&self, name: &str) -> Result<&ResolvedQuery> {
        self.methods
            .get(name)
            .ok_or_else(|| RepoError::Query(format!("no query method named '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn resolve(&self, catalog: &Catalog, schema: &EntitySchema, method: QueryMethod) -> Result<ResolvedQuery> {
        let sql_parser = SqlQueryParser::new(catalog);
        let named_key = format!("{}.{}", schema.entity(), method.name);

        let mut descriptor = match (&method.source, self.named_queries.get(&named_key)) {
            (QuerySource::Explicit(sql), _) => sql_parser.parse(schema, sql)?,
            (QuerySource::Derived, Some(sql)) => sql_parser.parse(schema, sql)?,
            (QuerySource::Derived, None) => MethodNameResolver::new(catalog).resolve(schema, &method.name)?,
        };

        let result = method
            .result
            .unwrap_or_else(|| ResultKind::default_for(&descriptor.kind));
        if !result.accepts(&descriptor.kind) {
            return Err(RepoError::Query(format!(
                "'{}' is a {} query and cannot return {}",
                method.name,
                descriptor.kind.name(),
                result.name()
            )));
        }
        if result == ResultKind::Exists {
            descriptor.kind = QueryKind::Exists;
        }

        if let Some(projection) = method.projection.clone() {
            validate_projection(catalog, schema, &projection)?;
            descriptor.projection = projection;
        }
        validate_descriptor(catalog, schema, &descriptor)?;
        validate_hints(catalog, schema, &method.hints)?;
        if method.hints.lock.is_some() && descriptor.kind.is_modifying() {
            return Err(RepoError::Query(format!(
                "'{}': lock hints apply to selects only",
                method.name
            )));
        }

        let param_names = check_declared_params(&method, &descriptor)?;

        let count = match &method.count_query {
            Some(sql) => {
                if result != ResultKind::Page {
                    return Err(RepoError::Query(format!(
                        "'{}' has a count query but does not return a page",
                        method.name
                    )));
                }
                let count = sql_parser.parse(schema, sql)?;
                if count.kind != QueryKind::Count {
                    return Err(RepoError::Query(format!(
                        "count query of '{}' must select COUNT(*)",
                        method.name
                    )));
                }
                if !count.parameters.iter().all(|p| descriptor.parameters.contains(p)) {
                    return Err(RepoError::ParameterBinding(format!(
                        "count query of '{}' uses parameters the main query lacks",
                        method.name
                    )));
                }
                Some(count)
            }
            None => None,
        };

        Ok(ResolvedQuery {
            name: method.name,
            descriptor,
            count,
            result,
            hints: method.hints,
            param_names,
        })
    }
}

/// Declared parameter names must match the placeholders one for one.
fn check_declared_params(method: &QueryMethod, descriptor: &QueryDescriptor) -> Result<Vec<String>> {
    let placeholders = &descriptor.parameters;
    let named: Vec<&str> = placeholders
        .iter()
        .filter_map(|p| match p {
            ParamRef::Named(name) => Some(name.as_str()),
            ParamRef::Positional(_) => None,
        })
        .collect();

    let Some(declared) = &method.params else {
        if !named.is_empty() {
            return Ok(named.iter().map(|n| n.to_string()).collect());
        }
        return Ok(Vec::new());
    };

    if declared.len() != placeholders.len() {
        return Err(RepoError::ParameterBinding(format!(
            "'{}' declares {} parameter(s) but its query uses {}",
            method.name,
            declared.len(),
            placeholders.len()
        )));
    }
    for name in &named {
        if !declared.iter().any(|d| d == name) {
            return Err(RepoError::ParameterBinding(format!(
                "'{}' uses :{} but does not declare it",
                method.name, name
            )));
        }
    }
    Ok(declared.clone())
}

fn validate_path(catalog: &Catalog, schema: &EntitySchema, relation: Option<&str>, field: &str) -> Result<()> {
    match relation {
        Some(relation) => {
            catalog.related(schema, relation)?.require_column(field)?;
        }
        None => {
            schema.require_column(field)?;
        }
    }
    Ok(())
}

pub(crate) fn validate_projection(catalog: &Catalog, schema: &EntitySchema, projection: &Projection) -> Result<()> {
    match projection {
        Projection::Entity => Ok(()),
        Projection::Fields(selections) => selections
            .iter()
            .try_for_each(|s| validate_path(catalog, schema, s.path.relation.as_deref(), &s.path.field)),
        Projection::Nested { fields, relations } => {
            for field in fields {
                schema.require_column(field)?;
            }
            for relation in relations {
                let target = catalog.related(schema, &relation.field)?;
                for column in &relation.columns {
                    target.require_column(column)?;
                }
            }
            Ok(())
        }
    }
}

pub(crate) fn validate_descriptor(catalog: &Catalog, schema: &EntitySchema, descriptor: &QueryDescriptor) -> Result<()> {
    for order in descriptor.sort.orders() {
        let path = super::FieldPath::parse(&order.property);
        validate_path(catalog, schema, path.relation.as_deref(), &path.field)?;
    }
    if let QueryKind::Update(assignments) = &descriptor.kind {
        for assignment in assignments {
            schema.require_column(&assignment.field)?;
            if let SetValue::Add(Operand::Literal(value)) | SetValue::Subtract(Operand::Literal(value)) =
                &assignment.value
                && !value.is_numeric()
            {
                return Err(RepoError::Query(format!(
                    "cannot add {} to '{}'",
                    value.type_name(),
                    assignment.field
                )));
            }
        }
    }
    Ok(())
}

fn validate_hints(catalog: &Catalog, schema: &EntitySchema, hints: &QueryHints) -> Result<()> {
    for relation in &hints.fetch {
        catalog.related(schema, relation)?;
    }
    Ok(())
}
