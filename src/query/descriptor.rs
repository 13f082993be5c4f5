use super::sort::Sort;
use crate::core::Value;
use std::fmt;

/// A field of the queried entity, or a field of an entity it references.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub relation: Option<String>,
    pub field: String,
}

impl FieldPath {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            relation: None,
            field: name.into(),
        }
    }

    pub fn nested(relation: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            relation: Some(relation.into()),
            field: field.into(),
        }
    }

    /// Parse `field` or `relation.field`.
    pub fn parse(path: &str) -> Self {
        match path.split_once('.') {
            Some((relation, field)) => Self::nested(relation, field),
            None => Self::field(path),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}.{}", relation, self.field),
            None => write!(f, "{}", self.field),
        }
    }
}

/// A placeholder in a query: the n-th argument (0-based) or a named one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamRef {
    Positional(usize),
    Named(String),
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positional(idx) => write!(f, "?{}", idx + 1),
            Self::Named(name) => write!(f, ":{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Param(ParamRef),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Between,
    Like,
    NotLike,
    StartingWith,
    EndingWith,
    Containing,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Comparator {
    /// Number of operands (and so of derived-query parameters) consumed.
    pub fn arity(&self) -> usize {
        match self {
            Self::IsNull | Self::IsNotNull => 0,
            Self::Between => 2,
            _ => 1,
        }
    }

    pub fn expects_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            Self::Like | Self::NotLike | Self::StartingWith | Self::EndingWith | Self::Containing
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub path: FieldPath,
    pub comparator: Comparator,
    pub operands: Vec<Operand>,
    pub ignore_case: bool,
}

impl Clause {
    pub fn new(path: FieldPath, comparator: Comparator, operands: Vec<Operand>) -> Self {
        Self {
            path,
            comparator,
            operands,
            ignore_case: false,
        }
    }

    pub fn ignoring_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Clause(Clause),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Every clause of the tree, left to right.
    pub fn clauses(&self) -> Vec<&Clause> {
        let mut out = Vec::new();
        self.collect_clauses(&mut out);
        out
    }

    fn collect_clauses<'a>(&'a self, out: &mut Vec<&'a Clause>) {
        match self {
            Predicate::Clause(clause) => out.push(clause),
            Predicate::And(parts) | Predicate::Or(parts) => {
                for part in parts {
                    part.collect_clauses(out);
                }
            }
        }
    }

    /// Collapse single-element groups.
    pub fn simplify(self) -> Self {
        match self {
            Predicate::And(mut parts) if parts.len() == 1 => parts.remove(0).simplify(),
            Predicate::Or(mut parts) if parts.len() == 1 => parts.remove(0).simplify(),
            Predicate::And(parts) => Predicate::And(parts.into_iter().map(Self::simplify).collect()),
            Predicate::Or(parts) => Predicate::Or(parts.into_iter().map(Self::simplify).collect()),
            clause => clause,
        }
    }
}

/// Right-hand side of a bulk `SET field = ...`.
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    Assign(Operand),
    /// `field = field + operand`
    Add(Operand),
    /// `field = field - operand`
    Subtract(Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: String,
    pub value: SetValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    Select,
    Count,
    Exists,
    Delete,
    Update(Vec<Assignment>),
}

impl QueryKind {
    pub fn is_modifying(&self) -> bool {
        matches!(self, Self::Delete | Self::Update(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Count => "count",
            Self::Exists => "exists",
            Self::Delete => "delete",
            Self::Update(_) => "update",
        }
    }
}

/// One selected value of a flat projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub path: FieldPath,
    pub alias: String,
}

impl Selection {
    pub fn new(path: FieldPath, alias: impl Into<String>) -> Self {
        Self {
            path,
            alias: alias.into(),
        }
    }

    /// Select a path under its own last segment as name.
    pub fn path(path: &str) -> Self {
        let path = FieldPath::parse(path);
        let alias = path.field.clone();
        Self { path, alias }
    }
}

/// A relation of a nested projection and the related fields it exposes.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedRelation {
    pub field: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Projection {
    /// The full entity
    #[default]
    Entity,
    /// Selected scalar values, possibly reached through a relation
    Fields(Vec<Selection>),
    /// Selected root fields plus a nested view of related entities
    Nested {
        fields: Vec<String>,
        relations: Vec<NestedRelation>,
    },
}

impl Projection {
    pub fn fields(paths: &[&str]) -> Self {
        Self::Fields(paths.iter().map(|path| Selection::path(path)).collect())
    }

    pub fn nested(fields: &[&str], relations: &[(&str, &[&str])]) -> Self {
        Self::Nested {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            relations: relations
                .iter()
                .map(|(field, columns)| NestedRelation {
                    field: field.to_string(),
                    columns: columns.iter().map(|c| c.to_string()).collect(),
                })
                .collect(),
        }
    }

    pub fn is_entity(&self) -> bool {
        matches!(self, Self::Entity)
    }

    /// Relation fields whose targets must be looked up to build this shape.
    pub fn relations(&self) -> Vec<&str> {
        let mut out: Vec<&str> = match self {
            Self::Entity => Vec::new(),
            Self::Fields(selections) => selections
                .iter()
                .filter_map(|s| s.path.relation.as_deref())
                .collect(),
            Self::Nested { relations, .. } => relations.iter().map(|r| r.field.as_str()).collect(),
        };
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Structured, validated form of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub table: String,
    pub kind: QueryKind,
    pub predicate: Option<Predicate>,
    pub sort: Sort,
    pub limit: Option<usize>,
    pub distinct: bool,
    pub projection: Projection,
    /// Distinct placeholders in first-use order
    pub parameters: Vec<ParamRef>,
}

impl QueryDescriptor {
    pub fn new(table: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            table: table.into(),
            kind,
            predicate: None,
            sort: Sort::unsorted(),
            limit: None,
            distinct: false,
            projection: Projection::Entity,
            parameters: Vec::new(),
        }
    }

    pub fn select_all(table: impl Into<String>) -> Self {
        Self::new(table, QueryKind::Select)
    }

    pub fn with_predicate(mut self, predicate: Option<Predicate>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    /// The same filter as a count: no sort, no limit, no projection.
    pub fn to_count(&self) -> Self {
        Self {
            table: self.table.clone(),
            kind: QueryKind::Count,
            predicate: self.predicate.clone(),
            sort: Sort::unsorted(),
            limit: None,
            distinct: false,
            projection: Projection::Entity,
            parameters: self.parameters.clone(),
        }
    }

    /// Record the placeholders of every operand in first-use order.
    pub fn collect_parameters(&mut self) {
        let mut params: Vec<ParamRef> = Vec::new();
        let mut push = |operand: &Operand| {
            if let Operand::Param(param) = operand
                && !params.contains(param)
            {
                params.push(param.clone());
            }
        };

        if let Some(predicate) = &self.predicate {
            for clause in predicate.clauses() {
                clause.operands.iter().for_each(&mut push);
            }
        }
        if let QueryKind::Update(assignments) = &self.kind {
            for assignment in assignments {
                match &assignment.value {
                    SetValue::Assign(op) | SetValue::Add(op) | SetValue::Subtract(op) => push(op),
                }
            }
        }

        // Assignments come first in statement order for `UPDATE ... SET ... WHERE`
        if let QueryKind::Update(_) = &self.kind {
            params.sort_by_key(|param| match param {
                ParamRef::Positional(idx) => *idx,
                ParamRef::Named(_) => usize::MAX,
            });
        }
        self.parameters = params;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(field: &str, param: usize) -> Predicate {
        Predicate::Clause(Clause::new(
            FieldPath::field(field),
            Comparator::Equal,
            vec![Operand::Param(ParamRef::Positional(param))],
        ))
    }

    #[test]
    fn test_field_path_parse_and_display() {
        assert_eq!(FieldPath::parse("team.name"), FieldPath::nested("team", "name"));
        assert_eq!(FieldPath::parse("age").to_string(), "age");
        assert_eq!(FieldPath::nested("team", "name").to_string(), "team.name");
    }

    #[test]
    fn test_simplify_collapses_single_groups() {
        let tree = Predicate::Or(vec![Predicate::And(vec![clause("username", 0)])]);
        assert_eq!(tree.simplify(), clause("username", 0));
    }

    #[test]
    fn test_collect_parameters_deduplicates() {
        let mut query = QueryDescriptor::select_all("member").with_predicate(Some(Predicate::Or(vec![
            clause("username", 0),
            clause("age", 1),
            clause("username", 0),
        ])));
        query.collect_parameters();
        assert_eq!(
            query.parameters,
            vec![ParamRef::Positional(0), ParamRef::Positional(1)]
        );
    }

    #[test]
    fn test_projection_relations() {
        let shape = Projection::nested(&["username"], &[("team", &["name"])]);
        assert_eq!(shape.relations(), vec!["team"]);
        assert!(Projection::fields(&["username"]).relations().is_empty());
    }
}
