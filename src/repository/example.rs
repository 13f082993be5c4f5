// ============================================================================
// Query by example
// ============================================================================
//
// A probe entity plus a matcher becomes a predicate. Fields that are NULL or
// still hold their default value are left out, as are ignored paths. A
// loaded related probe with an id matches on the foreign key; an unsaved one
// contributes its own set fields as `relation.field` clauses.
//
// ============================================================================

use crate::core::{EntitySchema, Result, Value};
use crate::entity::Entity;
use crate::query::{Clause, Comparator, FieldPath, Operand, Predicate};
use crate::storage::Catalog;

/// How text fields of the probe are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringMatcher {
    #[default]
    Exact,
    StartsWith,
    EndsWith,
    Contains,
}

impl StringMatcher {
    fn comparator(&self) -> Comparator {
        match self {
            Self::Exact => Comparator::Equal,
            Self::StartsWith => Comparator::StartingWith,
            Self::EndsWith => Comparator::EndingWith,
            Self::Contains => Comparator::Containing,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExampleMatcher {
    any: bool,
    ignored_paths: Vec<String>,
    ignore_case: Option<Vec<String>>,
    string_matcher: StringMatcher,
}

impl ExampleMatcher {
    /// Every probe field must match.
    pub fn matching() -> Self {
        Self::default()
    }

    /// Any one probe field is enough.
    pub fn matching_any() -> Self {
        Self {
            any: true,
            ..Self::default()
        }
    }

    pub fn with_ignore_paths(mut self, paths: &[&str]) -> Self {
        self.ignored_paths
            .extend(paths.iter().map(|path| path.to_string()));
        self
    }

    /// Case-insensitive text matching on `paths`, or on every path when empty.
    pub fn with_ignore_case(mut self, paths: &[&str]) -> Self {
        let listed = self.ignore_case.get_or_insert_with(Vec::new);
        listed.extend(paths.iter().map(|path| path.to_string()));
        self
    }

    pub fn with_string_matcher(mut self, matcher: StringMatcher) -> Self {
        self.string_matcher = matcher;
        self
    }

    pub fn is_all_matching(&self) -> bool {
        !self.any
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignored_paths.iter().any(|p| p == path)
    }

    fn ignores_case(&self, path: &str) -> bool {
        match &self.ignore_case {
            Some(paths) => paths.is_empty() || paths.iter().any(|p| p == path),
            None => false,
        }
    }

    fn validate(&self, catalog: &Catalog, schema: &EntitySchema) -> Result<()> {
        let named = self
            .ignored_paths
            .iter()
            .chain(self.ignore_case.iter().flatten());
        for path in named {
            let path = FieldPath::parse(path);
            match &path.relation {
                Some(relation) => {
                    catalog.related(schema, relation)?.require_column(&path.field)?;
                }
                None => {
                    schema.require_column(&path.field)?;
                }
            }
        }
        Ok(())
    }
}

/// A probe entity and the rules for matching it.
#[derive(Debug, Clone)]
pub struct Example<E: Entity> {
    probe: E,
    matcher: ExampleMatcher,
}

impl<E: Entity> Example<E> {
    pub fn of(probe: E) -> Self {
        Self::of_matching(probe, ExampleMatcher::matching())
    }

    pub fn of_matching(probe: E, matcher: ExampleMatcher) -> Self {
        Self { probe, matcher }
    }

    pub fn probe(&self) -> &E {
        &self.probe
    }

    pub fn matcher(&self) -> &ExampleMatcher {
        &self.matcher
    }

    /// `None` when the probe sets nothing, which matches every row.
    pub fn to_predicate(&self, catalog: &Catalog) -> Result<Option<Predicate>> {
        let schema = E::schema();
        self.matcher.validate(catalog, schema)?;

        let row = self.probe.to_row();
        let defaults = E::default().to_row();
        let related = self.probe.related_probes();
        let mut clauses = Vec::new();

        for (idx, column) in schema.columns().iter().enumerate() {
            let name = column.name.as_str();
            if self.matcher.is_ignored(name) {
                continue;
            }

            if let Some((_, related_id, related_row)) = related.iter().find(|(field, _, _)| *field == name) {
                match related_id {
                    Some(id) => clauses.push(self.clause(FieldPath::field(name), Value::Integer(*id))),
                    None => {
                        let target = catalog.related(schema, name)?;
                        clauses.extend(self.related_clauses(name, target, related_row));
                    }
                }
                continue;
            }

            let value = row.get(idx).cloned().unwrap_or(Value::Null);
            if value.is_null() || defaults.get(idx) == Some(&value) {
                continue;
            }
            clauses.push(self.clause(FieldPath::field(name), value));
        }

        if clauses.is_empty() {
            return Ok(None);
        }
        let predicate = if self.matcher.any {
            Predicate::Or(clauses)
        } else {
            Predicate::And(clauses)
        };
        Ok(Some(predicate.simplify()))
    }

    fn related_clauses(&self, relation: &str, target: &EntitySchema, row: &[Value]) -> Vec<Predicate> {
        let mut clauses = Vec::new();
        for (column, value) in target.columns().iter().zip(row.iter()) {
            let path = format!("{}.{}", relation, column.name);
            if column.name == target.id_field() || self.matcher.is_ignored(&path) {
                continue;
            }
            if value.is_null() || *value == column.data_type.default_value() {
                continue;
            }
            clauses.push(self.clause(FieldPath::nested(relation, column.name.clone()), value.clone()));
        }
        clauses
    }

    fn clause(&self, path: FieldPath, value: Value) -> Predicate {
        let text = value.as_str().is_some();
        let display = path.to_string();
        let comparator = if text {
            self.matcher.string_matcher.comparator()
        } else {
            Comparator::Equal
        };
        Predicate::Clause(
            Clause::new(path, comparator, vec![Operand::Literal(value)])
                .ignoring_case(text && self.matcher.ignores_case(&display)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Member, Team};

    fn catalog() -> Catalog {
        Catalog::new()
            .with_schema(Team::schema().clone())
            .and_then(|c| c.with_schema(Member::schema().clone()))
            .unwrap()
    }

    fn paths(predicate: &Predicate) -> Vec<String> {
        predicate.clauses().iter().map(|c| c.path.to_string()).collect()
    }

    #[test]
    fn test_probe_with_unsaved_team() {
        let probe = Member::new("member1", 0).with_team(&Team::new("teamA"));
        let example = Example::of_matching(probe, ExampleMatcher::matching().with_ignore_paths(&["age"]));
        let predicate = example.to_predicate(&catalog()).unwrap().unwrap();
        assert_eq!(paths(&predicate), vec!["username", "team.name"]);
        assert!(matches!(predicate, Predicate::And(_)));
    }

    #[test]
    fn test_saved_team_matches_foreign_key() {
        let mut team = Team::new("teamA");
        team.id = Some(4);
        let mut probe = Member::new("", 0);
        probe.team = Some(crate::entity::Related::loaded(team));
        let predicate = Example::of(probe).to_predicate(&catalog()).unwrap().unwrap();
        let clauses = predicate.clauses();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].path, FieldPath::field("team"));
        assert_eq!(clauses[0].operands, vec![Operand::Literal(Value::Integer(4))]);
    }

    #[test]
    fn test_defaults_match_everything() {
        let example = Example::of(Member::default());
        assert!(example.to_predicate(&catalog()).unwrap().is_none());
    }

    #[test]
    fn test_string_matcher_and_case() {
        let matcher = ExampleMatcher::matching_any()
            .with_string_matcher(StringMatcher::StartsWith)
            .with_ignore_case(&[]);
        let predicate = Example::of_matching(Member::new("MEM", 30), matcher)
            .to_predicate(&catalog())
            .unwrap()
            .unwrap();
        assert!(matches!(predicate, Predicate::Or(_)));
        let clauses = predicate.clauses();
        assert_eq!(clauses[0].comparator, Comparator::StartingWith);
        assert!(clauses[0].ignore_case);
        assert_eq!(clauses[1].comparator, Comparator::Equal);
        assert!(!clauses[1].ignore_case);
    }

    #[test]
    fn test_unknown_ignore_path() {
        let example = Example::of_matching(
            Member::new("member1", 0),
            ExampleMatcher::matching().with_ignore_paths(&["nickname"]),
        );
        assert!(example.to_predicate(&catalog()).is_err());
    }
}
