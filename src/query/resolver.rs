// ============================================================================
// Derived queries: method name -> QueryDescriptor
// ============================================================================
//
// Grammar (camel-case words):
//
//   <verb><subject>By<predicate>[OrderBy<orders>]
//
//   verb       find | read | get | query | search | stream   -> select
//              count | exists | delete | remove
//   subject    free words, plus `Distinct` and `First<N>` / `Top<N>`
//   predicate  <part>(And <part>)* (Or <part>(And <part>)*)*
//   part       <Property>[<Comparator>][IgnoreCase]
//   orders     (<Property>[Asc|Desc])+
//
// Properties are camel-case field names (`Username` -> `username`,
// `TeamName` -> `team_name`). When no such field exists the words are
// split into a relation and a field of the related entity (`TeamName` ->
// `team.name`).
//
// ============================================================================

use super::descriptor::{
    Clause, Comparator, FieldPath, Operand, ParamRef, Predicate, QueryDescriptor, QueryKind,
};
use super::sort::{Direction, Order, Sort};
use crate::core::{EntitySchema, RepoError, Result};
use crate::storage::Catalog;

const SELECT_VERBS: [&str; 6] = ["find", "read", "get", "query", "search", "stream"];

/// Comparator suffixes, longest first so that `GreaterThanEqual` wins over `GreaterThan`.
const COMPARATOR_SUFFIXES: [(&[&str], Comparator); 23] = [
    (&["Is", "Not", "Null"], Comparator::IsNotNull),
    (&["Greater", "Than", "Equal"], Comparator::GreaterThanEqual),
    (&["Less", "Than", "Equal"], Comparator::LessThanEqual),
    (&["Not", "Null"], Comparator::IsNotNull),
    (&["Is", "Null"], Comparator::IsNull),
    (&["Greater", "Than"], Comparator::GreaterThan),
    (&["Less", "Than"], Comparator::LessThan),
    (&["Starting", "With"], Comparator::StartingWith),
    (&["Starts", "With"], Comparator::StartingWith),
    (&["Ending", "With"], Comparator::EndingWith),
    (&["Ends", "With"], Comparator::EndingWith),
    (&["Not", "Like"], Comparator::NotLike),
    (&["Not", "In"], Comparator::NotIn),
    (&["Null"], Comparator::IsNull),
    (&["After"], Comparator::GreaterThan),
    (&["Before"], Comparator::LessThan),
    (&["Between"], Comparator::Between),
    (&["Like"], Comparator::Like),
    (&["Containing"], Comparator::Containing),
    (&["Contains"], Comparator::Containing),
    (&["In"], Comparator::In),
    (&["Not"], Comparator::NotEqual),
    (&["Equals"], Comparator::Equal),
];

/// Split `findByUsernameAndAge` into `["find", "By", "Username", "And", "Age"]`.
/// Digits stay attached to the word before them.
pub fn split_camel(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for c in name.chars() {
        if c.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn to_snake(words: &[String]) -> String {
    words
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Resolves method names against the entity schemas of a catalog.
pub struct MethodNameResolver<'a> {
    catalog: &'a Catalog,
}

impl<'a> MethodNameResolver<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn resolve(&self, schema: &EntitySchema, method: &str) -> Result<QueryDescriptor> {
        let words = split_camel(method);
        let Some(verb) = words.first() else {
            return Err(RepoError::Query("empty method name".into()));
        };

        let kind = match verb.as_str() {
            v if SELECT_VERBS.contains(&v) => QueryKind::Select,
            "count" => QueryKind::Count,
            "exists" => QueryKind::Exists,
            "delete" | "remove" => QueryKind::Delete,
            other => {
                return Err(RepoError::Query(format!(
                    "cannot derive a query from '{}': unknown verb '{}'",
                    method, other
                )));
            }
        };

        let rest = &words[1..];
        let order_at = find_pair(rest, "Order", "By");
        let body = match order_at {
            Some(idx) => &rest[..idx],
            None => rest,
        };
        let by_at = body.iter().position(|w| w == "By");
        let (subject, criteria) = match by_at {
            Some(idx) => (&body[..idx], &body[idx + 1..]),
            None => (body, &body[body.len()..]),
        };
        if by_at.is_some() && criteria.is_empty() && order_at.is_none() {
            return Err(RepoError::Query(format!(
                "'{}' has no criteria after 'By'",
                method
            )));
        }

        let mut query = QueryDescriptor::new(schema.table(), kind);
        self.apply_subject(&mut query, subject, method)?;

        let mut next_param = 0;
        if !criteria.is_empty() {
            query.predicate = Some(self.parse_criteria(schema, criteria, &mut next_param)?);
        }
        if let Some(idx) = order_at {
            query.sort = self.parse_orders(schema, &rest[idx + 2..], method)?;
        }

        query.collect_parameters();
        Ok(query)
    }

    fn apply_subject(&self, query: &mut QueryDescriptor, subject: &[String], method: &str) -> Result<()> {
        for word in subject {
            if word == "Distinct" {
                query.distinct = true;
                continue;
            }
            let limit = word
                .strip_prefix("First")
                .or_else(|| word.strip_prefix("Top"))
                .filter(|digits| digits.chars().all(|c| c.is_ascii_digit()));
            if let Some(digits) = limit {
                let n = if digits.is_empty() {
                    1
                } else {
                    digits.parse::<usize>().map_err(|_| {
                        RepoError::Query(format!("'{}': invalid limit '{}'", method, word))
                    })?
                };
                if n == 0 {
                    return Err(RepoError::Query(format!("'{}': limit must be positive", method)));
                }
                query.limit = Some(n);
            }
        }
        Ok(())
    }

    fn parse_criteria(
        &self,
        schema: &EntitySchema,
        words: &[String],
        next_param: &mut usize,
    ) -> Result<Predicate> {
        let mut groups = Vec::new();
        for or_part in split_on(words, "Or") {
            let mut clauses = Vec::new();
            for and_part in split_on(or_part, "And") {
                clauses.push(Predicate::Clause(self.parse_part(schema, and_part, next_param)?));
            }
            groups.push(Predicate::And(clauses));
        }
        Ok(Predicate::Or(groups).simplify())
    }

    fn parse_part(&self, schema: &EntitySchema, words: &[String], next_param: &mut usize) -> Result<Clause> {
        let mut words = words;
        let mut ignore_case = false;

        if ends_with(words, &["Ignore", "Case"]) {
            ignore_case = true;
            words = &words[..words.len() - 2];
            if ends_with(words, &["All"]) {
                words = &words[..words.len() - 1];
            }
        }

        let mut comparator = Comparator::Equal;
        for (suffix, candidate) in COMPARATOR_SUFFIXES {
            if words.len() > suffix.len() && ends_with(words, suffix) {
                comparator = candidate;
                words = &words[..words.len() - suffix.len()];
                break;
            }
        }
        if words.len() > 1 && ends_with(words, &["Is"]) {
            words = &words[..words.len() - 1];
        }
        if words.is_empty() {
            return Err(RepoError::Query("criteria part without a property".into()));
        }

        let path = self.resolve_property(schema, words)?;
        let operands = (0..comparator.arity())
            .map(|_| {
                let param = ParamRef::Positional(*next_param);
                *next_param += 1;
                Operand::Param(param)
            })
            .collect();

        Ok(Clause::new(path, comparator, operands).ignoring_case(ignore_case))
    }

    fn parse_orders(&self, schema: &EntitySchema, words: &[String], method: &str) -> Result<Sort> {
        let mut orders = Vec::new();
        let mut property: Vec<String> = Vec::new();

        for word in words {
            let direction = match word.as_str() {
                "Asc" => Some(Direction::Asc),
                "Desc" => Some(Direction::Desc),
                _ => None,
            };
            match direction {
                Some(direction) if !property.is_empty() => {
                    orders.push(self.order(schema, &property, direction)?);
                    property.clear();
                }
                _ => property.push(word.clone()),
            }
        }
        if !property.is_empty() {
            orders.push(self.order(schema, &property, Direction::Asc)?);
        }
        if orders.is_empty() {
            return Err(RepoError::Query(format!("'{}' has an empty OrderBy", method)));
        }
        Ok(Sort::from_orders(orders))
    }

    fn order(&self, schema: &EntitySchema, words: &[String], direction: Direction) -> Result<Order> {
        let path = self.resolve_property(schema, words)?;
        Ok(Order {
            property: path.to_string(),
            direction,
            ignore_case: false,
        })
    }

    /// Map property words to a field, or to a field behind a relation.
    fn resolve_property(&self, schema: &EntitySchema, words: &[String]) -> Result<FieldPath> {
        let field = to_snake(words);
        if schema.find_column_index(&field).is_some() {
            return Ok(FieldPath::field(field));
        }

        for split in 1..words.len() {
            let relation = to_snake(&words[..split]);
            if schema.relation(&relation).is_none() {
                continue;
            }
            let target = self.catalog.related(schema, &relation)?;
            let nested = to_snake(&words[split..]);
            if target.find_column_index(&nested).is_some() {
                return Ok(FieldPath::nested(relation, nested));
            }
        }

        Err(RepoError::unknown_field(schema.entity(), field))
    }
}

fn find_pair(words: &[String], first: &str, second: &str) -> Option<usize> {
    words
        .windows(2)
        .position(|pair| pair[0] == first && pair[1] == second)
}

fn ends_with(words: &[String], suffix: &[&str]) -> bool {
    words.len() >= suffix.len()
        && words[words.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(w, s)| w == s)
}

fn split_on<'w>(words: &'w [String], separator: &str) -> Vec<&'w [String]> {
    words.split(|w| w == separator).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};

    fn catalog() -> Catalog {
        let team = EntitySchema::new(
            "Team",
            "team",
            "id",
            vec![
                Column::new("id", DataType::Integer),
                Column::new("name", DataType::Text),
            ],
        );
        let member = EntitySchema::new(
            "Member",
            "member",
            "id",
            vec![
                Column::new("id", DataType::Integer),
                Column::new("username", DataType::Text),
                Column::new("age", DataType::Integer),
                Column::reference("team", "team"),
            ],
        );
        Catalog::new()
            .with_schema(team)
            .and_then(|c| c.with_schema(member))
            .unwrap()
    }

    fn resolve(method: &str) -> Result<QueryDescriptor> {
        let catalog = catalog();
        let schema = catalog.get("member").unwrap().clone();
        MethodNameResolver::new(&catalog).resolve(&schema, method)
    }

    fn only_clause(query: &QueryDescriptor) -> Clause {
        match &query.predicate {
            Some(Predicate::Clause(clause)) => clause.clone(),
            other => panic!("expected a single clause, got {:?}", other),
        }
    }

    #[test]
    fn test_split_camel() {
        assert_eq!(
            split_camel("findTop3ByAgeGreaterThan"),
            vec!["find", "Top3", "By", "Age", "Greater", "Than"]
        );
    }

    #[test]
    fn test_and_with_comparator() {
        let query = resolve("findByUsernameAndAgeGreaterThan").unwrap();
        assert_eq!(query.kind, QueryKind::Select);
        let Some(Predicate::And(parts)) = &query.predicate else {
            panic!("expected AND, got {:?}", query.predicate);
        };
        assert_eq!(parts.len(), 2);
        let clauses = query.predicate.as_ref().unwrap().clauses();
        assert_eq!(clauses[0].path, FieldPath::field("username"));
        assert_eq!(clauses[0].comparator, Comparator::Equal);
        assert_eq!(clauses[1].path, FieldPath::field("age"));
        assert_eq!(clauses[1].comparator, Comparator::GreaterThan);
        assert_eq!(
            query.parameters,
            vec![ParamRef::Positional(0), ParamRef::Positional(1)]
        );
    }

    #[test]
    fn test_or_groups() {
        let query = resolve("findByUsernameOrAgeLessThanEqualAndAgeGreaterThan").unwrap();
        let Some(Predicate::Or(groups)) = &query.predicate else {
            panic!("expected OR");
        };
        assert_eq!(groups.len(), 2);
        assert!(matches!(groups[1], Predicate::And(ref parts) if parts.len() == 2));
        assert_eq!(query.parameters.len(), 3);
    }

    #[test]
    fn test_verbs_and_subject() {
        assert_eq!(resolve("countByUsername").unwrap().kind, QueryKind::Count);
        assert_eq!(resolve("existsByUsername").unwrap().kind, QueryKind::Exists);
        assert_eq!(resolve("deleteByAge").unwrap().kind, QueryKind::Delete);
        assert_eq!(resolve("removeByAge").unwrap().kind, QueryKind::Delete);

        let query = resolve("findDistinctTop3MemberByAge").unwrap();
        assert!(query.distinct);
        assert_eq!(query.limit, Some(3));
        assert_eq!(resolve("findFirstByAge").unwrap().limit, Some(1));
        assert!(resolve("fetchByAge").is_err());
    }

    #[test]
    fn test_comparators() {
        let cases = [
            ("findByAgeBetween", Comparator::Between, 2),
            ("findByUsernameIsNull", Comparator::IsNull, 0),
            ("findByUsernameIsNotNull", Comparator::IsNotNull, 0),
            ("findByUsernameLike", Comparator::Like, 1),
            ("findByUsernameStartingWith", Comparator::StartingWith, 1),
            ("findByUsernameContaining", Comparator::Containing, 1),
            ("findByAgeIn", Comparator::In, 1),
            ("findByAgeNotIn", Comparator::NotIn, 1),
            ("findByUsernameNot", Comparator::NotEqual, 1),
            ("findByAgeIsGreaterThanEqual", Comparator::GreaterThanEqual, 1),
        ];
        for (method, comparator, arity) in cases {
            let query = resolve(method).unwrap();
            let clause = only_clause(&query);
            assert_eq!(clause.comparator, comparator, "{}", method);
            assert_eq!(query.parameters.len(), arity, "{}", method);
        }
    }

    #[test]
    fn test_ignore_case() {
        let clause = only_clause(&resolve("findByUsernameIgnoreCase").unwrap());
        assert!(clause.ignore_case);
        assert_eq!(clause.comparator, Comparator::Equal);
    }

    #[test]
    fn test_relation_path() {
        let clause = only_clause(&resolve("findByTeamName").unwrap());
        assert_eq!(clause.path, FieldPath::nested("team", "name"));
        let clause = only_clause(&resolve("findByTeam").unwrap());
        assert_eq!(clause.path, FieldPath::field("team"));
    }

    #[test]
    fn test_order_by() {
        let query = resolve("findByAgeGreaterThanOrderByAgeDescUsername").unwrap();
        assert_eq!(
            query.sort.orders(),
            &[Order::desc("age"), Order::asc("username")]
        );

        let query = resolve("findAllByOrderByTeamNameAsc").unwrap();
        assert!(query.predicate.is_none());
        assert_eq!(query.sort.orders(), &[Order::asc("team.name")]);
    }

    #[test]
    fn test_unknown_property() {
        match resolve("findByNickname") {
            Err(RepoError::UnknownField { entity, field }) => {
                assert_eq!(entity, "Member");
                assert_eq!(field, "nickname");
            }
            other => panic!("expected UnknownField, got {:?}", other),
        }
        assert!(matches!(
            resolve("findByAgeOrderByNickname"),
            Err(RepoError::UnknownField { .. })
        ));
    }
}
