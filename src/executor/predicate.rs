// ============================================================================
// Predicate evaluation
// ============================================================================
//
// Clauses follow SQL NULL semantics: a NULL field (or a NULL operand) never
// satisfies a comparison; only `IsNull` / `IsNotNull` look at NULL itself.
// Values behind a relation come from a RelationCache filled beforehand, so
// evaluation itself never touches the store.
//
// ============================================================================

use super::relations::RelationCache;
use crate::core::{EntitySchema, RepoError, Result, Row, Value};
use crate::query::pattern::matches_like;
use crate::query::{BoundParams, Clause, Comparator, FieldPath, Predicate};
use crate::storage::Catalog;
use std::cmp::Ordering;

/// Everything needed to read paths and operands for rows of one table.
pub struct RowContext<'a> {
    catalog: &'a Catalog,
    schema: &'a EntitySchema,
    relations: &'a RelationCache,
    params: &'a BoundParams,
}

impl<'a> RowContext<'a> {
    pub fn new(
        catalog: &'a Catalog,
        schema: &'a EntitySchema,
        relations: &'a RelationCache,
        params: &'a BoundParams,
    ) -> Self {
        Self {
            catalog,
            schema,
            relations,
            params,
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        self.schema
    }

    /// Value of `path` for `row`. A missing or unset relation reads as NULL.
    pub fn value_at(&self, row: &Row, path: &FieldPath) -> Result<Value> {
        match &path.relation {
            None => {
                let idx = self.schema.require_column(&path.field)?;
                Ok(row.get(idx).cloned().unwrap_or(Value::Null))
            }
            Some(relation) => {
                let target = self.catalog.related(self.schema, relation)?;
                let field_idx = target.require_column(&path.field)?;
                let related = self.related_row(row, relation)?;
                Ok(related
                    .and_then(|r| r.get(field_idx).cloned())
                    .unwrap_or(Value::Null))
            }
        }
    }

    pub fn related_schema(&self, field: &str) -> Result<&'a EntitySchema> {
        self.catalog.related(self.schema, field)
    }

    /// The fetched row behind relation `field`, if set and loaded.
    pub fn related_row(&self, row: &Row, field: &str) -> Result<Option<&'a Row>> {
        let target = self.catalog.related(self.schema, field)?;
        let idx = self.schema.require_column(field)?;
        Ok(row
            .get(idx)
            .and_then(Value::as_i64)
            .and_then(|id| self.relations.get(target.table(), id)))
    }

    pub fn matches(&self, row: &Row, predicate: &Predicate) -> Result<bool> {
        match predicate {
            Predicate::Clause(clause) => self.clause(row, clause),
            Predicate::And(parts) => {
                for part in parts {
                    if !self.matches(row, part)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(parts) => {
                for part in parts {
                    if self.matches(row, part)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn clause(&self, row: &Row, clause: &Clause) -> Result<bool> {
        let value = self.value_at(row, &clause.path)?;
        let operands = clause
            .operands
            .iter()
            .map(|op| self.params.value(op))
            .collect::<Result<Vec<_>>>()?;
        let ic = clause.ignore_case;

        match clause.comparator {
            Comparator::IsNull => return Ok(value.is_null()),
            Comparator::IsNotNull => return Ok(!value.is_null()),
            _ if value.is_null() => return Ok(false),
            _ => {}
        }

        let first = operand(&operands, 0, clause)?;
        match clause.comparator {
            Comparator::Equal => Ok(!first.is_null() && equals(&value, first, ic)?),
            Comparator::NotEqual => Ok(!first.is_null() && !equals(&value, first, ic)?),
            Comparator::GreaterThan => ordered(&value, first, ic, |o| o == Ordering::Greater),
            Comparator::GreaterThanEqual => ordered(&value, first, ic, |o| o != Ordering::Less),
            Comparator::LessThan => ordered(&value, first, ic, |o| o == Ordering::Less),
            Comparator::LessThanEqual => ordered(&value, first, ic, |o| o != Ordering::Greater),
            Comparator::Between => {
                let high = operand(&operands, 1, clause)?;
                Ok(ordered(&value, first, ic, |o| o != Ordering::Less)?
                    && ordered(&value, high, ic, |o| o != Ordering::Greater)?)
            }
            Comparator::Like | Comparator::NotLike => {
                let (text, pattern) = (text_of(&value, clause)?, text_of(first, clause)?);
                let matched = matches_like(text, pattern, !ic)?;
                Ok(matched == (clause.comparator == Comparator::Like))
            }
            Comparator::StartingWith | Comparator::EndingWith | Comparator::Containing => {
                let text = fold(text_of(&value, clause)?, ic);
                let needle = fold(text_of(first, clause)?, ic);
                Ok(match clause.comparator {
                    Comparator::StartingWith => text.starts_with(&needle),
                    Comparator::EndingWith => text.ends_with(&needle),
                    _ => text.contains(&needle),
                })
            }
            Comparator::In | Comparator::NotIn => {
                let list = first.as_list().ok_or_else(|| {
                    RepoError::ParameterBinding(format!("{} expects a list", clause.path))
                })?;
                let mut found = false;
                for candidate in list {
                    if !candidate.is_null() && equals(&value, candidate, ic)? {
                        found = true;
                        break;
                    }
                }
                Ok(found == (clause.comparator == Comparator::In))
            }
            Comparator::IsNull | Comparator::IsNotNull => Ok(false),
        }
    }
}

fn operand<'v>(operands: &'v [Value], idx: usize, clause: &Clause) -> Result<&'v Value> {
    operands.get(idx).ok_or_else(|| {
        RepoError::Execution(format!(
            "{:?} on {} is missing operand {}",
            clause.comparator,
            clause.path,
            idx + 1
        ))
    })
}

fn fold(text: &str, ignore_case: bool) -> String {
    if ignore_case {
        text.to_lowercase()
    } else {
        text.to_string()
    }
}

fn text_of<'v>(value: &'v Value, clause: &Clause) -> Result<&'v str> {
    value.as_str().ok_or_else(|| {
        RepoError::TypeMismatch(format!(
            "{:?} on {} needs text, got {}",
            clause.comparator,
            clause.path,
            value.type_name()
        ))
    })
}

fn compare(a: &Value, b: &Value, ignore_case: bool) -> Result<Ordering> {
    match (a, b) {
        (Value::Text(x), Value::Text(y)) if ignore_case => Ok(x.to_lowercase().cmp(&y.to_lowercase())),
        _ => a.compare(b),
    }
}

fn equals(a: &Value, b: &Value, ignore_case: bool) -> Result<bool> {
    Ok(compare(a, b, ignore_case)? == Ordering::Equal)
}

fn ordered(a: &Value, b: &Value, ignore_case: bool, test: impl Fn(Ordering) -> bool) -> Result<bool> {
    if b.is_null() {
        return Ok(false);
    }
    Ok(test(compare(a, b, ignore_case)?))
}
