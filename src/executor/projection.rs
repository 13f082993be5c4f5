use super::predicate::RowContext;
use crate::core::{RepoError, Result, Row, Value};
use crate::entity::FromValue;
use crate::query::Projection;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// A projected row: named scalar values plus nested related views.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Projected {
    values: Vec<(String, Value)>,
    nested: Vec<(String, Option<Projected>)>,
}

impl Projected {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.push((name.into(), value));
        self
    }

    pub fn with_nested(mut self, name: impl Into<String>, nested: Option<Projected>) -> Self {
        self.nested.push((name.into(), nested));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Typed read of a projected value.
    pub fn value<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get(name)
            .ok_or_else(|| RepoError::NotFound(format!("projection has no value '{}'", name)))?;
        T::from_value(value).ok_or_else(|| {
            RepoError::TypeMismatch(format!(
                "projected '{}' cannot be read from {}",
                name,
                value.type_name()
            ))
        })
    }

    /// Nested view of a relation; `None` when the relation is unset.
    pub fn nested(&self, name: &str) -> Option<&Projected> {
        self.nested
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, p)| p.as_ref())
    }

    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .map(|(n, _)| n.as_str())
            .chain(self.nested.iter().map(|(n, _)| n.as_str()))
    }
}

impl Serialize for Projected {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + self.nested.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        for (name, nested) in &self.nested {
            map.serialize_entry(name, nested)?;
        }
        map.end()
    }
}

/// A typed partial view of an entity.
///
/// `shape` declares which fields (and related fields) the view needs, so a
/// caller can pick the projection at call time:
///
/// ```ignore
/// let names: Vec<UsernameOnly> = repo.find_projections(&mut uow, "findProjectionsByUsername", params!["m1"]).await?;
/// ```
pub trait FromProjection: Sized {
    fn shape() -> Projection;

    fn from_projection(projected: &Projected) -> Result<Self>;
}

/// Build the projection of one row.
pub(crate) fn project_row(ctx: &RowContext<'_>, row: &Row, projection: &Projection) -> Result<Projected> {
    let schema = ctx.schema();
    match projection {
        Projection::Entity => {
            let mut projected = Projected::new();
            for (column, value) in schema.columns().iter().zip(row.iter()) {
                projected = projected.with_value(column.name.clone(), value.clone());
            }
            Ok(projected)
        }
        Projection::Fields(selections) => {
            let mut projected = Projected::new();
            for selection in selections {
                let value = ctx.value_at(row, &selection.path)?;
                projected = projected.with_value(selection.alias.clone(), value);
            }
            Ok(projected)
        }
        Projection::Nested { fields, relations } => {
            let mut projected = Projected::new();
            for field in fields {
                let idx = schema.require_column(field)?;
                let value = row.get(idx).cloned().unwrap_or(Value::Null);
                projected = projected.with_value(field.clone(), value);
            }
            for relation in relations {
                let nested = match ctx.related_row(row, &relation.field)? {
                    Some(related) => {
                        let target = ctx.related_schema(&relation.field)?;
                        let mut view = Projected::new();
                        for column in &relation.columns {
                            let idx = target.require_column(column)?;
                            let value = related.get(idx).cloned().unwrap_or(Value::Null);
                            view = view.with_value(column.clone(), value);
                        }
                        Some(view)
                    }
                    None => None,
                };
                projected = projected.with_nested(relation.field.clone(), nested);
            }
            Ok(projected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_access() {
        let projected = Projected::new()
            .with_value("username", Value::from("member1"))
            .with_value("age", Value::Integer(10))
            .with_nested("team", Some(Projected::new().with_value("name", Value::from("teamA"))));

        let username: String = projected.value("username").unwrap();
        assert_eq!(username, "member1");
        assert!(projected.value::<String>("age").is_err());
        assert!(projected.value::<i64>("missing").is_err());
        assert_eq!(
            projected.nested("team").and_then(|t| t.get("name")),
            Some(&Value::from("teamA"))
        );
        assert_eq!(projected.names().collect::<Vec<_>>(), vec!["username", "age", "team"]);
    }

    #[test]
    fn test_serializes_as_object() {
        let projected = Projected::new()
            .with_value("username", Value::from("member1"))
            .with_nested("team", None);
        let json = serde_json::to_value(&projected).unwrap();
        assert_eq!(json, serde_json::json!({"username": "member1", "team": null}));
    }
}
