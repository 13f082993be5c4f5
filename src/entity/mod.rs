//! Entity mapping: how a Rust struct maps onto a row of its table.

use crate::core::{EntitySchema, RepoError, Result, Row, Value};

/// A persistent type with an integer identity.
///
/// Implementations describe their table once (`schema`) and convert to and
/// from rows laid out in schema column order. Relations are stored as the
/// related entity's identifier; `attach_related` receives the related row
/// when the relation is fetched.
pub trait Entity: Clone + Default + Send + Sync + 'static {
    fn schema() -> &'static EntitySchema;

    /// `None` until the entity is first persisted
    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self>;

    /// Receive the fetched row of the entity behind relation `field`.
    fn attach_related(&mut self, field: &str, _row: &Row) -> Result<()> {
        Err(RepoError::unknown_field(Self::schema().entity(), field))
    }

    /// Loaded related entities as `(field, related id, related row)`.
    fn related_probes(&self) -> Vec<(&'static str, Option<i64>, Row)> {
        Vec::new()
    }
}

/// Reference to another entity: just its identifier, or the fetched entity.
///
/// There is no proxy; a `Related::Id` stays an id until the caller asks the
/// repository to load it or a query fetches it eagerly.
#[derive(Debug, Clone)]
pub enum Related<T> {
    Id(i64),
    Loaded(Box<T>),
}

impl<T: Entity> Related<T> {
    pub fn loaded(entity: T) -> Self {
        Self::Loaded(Box::new(entity))
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Loaded(entity) => entity.id(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Id(_) => None,
            Self::Loaded(entity) => Some(entity),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

// References compare by identity; unsaved loaded values compare by content.
impl<T: Entity + PartialEq> PartialEq for Related<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.get() == other.get(),
            _ => false,
        }
    }
}

/// Conversion from a stored value into a field type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// Read column `field` of a row laid out by `schema`.
pub fn column<T: FromValue>(schema: &EntitySchema, row: &Row, field: &str) -> Result<T> {
    let idx = schema.require_column(field)?;
    let value = row.get(idx).ok_or_else(|| {
        RepoError::Execution(format!(
            "Row of '{}' has no value for '{}'",
            schema.table(),
            field
        ))
    })?;
    T::from_value(value).ok_or_else(|| {
        RepoError::TypeMismatch(format!(
            "Field '{}.{}' cannot be read from {}",
            schema.entity(),
            field,
            value.type_name()
        ))
    })
}
