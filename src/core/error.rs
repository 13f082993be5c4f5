use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    #[error("Parameter binding error: {0}")]
    ParameterBinding(String),

    #[error("Expected {expected} but query returned {found} rows")]
    AmbiguousResult { expected: &'static str, found: usize },

    #[error("Could not lock row {id} of '{table}' within {waited:?}")]
    LockTimeout {
        table: String,
        id: i64,
        waited: Duration,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Invalid page request: {0}")]
    InvalidPageRequest(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Execution error: {0}")]
    Execution(String),
}

impl RepoError {
    pub fn unknown_field(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity: entity.into(),
            field: field.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RepoError>;

impl<T> From<std::sync::PoisonError<T>> for RepoError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Execution(err.to_string())
    }
}
