//! Error types for pgmap

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pgmap operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for query building, execution and row materialization
#[derive(Debug, Error)]
pub enum OrmError {
    /// Invalid column, predicate or CTE setup recorded on a query builder
    #[error("Builder error: {0}")]
    Builder(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Executor failure that did not originate from tokio-postgres
    #[error("Execution error: {0}")]
    Execution(String),

    /// Destination shape does not fit the result set
    #[error("Shape error: {0}")]
    Shape(String),

    /// Invalid record metadata
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),
}

impl OrmError {
    /// Create a builder error
    pub fn builder(message: impl Into<String>) -> Self {
        Self::Builder(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a shape error
    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape(message.into())
    }

    /// Check if this is a builder error
    pub fn is_builder(&self) -> bool {
        matches!(self, Self::Builder(_))
    }

    /// Check if this is a shape error
    pub fn is_shape(&self) -> bool {
        matches!(self, Self::Shape(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// SQLSTATE code of a database-side failure, e.g. `42703` for an
    /// undefined column.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Query(err) => err.as_db_error().map(|db| db.code().code()),
            _ => None,
        }
    }

    /// Wrap a tokio_postgres error.
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        Self::Query(err)
    }
}
