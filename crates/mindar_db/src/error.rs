//! Error types for the database layer.

use thiserror::Error;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// More rows recorded for an artifact than it can produce.
    ///
    /// Never resolved automatically; the rows must be inspected by hand.
    #[error(
        "Data inconsistency in {table}: artifact '{artifact}' has {found} rows, expected {expected}"
    )]
    DataInconsistency {
        table: String,
        artifact: String,
        expected: usize,
        found: usize,
    },

    /// Invalid request (unknown table, unknown column, ...)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// True when automatic processing of the table must stop.
    pub fn is_data_inconsistency(&self) -> bool {
        matches!(self, Self::DataInconsistency { .. })
    }
}
