//! Error types for object storage.

use thiserror::Error;

/// Storage operation result type.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Object storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("Storage connection error: {0}")]
    Connection(String),

    /// Credentials missing or unreadable.
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// No object under the requested key.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Malformed key, location or object content.
    #[error("Invalid storage request: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
