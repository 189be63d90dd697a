//! Error types for artifact ingestion.

use crate::parser::FormatError;
use mindar_db::DbError;
use mindar_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A reference the artifact depends on is missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No catalog rule matches the key.
    #[error("Unrecognized artifact for pipeline {pipeline}: {key}")]
    Unrecognized { pipeline: String, key: String },

    /// The pipeline catalog is malformed or lacks an entry.
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("ROI map error: {0}")]
    RoiMap(String),
}

impl IngestError {
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Errors that must stop batch processing instead of skipping one item.
    ///
    /// Only a data inconsistency qualifies: its rows need manual repair.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_data_inconsistency())
    }

    /// Both missing database references and missing objects count as not found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Db(DbError::NotFound(_)) | Self::Storage(StorageError::NotFound(_))
        )
    }
}
