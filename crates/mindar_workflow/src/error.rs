use mindar_db::DbError;
use mindar_ingest::IngestError;
use mindar_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors that escape a driver run.
///
/// Tool failures never show up here: they are terminal run outcomes,
/// recorded in the status table.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WorkflowError {
    /// A data inconsistency that must stop the batch.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Db(err) => err.is_data_inconsistency(),
            Self::Ingest(err) => err.is_fatal(),
            _ => false,
        }
    }
}
