//! Results database for mindar.
//!
//! All SQL lives in this crate. Callers get a [`MindarDb`] handle and use its
//! typed methods; the idempotent upsert (existence check, key allocation,
//! row writer) is in [`upsert`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use mindar_db::{MindarDb, Presence, Table};
//!
//! let db = MindarDb::open("~/.mindar/mindar.sqlite3").await?;
//!
//! if db.check_existing("12345", Table::DerivativesUnormd, rows.len()).await? == Presence::Absent {
//!     db.write_records(Table::DerivativesUnormd, &rows).await?;
//! }
//! ```

mod error;
mod schema;
mod types;

// Method implementations organized by domain
pub mod normalized;
pub mod status;
pub mod subjects;
pub mod upsert;

pub use error::{DbError, Result};
pub use types::*;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Handle to the results database.
///
/// Passed explicitly to every component that reads or writes results.
#[derive(Clone)]
pub struct MindarDb {
    pool: SqlitePool,
}

impl MindarDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");

        Ok(db)
    }

    /// Open an existing database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DbError::NotFound(format!(
                "Database not found: {}",
                path.display()
            )));
        }

        let url = format!("sqlite:{}?mode=rw", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Local wall-clock timestamp in the format stored in `timestamp` columns.
    pub fn timestamp_now() -> String {
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
