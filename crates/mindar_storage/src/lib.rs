//! Object storage for mindar.
//!
//! Artifacts are addressed by bucket + key. [`ObjectStore`] is the seam every
//! loader and the workflow driver talk to; the S3 backend is used in
//! production, [`LocalObjectStore`] mirrors a bucket as a directory tree and
//! [`InMemoryObjectStore`] backs tests.

mod credentials;
mod error;
mod local;
mod location;
mod memory;
#[cfg(feature = "s3")]
mod s3;

pub use credentials::AwsCredentials;
pub use error::{Result, StorageError};
pub use local::LocalObjectStore;
pub use location::{normalize_prefix, validate_key, ObjectLocation, PUBLIC_S3_HOST};
pub use memory::InMemoryObjectStore;
#[cfg(feature = "s3")]
pub use s3::{S3Config, S3ObjectStore};

use async_trait::async_trait;
use std::path::Path;

/// A bucket of objects addressed by `/`-separated keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket name the store reads from and writes to.
    fn bucket(&self) -> &str;

    /// Stable URI recorded in the database for `key`.
    fn uri(&self, key: &str) -> String {
        ObjectLocation::new(self.bucket(), key).to_string()
    }

    /// Public https URL for `key` (used as the artifact key of ABIDE rows).
    fn public_url(&self, key: &str) -> String {
        ObjectLocation::new(self.bucket(), key).public_url()
    }

    /// All keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Full object body.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Store `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;

    /// Object body decoded as UTF-8 text.
    async fn get_text(&self, key: &str) -> Result<String> {
        let bytes = self.get(key).await?;
        String::from_utf8(bytes)
            .map_err(|_| StorageError::invalid(format!("object {} is not UTF-8 text", key)))
    }

    /// Upload a local file.
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let body = tokio::fs::read(path).await?;
        tracing::debug!(key, path = %path.display(), bytes = body.len(), "Uploading file");
        self.put(key, body).await
    }
}
