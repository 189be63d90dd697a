use crate::error::{Result, StorageError};
use std::fmt;

/// Host used for public object URLs.
pub const PUBLIC_S3_HOST: &str = "https://s3.amazonaws.com";

/// A bucket + key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse `s3://bucket/key` or `https://s3.amazonaws.com/bucket/key`.
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("s3://")
            .or_else(|| {
                url.strip_prefix(PUBLIC_S3_HOST)
                    .and_then(|r| r.strip_prefix('/'))
            })
            .ok_or_else(|| StorageError::invalid(format!("not an object URL: {}", url)))?;

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(StorageError::invalid(format!("missing bucket in {}", url)));
        }
        Ok(Self::new(bucket, key))
    }

    /// Same key in another bucket.
    pub fn with_bucket(&self, bucket: impl Into<String>) -> Self {
        Self::new(bucket, self.key.clone())
    }

    pub fn public_url(&self) -> String {
        format!("{}/{}/{}", PUBLIC_S3_HOST, self.bucket, self.key)
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Reject keys that could escape a bucket root.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StorageError::invalid("empty object key"));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::invalid(format!("invalid object key: {}", key)));
    }
    if key.split('/').any(|seg| seg == ".." || seg == ".") {
        return Err(StorageError::invalid(format!(
            "object key contains relative segments: {}",
            key
        )));
    }
    Ok(())
}

/// Trim a listing prefix and ensure a trailing `/` (empty stays empty).
pub fn normalize_prefix(prefix: Option<&str>) -> Result<String> {
    let Some(raw) = prefix else {
        return Ok(String::new());
    };
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    validate_key(trimmed)?;
    Ok(format!("{}/", trimmed))
}
