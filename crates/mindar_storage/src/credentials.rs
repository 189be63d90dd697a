use crate::error::{Result, StorageError};
use std::fmt;
use std::path::Path;

const ACCESS_KEY_COLUMNS: &[&str] = &["accesskeyid", "awsaccesskeyid"];
const SECRET_KEY_COLUMNS: &[&str] = &["secretaccesskey", "awssecretaccesskey"];

/// Access key pair for the object store.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    /// Read a credentials CSV: one header row, one value row.
    ///
    /// Header names are matched ignoring case, spaces and underscores, so
    /// `Access Key Id`, `ACCESS_KEY_ID` and `aws_access_key_id` all work.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)
            .map_err(|err| {
                StorageError::Credentials(format!("cannot read {}: {}", path.display(), err))
            })?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|err| StorageError::Credentials(format!("{}: {}", path.display(), err)))?
            .iter()
            .map(normalize_header)
            .collect();

        let record = reader
            .records()
            .next()
            .ok_or_else(|| {
                StorageError::Credentials(format!("{} has no credential row", path.display()))
            })?
            .map_err(|err| StorageError::Credentials(format!("{}: {}", path.display(), err)))?;

        let column = |names: &[&str]| -> Result<String> {
            headers
                .iter()
                .position(|h| names.contains(&h.as_str()))
                .and_then(|idx| record.get(idx))
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    StorageError::Credentials(format!(
                        "{} is missing a '{}' column",
                        path.display(),
                        names[0]
                    ))
                })
        };

        Ok(Self {
            access_key_id: column(ACCESS_KEY_COLUMNS)?,
            secret_access_key: column(SECRET_KEY_COLUMNS)?,
        })
    }

    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` from the environment.
    pub fn from_env() -> Option<Self> {
        let access = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        if access.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Self::new(access, secret))
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
