use crate::error::{Result, StorageError};
use crate::location::validate_key;
use crate::ObjectStore;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Bucket mirrored as a directory tree (`<root>/<key>`).
///
/// Useful for running against a local copy of a bucket and in tests.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    /// Use `root` as the bucket directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            bucket: bucket.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|err| StorageError::Backend(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::not_found(self.uri(key)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trip_through_directory() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path().join("bucket"), "results").unwrap();

        store
            .put("outputs/7/7_ROIstats.txt", b"# # Mean_1\n".to_vec())
            .await
            .unwrap();
        assert!(tmp.path().join("bucket/outputs/7/7_ROIstats.txt").exists());
        assert_eq!(
            store.get_text("outputs/7/7_ROIstats.txt").await.unwrap(),
            "# # Mean_1\n"
        );
        assert_eq!(
            store.list("outputs/").await.unwrap(),
            vec!["outputs/7/7_ROIstats.txt".to_string()]
        );
        assert!(store.list("logs/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path(), "results").unwrap();
        assert!(matches!(
            store.get("nope.txt").await.unwrap_err(),
            StorageError::NotFound(_)
        ));
        assert!(matches!(
            store.put("../escape", vec![]).await.unwrap_err(),
            StorageError::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn put_file_and_get() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path().join("bucket"), "results").unwrap();
        let src = tmp.path().join("src.txt");
        std::fs::write(&src, "payload").unwrap();

        store.put_file("logs/run.log", &src).await.unwrap();
        assert_eq!(store.get_text("logs/run.log").await.unwrap(), "payload");
        assert!(tmp.path().join("bucket/logs/run.log").exists());
    }
}
