use crate::error::{Result, StorageError};
use crate::location::validate_key;
use crate::ObjectStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Object store held entirely in memory.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seed an object; for test setup.
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.lock().insert(key.into(), body.into());
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A poisoned map still holds consistent data; recover it
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(self.uri(key)))
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        self.lock().insert(key.to_string(), body);
        Ok(())
    }
}
