//! In-memory object store.
//!
//! Keeps objects in a map and can be told to fail on chosen keys, which makes
//! partial-failure paths of the tree engine testable.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{chunked_stream, ObjectKey, ObjectStore, ObjectStream};
use crate::{ArborError, Result};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// Object store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    failing: RwLock<HashSet<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call touching `key` fail until [`Self::clear_failures`].
    pub async fn fail_on(&self, key: &ObjectKey) {
        self.failing.write().await.insert(key.as_str().to_string());
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Stored keys in sorted order.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy of the bytes stored at `key`.
    pub async fn bytes(&self, key: &ObjectKey) -> Option<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key.as_str())
            .map(|o| o.bytes.clone())
    }

    /// Content type recorded for `key`.
    pub async fn content_type(&self, key: &ObjectKey) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key.as_str())
            .map(|o| o.content_type.clone())
    }

    async fn check(&self, key: &ObjectKey) -> Result<()> {
        if self.failing.read().await.contains(key.as_str()) {
            return Err(ArborError::object_store(key, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &ObjectKey, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.check(key).await?;
        self.objects.write().await.insert(
            key.as_str().to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<ObjectStream>> {
        self.check(key).await?;
        Ok(self
            .objects
            .read()
            .await
            .get(key.as_str())
            .map(|o| chunked_stream(o.bytes.clone())))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.check(key).await?;
        self.objects.write().await.remove(key.as_str());
        Ok(())
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool> {
        self.check(key).await?;
        Ok(self.objects.read().await.contains_key(key.as_str()))
    }

    async fn presigned_url(
        &self,
        key: &ObjectKey,
        ttl_secs: u64,
        download_name: Option<&str>,
    ) -> Result<String> {
        self.check(key).await?;
        let mut url = format!("memory://{key}?ttl={ttl_secs}");
        if let Some(name) = download_name {
            url.push_str("&filename=");
            url.push_str(&urlencoding::encode(name));
        }
        Ok(url)
    }

    async fn copy(&self, source: &ObjectKey, dest: &ObjectKey) -> Result<()> {
        self.check(source).await?;
        self.check(dest).await?;
        let mut objects = self.objects.write().await;
        let object = objects
            .get(source.as_str())
            .cloned()
            .ok_or_else(|| ArborError::object_store(source, "source object missing"))?;
        objects.insert(dest.as_str().to_string(), object);
        Ok(())
    }
}
