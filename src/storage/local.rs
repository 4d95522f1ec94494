//! Filesystem-backed object store.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::presign::{self, PresignedParams};
use super::{chunked_stream, ObjectKey, ObjectStore, ObjectStream};
use crate::config::StorageConfig;
use crate::{ArborError, Result};

/// Object store writing blobs under a local directory.
///
/// Objects are stored in a sharded directory structure, the shard being the
/// last two digits of the node id embedded in the key:
/// ```text
/// {base_path}/
/// ├── objects/
/// │   └── 34/
/// │       └── 1234
/// └── derived/
///     └── 34/
///         └── 1234/
///             └── Sheet1
/// ```
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_path: PathBuf,
    presign_base_url: String,
    presign_secret: String,
}

impl LocalObjectStore {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub async fn new(
        base_path: impl Into<PathBuf>,
        presign_base_url: impl Into<String>,
        presign_secret: impl Into<String>,
    ) -> Result<Self> {
        let base_path = base_path.into();
        tokio::fs::create_dir_all(&base_path).await?;

        Ok(Self {
            base_path,
            presign_base_url: presign_base_url.into(),
            presign_secret: presign_secret.into(),
        })
    }

    /// Create a store from the `[storage]` configuration section.
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(
            &config.path,
            config.presign_base_url.clone(),
            config.presign_secret.clone(),
        )
        .await
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Filesystem location of `key`.
    ///
    /// Rejects keys that could escape the base directory.
    pub fn object_path(&self, key: &ObjectKey) -> Result<PathBuf> {
        let segments: Vec<&str> = key.as_str().split('/').collect();
        if segments.len() < 2
            || segments
                .iter()
                .any(|s| s.is_empty() || *s == "." || *s == ".." || s.contains('\\'))
        {
            return Err(ArborError::object_store(key, "malformed key"));
        }

        let mut path = self.base_path.join(segments[0]).join(Self::shard(segments[1]));
        for segment in &segments[1..] {
            path.push(segment);
        }
        Ok(path)
    }

    fn shard(segment: &str) -> String {
        let chars: Vec<char> = segment.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(2)..].iter().collect();
        format!("{tail:0>2}")
    }
}

/// Temporary sibling of `path`, unique per object name.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn io_error(key: &ObjectKey, e: io::Error) -> ArborError {
    ArborError::object_store(key, e)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &ObjectKey, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }

        // Write beside the target and rename so readers never see a partial object
        let tmp = partial_path(&path);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| io_error(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(key, e))?;

        debug!(key = %key, bytes = bytes.len(), "stored object");
        Ok(())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<ObjectStream>> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(chunked_stream(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "deleted object");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool> {
        let path = self.object_path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(key, e))
    }

    async fn presigned_url(
        &self,
        key: &ObjectKey,
        ttl_secs: u64,
        download_name: Option<&str>,
    ) -> Result<String> {
        let params = PresignedParams {
            key: key.as_str(),
            expires_at: Utc::now().timestamp() + ttl_secs as i64,
            download_name,
        };
        Ok(presign::sign(
            &self.presign_base_url,
            &self.presign_secret,
            &params,
        ))
    }

    async fn copy(&self, source: &ObjectKey, dest: &ObjectKey) -> Result<()> {
        let from = self.object_path(source)?;
        let to = self.object_path(dest)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(dest, e))?;
        }
        match tokio::fs::copy(&from, &to).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ArborError::object_store(source, "source object missing"))
            }
            Err(e) => Err(io_error(dest, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::read_all;
    use tempfile::TempDir;

    async fn setup() -> (LocalObjectStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(temp_dir.path(), "http://localhost/o", "secret")
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (store, _temp) = setup().await;
        let key = ObjectKey::for_node(1234);

        store.put(&key, b"hello".to_vec(), "text/plain").await.unwrap();
        assert!(store.exists(&key).await.unwrap());

        let stream = store.get(&key).await.unwrap().unwrap();
        assert_eq!(read_all(stream).await.unwrap(), b"hello");

        store.delete(&key).await.unwrap();
        assert!(!store.exists(&key).await.unwrap());
        assert!(store.get(&key).await.unwrap().is_none());

        // Deleting again is not an error
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_sharded_layout() {
        let (store, temp) = setup().await;

        let path = store.object_path(&ObjectKey::for_node(1234)).unwrap();
        assert_eq!(path, temp.path().join("objects").join("34").join("1234"));

        let path = store.object_path(&ObjectKey::for_node(7)).unwrap();
        assert_eq!(path, temp.path().join("objects").join("07").join("7"));

        let path = store
            .object_path(&ObjectKey::derived(1234, "Sheet1"))
            .unwrap();
        assert_eq!(
            path,
            temp.path().join("derived").join("34").join("1234").join("Sheet1")
        );
    }

    #[tokio::test]
    async fn test_tables_sharing_a_stem_stay_apart() {
        let (store, _temp) = setup().await;
        let a = ObjectKey::derived(12, "t.a");
        let b = ObjectKey::derived(12, "t.b");

        let path_a = store.object_path(&a).unwrap();
        let path_b = store.object_path(&b).unwrap();
        assert_ne!(partial_path(&path_a), partial_path(&path_b));
        assert!(partial_path(&path_a).ends_with("t.a.partial"));

        let (ra, rb) = tokio::join!(
            store.put(&a, b"alpha".to_vec(), "application/parquet"),
            store.put(&b, b"beta".to_vec(), "application/parquet"),
        );
        ra.unwrap();
        rb.unwrap();

        let stream = store.get(&a).await.unwrap().unwrap();
        assert_eq!(read_all(stream).await.unwrap(), b"alpha");
        let stream = store.get(&b).await.unwrap().unwrap();
        assert_eq!(read_all(stream).await.unwrap(), b"beta");
    }

    #[tokio::test]
    async fn test_copy() {
        let (store, _temp) = setup().await;
        let src = ObjectKey::for_node(1);
        let dst = ObjectKey::for_node(2);

        store.put(&src, b"data".to_vec(), "text/plain").await.unwrap();
        store.copy(&src, &dst).await.unwrap();
        let stream = store.get(&dst).await.unwrap().unwrap();
        assert_eq!(read_all(stream).await.unwrap(), b"data");

        let missing = store.copy(&ObjectKey::for_node(99), &dst).await;
        assert!(matches!(missing, Err(ArborError::ObjectStore { .. })));
    }

    #[tokio::test]
    async fn test_presigned_url() {
        let (store, _temp) = setup().await;
        let url = store
            .presigned_url(&ObjectKey::for_node(5), 60, Some("a.txt"))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost/o/objects/5?expires="));
        assert!(url.contains("&filename=a.txt"));
    }
}
