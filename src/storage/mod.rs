//! Object store gateway for Arbor.
//!
//! File bytes live in a content store addressed by keys derived from node
//! ids. The metadata store never records keys: `objects/<id>` for a file's
//! bytes and `derived/<id>/<table>` for generated tabular artifacts.
//!
//! Backends implement [`ObjectStore`]. Every call may fail independently of
//! the metadata store; callers treat failures per key.

mod local;
mod memory;
mod presign;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use presign::{sign, verify, PresignedParams};

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;

use crate::Result;

/// Chunked byte stream returned by [`ObjectStore::get`].
pub type ObjectStream = BoxStream<'static, std::io::Result<Vec<u8>>>;

/// Chunk size used when streaming stored objects.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Deterministic object-store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Key holding the bytes of file node `id`.
    pub fn for_node(id: i64) -> Self {
        Self(format!("objects/{id}"))
    }

    /// Key of a derived tabular artifact generated from file node `id`.
    pub fn derived(id: i64, table: &str) -> Self {
        let table: String = table
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
            .collect();
        Self(format!("derived/{id}/{table}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Blob backend consumed by the tree engine.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any existing object.
    async fn put(&self, key: &ObjectKey, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Stream the object at `key`, or `None` when it does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<ObjectStream>>;

    /// Remove the object at `key`. Removing a missing object succeeds.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Whether an object exists at `key`.
    async fn exists(&self, key: &ObjectKey) -> Result<bool>;

    /// Time-limited download URL for `key`.
    async fn presigned_url(
        &self,
        key: &ObjectKey,
        ttl_secs: u64,
        download_name: Option<&str>,
    ) -> Result<String>;

    /// Server-side copy of `source` onto `dest`.
    async fn copy(&self, source: &ObjectKey, dest: &ObjectKey) -> Result<()>;
}

/// Drain an object stream into memory.
pub async fn read_all(stream: ObjectStream) -> std::io::Result<Vec<u8>> {
    stream
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
}

/// Split `bytes` into a stream of chunks.
pub(crate) fn chunked_stream(bytes: Vec<u8>) -> ObjectStream {
    use futures::StreamExt;

    let chunks: Vec<std::io::Result<Vec<u8>>> = if bytes.is_empty() {
        Vec::new()
    } else {
        bytes
            .chunks(STREAM_CHUNK_SIZE)
            .map(|c| Ok(c.to_vec()))
            .collect()
    };
    futures::stream::iter(chunks).boxed()
}
