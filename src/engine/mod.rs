//! Tree mutation engine for Arbor.
//!
//! This module provides:
//! - Root, folder and file creation
//! - Rename / reparent, batch move and batch copy
//! - Cascading delete and the expiry reaper
//! - Permission grant management
//! - Batch archive building
//!
//! Every mutation runs its permission checks, conflict checks and row
//! changes inside one metadata transaction. Object-store calls are issued
//! only after that transaction commits, fanned out with bounded concurrency,
//! and never roll the metadata change back.

mod archive;
mod copy;
mod delete;
mod grants;
mod mutation;
mod reaper;

pub use archive::Archive;
pub use copy::CopyOutcome;
pub use delete::DeleteOutcome;
pub use mutation::{MoveOutcome, NodeUpdate, UploadOutcome, UploadRequest};

use std::collections::HashSet;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::auth::{AccessLevel, PermissionResolver};
use crate::config::{Config, QuotaConfig};
use crate::db::{Database, DbConn};
use crate::quota::{QuotaLedger, QuotaUsage};
use crate::storage::{ObjectKey, ObjectStore};
use crate::tree::{Node, NodeRepository, RootRepository};
use crate::{ArborError, Result};

/// Tunables of the tree engine.
#[derive(Debug, Clone)]
pub struct TreeOptions {
    /// Maximum object-store calls in flight per batch.
    pub max_concurrency: usize,
    /// Per-call object-store timeout. A timeout counts as a failure.
    pub object_timeout: Duration,
    /// Lifetime of files placed in a personal-temporary root.
    pub temporary_ttl: chrono::Duration,
    /// Largest accepted upload in bytes.
    pub max_file_size: u64,
    /// Lifetime of presigned download URLs in seconds.
    pub presign_ttl_secs: u64,
    /// Default quota ceilings for new roots.
    pub quota: QuotaConfig,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for TreeOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrency: config.batch.max_concurrency.max(1),
            object_timeout: Duration::from_secs(config.batch.object_timeout_secs),
            temporary_ttl: chrono::Duration::hours(config.expiry.temporary_ttl_hours),
            max_file_size: config.storage.max_upload_size_mb * 1024 * 1024,
            presign_ttl_secs: config.storage.presign_ttl_secs,
            quota: config.quota.clone(),
        }
    }
}

/// Entry point for every tree operation.
pub struct TreeService<'a> {
    db: &'a Database,
    store: &'a dyn ObjectStore,
    options: TreeOptions,
}

impl<'a> TreeService<'a> {
    /// Create a new TreeService with default options.
    pub fn new(db: &'a Database, store: &'a dyn ObjectStore) -> Self {
        Self {
            db,
            store,
            options: TreeOptions::default(),
        }
    }

    /// Replace the engine options.
    pub fn with_options(mut self, options: TreeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// Get a node the user can read.
    pub async fn get_node(&self, user_id: &str, node_id: i64) -> Result<Node> {
        let mut conn = self.db.acquire().await?;
        let node = NodeRepository::require(&mut conn, node_id).await?;
        PermissionResolver::require(&mut conn, user_id, &node, AccessLevel::Read).await?;
        Ok(node)
    }

    /// List a folder's children, folders first, then by name.
    pub async fn list_children(&self, user_id: &str, folder_id: i64) -> Result<Vec<Node>> {
        let mut conn = self.db.acquire().await?;
        let folder = require_folder(&mut conn, folder_id).await?;
        PermissionResolver::require(&mut conn, user_id, &folder, AccessLevel::Read).await?;
        NodeRepository::list_children(&mut conn, folder.id).await
    }

    /// Quota usage of a root.
    pub async fn get_usage(&self, user_id: &str, root_id: i64) -> Result<QuotaUsage> {
        let mut conn = self.db.acquire().await?;
        let node = NodeRepository::require(&mut conn, root_id).await?;
        if !node.is_root() {
            return Err(ArborError::InvalidInput(format!("node {root_id} is not a root")));
        }
        PermissionResolver::require(&mut conn, user_id, &node, AccessLevel::Read).await?;
        QuotaLedger::usage(&mut conn, root_id).await
    }

    /// Presigned download URL for a file, named after the file.
    pub async fn download_url(&self, user_id: &str, file_id: i64) -> Result<String> {
        let node = self.get_node(user_id, file_id).await?;
        if !node.is_file() {
            return Err(ArborError::InvalidInput(format!("node {file_id} is not a file")));
        }
        self.store
            .presigned_url(
                &node.object_key(),
                self.options.presign_ttl_secs,
                Some(&node.name),
            )
            .await
    }

    /// Expiry for files landing in the root `root_id`.
    async fn expiry_for_root(
        &self,
        conn: &mut DbConn,
        root_id: i64,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        let root = RootRepository::require(conn, root_id).await?;
        Ok(root
            .category
            .is_temporary()
            .then(|| chrono::Utc::now() + self.options.temporary_ttl))
    }

    /// Run object-store operations with bounded concurrency.
    ///
    /// Each call is bounded by the configured timeout; failures are logged
    /// and tallied, never propagated.
    async fn run_object_ops(&self, ops: Vec<ObjectOp>) -> ObjectTally {
        let store = self.store;
        let timeout = self.options.object_timeout;

        let results: Vec<(ObjectOp, Result<()>)> = stream::iter(ops)
            .map(move |op| async move {
                let result = match tokio::time::timeout(timeout, op.apply(store)).await {
                    Ok(result) => result,
                    Err(_) => Err(ArborError::object_store(op.key(), "timed out")),
                };
                (op, result)
            })
            .buffer_unordered(self.options.max_concurrency.max(1))
            .collect()
            .await;

        let mut tally = ObjectTally::default();
        for (op, result) in results {
            match result {
                Ok(()) => tally.succeeded += 1,
                Err(e) => {
                    warn!(op = op.name(), key = %op.key(), error = %e, "object store call failed");
                    tally.failed_keys.push(op.key().to_string());
                }
            }
        }
        tally.failed_keys.sort();
        tally
    }
}

/// One object-store side effect of a committed mutation.
#[derive(Debug, Clone)]
enum ObjectOp {
    Delete(ObjectKey),
    Copy { source: ObjectKey, dest: ObjectKey },
}

impl ObjectOp {
    fn name(&self) -> &'static str {
        match self {
            ObjectOp::Delete(_) => "delete",
            ObjectOp::Copy { .. } => "copy",
        }
    }

    /// The key a failure is reported against.
    fn key(&self) -> &ObjectKey {
        match self {
            ObjectOp::Delete(key) => key,
            ObjectOp::Copy { dest, .. } => dest,
        }
    }

    async fn apply(&self, store: &dyn ObjectStore) -> Result<()> {
        match self {
            ObjectOp::Delete(key) => store.delete(key).await,
            ObjectOp::Copy { source, dest } => store.copy(source, dest).await,
        }
    }
}

/// Aggregate result of a fan-out.
#[derive(Debug, Default)]
struct ObjectTally {
    succeeded: usize,
    failed_keys: Vec<String>,
}

impl ObjectTally {
    fn failed(&self) -> usize {
        self.failed_keys.len()
    }
}

/// Load a node and require it to be a folder.
async fn require_folder(conn: &mut DbConn, id: i64) -> Result<Node> {
    let node = NodeRepository::require(conn, id).await?;
    if !node.is_folder() {
        return Err(ArborError::InvalidInput(format!("node {id} is not a folder")));
    }
    Ok(node)
}

/// Load a selection, dropping duplicate ids and any node nested under
/// another selected node. The result keeps selection order.
async fn load_selection(conn: &mut DbConn, ids: &[i64]) -> Result<Vec<Node>> {
    if ids.is_empty() {
        return Err(ArborError::InvalidInput("selection is empty".to_string()));
    }

    let mut seen = HashSet::new();
    let mut nodes = Vec::new();
    for id in ids {
        if seen.insert(*id) {
            nodes.push(NodeRepository::require(conn, *id).await?);
        }
    }

    let top_level = nodes
        .iter()
        .filter(|n| !nodes.iter().any(|other| n.path.is_descendant_of(&other.path)))
        .cloned()
        .collect();
    Ok(top_level)
}

/// Fail with `Conflict` when two selected nodes share a name.
fn ensure_distinct_names(nodes: &[Node]) -> Result<()> {
    let mut names = HashSet::new();
    for node in nodes {
        if !names.insert(node.name.as_str()) {
            return Err(ArborError::Conflict(format!(
                "more than one selected item is named '{}'",
                node.name
            )));
        }
    }
    Ok(())
}
