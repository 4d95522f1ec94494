//! Create, upload, rename and move.

use tracing::{info, warn};

use super::delete::{remove_subtree, RemovedSubtree};
use super::{ensure_distinct_names, load_selection, require_folder, TreeService};
use crate::auth::{AccessLevel, GrantRepository, PermissionResolver};
use crate::db::DbConn;
use crate::quota::QuotaLedger;
use crate::tree::{validate_name, NewNode, Node, NodeRepository, RootCategory, RootRepository};
use crate::{ArborError, Result};

/// Request data for a file upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Folder to upload into.
    pub parent_id: i64,
    pub name: String,
    pub content_type: String,
    pub content: Vec<u8>,
    /// Opaque metadata stored with the node.
    pub metadata: Option<serde_json::Value>,
    /// Replace an existing sibling with the same name.
    pub override_existing: bool,
}

impl UploadRequest {
    /// Create a new upload request.
    pub fn new(
        parent_id: i64,
        name: impl Into<String>,
        content_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            parent_id,
            name: name.into(),
            content_type: content_type.into(),
            content,
            metadata: None,
            override_existing: false,
        }
    }

    /// Set the metadata blob.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Replace an existing sibling with the same name.
    pub fn with_override(mut self, override_existing: bool) -> Self {
        self.override_existing = override_existing;
        self
    }
}

/// Result of an upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// The committed file row.
    pub node: Node,
    /// Whether the bytes reached the object store. The row and the quota
    /// charge stand either way.
    pub stored: bool,
}

/// Changes applied by [`TreeService::update`].
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New parent folder.
    pub parent_id: Option<i64>,
    /// Replace an existing sibling with the same name under the destination.
    pub override_existing: bool,
}

impl NodeUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn reparent(parent_id: i64) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_override(mut self, override_existing: bool) -> Self {
        self.override_existing = override_existing;
        self
    }
}

/// Result of a batch move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Selected items now under the target (nested selections excluded).
    pub moved_count: usize,
    /// Rows removed because an override replaced them.
    pub replaced_rows: u64,
    /// Blobs of replaced files removed from the object store.
    pub objects_deleted: usize,
    /// Blobs of replaced files that could not be removed.
    pub objects_failed: usize,
}

impl<'a> TreeService<'a> {
    /// Create a root folder and seed the creator's owner grant.
    ///
    /// The quota ceiling defaults to the configured value for the category.
    pub async fn create_root(
        &self,
        user_id: &str,
        name: &str,
        category: RootCategory,
        max_bytes: Option<i64>,
    ) -> Result<Node> {
        let name = validate_name(name)?;
        let max_bytes = max_bytes.unwrap_or_else(|| self.options.quota.default_max_bytes(category));
        if max_bytes < 0 {
            return Err(ArborError::InvalidInput(
                "quota ceiling must not be negative".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;
        let node = NodeRepository::insert(&mut tx, &NewNode::folder(name), None).await?;
        RootRepository::insert(&mut tx, node.id, category, max_bytes, user_id).await?;
        GrantRepository::upsert(&mut tx, user_id, node.id, AccessLevel::Owner, Some(user_id))
            .await?;
        tx.commit().await?;

        info!(root = node.id, category = %category, user = user_id, "root created");
        Ok(node)
    }

    /// Create a folder under `parent_id`.
    pub async fn create_folder(&self, user_id: &str, parent_id: i64, name: &str) -> Result<Node> {
        let name = validate_name(name)?;

        let mut tx = self.db.begin().await?;
        let parent = require_folder(&mut tx, parent_id).await?;
        PermissionResolver::require(&mut tx, user_id, &parent, AccessLevel::Write).await?;
        let node = NodeRepository::insert(&mut tx, &NewNode::folder(name), Some(&parent)).await?;
        tx.commit().await?;

        info!(folder = node.id, parent = parent_id, user = user_id, "folder created");
        Ok(node)
    }

    /// Upload a file.
    ///
    /// # Permission Check
    /// User must hold `write` on the parent folder.
    ///
    /// # Quota
    /// The size is reserved and charged in the same transaction that inserts
    /// the row. Files placed in a personal-temporary root get an expiry.
    pub async fn upload_file(&self, user_id: &str, request: UploadRequest) -> Result<UploadOutcome> {
        let name = validate_name(&request.name)?;
        let size = request.content.len() as u64;
        if size > self.options.max_file_size {
            return Err(ArborError::InvalidInput(format!(
                "file is {size} bytes, limit is {}",
                self.options.max_file_size
            )));
        }

        let mut tx = self.db.begin().await?;
        let parent = require_folder(&mut tx, request.parent_id).await?;
        PermissionResolver::require(&mut tx, user_id, &parent, AccessLevel::Write).await?;

        let replaced = self
            .clear_name(&mut tx, &parent, &name, request.override_existing, None, &[])
            .await?;
        QuotaLedger::reserve_and_charge(&mut tx, parent.root_id(), size as i64).await?;
        let expires_at = self.expiry_for_root(&mut tx, parent.root_id()).await?;

        let new_node = NewNode::file(name, request.content_type.clone(), size as i64)
            .with_expiry(expires_at)
            .with_metadata(request.metadata);
        let node = NodeRepository::insert(&mut tx, &new_node, Some(&parent)).await?;
        tx.commit().await?;

        if let Some(replaced) = replaced {
            self.delete_objects(&replaced.files).await;
        }

        let key = node.object_key();
        let put = self.store.put(&key, request.content, &request.content_type);
        let stored = match tokio::time::timeout(self.options.object_timeout, put).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "upload stored metadata but not content");
                false
            }
            Err(_) => {
                warn!(key = %key, "upload timed out after metadata commit");
                false
            }
        };

        info!(file = node.id, parent = parent.id, size, stored, user = user_id, "file uploaded");
        Ok(UploadOutcome { node, stored })
    }

    /// Rename a node.
    pub async fn rename(
        &self,
        user_id: &str,
        node_id: i64,
        name: &str,
        override_existing: bool,
    ) -> Result<Node> {
        self.update(
            user_id,
            node_id,
            NodeUpdate::rename(name).with_override(override_existing),
        )
        .await
    }

    /// Rename and/or reparent a single node.
    ///
    /// # Permission Check
    /// `write` on the current parent and, when reparenting, on the new one.
    /// Renaming a root needs `admin` on the root itself.
    pub async fn update(&self, user_id: &str, node_id: i64, update: NodeUpdate) -> Result<Node> {
        let mut tx = self.db.begin().await?;
        let node = NodeRepository::require(&mut tx, node_id).await?;
        let new_name = match &update.name {
            Some(name) => validate_name(name)?,
            None => node.name.clone(),
        };

        if node.is_root() {
            if update.parent_id.is_some() {
                return Err(ArborError::InvalidInput("a root cannot be moved".to_string()));
            }
            PermissionResolver::require(&mut tx, user_id, &node, AccessLevel::Admin).await?;
            NodeRepository::rename(&mut tx, node.id, &new_name).await?;
            let updated = NodeRepository::require(&mut tx, node.id).await?;
            tx.commit().await?;
            info!(node = node.id, user = user_id, "root renamed");
            return Ok(updated);
        }

        let old_parent = self.require_parent(&mut tx, &node).await?;
        PermissionResolver::require(&mut tx, user_id, &old_parent, AccessLevel::Write).await?;

        let target = match update.parent_id {
            Some(parent_id) if parent_id != old_parent.id => {
                let target = require_folder(&mut tx, parent_id).await?;
                PermissionResolver::require(&mut tx, user_id, &target, AccessLevel::Write).await?;
                self.check_movable(&mut tx, &node, &target).await?;
                Some(target)
            }
            _ => None,
        };

        if target.is_none() && new_name == node.name {
            return Ok(node);
        }

        let destination = target.as_ref().unwrap_or(&old_parent);
        let replaced = self
            .clear_name(
                &mut tx,
                destination,
                &new_name,
                update.override_existing,
                Some(&node),
                std::slice::from_ref(&node),
            )
            .await?;

        match &target {
            Some(target) => self.relocate(&mut tx, &node, target, &new_name).await?,
            None => NodeRepository::rename(&mut tx, node.id, &new_name).await?,
        }
        let updated = NodeRepository::require(&mut tx, node.id).await?;
        tx.commit().await?;

        if let Some(replaced) = replaced {
            self.delete_objects(&replaced.files).await;
        }

        info!(
            node = node.id,
            parent = updated.parent_id,
            name = %updated.name,
            user = user_id,
            "node updated"
        );
        Ok(updated)
    }

    /// Move a batch of nodes under `target_id`.
    ///
    /// Metadata only: object keys derive from stable ids, so no blob moves.
    /// Items already under the target keep their place. Nothing in a
    /// personal-temporary root may be moved.
    pub async fn move_nodes(
        &self,
        user_id: &str,
        source_ids: &[i64],
        target_id: i64,
        override_existing: bool,
    ) -> Result<MoveOutcome> {
        let mut tx = self.db.begin().await?;
        let target = require_folder(&mut tx, target_id).await?;
        PermissionResolver::require(&mut tx, user_id, &target, AccessLevel::Write).await?;

        let sources = load_selection(&mut tx, source_ids).await?;
        ensure_distinct_names(&sources)?;
        for source in &sources {
            self.check_movable(&mut tx, source, &target).await?;
            let parent = self.require_parent(&mut tx, source).await?;
            PermissionResolver::require(&mut tx, user_id, &parent, AccessLevel::Write).await?;
        }

        let mut replaced_files = Vec::new();
        let mut replaced_rows = 0;
        for source in &sources {
            if let Some(replaced) = self
                .clear_name(
                    &mut tx,
                    &target,
                    &source.name,
                    override_existing,
                    Some(source),
                    &sources,
                )
                .await?
            {
                replaced_rows += replaced.rows;
                replaced_files.extend(replaced.files);
            }
        }

        for source in &sources {
            if source.parent_id != Some(target.id) {
                self.relocate(&mut tx, source, &target, &source.name).await?;
            }
        }
        tx.commit().await?;

        let tally = self.delete_objects(&replaced_files).await;
        info!(
            moved = sources.len(),
            target = target.id,
            replaced_rows,
            user = user_id,
            "nodes moved"
        );
        Ok(MoveOutcome {
            moved_count: sources.len(),
            replaced_rows,
            objects_deleted: tally.succeeded,
            objects_failed: tally.failed(),
        })
    }

    /// Parent folder of a non-root node.
    async fn require_parent(&self, conn: &mut DbConn, node: &Node) -> Result<Node> {
        let parent_id = node
            .parent_id
            .ok_or_else(|| ArborError::InvalidInput(format!("node {} is a root", node.id)))?;
        NodeRepository::require(conn, parent_id).await
    }

    /// Reject moves of roots, of temporary content and into the node's own
    /// subtree.
    async fn check_movable(&self, conn: &mut DbConn, node: &Node, target: &Node) -> Result<()> {
        if node.is_root() {
            return Err(ArborError::InvalidInput("a root cannot be moved".to_string()));
        }
        let root = RootRepository::require(conn, node.root_id()).await?;
        if root.category.is_temporary() {
            return Err(ArborError::InvalidInput(format!(
                "node {} is in a temporary root and can only be copied",
                node.id
            )));
        }
        if target.path.is_within(&node.path) {
            return Err(ArborError::InvalidInput(format!(
                "cannot move node {} into itself",
                node.id
            )));
        }
        Ok(())
    }

    /// Free `name` under `parent` for an incoming node.
    ///
    /// With no sibling of that name this is a no-op. Otherwise it fails with
    /// `Conflict` unless `override_existing` is set, in which case the
    /// sibling's subtree is removed and returned. A sibling that is the
    /// incoming node itself, or that holds any node of the same selection,
    /// is never removed.
    pub(super) async fn clear_name(
        &self,
        conn: &mut DbConn,
        parent: &Node,
        name: &str,
        override_existing: bool,
        incoming: Option<&Node>,
        selection: &[Node],
    ) -> Result<Option<RemovedSubtree>> {
        let Some(existing) = NodeRepository::find_child_by_name(conn, parent.id, name).await? else {
            return Ok(None);
        };

        if let Some(incoming) = incoming {
            if existing.id == incoming.id {
                return Ok(None);
            }
            if incoming.path.is_descendant_of(&existing.path) {
                return Err(ArborError::InvalidInput(format!(
                    "'{name}' contains the item being placed there"
                )));
            }
        }
        if !override_existing {
            return Err(ArborError::Conflict(format!(
                "'{name}' already exists in folder {}",
                parent.id
            )));
        }
        if selection.iter().any(|n| n.path.is_within(&existing.path)) {
            return Err(ArborError::Conflict(format!(
                "'{name}' holds part of the selection and cannot be replaced"
            )));
        }

        Ok(Some(remove_subtree(conn, &existing).await?))
    }

    /// Reparent `node` under `target` and rebase its subtree.
    ///
    /// Crossing roots moves the subtree's bytes between the two ledgers.
    /// Entering a temporary root stamps an expiry on every file.
    async fn relocate(&self, conn: &mut DbConn, node: &Node, target: &Node, name: &str) -> Result<()> {
        let new_path = target.path.child(node.id);

        if target.root_id() != node.root_id() {
            let bytes = NodeRepository::subtree_file_bytes(conn, &node.path).await?;
            QuotaLedger::reserve_and_charge(conn, target.root_id(), bytes).await?;
            QuotaLedger::charge(conn, node.root_id(), -bytes).await?;
        }

        NodeRepository::set_parent(conn, node.id, target.id, name).await?;
        NodeRepository::rebase_subtree(conn, &node.path, &new_path).await?;

        if let Some(expires_at) = self.expiry_for_root(conn, target.root_id()).await? {
            NodeRepository::set_subtree_expiry(conn, &new_path, Some(expires_at)).await?;
        }
        Ok(())
    }
}
