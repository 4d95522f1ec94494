//! Cascading delete.

use tracing::{info, warn};

use super::{load_selection, ObjectOp, ObjectTally, TreeService};
use crate::auth::{AccessLevel, PermissionResolver};
use crate::db::DbConn;
use crate::quota::QuotaLedger;
use crate::tree::{Node, NodeRepository};
use crate::Result;

/// Result of a delete.
///
/// The row count is authoritative: every counted row is gone. Blob counts
/// cover file objects only; derived artifacts are cleaned up best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Metadata rows removed, folders included.
    pub deleted_count: u64,
    /// File objects removed from the object store.
    pub objects_deleted: usize,
    /// File objects that could not be removed.
    pub objects_failed: usize,
    /// Keys of the objects that could not be removed.
    pub failed_keys: Vec<String>,
}

impl DeleteOutcome {
    /// Whether some object-store deletes failed.
    pub fn is_partial(&self) -> bool {
        self.objects_failed > 0
    }
}

/// Rows removed by [`remove_subtree`].
#[derive(Debug, Default)]
pub(super) struct RemovedSubtree {
    pub rows: u64,
    /// File rows that were removed, whose objects still need deleting.
    pub files: Vec<Node>,
}

/// Delete `node` and its descendants and refund their bytes.
///
/// Runs on the caller's connection so the refund commits with the rows.
/// Grants on removed folders go with them.
pub(super) async fn remove_subtree(conn: &mut DbConn, node: &Node) -> Result<RemovedSubtree> {
    let mut files: Vec<Node> = NodeRepository::list_descendants(conn, &node.path)
        .await?
        .into_iter()
        .filter(Node::is_file)
        .collect();
    if node.is_file() {
        files.insert(0, node.clone());
    }

    let bytes: i64 = files.iter().map(|f| f.size).sum();
    let rows = NodeRepository::delete_subtree(conn, &node.path).await?;
    // A deleted root takes its ledger row with it
    if !node.is_root() {
        QuotaLedger::charge(conn, node.root_id(), -bytes).await?;
    }

    Ok(RemovedSubtree { rows, files })
}

impl<'a> TreeService<'a> {
    /// Delete a selection of nodes and everything below them.
    ///
    /// # Permission Check
    /// `write` on each item's parent; deleting a root needs `owner` on it.
    ///
    /// All rows go in one transaction. Object deletes follow the commit and
    /// their failures are counted, never rolled back.
    pub async fn delete_nodes(&self, user_id: &str, ids: &[i64]) -> Result<DeleteOutcome> {
        let mut tx = self.db.begin().await?;
        let nodes = load_selection(&mut tx, ids).await?;

        for node in &nodes {
            match node.parent_id {
                None => {
                    PermissionResolver::require(&mut tx, user_id, node, AccessLevel::Owner).await?;
                }
                Some(parent_id) => {
                    let parent = NodeRepository::require(&mut tx, parent_id).await?;
                    PermissionResolver::require(&mut tx, user_id, &parent, AccessLevel::Write)
                        .await?;
                }
            }
        }

        let mut deleted_count = 0;
        let mut files = Vec::new();
        for node in &nodes {
            let removed = remove_subtree(&mut tx, node).await?;
            deleted_count += removed.rows;
            files.extend(removed.files);
        }
        tx.commit().await?;

        let tally = self.delete_objects(&files).await;
        info!(
            rows = deleted_count,
            objects_deleted = tally.succeeded,
            objects_failed = tally.failed(),
            user = user_id,
            "nodes deleted"
        );

        Ok(DeleteOutcome {
            deleted_count,
            objects_deleted: tally.succeeded,
            objects_failed: tally.failed(),
            failed_keys: tally.failed_keys,
        })
    }

    /// Delete the objects of removed files, then their derived artifacts.
    ///
    /// Only the file objects are tallied.
    pub(super) async fn delete_objects(&self, files: &[Node]) -> ObjectTally {
        if files.is_empty() {
            return ObjectTally::default();
        }

        let ops = files
            .iter()
            .map(|f| ObjectOp::Delete(f.object_key()))
            .collect();
        let tally = self.run_object_ops(ops).await;

        let derived: Vec<ObjectOp> = files
            .iter()
            .flat_map(Node::derived_keys)
            .map(ObjectOp::Delete)
            .collect();
        if !derived.is_empty() {
            let derived_tally = self.run_object_ops(derived).await;
            if derived_tally.failed() > 0 {
                warn!(failed = derived_tally.failed(), "derived artifacts left behind");
            }
        }

        tally
    }
}
