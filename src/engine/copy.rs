//! Subtree copy.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{ensure_distinct_names, load_selection, require_folder, ObjectOp, TreeService};
use crate::auth::{AccessLevel, PermissionResolver};
use crate::db::DbConn;
use crate::quota::QuotaLedger;
use crate::storage::ObjectKey;
use crate::tree::{NewNode, Node, NodeRepository};
use crate::{ArborError, Result};

/// Result of a copy.
///
/// Row duplication commits even when object copies fail; the failed keys
/// name the files whose content is missing until a retry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Metadata rows duplicated, folders included.
    pub rows_copied: u64,
    /// File objects copied.
    pub objects_copied: usize,
    /// File objects that could not be copied.
    pub objects_failed: usize,
    /// Destination keys of the failed copies.
    pub failed_keys: Vec<String>,
}

impl CopyOutcome {
    /// Whether some object copies failed.
    pub fn is_partial(&self) -> bool {
        self.objects_failed > 0
    }
}

impl<'a> TreeService<'a> {
    /// Copy a selection under `target_id`, duplicating whole subtrees.
    ///
    /// # Permission Check
    /// `read` on every source and `write` on the target.
    ///
    /// Copies land with fresh ids. Their bytes are charged to the target's
    /// root, and files copied into a temporary root get a fresh expiry while
    /// files copied out of one lose theirs.
    pub async fn copy_nodes(
        &self,
        user_id: &str,
        source_ids: &[i64],
        target_id: i64,
        override_existing: bool,
    ) -> Result<CopyOutcome> {
        let mut tx = self.db.begin().await?;
        let target = require_folder(&mut tx, target_id).await?;
        PermissionResolver::require(&mut tx, user_id, &target, AccessLevel::Write).await?;

        let sources = load_selection(&mut tx, source_ids).await?;
        ensure_distinct_names(&sources)?;
        for source in &sources {
            PermissionResolver::require(&mut tx, user_id, source, AccessLevel::Read).await?;
            if target.path.is_within(&source.path) {
                return Err(ArborError::InvalidInput(format!(
                    "cannot copy node {} into itself",
                    source.id
                )));
            }
            if source.parent_id == Some(target.id) {
                return Err(if override_existing {
                    ArborError::InvalidInput(format!(
                        "cannot replace '{}' with a copy of itself",
                        source.name
                    ))
                } else {
                    ArborError::Conflict(format!(
                        "'{}' already exists in folder {}",
                        source.name, target.id
                    ))
                });
            }
        }

        let mut replaced_files = Vec::new();
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
                replaced_files.extend(replaced.files);
            }
        }

        let expires_at = self.expiry_for_root(&mut tx, target.root_id()).await?;
        let mut rows_copied = 0;
        let mut copied_files = Vec::new();
        for source in &sources {
            let bytes = NodeRepository::subtree_file_bytes(&mut tx, &source.path).await?;
            QuotaLedger::reserve_and_charge(&mut tx, target.root_id(), bytes).await?;
            rows_copied +=
                duplicate_subtree(&mut tx, source, &target, expires_at, &mut copied_files).await?;
        }
        tx.commit().await?;

        self.delete_objects(&replaced_files).await;

        let ops = copied_files
            .iter()
            .map(|(from, to)| ObjectOp::Copy {
                source: from.object_key(),
                dest: to.object_key(),
            })
            .collect();
        let tally = self.run_object_ops(ops).await;

        let derived: Vec<ObjectOp> = copied_files
            .iter()
            .flat_map(|(from, to)| {
                from.derived_tables().into_iter().map(move |table| ObjectOp::Copy {
                    source: ObjectKey::derived(from.id, &table),
                    dest: ObjectKey::derived(to.id, &table),
                })
            })
            .collect();
        if !derived.is_empty() {
            let derived_tally = self.run_object_ops(derived).await;
            if derived_tally.failed() > 0 {
                warn!(failed = derived_tally.failed(), "derived artifacts not copied");
            }
        }

        info!(
            rows = rows_copied,
            objects_copied = tally.succeeded,
            objects_failed = tally.failed(),
            target = target.id,
            user = user_id,
            "nodes copied"
        );
        Ok(CopyOutcome {
            rows_copied,
            objects_copied: tally.succeeded,
            objects_failed: tally.failed(),
            failed_keys: tally.failed_keys,
        })
    }
}

/// Insert a copy of `source` and all its descendants under `target`.
///
/// Pushes each (original, copy) file pair onto `files` and returns the
/// number of rows inserted.
async fn duplicate_subtree(
    conn: &mut DbConn,
    source: &Node,
    target: &Node,
    expires_at: Option<DateTime<Utc>>,
    files: &mut Vec<(Node, Node)>,
) -> Result<u64> {
    let copy = NodeRepository::insert(conn, &duplicate(source, expires_at), Some(target)).await?;
    let mut rows = 1;
    let mut folders: HashMap<i64, Node> = HashMap::new();
    if source.is_file() {
        files.push((source.clone(), copy));
        return Ok(rows);
    }
    folders.insert(source.id, copy);

    // Path order visits every parent before its children
    for node in NodeRepository::list_descendants(conn, &source.path).await? {
        let parent = node
            .parent_id
            .and_then(|id| folders.get(&id))
            .ok_or_else(|| {
                ArborError::Internal(format!("parent of node {} not copied", node.id))
            })?;
        let copy = NodeRepository::insert(conn, &duplicate(&node, expires_at), Some(parent)).await?;
        rows += 1;
        if node.is_folder() {
            folders.insert(node.id, copy);
        } else {
            files.push((node, copy));
        }
    }
    Ok(rows)
}

fn duplicate(node: &Node, expires_at: Option<DateTime<Utc>>) -> NewNode {
    let expiry = if node.is_file() { expires_at } else { None };
    NewNode::duplicate_of(node).with_expiry(expiry)
}
