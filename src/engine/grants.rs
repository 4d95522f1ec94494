//! Permission grant management.

use tracing::info;

use super::{require_folder, TreeService};
use crate::auth::{AccessLevel, Grant, GrantRepository, PermissionResolver};
use crate::db::DbConn;
use crate::tree::{Node, NodeRepository};
use crate::{ArborError, Result};

impl<'a> TreeService<'a> {
    /// Give `user_id` an explicit level on a folder, replacing any previous
    /// grant for that pair.
    ///
    /// # Permission Check
    /// The actor needs `admin` on the folder, and `owner` to hand out or
    /// take away `owner`.
    pub async fn set_grant(
        &self,
        actor_id: &str,
        folder_id: i64,
        user_id: &str,
        level: AccessLevel,
    ) -> Result<Grant> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ArborError::InvalidInput("user id must not be empty".to_string()));
        }

        let mut tx = self.db.begin().await?;
        let folder = require_folder(&mut tx, folder_id).await?;
        let existing = GrantRepository::get(&mut tx, user_id, folder.id).await?;
        let touches_owner =
            level == AccessLevel::Owner || existing.as_ref().is_some_and(|g| g.level == AccessLevel::Owner);
        self.require_grant_manager(&mut tx, actor_id, &folder, touches_owner)
            .await?;

        if level != AccessLevel::Owner {
            ensure_not_last_owner(&mut tx, &folder, existing.as_ref()).await?;
        }

        let grant = GrantRepository::upsert(&mut tx, user_id, folder.id, level, Some(actor_id)).await?;
        tx.commit().await?;

        info!(folder = folder.id, user = user_id, level = %level, actor = actor_id, "grant set");
        Ok(grant)
    }

    /// Remove the grant of `user_id` on a folder.
    ///
    /// The last `owner` of a root cannot be removed.
    pub async fn revoke_grant(&self, actor_id: &str, folder_id: i64, user_id: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let folder = require_folder(&mut tx, folder_id).await?;
        let existing = GrantRepository::get(&mut tx, user_id, folder.id)
            .await?
            .ok_or_else(|| ArborError::NotFound(format!("grant for {user_id} on {folder_id}")))?;

        self.require_grant_manager(
            &mut tx,
            actor_id,
            &folder,
            existing.level == AccessLevel::Owner,
        )
        .await?;
        ensure_not_last_owner(&mut tx, &folder, Some(&existing)).await?;

        GrantRepository::delete(&mut tx, user_id, folder.id).await?;
        tx.commit().await?;

        info!(folder = folder.id, user = user_id, actor = actor_id, "grant revoked");
        Ok(())
    }

    /// Explicit grants on a folder. Needs `admin`.
    pub async fn list_grants(&self, actor_id: &str, folder_id: i64) -> Result<Vec<Grant>> {
        let mut conn = self.db.acquire().await?;
        let folder = require_folder(&mut conn, folder_id).await?;
        PermissionResolver::require(&mut conn, actor_id, &folder, AccessLevel::Admin).await?;
        GrantRepository::list_for_folder(&mut conn, folder.id).await
    }

    /// Effective level of `user_id` at a node, `None` meaning no access.
    pub async fn effective_access(&self, user_id: &str, node_id: i64) -> Result<Option<AccessLevel>> {
        let mut conn = self.db.acquire().await?;
        let node = NodeRepository::require(&mut conn, node_id).await?;
        PermissionResolver::resolve(&mut conn, user_id, &node.path).await
    }

    async fn require_grant_manager(
        &self,
        conn: &mut DbConn,
        actor_id: &str,
        folder: &Node,
        touches_owner: bool,
    ) -> Result<()> {
        let required = if touches_owner {
            AccessLevel::Owner
        } else {
            AccessLevel::Admin
        };
        PermissionResolver::require(conn, actor_id, folder, required).await
    }
}

/// Refuse to drop the only owner grant on a root.
async fn ensure_not_last_owner(conn: &mut DbConn, folder: &Node, existing: Option<&Grant>) -> Result<()> {
    let losing_owner = existing.is_some_and(|g| g.level == AccessLevel::Owner);
    if folder.is_root()
        && losing_owner
        && GrantRepository::count_level(conn, folder.id, AccessLevel::Owner).await? <= 1
    {
        return Err(ArborError::Conflict(format!(
            "root {} must keep at least one owner",
            folder.id
        )));
    }
    Ok(())
}
