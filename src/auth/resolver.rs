//! Effective-access resolution.
//!
//! Access is never stored per node. It is derived by walking a node's path
//! from the node itself up to the root: the nearest ancestor (inclusive)
//! holding a grant for the user decides the level, so a grant on a subfolder
//! overrides one further up, in either direction. No grant on the path means
//! no access.

use std::collections::HashMap;

use tracing::warn;

use super::permission::{AccessLevel, Grant, GrantRepository};
use crate::db::DbConn;
use crate::tree::{MaterializedPath, Node};
use crate::{ArborError, Result};

/// Immutable view of grants, keyed by (user, folder).
///
/// Resolution over a snapshot is pure and needs no locking.
#[derive(Debug, Clone, Default)]
pub struct GrantSnapshot {
    grants: HashMap<(String, i64), AccessLevel>,
}

impl GrantSnapshot {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot built from grant records.
    pub fn from_grants<'a>(grants: impl IntoIterator<Item = &'a Grant>) -> Self {
        let mut snapshot = Self::new();
        for grant in grants {
            snapshot.insert(&grant.user_id, grant.folder_id, grant.level);
        }
        snapshot
    }

    /// Add or replace one grant.
    pub fn insert(&mut self, user_id: &str, folder_id: i64, level: AccessLevel) {
        self.grants.insert((user_id.to_string(), folder_id), level);
    }

    /// Effective level of `user_id` at `path`, nearest grant first.
    pub fn resolve(&self, user_id: &str, path: &MaterializedPath) -> Option<AccessLevel> {
        path.nearest_first().find_map(|id| {
            self.grants
                .get(&(user_id.to_string(), id))
                .copied()
        })
    }

    /// Whether `user_id` holds at least `required` at `path`.
    pub fn authorize(&self, user_id: &str, path: &MaterializedPath, required: AccessLevel) -> bool {
        self.resolve(user_id, path)
            .is_some_and(|level| level.can_access(required))
    }
}

/// Resolves effective access against the metadata store.
pub struct PermissionResolver;

impl PermissionResolver {
    /// Load the user's grants along `path` into a snapshot.
    pub async fn snapshot(
        conn: &mut DbConn,
        user_id: &str,
        path: &MaterializedPath,
    ) -> Result<GrantSnapshot> {
        let levels = GrantRepository::levels_on_path(conn, user_id, path).await?;
        let mut snapshot = GrantSnapshot::new();
        for (folder_id, level) in levels {
            snapshot.insert(user_id, folder_id, level);
        }
        Ok(snapshot)
    }

    /// Effective level of `user_id` at `path`.
    pub async fn resolve(
        conn: &mut DbConn,
        user_id: &str,
        path: &MaterializedPath,
    ) -> Result<Option<AccessLevel>> {
        Ok(Self::snapshot(conn, user_id, path)
            .await?
            .resolve(user_id, path))
    }

    /// Whether `user_id` holds at least `required` at `path`.
    ///
    /// Fails closed: a lookup error denies access.
    pub async fn authorize(
        conn: &mut DbConn,
        user_id: &str,
        path: &MaterializedPath,
        required: AccessLevel,
    ) -> bool {
        match Self::resolve(conn, user_id, path).await {
            Ok(level) => level.is_some_and(|level| level.can_access(required)),
            Err(e) => {
                warn!(user = user_id, path = %path, error = %e, "permission lookup failed");
                false
            }
        }
    }

    /// Fail with `Forbidden` unless `user_id` holds `required` on `node`.
    pub async fn require(
        conn: &mut DbConn,
        user_id: &str,
        node: &Node,
        required: AccessLevel,
    ) -> Result<()> {
        if Self::authorize(conn, user_id, &node.path, required).await {
            Ok(())
        } else {
            Err(ArborError::Forbidden(format!(
                "{required} access required on {} {}",
                node.kind, node.id
            )))
        }
    }
}
