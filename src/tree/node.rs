//! Node types and repository.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use super::path::MaterializedPath;
use crate::db::DbConn;
use crate::storage::ObjectKey;
use crate::{ArborError, Result};

/// Discriminant of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Folder,
}

impl NodeKind {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Folder => "folder",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(NodeKind::File),
            "folder" => Ok(NodeKind::Folder),
            _ => Err(ArborError::Internal(format!("unknown node kind: {s}"))),
        }
    }
}

/// A file or folder in the hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique, monotonically assigned id.
    pub id: i64,
    pub kind: NodeKind,
    /// Display name, unique among siblings.
    pub name: String,
    /// Parent folder id (None only for roots).
    pub parent_id: Option<i64>,
    pub path: MaterializedPath,
    pub content_type: Option<String>,
    /// Byte size (0 for folders).
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Opaque metadata, e.g. the schema of derived tables for spreadsheets.
    pub metadata: Option<serde_json::Value>,
}

impl Node {
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Id of the root this node lives under.
    pub fn root_id(&self) -> i64 {
        self.path.root_id()
    }

    /// Object-store key holding this file's bytes.
    pub fn object_key(&self) -> ObjectKey {
        ObjectKey::for_node(self.id)
    }

    /// Names of derived tables recorded in the metadata blob.
    pub fn derived_tables(&self) -> Vec<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("derived_tables"))
            .and_then(|v| v.as_array())
            .map(|tables| {
                tables
                    .iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Object-store keys of this file's derived artifacts.
    pub fn derived_keys(&self) -> Vec<ObjectKey> {
        self.derived_tables()
            .iter()
            .map(|table| ObjectKey::derived(self.id, table))
            .collect()
    }
}

/// Raw row as stored in the `nodes` table.
#[derive(Debug, sqlx::FromRow)]
struct NodeRow {
    id: i64,
    kind: String,
    name: String,
    parent_id: Option<i64>,
    path: String,
    content_type: Option<String>,
    size: i64,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    metadata: Option<String>,
}

impl NodeRow {
    fn into_node(self) -> Result<Node> {
        let metadata = match self.metadata {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
                ArborError::Internal(format!("malformed metadata on node {}: {e}", self.id))
            })?),
            None => None,
        };
        Ok(Node {
            id: self.id,
            kind: self.kind.parse()?,
            name: self.name,
            parent_id: self.parent_id,
            path: self.path.parse()?,
            content_type: self.content_type,
            size: self.size,
            created_at: self.created_at,
            expires_at: self.expires_at,
            metadata,
        })
    }
}

const NODE_COLUMNS: &str =
    "id, kind, name, parent_id, path, content_type, size, created_at, expires_at, metadata";

/// Data for inserting a new node.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub kind: NodeKind,
    pub name: String,
    pub content_type: Option<String>,
    pub size: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

impl NewNode {
    /// A new folder.
    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Folder,
            name: name.into(),
            content_type: None,
            size: 0,
            expires_at: None,
            metadata: None,
        }
    }

    /// A new file of the given size.
    pub fn file(name: impl Into<String>, content_type: impl Into<String>, size: i64) -> Self {
        Self {
            kind: NodeKind::File,
            name: name.into(),
            content_type: Some(content_type.into()),
            size,
            expires_at: None,
            metadata: None,
        }
    }

    /// Set the expiry timestamp.
    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Set the metadata blob.
    pub fn with_metadata(mut self, metadata: Option<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Copy of an existing node's content fields under a (possibly new) name.
    pub fn duplicate_of(node: &Node) -> Self {
        Self {
            kind: node.kind,
            name: node.name.clone(),
            content_type: node.content_type.clone(),
            size: node.size,
            expires_at: node.expires_at,
            metadata: node.metadata.clone(),
        }
    }
}

/// Repository for node rows.
///
/// Every function takes a connection so it can run on its own or inside the
/// caller's transaction.
pub struct NodeRepository;

impl NodeRepository {
    /// Insert a node under `parent` (or as a root when `parent` is `None`).
    ///
    /// The path is the parent's path with the new id appended.
    pub async fn insert(
        conn: &mut DbConn,
        new_node: &NewNode,
        parent: Option<&Node>,
    ) -> Result<Node> {
        let metadata = new_node
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ArborError::InvalidInput(format!("metadata: {e}")))?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO nodes (kind, name, parent_id, path, content_type, size, created_at, expires_at, metadata)
             VALUES (?, ?, ?, '', ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(new_node.kind.as_str())
        .bind(&new_node.name)
        .bind(parent.map(|p| p.id))
        .bind(&new_node.content_type)
        .bind(new_node.size)
        .bind(Utc::now())
        .bind(new_node.expires_at)
        .bind(metadata)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_unique_violation)?;

        let path = match parent {
            Some(parent) => parent.path.child(id),
            None => MaterializedPath::root(id),
        };
        Self::update_path(conn, id, &path).await?;

        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| ArborError::NotFound(format!("node {id}")))
    }

    /// Get a node by id.
    pub async fn get_by_id(conn: &mut DbConn, id: i64) -> Result<Option<Node>> {
        let row: Option<NodeRow> =
            sqlx::query_as(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
        row.map(NodeRow::into_node).transpose()
    }

    /// Get a node by id, failing with `NotFound` when absent.
    pub async fn require(conn: &mut DbConn, id: i64) -> Result<Node> {
        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| ArborError::NotFound(format!("node {id}")))
    }

    /// Load several nodes at once, in ascending id order.
    pub async fn get_many(conn: &mut DbConn, ids: &[i64]) -> Result<Vec<Node>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id IN ("));
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        query.push(") ORDER BY id");

        let rows: Vec<NodeRow> = query.build_query_as().fetch_all(&mut *conn).await?;
        rows.into_iter().map(NodeRow::into_node).collect()
    }

    /// List the direct children of a folder, folders first, then by name.
    pub async fn list_children(conn: &mut DbConn, parent_id: i64) -> Result<Vec<Node>> {
        let rows: Vec<NodeRow> = sqlx::query_as(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE parent_id = ?
             ORDER BY CASE kind WHEN 'folder' THEN 0 ELSE 1 END, name"
        ))
        .bind(parent_id)
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(NodeRow::into_node).collect()
    }

    /// Find a direct child by name.
    pub async fn find_child_by_name(
        conn: &mut DbConn,
        parent_id: i64,
        name: &str,
    ) -> Result<Option<Node>> {
        let row: Option<NodeRow> = sqlx::query_as(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE parent_id = ? AND name = ?"
        ))
        .bind(parent_id)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
        row.map(NodeRow::into_node).transpose()
    }

    /// All proper descendants of the node at `path`, ordered by path.
    pub async fn list_descendants(conn: &mut DbConn, path: &MaterializedPath) -> Result<Vec<Node>> {
        let (lo, hi) = path.descendant_range();
        let rows: Vec<NodeRow> = sqlx::query_as(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE path >= ? AND path < ? ORDER BY path"
        ))
        .bind(lo)
        .bind(hi)
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(NodeRow::into_node).collect()
    }

    /// Total bytes of the files at or below `path`.
    pub async fn subtree_file_bytes(conn: &mut DbConn, path: &MaterializedPath) -> Result<i64> {
        let (lo, hi) = path.descendant_range();
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size), 0) FROM nodes
             WHERE kind = 'file' AND (path = ? OR (path >= ? AND path < ?))",
        )
        .bind(path.encode())
        .bind(lo)
        .bind(hi)
        .fetch_one(&mut *conn)
        .await?;
        Ok(total)
    }

    /// Rename a node.
    pub async fn rename(conn: &mut DbConn, id: i64, name: &str) -> Result<()> {
        sqlx::query("UPDATE nodes SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(map_unique_violation)?;
        Ok(())
    }

    /// Point a node at a new parent under `name`. The caller rewrites paths
    /// separately with [`Self::rebase_subtree`].
    pub async fn set_parent(conn: &mut DbConn, id: i64, parent_id: i64, name: &str) -> Result<()> {
        sqlx::query("UPDATE nodes SET parent_id = ?, name = ? WHERE id = ?")
            .bind(parent_id)
            .bind(name)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(map_unique_violation)?;
        Ok(())
    }

    /// Replace the `old` prefix with `new` on the node at `old` and every
    /// descendant, in one statement.
    pub async fn rebase_subtree(
        conn: &mut DbConn,
        old: &MaterializedPath,
        new: &MaterializedPath,
    ) -> Result<u64> {
        let old_encoded = old.encode();
        let (lo, hi) = old.descendant_range();
        // substr() is 1-based; the tail keeps its leading separator
        let result = sqlx::query(
            "UPDATE nodes SET path = ? || substr(path, ?)
             WHERE path = ? OR (path >= ? AND path < ?)",
        )
        .bind(new.encode())
        .bind(old_encoded.len() as i64 + 1)
        .bind(&old_encoded)
        .bind(lo)
        .bind(hi)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Overwrite a node's stored path.
    pub async fn update_path(conn: &mut DbConn, id: i64, path: &MaterializedPath) -> Result<()> {
        sqlx::query("UPDATE nodes SET path = ? WHERE id = ?")
            .bind(path.encode())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Set or clear the expiry on every file at or below `path`.
    pub async fn set_subtree_expiry(
        conn: &mut DbConn,
        path: &MaterializedPath,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let (lo, hi) = path.descendant_range();
        let result = sqlx::query(
            "UPDATE nodes SET expires_at = ?
             WHERE kind = 'file' AND (path = ? OR (path >= ? AND path < ?))",
        )
        .bind(expires_at)
        .bind(path.encode())
        .bind(lo)
        .bind(hi)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Replace a node's metadata blob.
    pub async fn update_metadata(
        conn: &mut DbConn,
        id: i64,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        let raw = metadata
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ArborError::InvalidInput(format!("metadata: {e}")))?;
        sqlx::query("UPDATE nodes SET metadata = ? WHERE id = ?")
            .bind(raw)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Delete the node at `path` and all of its descendants in one statement.
    ///
    /// Returns the number of rows removed.
    pub async fn delete_subtree(conn: &mut DbConn, path: &MaterializedPath) -> Result<u64> {
        let (lo, hi) = path.descendant_range();
        let result = sqlx::query("DELETE FROM nodes WHERE path = ? OR (path >= ? AND path < ?)")
            .bind(path.encode())
            .bind(lo)
            .bind(hi)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Files whose expiry is at or before `now`.
    pub async fn list_expired(conn: &mut DbConn, now: DateTime<Utc>) -> Result<Vec<Node>> {
        let rows: Vec<NodeRow> = sqlx::query_as(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE kind = 'file' AND expires_at IS NOT NULL AND expires_at <= ?
             ORDER BY id"
        ))
        .bind(now)
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(NodeRow::into_node).collect()
    }

    /// Count all node rows.
    pub async fn count(conn: &mut DbConn) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
            .fetch_one(&mut *conn)
            .await?)
    }
}

/// Turn a (parent_id, name) uniqueness violation into a `Conflict`.
fn map_unique_violation(e: sqlx::Error) -> ArborError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return ArborError::Conflict("a sibling with this name already exists".to_string());
        }
    }
    e.into()
}
