//! Roots: the top folder of one hierarchy instance.

use std::fmt;
use std::str::FromStr;

use crate::db::DbConn;
use crate::{ArborError, Result};

/// Category of a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootCategory {
    Personal,
    /// Content expires; may be copied out but not moved.
    PersonalTemporary,
    Organizational,
    Shared,
}

impl RootCategory {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RootCategory::Personal => "personal",
            RootCategory::PersonalTemporary => "personal_temporary",
            RootCategory::Organizational => "organizational",
            RootCategory::Shared => "shared",
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, RootCategory::PersonalTemporary)
    }
}

impl fmt::Display for RootCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RootCategory {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "personal" => Ok(RootCategory::Personal),
            "personal_temporary" => Ok(RootCategory::PersonalTemporary),
            "organizational" => Ok(RootCategory::Organizational),
            "shared" => Ok(RootCategory::Shared),
            _ => Err(ArborError::InvalidInput(format!("unknown root category: {s}"))),
        }
    }
}

/// Root record joined to its folder node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    /// Id of the root folder node.
    pub node_id: i64,
    pub category: RootCategory,
    /// Quota ceiling in bytes.
    pub max_bytes: i64,
    /// Running total of file bytes under this root.
    pub used_bytes: i64,
    /// Opaque identity of the creator.
    pub created_by: String,
}

#[derive(Debug, sqlx::FromRow)]
struct RootRow {
    node_id: i64,
    category: String,
    max_bytes: i64,
    used_bytes: i64,
    created_by: String,
}

impl RootRow {
    fn into_root(self) -> Result<Root> {
        Ok(Root {
            node_id: self.node_id,
            category: self
                .category
                .parse()
                .map_err(|_| ArborError::Internal(format!("bad category on root {}", self.node_id)))?,
            max_bytes: self.max_bytes,
            used_bytes: self.used_bytes,
            created_by: self.created_by,
        })
    }
}

/// Repository for root records.
pub struct RootRepository;

impl RootRepository {
    /// Register an existing folder node as a root.
    pub async fn insert(
        conn: &mut DbConn,
        node_id: i64,
        category: RootCategory,
        max_bytes: i64,
        created_by: &str,
    ) -> Result<Root> {
        sqlx::query(
            "INSERT INTO roots (node_id, category, max_bytes, used_bytes, created_by)
             VALUES (?, ?, ?, 0, ?)",
        )
        .bind(node_id)
        .bind(category.as_str())
        .bind(max_bytes)
        .bind(created_by)
        .execute(&mut *conn)
        .await?;

        Self::require(conn, node_id).await
    }

    /// Get a root by its node id.
    pub async fn get(conn: &mut DbConn, node_id: i64) -> Result<Option<Root>> {
        let row: Option<RootRow> = sqlx::query_as(
            "SELECT node_id, category, max_bytes, used_bytes, created_by
             FROM roots WHERE node_id = ?",
        )
        .bind(node_id)
        .fetch_optional(&mut *conn)
        .await?;
        row.map(RootRow::into_root).transpose()
    }

    /// Get a root, failing with `NotFound` when absent.
    pub async fn require(conn: &mut DbConn, node_id: i64) -> Result<Root> {
        Self::get(conn, node_id)
            .await?
            .ok_or_else(|| ArborError::NotFound(format!("root {node_id}")))
    }

    /// List roots of a category.
    pub async fn list_by_category(conn: &mut DbConn, category: RootCategory) -> Result<Vec<Root>> {
        let rows: Vec<RootRow> = sqlx::query_as(
            "SELECT node_id, category, max_bytes, used_bytes, created_by
             FROM roots WHERE category = ? ORDER BY node_id",
        )
        .bind(category.as_str())
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(RootRow::into_root).collect()
    }

    /// Change the quota ceiling of a root.
    pub async fn set_max_bytes(conn: &mut DbConn, node_id: i64, max_bytes: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE roots SET max_bytes = ? WHERE node_id = ?")
            .bind(max_bytes)
            .bind(node_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
