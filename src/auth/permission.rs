//! Access levels and permission grants.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use crate::db::DbConn;
use crate::tree::MaterializedPath;
use crate::{ArborError, Result};

/// Access level granted on a folder. Totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    Read = 0,
    Write = 1,
    Admin = 2,
    Owner = 3,
}

impl AccessLevel {
    /// Convert level to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Admin => "admin",
            AccessLevel::Owner => "owner",
        }
    }

    /// Check if this level satisfies the required one.
    ///
    /// # Examples
    ///
    /// ```
    /// use arbor::auth::AccessLevel;
    ///
    /// assert!(AccessLevel::Owner.can_access(AccessLevel::Write));
    /// assert!(AccessLevel::Write.can_access(AccessLevel::Write));
    /// assert!(!AccessLevel::Read.can_access(AccessLevel::Write));
    /// ```
    pub fn can_access(&self, required: AccessLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            "admin" => Ok(AccessLevel::Admin),
            "owner" => Ok(AccessLevel::Owner),
            _ => Err(ArborError::InvalidInput(format!("unknown access level: {s}"))),
        }
    }
}

/// An explicit (user, folder) -> level record.
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    pub id: i64,
    /// Opaque caller identity.
    pub user_id: String,
    pub folder_id: i64,
    pub level: AccessLevel,
    pub granted_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    id: i64,
    user_id: String,
    folder_id: i64,
    level: String,
    granted_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl GrantRow {
    fn into_grant(self) -> Result<Grant> {
        Ok(Grant {
            id: self.id,
            user_id: self.user_id,
            folder_id: self.folder_id,
            level: self.level.parse()?,
            granted_by: self.granted_by,
            created_at: self.created_at,
        })
    }
}

/// Repository for grant rows.
pub struct GrantRepository;

impl GrantRepository {
    /// Create or replace the grant for (user, folder).
    pub async fn upsert(
        conn: &mut DbConn,
        user_id: &str,
        folder_id: i64,
        level: AccessLevel,
        granted_by: Option<&str>,
    ) -> Result<Grant> {
        sqlx::query(
            "INSERT INTO grants (user_id, folder_id, level, granted_by, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (user_id, folder_id)
             DO UPDATE SET level = excluded.level, granted_by = excluded.granted_by",
        )
        .bind(user_id)
        .bind(folder_id)
        .bind(level.as_str())
        .bind(granted_by)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Self::get(conn, user_id, folder_id)
            .await?
            .ok_or_else(|| ArborError::NotFound(format!("grant for {user_id} on {folder_id}")))
    }

    /// Get the grant for (user, folder).
    pub async fn get(conn: &mut DbConn, user_id: &str, folder_id: i64) -> Result<Option<Grant>> {
        let row: Option<GrantRow> = sqlx::query_as(
            "SELECT id, user_id, folder_id, level, granted_by, created_at
             FROM grants WHERE user_id = ? AND folder_id = ?",
        )
        .bind(user_id)
        .bind(folder_id)
        .fetch_optional(&mut *conn)
        .await?;
        row.map(GrantRow::into_grant).transpose()
    }

    /// Delete the grant for (user, folder).
    pub async fn delete(conn: &mut DbConn, user_id: &str, folder_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM grants WHERE user_id = ? AND folder_id = ?")
            .bind(user_id)
            .bind(folder_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List every grant attached to a folder.
    pub async fn list_for_folder(conn: &mut DbConn, folder_id: i64) -> Result<Vec<Grant>> {
        let rows: Vec<GrantRow> = sqlx::query_as(
            "SELECT id, user_id, folder_id, level, granted_by, created_at
             FROM grants WHERE folder_id = ? ORDER BY user_id",
        )
        .bind(folder_id)
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(GrantRow::into_grant).collect()
    }

    /// Count the grants at a given level on a folder.
    pub async fn count_level(conn: &mut DbConn, folder_id: i64, level: AccessLevel) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM grants WHERE folder_id = ? AND level = ?")
                .bind(folder_id)
                .bind(level.as_str())
                .fetch_one(&mut *conn)
                .await?,
        )
    }

    /// A user's grants on any id of `path`, keyed by folder id.
    pub async fn levels_on_path(
        conn: &mut DbConn,
        user_id: &str,
        path: &MaterializedPath,
    ) -> Result<HashMap<i64, AccessLevel>> {
        let mut query: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT folder_id, level FROM grants WHERE user_id = ");
        query.push_bind(user_id);
        query.push(" AND folder_id IN (");
        let mut separated = query.separated(", ");
        for id in path.ids() {
            separated.push_bind(*id);
        }
        query.push(")");

        let rows: Vec<(i64, String)> = query.build_query_as().fetch_all(&mut *conn).await?;
        rows.into_iter()
            .map(|(folder_id, level)| -> Result<(i64, AccessLevel)> {
                Ok((folder_id, level.parse()?))
            })
            .collect()
    }
}
