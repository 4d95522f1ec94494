//! Quota ledger.
//!
//! Each root carries a byte ceiling and a running `used_bytes` counter. The
//! counter is moved by signed deltas inside the same transaction that creates
//! or removes the file rows, so it tracks the metadata store, not blob
//! presence: an object-store failure after commit never touches it.

use serde::Serialize;

use crate::db::DbConn;
use crate::tree::{MaterializedPath, NodeRepository, RootRepository};
use crate::{ArborError, Result};

/// Snapshot of a root's quota.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaUsage {
    pub root_id: i64,
    pub used: i64,
    pub max: i64,
    pub remaining: i64,
    /// Share of the ceiling in use, 0.0 to 100.0 (may exceed 100 after the
    /// ceiling is lowered).
    pub percent: f64,
}

/// Per-root byte accounting.
pub struct QuotaLedger;

impl QuotaLedger {
    /// Whether `bytes` more would fit under the root's ceiling.
    pub async fn reserve(conn: &mut DbConn, root_id: i64, bytes: i64) -> Result<bool> {
        let root = RootRepository::require(conn, root_id).await?;
        Ok(root.used_bytes + bytes <= root.max_bytes)
    }

    /// Apply a signed delta to the root's counter.
    pub async fn charge(conn: &mut DbConn, root_id: i64, delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        sqlx::query("UPDATE roots SET used_bytes = used_bytes + ? WHERE node_id = ?")
            .bind(delta)
            .bind(root_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Reserve and charge `bytes` in one conditional update.
    ///
    /// Fails with `QuotaExceeded` and leaves the counter unchanged when the
    /// bytes do not fit.
    pub async fn reserve_and_charge(conn: &mut DbConn, root_id: i64, bytes: i64) -> Result<()> {
        if bytes <= 0 {
            return Self::charge(conn, root_id, bytes).await;
        }
        let result = sqlx::query(
            "UPDATE roots SET used_bytes = used_bytes + ?
             WHERE node_id = ? AND used_bytes + ? <= max_bytes",
        )
        .bind(bytes)
        .bind(root_id)
        .bind(bytes)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let root = RootRepository::require(conn, root_id).await?;
            return Err(ArborError::QuotaExceeded {
                root_id,
                requested: bytes,
                remaining: (root.max_bytes - root.used_bytes).max(0),
            });
        }
        Ok(())
    }

    /// Current usage of a root.
    pub async fn usage(conn: &mut DbConn, root_id: i64) -> Result<QuotaUsage> {
        let root = RootRepository::require(conn, root_id).await?;
        let percent = if root.max_bytes > 0 {
            root.used_bytes as f64 / root.max_bytes as f64 * 100.0
        } else {
            100.0
        };
        Ok(QuotaUsage {
            root_id,
            used: root.used_bytes,
            max: root.max_bytes,
            remaining: (root.max_bytes - root.used_bytes).max(0),
            percent,
        })
    }

    /// Sum of file sizes actually stored under the root.
    ///
    /// Used to audit the incremental counter; never written back implicitly.
    pub async fn actual_usage(conn: &mut DbConn, root_id: i64) -> Result<i64> {
        NodeRepository::subtree_file_bytes(conn, &MaterializedPath::root(root_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NewNode, NodeRepository, RootCategory};
    use crate::Database;

    async fn setup_root(db: &Database, max: i64, used: i64) -> i64 {
        let mut conn = db.acquire().await.unwrap();
        let node = NodeRepository::insert(&mut conn, &NewNode::folder("root"), None)
            .await
            .unwrap();
        RootRepository::insert(&mut conn, node.id, RootCategory::Personal, max, "alice")
            .await
            .unwrap();
        QuotaLedger::charge(&mut conn, node.id, used).await.unwrap();
        node.id
    }

    #[tokio::test]
    async fn test_reserve() {
        let db = Database::open_in_memory().await.unwrap();
        let root_id = setup_root(&db, 1000, 900).await;
        let mut conn = db.acquire().await.unwrap();

        assert!(QuotaLedger::reserve(&mut conn, root_id, 100).await.unwrap());
        assert!(!QuotaLedger::reserve(&mut conn, root_id, 101).await.unwrap());
    }

    #[tokio::test]
    async fn test_reserve_and_charge_rejects_overflow() {
        let db = Database::open_in_memory().await.unwrap();
        let root_id = setup_root(&db, 1000, 900).await;
        let mut conn = db.acquire().await.unwrap();

        let result = QuotaLedger::reserve_and_charge(&mut conn, root_id, 150).await;
        assert!(matches!(
            result,
            Err(ArborError::QuotaExceeded {
                requested: 150,
                remaining: 100,
                ..
            })
        ));
        assert_eq!(QuotaLedger::usage(&mut conn, root_id).await.unwrap().used, 900);

        QuotaLedger::reserve_and_charge(&mut conn, root_id, 50)
            .await
            .unwrap();
        assert_eq!(QuotaLedger::usage(&mut conn, root_id).await.unwrap().used, 950);
    }

    #[tokio::test]
    async fn test_usage() {
        let db = Database::open_in_memory().await.unwrap();
        let root_id = setup_root(&db, 1000, 250).await;
        let mut conn = db.acquire().await.unwrap();

        let usage = QuotaLedger::usage(&mut conn, root_id).await.unwrap();
        assert_eq!(usage.used, 250);
        assert_eq!(usage.max, 1000);
        assert_eq!(usage.remaining, 750);
        assert!((usage.percent - 25.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_negative_charge() {
        let db = Database::open_in_memory().await.unwrap();
        let root_id = setup_root(&db, 1000, 500).await;
        let mut conn = db.acquire().await.unwrap();

        QuotaLedger::charge(&mut conn, root_id, -200).await.unwrap();
        assert_eq!(QuotaLedger::usage(&mut conn, root_id).await.unwrap().used, 300);
    }

    #[tokio::test]
    async fn test_unknown_root() {
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        assert!(matches!(
            QuotaLedger::usage(&mut conn, 42).await,
            Err(ArborError::NotFound(_))
        ));
    }
}
