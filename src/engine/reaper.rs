//! Expiry reaper.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::delete::{remove_subtree, DeleteOutcome};
use super::TreeService;
use crate::tree::NodeRepository;
use crate::Result;

impl<'a> TreeService<'a> {
    /// Delete every file whose expiry is at or before `now`.
    ///
    /// Idempotent: a second run with the same `now` finds nothing. Quota is
    /// refunded with the row removal, objects are deleted after the commit.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<DeleteOutcome> {
        let mut tx = self.db.begin().await?;
        let expired = NodeRepository::list_expired(&mut tx, now).await?;
        if expired.is_empty() {
            debug!("no expired files");
            return Ok(DeleteOutcome::default());
        }

        let mut deleted_count = 0;
        let mut files = Vec::with_capacity(expired.len());
        for node in &expired {
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
            "expired files purged"
        );

        Ok(DeleteOutcome {
            deleted_count,
            objects_deleted: tally.succeeded,
            objects_failed: tally.failed(),
            failed_keys: tally.failed_keys,
        })
    }
}
