//! Store/blob reconciliation.
//!
//! The eviction path deletes rows authoritatively and treats blob deletion
//! as best-effort, so the two stores can drift: blobs with no referencing
//! row (orphans) and file/image rows whose blob is gone (dangling records).
//! [`FileLifecycleCoordinator`] walks both directions and removes the
//! inconsistent side. It only ever deletes state that is already
//! inconsistent, so both operations are idempotent and safe to run
//! alongside live traffic.

use crate::config::ReconcileConfig;
use crate::error::StorageResult;
use crate::storage::{BlobStore, ItemFilter, ItemStore};
use clip_types::ItemId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Reconciles blob store contents against item store records.
pub struct FileLifecycleCoordinator {
    items: Arc<dyn ItemStore>,
    blobs: Arc<dyn BlobStore>,
}

impl FileLifecycleCoordinator {
    /// Create a coordinator over the given stores.
    pub fn new(items: Arc<dyn ItemStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { items, blobs }
    }

    /// Delete every stored blob whose reference is not in `valid_refs`.
    ///
    /// Returns how many blobs were deleted. Individual deletion failures
    /// are logged and skipped; a blob that cannot be removed now will be a
    /// candidate again on the next run.
    pub async fn reconcile_orphans(
        &self,
        valid_refs: &HashSet<String>,
    ) -> StorageResult<u64> {
        let mut deleted = 0;

        for reference in self.blobs.list().await? {
            if valid_refs.contains(&reference) {
                continue;
            }
            match self.blobs.delete(&reference).await {
                Ok(()) => {
                    tracing::debug!(reference, "orphaned blob removed");
                    deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(reference, error = %e, "orphaned blob could not be removed")
                }
            }
        }

        Ok(deleted)
    }

    /// Delete every file/image row whose blob no longer exists.
    ///
    /// Returns how many rows were deleted. Rows with no blob reference at
    /// all are treated as dangling too: a file item without bytes behind it
    /// can never be served.
    pub async fn reconcile_dangling_records(&self) -> StorageResult<u64> {
        let mut dangling: Vec<ItemId> = Vec::new();

        for item in self.items.query(&ItemFilter::all()).await? {
            if !item.kind.has_blob() {
                continue;
            }
            let gone = match item.blob_ref.as_deref() {
                Some(reference) => !self.blobs.exists(reference).await?,
                None => true,
            };
            if gone {
                tracing::debug!(id = %item.id, "dangling record found");
                dangling.push(item.id);
            }
        }

        if dangling.is_empty() {
            return Ok(0);
        }
        self.items.delete_many(&dangling).await
    }

    /// Run both reconciliation directions, deriving the valid reference set
    /// from the item store.
    ///
    /// Dangling records are removed first so the orphan scan does not treat
    /// their references as valid.
    pub async fn run(&self) -> StorageResult<ReconcileOutcome> {
        let rows_deleted = self.reconcile_dangling_records().await?;

        let valid_refs: HashSet<String> = self
            .items
            .query(&ItemFilter::all())
            .await?
            .into_iter()
            .filter_map(|item| item.blob_ref)
            .collect();
        let blobs_deleted = self.reconcile_orphans(&valid_refs).await?;

        Ok(ReconcileOutcome {
            rows_deleted,
            blobs_deleted,
        })
    }
}

/// Result of one full reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Dangling file/image rows deleted.
    pub rows_deleted: u64,
    /// Orphaned blobs deleted.
    pub blobs_deleted: u64,
}

/// Spawn the periodic reconciliation task.
pub fn spawn_reconcile_task(
    coordinator: Arc<FileLifecycleCoordinator>,
    config: ReconcileConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("reconciliation task disabled");
            return;
        }

        tracing::info!(interval_secs = config.interval_secs, "reconciliation task started");
        let mut timer = interval(Duration::from_secs(config.interval_secs));

        loop {
            timer.tick().await;

            match coordinator.run().await {
                Ok(outcome) if outcome != ReconcileOutcome::default() => {
                    tracing::info!(
                        rows = outcome.rows_deleted,
                        blobs = outcome.blobs_deleted,
                        "reconciliation removed inconsistent state"
                    );
                }
                Ok(_) => tracing::debug!("stores are consistent"),
                Err(e) => tracing::error!(error = %e, "reconciliation run failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsBlobStore, SqliteItemStore};
    use crate::test_support::{file_item, seed_blob, text_item};

    async fn fixture() -> (
        tempfile::TempDir,
        Arc<SqliteItemStore>,
        Arc<FsBlobStore>,
        FileLifecycleCoordinator,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let items = Arc::new(SqliteItemStore::in_memory().await.unwrap());
        let blobs = Arc::new(FsBlobStore::new(dir.path()).await.unwrap());
        let coordinator = FileLifecycleCoordinator::new(items.clone(), blobs.clone());
        (dir, items, blobs, coordinator)
    }

    #[tokio::test]
    async fn orphans_outside_the_valid_set_are_removed() {
        let (dir, _items, blobs, coordinator) = fixture().await;
        seed_blob(&dir, "kept.bin");
        seed_blob(&dir, "orphan.bin");

        let valid: HashSet<String> = ["kept.bin".to_string()].into();
        let deleted = coordinator.reconcile_orphans(&valid).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(blobs.exists("kept.bin").await.unwrap());
        assert!(!blobs.exists("orphan.bin").await.unwrap());
    }

    #[tokio::test]
    async fn orphan_reconciliation_is_idempotent() {
        let (dir, _items, _blobs, coordinator) = fixture().await;
        seed_blob(&dir, "orphan.bin");

        let valid = HashSet::new();
        assert_eq!(coordinator.reconcile_orphans(&valid).await.unwrap(), 1);
        // Second run with no intervening writes deletes nothing
        assert_eq!(coordinator.reconcile_orphans(&valid).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dangling_rows_are_deleted() {
        let (dir, items, _blobs, coordinator) = fixture().await;
        seed_blob(&dir, "present.bin");
        items
            .insert(&file_item("present.bin", 10, 1000))
            .await
            .unwrap();
        items
            .insert(&file_item("missing.bin", 10, 2000))
            .await
            .unwrap();

        let deleted = coordinator.reconcile_dangling_records().await.unwrap();
        assert_eq!(deleted, 1);

        let left = items.query(&ItemFilter::all()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].blob_ref.as_deref(), Some("present.bin"));
    }

    #[tokio::test]
    async fn text_rows_are_never_dangling() {
        let (_dir, items, _blobs, coordinator) = fixture().await;
        items.insert(&text_item("hello", 1000)).await.unwrap();

        assert_eq!(coordinator.reconcile_dangling_records().await.unwrap(), 0);
        assert_eq!(items.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn file_row_without_reference_is_dangling() {
        let (_dir, items, _blobs, coordinator) = fixture().await;
        let mut item = file_item("x.bin", 10, 1000);
        item.blob_ref = None;
        items.insert(&item).await.unwrap();

        assert_eq!(coordinator.reconcile_dangling_records().await.unwrap(), 1);
        assert_eq!(items.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_repairs_both_directions() {
        let (dir, items, blobs, coordinator) = fixture().await;
        // Consistent pair
        seed_blob(&dir, "ok.bin");
        items.insert(&file_item("ok.bin", 10, 1000)).await.unwrap();
        // Orphaned blob and dangling row
        seed_blob(&dir, "orphan.bin");
        items
            .insert(&file_item("gone.bin", 10, 2000))
            .await
            .unwrap();

        let outcome = coordinator.run().await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome {
                rows_deleted: 1,
                blobs_deleted: 1,
            }
        );

        assert!(blobs.exists("ok.bin").await.unwrap());
        assert_eq!(items.count(None).await.unwrap(), 1);

        // Second pass finds nothing
        assert_eq!(coordinator.run().await.unwrap(), ReconcileOutcome::default());
    }
}
