//! Retention and eviction engine.
//!
//! Applies count-based and size/age-based eviction policies over the item
//! and blob stores to keep storage bounded. Row deletions are authoritative:
//! a blob-deletion failure is recorded in the outcome and reconciled later
//! by the file lifecycle coordinator, never retried here. A row-deletion
//! failure aborts the pass and surfaces to the invoking trigger.

use crate::broadcast::BroadcastRouter;
use crate::config::{EvictionStrategy, RetentionConfig};
use crate::error::StorageResult;
use crate::registry::now_millis;
use crate::server::ServerMetrics;
use crate::storage::{BlobStore, ItemFilter, ItemStore};
use clip_types::{Item, ItemId};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Result of one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    /// Item rows deleted.
    pub rows_deleted: u64,
    /// Blobs deleted.
    pub blobs_deleted: u64,
    /// Blob references that failed to delete (non-fatal).
    pub failed_blobs: Vec<String>,
}

impl EvictionOutcome {
    /// Fold another pass's outcome into this one.
    pub fn absorb(&mut self, other: EvictionOutcome) {
        self.rows_deleted += other.rows_deleted;
        self.blobs_deleted += other.blobs_deleted;
        self.failed_blobs.extend(other.failed_blobs);
    }
}

/// Count/age/file eviction over the item and blob stores.
pub struct RetentionEngine {
    items: Arc<dyn ItemStore>,
    blobs: Arc<dyn BlobStore>,
    router: BroadcastRouter,
    metrics: Arc<ServerMetrics>,
}

impl RetentionEngine {
    /// Create an engine over the given stores.
    ///
    /// Deleted item ids are announced through `router` so subscribers see
    /// evictions without polling.
    pub fn new(
        items: Arc<dyn ItemStore>,
        blobs: Arc<dyn BlobStore>,
        router: BroadcastRouter,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            items,
            blobs,
            router,
            metrics,
        }
    }

    /// Keep the `keep` most recent items (any kind) and evict the rest.
    ///
    /// `keep = 0` deletes everything. Recency ties are broken by the
    /// store's ordering (creation time descending, id descending).
    pub async fn evict_by_count(&self, keep: u32) -> StorageResult<EvictionOutcome> {
        let all = self.items.query(&ItemFilter::all()).await?;
        let doomed: Vec<Item> = all.into_iter().skip(keep as usize).collect();
        self.delete_items(doomed).await
    }

    /// Evict every item created strictly before `cutoff` (unix millis).
    pub async fn evict_by_age(&self, cutoff: i64) -> StorageResult<EvictionOutcome> {
        let doomed = self.items.query(&ItemFilter::older_than(cutoff)).await?;
        self.delete_items(doomed).await
    }

    /// Keep `keep` file/image items per the strategy and evict the rest.
    ///
    /// Text items are never affected. `largest_first` evicts the biggest
    /// files (unknown sizes count as zero, ties broken by recency);
    /// `oldest_first` evicts purely by recency.
    pub async fn evict_files_by_count(
        &self,
        keep: u32,
        strategy: EvictionStrategy,
    ) -> StorageResult<EvictionOutcome> {
        let mut candidates: Vec<Item> = self
            .items
            .query(&ItemFilter::all())
            .await?
            .into_iter()
            .filter(|item| item.kind.has_blob())
            .collect();

        // Order candidates by eviction priority, front first. The store
        // returns newest first, so reversing gives oldest first.
        candidates.reverse();
        if strategy == EvictionStrategy::LargestFirst {
            // Stable sort keeps the oldest-first order within equal sizes.
            candidates.sort_by_key(|item| std::cmp::Reverse(item.size.unwrap_or(0)));
        }

        let excess = candidates.len().saturating_sub(keep as usize);
        candidates.truncate(excess);
        self.delete_items(candidates).await
    }

    /// Apply every limit the configured policy declares.
    pub async fn run_configured_policy(
        &self,
        policy: &RetentionConfig,
    ) -> StorageResult<EvictionOutcome> {
        let mut outcome = EvictionOutcome::default();

        if let Some(max_items) = policy.max_items {
            outcome.absorb(self.evict_by_count(max_items).await?);
        }
        if let Some(max_age_secs) = policy.max_age_secs {
            let cutoff = now_millis() - (max_age_secs as i64) * 1000;
            outcome.absorb(self.evict_by_age(cutoff).await?);
        }
        if let Some(max_files) = policy.max_files {
            outcome.absorb(self.evict_files_by_count(max_files, policy.strategy).await?);
        }

        Ok(outcome)
    }

    /// Post-write trigger: enforce the total-count limit after an item was
    /// created.
    ///
    /// Runs outside the creating transaction so the write path's latency is
    /// independent of cleanup cost.
    pub async fn after_create(&self, policy: &RetentionConfig) -> StorageResult<EvictionOutcome> {
        let Some(max_items) = policy.max_items else {
            return Ok(EvictionOutcome::default());
        };

        if self.items.count(None).await? <= max_items as u64 {
            return Ok(EvictionOutcome::default());
        }

        self.evict_by_count(max_items).await
    }

    /// Delete the given rows, then their blobs, then notify subscribers.
    ///
    /// Row deletion is all-or-nothing; blob deletions are individually
    /// best-effort.
    async fn delete_items(&self, doomed: Vec<Item>) -> StorageResult<EvictionOutcome> {
        if doomed.is_empty() {
            return Ok(EvictionOutcome::default());
        }

        let ids: Vec<ItemId> = doomed.iter().map(|item| item.id).collect();
        let rows_deleted = self.items.delete_many(&ids).await?;

        let mut outcome = EvictionOutcome {
            rows_deleted,
            ..EvictionOutcome::default()
        };

        for item in &doomed {
            if !item.kind.has_blob() {
                continue;
            }
            let Some(reference) = item.blob_ref.as_deref() else {
                continue;
            };
            match self.blobs.delete(reference).await {
                Ok(()) => outcome.blobs_deleted += 1,
                Err(e) => {
                    tracing::warn!(reference, error = %e, "blob deletion failed; row stays deleted");
                    outcome.failed_blobs.push(reference.to_string());
                }
            }
        }

        for id in ids {
            self.router.broadcast_delete(id);
        }

        self.metrics
            .rows_evicted_total
            .fetch_add(outcome.rows_deleted, Ordering::Relaxed);
        self.metrics
            .blobs_evicted_total
            .fetch_add(outcome.blobs_deleted, Ordering::Relaxed);

        tracing::info!(
            rows = outcome.rows_deleted,
            blobs = outcome.blobs_deleted,
            failed = outcome.failed_blobs.len(),
            "retention pass deleted items"
        );

        Ok(outcome)
    }
}

/// Spawn the periodic retention task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_retention_task(
    engine: Arc<RetentionEngine>,
    policy: RetentionConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !policy.enabled {
            tracing::info!("retention task disabled");
            return;
        }

        tracing::info!(interval_secs = policy.interval_secs, "retention task started");
        let mut timer = interval(Duration::from_secs(policy.interval_secs));

        loop {
            timer.tick().await;

            match engine.run_configured_policy(&policy).await {
                Ok(outcome) if outcome.rows_deleted > 0 => {
                    tracing::info!(
                        rows = outcome.rows_deleted,
                        blobs = outcome.blobs_deleted,
                        failed = outcome.failed_blobs.len(),
                        "retention run complete"
                    );
                }
                Ok(_) => tracing::debug!("retention run found nothing to evict"),
                Err(e) => tracing::error!(error = %e, "retention run aborted"),
            }
        }
    })
}
