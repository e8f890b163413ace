//! Storage interfaces for clipsync-server.
//!
//! The core consumes two narrow interfaces: [`ItemStore`] for clipboard
//! item rows and [`BlobStore`] for the raw bytes backing file/image items.
//! Both are assumed to provide their own consistency; the core only requires
//! that a row deletion that returns success is durable before the
//! corresponding blob deletion is attempted.

mod fs;
mod sqlite;

pub use fs::FsBlobStore;
pub use sqlite::SqliteItemStore;

use crate::error::StorageResult;
use async_trait::async_trait;
use clip_types::{Item, ItemId, ItemKind};

/// Filters for an item query.
///
/// Results are always ordered newest first (`created_at DESC`, ties broken
/// by id, descending) so that "the first N" and "the N most recent" mean
/// the same thing everywhere.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Restrict to a single kind.
    pub kind: Option<ItemKind>,
    /// Only items created strictly before this unix-millisecond timestamp.
    pub created_before: Option<i64>,
    /// Maximum rows to return.
    pub limit: Option<u32>,
    /// Offset into the newest-first ordering.
    pub offset: Option<u32>,
}

impl ItemFilter {
    /// Match every item.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match every item of one kind.
    pub fn of_kind(kind: ItemKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Match the `n` most recent items.
    pub fn newest(n: u32) -> Self {
        Self {
            limit: Some(n),
            ..Self::default()
        }
    }

    /// Match items created strictly before `cutoff` (unix millis).
    pub fn older_than(cutoff: i64) -> Self {
        Self {
            created_before: Some(cutoff),
            ..Self::default()
        }
    }
}

/// CRUD and paginated query over clipboard item rows.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert a new item row.
    async fn insert(&self, item: &Item) -> StorageResult<()>;

    /// Fetch a single item by id.
    async fn get(&self, id: &ItemId) -> StorageResult<Option<Item>>;

    /// Query items matching a filter, newest first.
    async fn query(&self, filter: &ItemFilter) -> StorageResult<Vec<Item>>;

    /// Delete one item row. Returns whether a row existed.
    async fn delete(&self, id: &ItemId) -> StorageResult<bool>;

    /// Delete a batch of item rows in a single transaction.
    ///
    /// Either every row in the batch is deleted or none are: a failure
    /// rolls the whole batch back.
    async fn delete_many(&self, ids: &[ItemId]) -> StorageResult<u64>;

    /// Count items, optionally restricted to one kind.
    async fn count(&self, kind: Option<ItemKind>) -> StorageResult<u64>;
}

/// Byte storage for file/image payloads, addressed by blob reference.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Remove the bytes behind a reference.
    ///
    /// Deleting a reference that does not exist is an error so that
    /// reconciliation can distinguish "already gone" from "removed now".
    async fn delete(&self, reference: &str) -> StorageResult<()>;

    /// Whether a reference currently has bytes behind it.
    async fn exists(&self, reference: &str) -> StorageResult<bool>;

    /// Every reference currently stored.
    async fn list(&self) -> StorageResult<Vec<String>>;
}
