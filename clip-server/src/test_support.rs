//! Shared test fixtures.

use crate::config::Config;
use crate::server::SyncServer;
use crate::storage::{FsBlobStore, SqliteItemStore};
use clip_types::{DeviceId, Item, ItemId, ItemKind};
use std::sync::Arc;

pub fn text_item(content: &str, created_at: i64) -> Item {
    Item {
        id: ItemId::new(),
        kind: ItemKind::Text,
        content: content.to_string(),
        blob_ref: None,
        device_id: Some(DeviceId::new("test-device")),
        size: None,
        created_at,
        updated_at: created_at,
    }
}

pub fn file_item(blob_ref: &str, size: i64, created_at: i64) -> Item {
    Item {
        id: ItemId::new(),
        kind: ItemKind::File,
        content: blob_ref.to_string(),
        blob_ref: Some(blob_ref.to_string()),
        device_id: Some(DeviceId::new("test-device")),
        size: Some(size),
        created_at,
        updated_at: created_at,
    }
}

pub fn image_item(blob_ref: &str, size: i64, created_at: i64) -> Item {
    Item {
        kind: ItemKind::Image,
        ..file_item(blob_ref, size, created_at)
    }
}

/// A server over an in-memory item store and a temp-dir blob store.
pub async fn test_server() -> (tempfile::TempDir, Arc<SyncServer>) {
    test_server_with(Config::default()).await
}

/// Same as [`test_server`] but with explicit configuration.
pub async fn test_server_with(config: Config) -> (tempfile::TempDir, Arc<SyncServer>) {
    let dir = tempfile::tempdir().unwrap();
    let items = SqliteItemStore::in_memory().await.unwrap();
    let blobs = FsBlobStore::new(dir.path()).await.unwrap();
    let server = SyncServer::new(config, Arc::new(items), Arc::new(blobs));
    (dir, Arc::new(server))
}

/// Write raw bytes into the blob directory, bypassing the store interface.
pub fn seed_blob(dir: &tempfile::TempDir, reference: &str) {
    std::fs::write(dir.path().join(reference), b"blob bytes").unwrap();
}
