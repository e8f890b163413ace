//! SQLite item store.

use super::{ItemFilter, ItemStore};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use clip_types::{DeviceId, Item, ItemId, ItemKind};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed item store.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteItemStore {
    pool: SqlitePool,
}

impl SqliteItemStore {
    /// Open (or create) an item store at a database path.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(path.to_str().unwrap_or("clipsync.db"))
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory item store (for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                blob_ref TEXT,
                device_id TEXT,
                size INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_created ON items(created_at DESC)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_kind ON items(kind)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn insert(&self, item: &Item) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO items (id, kind, content, blob_ref, device_id, size, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.kind.as_str())
        .bind(&item.content)
        .bind(item.blob_ref.as_deref())
        .bind(item.device_id.as_ref().map(|d| d.as_str().to_string()))
        .bind(item.size)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn get(&self, id: &ItemId) -> StorageResult<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(
            "SELECT id, kind, content, blob_ref, device_id, size, created_at, updated_at \
             FROM items WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        row.map(Item::try_from).transpose()
    }

    async fn query(&self, filter: &ItemFilter) -> StorageResult<Vec<Item>> {
        let mut sql = String::from(
            "SELECT id, kind, content, blob_ref, device_id, size, created_at, updated_at \
             FROM items WHERE 1=1",
        );
        if filter.kind.is_some() {
            sql.push_str(" AND kind = ?");
        }
        if filter.created_before.is_some() {
            sql.push_str(" AND created_at < ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        // SQLite requires a LIMIT clause before OFFSET; -1 means unlimited.
        sql.push_str(" LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, ItemRow>(&sql);
        if let Some(kind) = filter.kind {
            query = query.bind(kind.as_str());
        }
        if let Some(cutoff) = filter.created_before {
            query = query.bind(cutoff);
        }
        query = query
            .bind(filter.limit.map(|l| l as i64).unwrap_or(-1))
            .bind(filter.offset.map(|o| o as i64).unwrap_or(0));

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        rows.into_iter().map(Item::try_from).collect()
    }

    async fn delete(&self, id: &ItemId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_many(&self, ids: &[ItemId]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;
        let mut deleted = 0u64;

        for id in ids {
            let result = sqlx::query("DELETE FROM items WHERE id = ?1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(StorageError::Database)?;
            deleted += result.rows_affected();
        }

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(deleted)
    }

    async fn count(&self, kind: Option<ItemKind>) -> StorageResult<u64> {
        let count: i64 = match kind {
            Some(kind) => sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE kind = ?1")
                .bind(kind.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(StorageError::Database)?,
            None => sqlx::query_scalar("SELECT COUNT(*) FROM items")
                .fetch_one(&self.pool)
                .await
                .map_err(StorageError::Database)?,
        };

        Ok(count as u64)
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct ItemRow {
    id: String,
    kind: String,
    content: String,
    blob_ref: Option<String>,
    device_id: Option<String>,
    size: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ItemRow> for Item {
    type Error = StorageError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Item {
            id: ItemId::parse(&row.id)
                .ok_or_else(|| StorageError::CorruptRow(format!("bad item id: {}", row.id)))?,
            kind: ItemKind::parse(&row.kind)
                .ok_or_else(|| StorageError::CorruptRow(format!("bad item kind: {}", row.kind)))?,
            content: row.content,
            blob_ref: row.blob_ref,
            device_id: row.device_id.map(DeviceId::new),
            size: row.size,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
