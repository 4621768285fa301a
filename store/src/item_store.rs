//! ItemStore — relational storage for ProcessedItems (spec §4.8, §6)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::item::{ItemStatus, ProcessedItem};

/// Relational facet of the storage layer: one row per ProcessedItem, keyed
/// by both its deterministic `id` and its natural key `(source, source_id)`.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert a new item. Returns `StorageError::Conflict` if an item with
    /// the same natural key or content_hash already exists; the Persister
    /// treats that as "already ingested" per spec §4.8.
    async fn insert(&self, item: &ProcessedItem) -> StorageResult<()>;

    async fn get(&self, id: Uuid) -> StorageResult<Option<ProcessedItem>>;

    async fn get_by_natural_key(
        &self,
        source: &str,
        source_id: &str,
    ) -> StorageResult<Option<ProcessedItem>>;

    async fn get_by_content_hash(&self, hash: &str) -> StorageResult<Option<ProcessedItem>>;

    async fn set_status(&self, id: Uuid, status: ItemStatus) -> StorageResult<()>;

    /// Items collected within `[since, until)`, newest first, for recall
    /// into the Clusterer's candidate set (spec §4.7).
    async fn list_within_window(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<ProcessedItem>>;

    async fn list_by_status(&self, status: ItemStatus, limit: i64) -> StorageResult<Vec<ProcessedItem>>;
}

/// `rusqlite`-backed `ItemStore`. All access is serialized through a single
/// `tokio::sync::Mutex<Connection>`, mirroring the single-writer discipline
/// the teacher's `StateManager` actor gives its `taskstore::Store` handle —
/// here folded into the connection itself rather than a channel actor,
/// since rusqlite already requires `&mut`/exclusive access per call.
pub struct SqliteItemStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteItemStore {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Construct on top of a connection shared with the other relational
    /// repositories (TopicStore, TrendStore, RunStore) so all tables live
    /// in one SQLite file/connection.
    pub fn from_shared(conn: Arc<Mutex<Connection>>) -> StorageResult<Self> {
        {
            let guard = conn
                .try_lock()
                .expect("shared connection must not be contended during store construction");
            Self::init_schema(&guard)?;
        }
        Ok(Self { conn })
    }

    pub fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                source_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                language TEXT NOT NULL,
                category TEXT,
                metrics TEXT NOT NULL,
                published_at TEXT NOT NULL,
                collected_at TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                embedding TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(source, source_id),
                UNIQUE(content_hash)
            );
            CREATE INDEX IF NOT EXISTS idx_items_collected_at ON items(collected_at);
            CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);",
        )?;
        Ok(())
    }

    fn row_to_item(row: &Row) -> rusqlite::Result<ProcessedItem> {
        let metrics_json: String = row.get("metrics")?;
        let metrics: HashMap<String, f64> = serde_json::from_str(&metrics_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
        let embedding: Option<String> = row.get("embedding")?;
        let embedding = embedding
            .map(|s| serde_json::from_str::<Vec<f32>>(&s))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
        let status: String = row.get("status")?;
        let id: String = row.get("id")?;

        Ok(ProcessedItem {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            source: row.get("source")?,
            source_id: row.get("source_id")?,
            title: row.get("title")?,
            content: row.get("content")?,
            language: row.get("language")?,
            category: row.get("category")?,
            metrics,
            published_at: row.get::<_, String>("published_at")?.parse().unwrap_or_else(|_| Utc::now()),
            collected_at: row.get::<_, String>("collected_at")?.parse().unwrap_or_else(|_| Utc::now()),
            content_hash: row.get("content_hash")?,
            embedding,
            status: status.parse().unwrap_or_default(),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn insert(&self, item: &ProcessedItem) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let metrics_json = serde_json::to_string(&item.metrics)?;
        let embedding_json = item
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = conn.execute(
            "INSERT INTO items (
                id, source, source_id, title, content, language, category,
                metrics, published_at, collected_at, content_hash, embedding,
                status, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                item.id.to_string(),
                item.source,
                item.source_id,
                item.title,
                item.content,
                item.language,
                item.category,
                metrics_json,
                item.published_at.to_rfc3339(),
                item.collected_at.to_rfc3339(),
                item.content_hash,
                embedding_json,
                item.status.to_string(),
                item.created_at,
                item.updated_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // Either (source, source_id) or content_hash already exists;
                // both mean "already ingested" to the Persister, so one
                // Conflict message covers both constraints.
                Err(StorageError::Conflict(format!(
                    "{}:{} (content_hash={})",
                    item.source, item.source_id, item.content_hash
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<ProcessedItem>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM items WHERE id = ?1",
            params![id.to_string()],
            Self::row_to_item,
        )
        .optional()
        .map_err(Into::into)
    }

    async fn get_by_natural_key(
        &self,
        source: &str,
        source_id: &str,
    ) -> StorageResult<Option<ProcessedItem>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM items WHERE source = ?1 AND source_id = ?2",
            params![source, source_id],
            Self::row_to_item,
        )
        .optional()
        .map_err(Into::into)
    }

    async fn get_by_content_hash(&self, hash: &str) -> StorageResult<Option<ProcessedItem>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM items WHERE content_hash = ?1 LIMIT 1",
            params![hash],
            Self::row_to_item,
        )
        .optional()
        .map_err(Into::into)
    }

    async fn set_status(&self, id: Uuid, status: ItemStatus) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "UPDATE items SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_string(), Utc::now().timestamp_millis(), id.to_string()],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_within_window(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<ProcessedItem>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM items WHERE collected_at >= ?1 AND collected_at < ?2
             ORDER BY collected_at DESC LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt.query_map(
            params![since.to_rfc3339(), until.to_rfc3339(), limit, offset],
            Self::row_to_item,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    async fn list_by_status(&self, status: ItemStatus, limit: i64) -> StorageResult<Vec<ProcessedItem>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM items WHERE status = ?1 ORDER BY collected_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![status.to_string(), limit], Self::row_to_item)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
