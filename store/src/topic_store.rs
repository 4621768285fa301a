//! Topic persistence. Part of the relational facade (spec §4.8's
//! reference mapping lists `topics`/`topic_items` alongside
//! `processed_items` in the same relational store); kept as its own trait
//! so callers can depend on just the capability they need.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::topic::Topic;

#[async_trait]
pub trait TopicStore: Send + Sync {
    async fn upsert(&self, topic: &Topic, item_ids: &[Uuid]) -> StorageResult<()>;
    async fn get(&self, id: Uuid) -> StorageResult<Option<Topic>>;
    async fn item_ids(&self, topic_id: Uuid) -> StorageResult<Vec<Uuid>>;
    /// Looks up a previously persisted Topic by its representative title,
    /// used as an approximate stable key across runs (see DESIGN.md).
    async fn find_by_title(&self, title: &str) -> StorageResult<Option<Topic>>;
}

pub struct SqliteTopicStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTopicStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> StorageResult<Self> {
        {
            let guard = conn
                .try_lock()
                .expect("shared connection must not be contended during store construction");
            guard.execute_batch(
            "CREATE TABLE IF NOT EXISTS topics (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                summary TEXT NOT NULL,
                category TEXT,
                language TEXT NOT NULL,
                sources TEXT NOT NULL,
                item_count INTEGER NOT NULL,
                keywords TEXT NOT NULL,
                engagement TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS topic_items (
                topic_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                PRIMARY KEY (topic_id, item_id)
            );",
            )?;
        }
        Ok(Self { conn })
    }

    fn row_to_topic(row: &Row) -> rusqlite::Result<Topic> {
        let sources_json: String = row.get("sources")?;
        let keywords_json: String = row.get("keywords")?;
        let engagement_json: String = row.get("engagement")?;
        Ok(Topic {
            id: Uuid::parse_str(&row.get::<_, String>("id")?).unwrap_or_default(),
            title: row.get("title")?,
            summary: row.get("summary")?,
            category: row.get("category")?,
            language: row.get("language")?,
            sources: serde_json::from_str(&sources_json).unwrap_or_default(),
            item_count: row.get::<_, i64>("item_count")? as usize,
            keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
            engagement: serde_json::from_str::<HashMap<String, f64>>(&engagement_json).unwrap_or_default(),
            first_seen: row.get::<_, String>("first_seen")?.parse().unwrap_or_else(|_| chrono::Utc::now()),
            last_updated: row.get::<_, String>("last_updated")?.parse().unwrap_or_else(|_| chrono::Utc::now()),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[async_trait]
impl TopicStore for SqliteTopicStore {
    async fn upsert(&self, topic: &Topic, item_ids: &[Uuid]) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO topics (
                id, title, summary, category, language, sources, item_count,
                keywords, engagement, first_seen, last_updated, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
            ON CONFLICT(id) DO UPDATE SET
                title=excluded.title, summary=excluded.summary, category=excluded.category,
                sources=excluded.sources, item_count=excluded.item_count, keywords=excluded.keywords,
                engagement=excluded.engagement, last_updated=excluded.last_updated, updated_at=excluded.updated_at",
            params![
                topic.id.to_string(),
                topic.title,
                topic.summary,
                topic.category,
                topic.language,
                serde_json::to_string(&topic.sources)?,
                topic.item_count as i64,
                serde_json::to_string(&topic.keywords)?,
                serde_json::to_string(&topic.engagement)?,
                topic.first_seen.to_rfc3339(),
                topic.last_updated.to_rfc3339(),
                topic.created_at,
                topic.updated_at,
            ],
        )?;
        for item_id in item_ids {
            conn.execute(
                "INSERT OR IGNORE INTO topic_items (topic_id, item_id) VALUES (?1, ?2)",
                params![topic.id.to_string(), item_id.to_string()],
            )?;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<Topic>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM topics WHERE id = ?1",
            params![id.to_string()],
            Self::row_to_topic,
        )
        .optional()
        .map_err(Into::into)
    }

    async fn item_ids(&self, topic_id: Uuid) -> StorageResult<Vec<Uuid>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT item_id FROM topic_items WHERE topic_id = ?1")?;
        let rows = stmt.query_map(params![topic_id.to_string()], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            if let Ok(id) = Uuid::parse_str(&row?) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn find_by_title(&self, title: &str) -> StorageResult<Option<Topic>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM topics WHERE title = ?1 ORDER BY last_updated DESC LIMIT 1",
            params![title],
            Self::row_to_topic,
        )
        .optional()
        .map_err(Into::into)
    }
}
