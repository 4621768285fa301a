//! Trend persistence. Write-once per run (spec §3 ownership: "a new run
//! produces a new set of Trends; old ones are retained for history").

use async_trait::async_trait;
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::trend::{Trend, TrendState};

#[async_trait]
pub trait TrendStore: Send + Sync {
    async fn insert(&self, trend: &Trend) -> StorageResult<()>;
    async fn list_by_run(&self, run_id: Uuid) -> StorageResult<Vec<Trend>>;
    /// Recent Trend history for a Topic, used by the Ranker to derive state
    /// (sustained/declining/dead).
    async fn history_for_topic(&self, topic_id: Uuid, limit: i64) -> StorageResult<Vec<Trend>>;
}

pub struct SqliteTrendStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTrendStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> StorageResult<Self> {
        {
            let guard = conn
                .try_lock()
                .expect("shared connection must not be contended during store construction");
            guard.execute_batch(
                "CREATE TABLE IF NOT EXISTS trends (
                    id TEXT PRIMARY KEY,
                    topic_id TEXT NOT NULL,
                    run_id TEXT NOT NULL,
                    rank INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    summary TEXT NOT NULL,
                    score REAL NOT NULL,
                    velocity REAL NOT NULL,
                    state TEXT NOT NULL,
                    category TEXT,
                    language TEXT NOT NULL,
                    keywords TEXT NOT NULL,
                    engagement TEXT NOT NULL,
                    first_seen TEXT NOT NULL,
                    last_updated TEXT NOT NULL,
                    peak_engagement_at TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_trends_topic ON trends(topic_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_trends_run ON trends(run_id);",
            )?;
        }
        Ok(Self { conn })
    }

    fn row_to_trend(row: &Row) -> rusqlite::Result<Trend> {
        let keywords_json: String = row.get("keywords")?;
        let engagement_json: String = row.get("engagement")?;
        let state: String = row.get("state")?;
        let peak: Option<String> = row.get("peak_engagement_at")?;
        Ok(Trend {
            id: Uuid::parse_str(&row.get::<_, String>("id")?).unwrap_or_default(),
            topic_id: Uuid::parse_str(&row.get::<_, String>("topic_id")?).unwrap_or_default(),
            run_id: Uuid::parse_str(&row.get::<_, String>("run_id")?).unwrap_or_default(),
            rank: row.get::<_, i64>("rank")? as u32,
            title: row.get("title")?,
            summary: row.get("summary")?,
            score: row.get("score")?,
            velocity: row.get("velocity")?,
            state: parse_state(&state),
            category: row.get("category")?,
            language: row.get("language")?,
            keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
            engagement: serde_json::from_str::<HashMap<String, f64>>(&engagement_json).unwrap_or_default(),
            first_seen: row.get::<_, String>("first_seen")?.parse().unwrap_or_else(|_| chrono::Utc::now()),
            last_updated: row.get::<_, String>("last_updated")?.parse().unwrap_or_else(|_| chrono::Utc::now()),
            peak_engagement_at: peak.and_then(|s| s.parse().ok()),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

fn parse_state(s: &str) -> TrendState {
    match s {
        "viral" => TrendState::Viral,
        "sustained" => TrendState::Sustained,
        "declining" => TrendState::Declining,
        "dead" => TrendState::Dead,
        _ => TrendState::Emerging,
    }
}

#[async_trait]
impl TrendStore for SqliteTrendStore {
    async fn insert(&self, trend: &Trend) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO trends (
                id, topic_id, run_id, rank, title, summary, score, velocity, state,
                category, language, keywords, engagement, first_seen, last_updated,
                peak_engagement_at, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            params![
                trend.id.to_string(),
                trend.topic_id.to_string(),
                trend.run_id.to_string(),
                trend.rank as i64,
                trend.title,
                trend.summary,
                trend.score,
                trend.velocity,
                trend.state.to_string(),
                trend.category,
                trend.language,
                serde_json::to_string(&trend.keywords)?,
                serde_json::to_string(&trend.engagement)?,
                trend.first_seen.to_rfc3339(),
                trend.last_updated.to_rfc3339(),
                trend.peak_engagement_at.map(|d| d.to_rfc3339()),
                trend.created_at,
                trend.updated_at,
            ],
        )?;
        Ok(())
    }

    async fn list_by_run(&self, run_id: Uuid) -> StorageResult<Vec<Trend>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM trends WHERE run_id = ?1 ORDER BY rank ASC")?;
        let rows = stmt.query_map(params![run_id.to_string()], Self::row_to_trend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    async fn history_for_topic(&self, topic_id: Uuid, limit: i64) -> StorageResult<Vec<Trend>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM trends WHERE topic_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![topic_id.to_string(), limit], Self::row_to_trend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
