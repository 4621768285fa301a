//! PipelineRun persistence (spec §4.9, §6 `GET /runs/{run_id}`).

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::run::{PipelineRun, RunStatus};

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn upsert(&self, run: &PipelineRun) -> StorageResult<()>;
    async fn get(&self, id: Uuid) -> StorageResult<Option<PipelineRun>>;

    /// Most recent runs, newest first, for the CLI `status` command.
    async fn list_recent(&self, limit: i64) -> StorageResult<Vec<PipelineRun>>;
}

pub struct SqliteRunStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRunStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> StorageResult<Self> {
        {
            let guard = conn
                .try_lock()
                .expect("shared connection must not be contended during store construction");
            guard.execute_batch(
                "CREATE TABLE IF NOT EXISTS pipeline_runs (
                    id TEXT PRIMARY KEY,
                    plugin TEXT NOT NULL,
                    status TEXT NOT NULL,
                    items_collected INTEGER NOT NULL,
                    items_processed INTEGER NOT NULL,
                    items_deduplicated INTEGER NOT NULL,
                    topics_created INTEGER NOT NULL,
                    trends_created INTEGER NOT NULL,
                    duration_ms INTEGER,
                    errors TEXT NOT NULL,
                    idempotency_key TEXT,
                    started_at TEXT NOT NULL,
                    completed_at TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_runs_idempotency ON pipeline_runs(idempotency_key);",
            )?;
        }
        Ok(Self { conn })
    }

    fn row_to_run(row: &Row) -> rusqlite::Result<PipelineRun> {
        let errors_json: String = row.get("errors")?;
        let status: String = row.get("status")?;
        let completed_at: Option<String> = row.get("completed_at")?;
        Ok(PipelineRun {
            id: uuid::Uuid::parse_str(&row.get::<_, String>("id")?).unwrap_or_default(),
            plugin: row.get("plugin")?,
            status: parse_status(&status),
            items_collected: row.get::<_, i64>("items_collected")? as u64,
            items_processed: row.get::<_, i64>("items_processed")? as u64,
            items_deduplicated: row.get::<_, i64>("items_deduplicated")? as u64,
            topics_created: row.get::<_, i64>("topics_created")? as u64,
            trends_created: row.get::<_, i64>("trends_created")? as u64,
            duration_ms: row.get::<_, Option<i64>>("duration_ms")?.map(|v| v as u64),
            errors: serde_json::from_str(&errors_json).unwrap_or_default(),
            idempotency_key: row.get("idempotency_key")?,
            started_at: row.get::<_, String>("started_at")?.parse().unwrap_or_else(|_| chrono::Utc::now()),
            completed_at: completed_at.and_then(|s| s.parse().ok()),
        })
    }
}

fn parse_status(s: &str) -> RunStatus {
    match s {
        "running" => RunStatus::Running,
        "completed" => RunStatus::Completed,
        "failed" => RunStatus::Failed,
        "skipped" => RunStatus::Skipped,
        _ => RunStatus::Pending,
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn upsert(&self, run: &PipelineRun) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO pipeline_runs (
                id, plugin, status, items_collected, items_processed, items_deduplicated,
                topics_created, trends_created, duration_ms, errors, idempotency_key,
                started_at, completed_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
            ON CONFLICT(id) DO UPDATE SET
                status=excluded.status, items_collected=excluded.items_collected,
                items_processed=excluded.items_processed, items_deduplicated=excluded.items_deduplicated,
                topics_created=excluded.topics_created, trends_created=excluded.trends_created,
                duration_ms=excluded.duration_ms, errors=excluded.errors, completed_at=excluded.completed_at",
            params![
                run.id.to_string(),
                run.plugin,
                run.status.to_string(),
                run.items_collected as i64,
                run.items_processed as i64,
                run.items_deduplicated as i64,
                run.topics_created as i64,
                run.trends_created as i64,
                run.duration_ms.map(|v| v as i64),
                serde_json::to_string(&run.errors)?,
                run.idempotency_key,
                run.started_at.to_rfc3339(),
                run.completed_at.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<PipelineRun>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM pipeline_runs WHERE id = ?1",
            params![id.to_string()],
            Self::row_to_run,
        )
        .optional()
        .map_err(Into::into)
    }

    async fn list_recent(&self, limit: i64) -> StorageResult<Vec<PipelineRun>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM pipeline_runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], Self::row_to_run)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
