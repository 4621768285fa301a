//! PipelineRun — a single execution record of the scheduler tick/pipeline (spec §4.9)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Record of one scheduler tick (scheduled or manually triggered via
/// `run_now`) for a single plugin, persisted by the Run Recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub plugin: String,
    pub status: RunStatus,
    pub items_collected: u64,
    pub items_processed: u64,
    pub items_deduplicated: u64,
    pub topics_created: u64,
    pub trends_created: u64,
    pub duration_ms: Option<u64>,
    pub errors: Vec<String>,
    pub idempotency_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(plugin: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            plugin: plugin.into(),
            status: RunStatus::Pending,
            items_collected: 0,
            items_processed: 0,
            items_deduplicated: 0,
            topics_created: 0,
            trends_created: 0,
            duration_ms: None,
            errors: Vec::new(),
            idempotency_key: None,
            started_at,
            completed_at: None,
        }
    }

    pub fn finish(&mut self, status: RunStatus, completed_at: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(completed_at);
        self.duration_ms = Some(
            (completed_at - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
    }
}
