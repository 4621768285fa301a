//! ProcessedItem — the canonical pipeline element (spec §3)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a ProcessedItem row, per spec §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processed,
    VectorPending,
    Failed,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processed => write!(f, "processed"),
            Self::VectorPending => write!(f, "vector_pending"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "vector_pending" => Ok(Self::VectorPending),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown item status: {other}")),
        }
    }
}

/// The canonical, persisted pipeline element (spec §3 NormalizedItem / ProcessedItem).
///
/// `(source, source_id)` is a unique natural key; `id` is a deterministic
/// function of that pair (UUIDv5), so re-ingestion is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub id: Uuid,
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub language: String,
    pub category: Option<String>,
    pub metrics: HashMap<String, f64>,
    pub published_at: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
    /// Hex-encoded SHA-256 over lower(title) + "\n" + lower(content).
    pub content_hash: String,
    pub embedding: Option<Vec<f32>>,
    pub status: ItemStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ProcessedItem {
    pub fn engagement_total(&self) -> f64 {
        self.metrics.values().sum()
    }
}
