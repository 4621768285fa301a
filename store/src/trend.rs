//! Trend — a ranked, scored Topic as of a particular PipelineRun (spec §3, §4.7)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle state derived from a Topic's score history (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendState {
    Emerging,
    Viral,
    Sustained,
    Declining,
    Dead,
}

impl std::fmt::Display for TrendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Emerging => "emerging",
            Self::Viral => "viral",
            Self::Sustained => "sustained",
            Self::Declining => "declining",
            Self::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

/// A Topic's ranked snapshot produced by one PipelineRun.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trend {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub run_id: Uuid,
    pub rank: u32,
    pub title: String,
    pub summary: String,
    pub score: f64,
    pub velocity: f64,
    pub state: TrendState,
    pub category: Option<String>,
    pub language: String,
    pub keywords: Vec<String>,
    pub engagement: HashMap<String, f64>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub peak_engagement_at: Option<DateTime<Utc>>,
    pub created_at: i64,
    pub updated_at: i64,
}
