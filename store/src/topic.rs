//! Topic — a cluster of ProcessedItems sharing a subject (spec §3, §4.7)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A cluster of items the Clusterer judged to be about the same subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub category: Option<String>,
    pub language: String,
    pub sources: Vec<String>,
    pub item_count: usize,
    pub keywords: Vec<String>,
    pub engagement: HashMap<String, f64>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Topic {
    pub fn engagement_total(&self) -> f64 {
        self.engagement.values().sum()
    }
}
