use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a Collector produces. Ephemeral: exists only between `collect()`
/// and the Converter (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub content: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub metrics: HashMap<String, f64>,
    pub metadata: HashMap<String, String>,
}

impl RawItem {
    pub fn new(source: impl Into<String>, source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
            title: title.into(),
            content: None,
            url: None,
            author: None,
            published_at: None,
            metrics: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }
}
