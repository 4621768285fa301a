//! VectorStore — embedding similarity search for the Clusterer (spec §4.7, §6)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StorageResult;

/// Metadata stored alongside an embedding, used to pre-filter k-NN candidates.
#[derive(Debug, Clone)]
pub struct VectorMeta {
    pub language: String,
    pub category: Option<String>,
    pub published_at: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

/// Filter applied before scoring k-NN candidates.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub language: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl VectorFilter {
    fn matches(&self, meta: &VectorMeta) -> bool {
        if let Some(lang) = &self.language {
            if &meta.language != lang {
                return false;
            }
        }
        if let Some(since) = self.since {
            if meta.collected_at < since {
                return false;
            }
        }
        true
    }
}

/// A scored neighbor returned from `knn`.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: Uuid,
    pub similarity: f64,
    pub published_at: DateTime<Utc>,
}

/// Embedding-backed similarity search over ProcessedItems, used by the
/// Clusterer to find candidate items within cosine-similarity θ_cluster of
/// a seed (spec §4.7). Kept separate from `ItemStore` because it indexes
/// numeric vectors, not relational fields.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, id: Uuid, embedding: Vec<f32>, meta: VectorMeta) -> StorageResult<()>;
    async fn delete(&self, id: Uuid) -> StorageResult<()>;
    async fn knn(&self, query: &[f32], k: usize, filter: &VectorFilter) -> StorageResult<Vec<VectorMatch>>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

struct Entry {
    embedding: Vec<f32>,
    meta: VectorMeta,
}

/// In-process k-NN index, brute-force cosine similarity over a `RwLock`-guarded
/// map — the scale spec §5 targets (tens of thousands of items per window)
/// doesn't warrant an external index, and the teacher's scheduler/coordinator
/// modules favor a single in-memory guarded map over a client for state of
/// this size.
pub struct InMemoryVectorStore {
    entries: RwLock<std::collections::HashMap<Uuid, Entry>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, id: Uuid, embedding: Vec<f32>, meta: VectorMeta) -> StorageResult<()> {
        self.entries.write().await.insert(id, Entry { embedding, meta });
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> StorageResult<()> {
        self.entries.write().await.remove(&id);
        Ok(())
    }

    async fn knn(&self, query: &[f32], k: usize, filter: &VectorFilter) -> StorageResult<Vec<VectorMatch>> {
        let entries = self.entries.read().await;
        let mut matches: Vec<VectorMatch> = entries
            .iter()
            .filter(|(_, e)| filter.matches(&e.meta))
            .map(|(id, e)| VectorMatch {
                id: *id,
                similarity: cosine_similarity(query, &e.embedding),
                published_at: e.meta.published_at,
            })
            .collect();
        // Tie-break: highest similarity first, then most recent published_at
        // (spec §4.7) so the Deduplicator/Clusterer can just take the head
        // of the list without re-sorting.
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.published_at.cmp(&a.published_at))
        });
        matches.truncate(k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> VectorMeta {
        VectorMeta {
            language: "en".into(),
            category: None,
            published_at: Utc::now(),
            collected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn knn_orders_by_similarity_descending() {
        let store = InMemoryVectorStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.upsert(a, vec![1.0, 0.0], meta()).await.unwrap();
        store.upsert(b, vec![0.0, 1.0], meta()).await.unwrap();

        let results = store.knn(&[1.0, 0.0], 2, &VectorFilter::default()).await.unwrap();
        assert_eq!(results[0].id, a);
        assert!(results[0].similarity > results[1].similarity);
    }

    #[tokio::test]
    async fn knn_respects_language_filter() {
        let store = InMemoryVectorStore::new();
        let a = Uuid::new_v4();
        let mut other_meta = meta();
        other_meta.language = "fr".into();
        store.upsert(a, vec![1.0, 0.0], other_meta).await.unwrap();

        let filter = VectorFilter { language: Some("en".into()), since: None };
        let results = store.knn(&[1.0, 0.0], 5, &filter).await.unwrap();
        assert!(results.is_empty());
    }
}
