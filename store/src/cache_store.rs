//! CacheStore — ephemeral key-value and sorted-set storage (spec §4.3, §6)
//!
//! Backs the Idempotency-Key cache and the rate limiter's sliding window.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::error::StorageResult;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
    async fn setex(&self, key: &str, value: String, ttl: Duration) -> StorageResult<()>;
    async fn del(&self, key: &str) -> StorageResult<()>;

    /// Add `member` to the sorted set `key` scored at `score` (epoch millis).
    async fn zadd(&self, key: &str, member: String, score: i64) -> StorageResult<()>;
    /// Remove members scored below `min_score` (eviction of the rate window).
    async fn zremrangebyscore(&self, key: &str, min_score: i64) -> StorageResult<()>;
    async fn zcard(&self, key: &str) -> StorageResult<usize>;
}

struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-process cache; expiry checked lazily on read, matching the teacher's
/// `VecDeque<Instant>` eviction-on-access pattern in `scheduler/core.rs`
/// and `coordinator/core.rs`'s `RateLimiter`.
pub struct InMemoryCacheStore {
    strings: Mutex<HashMap<String, CacheEntry>>,
    sorted_sets: Mutex<HashMap<String, Vec<(String, i64)>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            strings: Mutex::new(HashMap::new()),
            sorted_sets: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut strings = self.strings.lock().await;
        if let Some(entry) = strings.get(key) {
            if let Some(expires_at) = entry.expires_at {
                if Instant::now() >= expires_at {
                    strings.remove(key);
                    return Ok(None);
                }
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn setex(&self, key: &str, value: String, ttl: Duration) -> StorageResult<()> {
        let mut strings = self.strings.lock().await;
        strings.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> StorageResult<()> {
        self.strings.lock().await.remove(key);
        Ok(())
    }

    async fn zadd(&self, key: &str, member: String, score: i64) -> StorageResult<()> {
        let mut sets = self.sorted_sets.lock().await;
        sets.entry(key.to_string()).or_default().push((member, score));
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min_score: i64) -> StorageResult<()> {
        let mut sets = self.sorted_sets.lock().await;
        if let Some(set) = sets.get_mut(key) {
            set.retain(|(_, score)| *score >= min_score);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> StorageResult<usize> {
        let sets = self.sorted_sets.lock().await;
        Ok(sets.get(key).map(|s| s.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setex_then_get_roundtrips() {
        let cache = InMemoryCacheStore::new();
        cache.setex("k", "v".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".into()));
    }

    #[tokio::test]
    async fn expired_key_reads_as_absent() {
        let cache = InMemoryCacheStore::new();
        cache.setex("k", "v".into(), Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sliding_window_eviction() {
        let cache = InMemoryCacheStore::new();
        cache.zadd("rl:plugin", "1".into(), 1000).await.unwrap();
        cache.zadd("rl:plugin", "2".into(), 2000).await.unwrap();
        cache.zremrangebyscore("rl:plugin", 1500).await.unwrap();
        assert_eq!(cache.zcard("rl:plugin").await.unwrap(), 1);
    }
}
