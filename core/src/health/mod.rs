//! Per-plugin health tracking (spec §4.4).

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;

use trendstore::PluginHealth;

const DEFAULT_HISTORY: usize = 1000;

struct Tracked {
    health: PluginHealth,
    /// Bounded success/failure history, oldest evicted first (spec §4.4:
    /// "History is bounded ... overflow evicts oldest"). The success rate
    /// reported by `status` is computed over this window, not the
    /// lifetime total.
    history: VecDeque<bool>,
}

impl Tracked {
    fn new(plugin: &str) -> Self {
        Self {
            health: PluginHealth::new(plugin),
            history: VecDeque::new(),
        }
    }

    fn push(&mut self, success: bool, cap: usize) {
        if self.history.len() >= cap {
            self.history.pop_front();
        }
        self.history.push_back(success);
    }

    fn windowed_success_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 1.0;
        }
        self.history.iter().filter(|s| **s).count() as f64 / self.history.len() as f64
    }
}

/// Tracks `record_success` / `record_failure` / `status` per plugin, with a
/// consecutive-failure threshold for unhealthy classification (spec §4.4).
pub struct HealthTracker {
    threshold: u32,
    history_cap: usize,
    cooldown: Duration,
    entries: RwLock<HashMap<String, Tracked>>,
}

impl HealthTracker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            history_cap: DEFAULT_HISTORY,
            cooldown,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_success(&self, plugin: &str, _duration: Duration) {
        let mut entries = self.entries.write().await;
        let tracked = entries.entry(plugin.to_string()).or_insert_with(|| Tracked::new(plugin));
        tracked.health.record_success(Utc::now());
        tracked.push(true, self.history_cap);
    }

    pub async fn record_failure(&self, plugin: &str, error: impl Into<String>, _duration: Duration) {
        let mut entries = self.entries.write().await;
        let tracked = entries.entry(plugin.to_string()).or_insert_with(|| Tracked::new(plugin));
        tracked.health.record_failure(Utc::now(), error);
        tracked.push(false, self.history_cap);
    }

    /// Snapshot of a plugin's health, with `success_rate` computed over the
    /// bounded history window rather than the lifetime run count.
    pub async fn status(&self, plugin: &str) -> Option<(PluginHealth, f64)> {
        let entries = self.entries.read().await;
        let tracked = entries.get(plugin)?;
        Some((tracked.health.clone(), tracked.windowed_success_rate()))
    }

    pub async fn is_unhealthy(&self, plugin: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(plugin)
            .map(|t| t.health.is_unhealthy(self.threshold))
            .unwrap_or(false)
    }

    /// Whether enough time has passed since `last_run` for an unhealthy
    /// plugin to be retried by the scheduler's regular tick (spec §4.5
    /// step 2's "cooldown not elapsed").
    pub async fn cooldown_elapsed(&self, plugin: &str) -> bool {
        let entries = self.entries.read().await;
        match entries.get(plugin).and_then(|t| t.health.last_run) {
            Some(last_run) => {
                let elapsed = Utc::now().signed_duration_since(last_run);
                elapsed.num_milliseconds() as u64 >= self.cooldown.as_millis() as u64
            }
            None => true,
        }
    }

    pub async fn all(&self) -> Vec<(PluginHealth, f64)> {
        let entries = self.entries.read().await;
        entries
            .values()
            .map(|t| (t.health.clone(), t.windowed_success_rate()))
            .collect()
    }

    pub async fn unhealthy_count(&self) -> usize {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|t| t.health.is_unhealthy(self.threshold))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn becomes_unhealthy_after_threshold_failures() {
        let tracker = HealthTracker::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            tracker.record_failure("p", "boom", Duration::from_millis(1)).await;
        }
        assert!(tracker.is_unhealthy("p").await);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let tracker = HealthTracker::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            tracker.record_failure("p", "boom", Duration::from_millis(1)).await;
        }
        tracker.record_success("p", Duration::from_millis(1)).await;
        assert!(!tracker.is_unhealthy("p").await);
    }

    #[tokio::test]
    async fn windowed_success_rate_reflects_history() {
        let tracker = HealthTracker::new(3, Duration::from_secs(60));
        tracker.record_success("p", Duration::from_millis(1)).await;
        tracker.record_failure("p", "boom", Duration::from_millis(1)).await;
        let (_, rate) = tracker.status("p").await.unwrap();
        assert!((rate - 0.5).abs() < f64::EPSILON);
    }
}
