//! Sliding-window per-plugin rate limiter (spec §4.3).
//!
//! Grounded on the teacher's `scheduler::core::SchedulerInner::request_times`
//! eviction loop and `coordinator::core::RateLimiter`, both a
//! `VecDeque<Instant>` pruned from the front on every call.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Outcome of `RateLimiter::allow`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllowResult {
    pub allowed: bool,
    pub retry_after: Option<Duration>,
}

struct PluginWindow {
    timestamps: std::collections::VecDeque<Instant>,
}

impl PluginWindow {
    fn new() -> Self {
        Self {
            timestamps: std::collections::VecDeque::new(),
        }
    }

    fn evict(&mut self, window: Duration, now: Instant) {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// In-process sliding-window limiter, one window per plugin name.
pub struct RateLimiter {
    window: Duration,
    windows: Mutex<HashMap<String, PluginWindow>>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// `limit` is the plugin's configured per-window quota.
    pub async fn allow(&self, plugin: &str, limit: u32) -> AllowResult {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(plugin.to_string()).or_insert_with(PluginWindow::new);
        entry.evict(self.window, now);

        if (entry.timestamps.len() as u32) < limit {
            entry.timestamps.push_back(now);
            AllowResult {
                allowed: true,
                retry_after: None,
            }
        } else {
            let retry_after = entry
                .timestamps
                .front()
                .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)));
            AllowResult {
                allowed: false,
                retry_after,
            }
        }
    }

    pub async fn remaining(&self, plugin: &str, limit: u32) -> u32 {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(plugin.to_string()).or_insert_with(PluginWindow::new);
        entry.evict(self.window, now);
        limit.saturating_sub(entry.timestamps.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remaining_is_non_increasing_within_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let mut prior = limiter.remaining("p", 3).await;
        for _ in 0..3 {
            limiter.allow("p", 3).await;
            let now = limiter.remaining("p", 3).await;
            assert!(now <= prior);
            prior = now;
        }
    }

    #[tokio::test]
    async fn denies_once_limit_reached() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        for _ in 0..2 {
            assert!(limiter.allow("p", 2).await.allowed);
        }
        let result = limiter.allow("p", 2).await;
        assert!(!result.allowed);
        assert!(result.retry_after.is_some());
    }

    #[tokio::test]
    async fn window_resets_after_expiry() {
        let limiter = RateLimiter::new(Duration::from_millis(20));
        assert!(limiter.allow("p", 1).await.allowed);
        assert!(!limiter.allow("p", 1).await.allowed);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.allow("p", 1).await.allowed);
    }
}
