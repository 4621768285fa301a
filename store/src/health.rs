//! PluginHealth — per-collector health record (spec §4.4)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rolling health state for a single registered Collector.
///
/// `consecutive_failures` resets to zero on any successful run; once it
/// reaches the HealthTracker's configured threshold (default 3) the
/// scheduler skips the plugin until a manual `run_now` override succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHealth {
    pub plugin: String,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub total_runs: u64,
    pub total_failures: u64,
}

impl PluginHealth {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            last_run: None,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            total_runs: 0,
            total_failures: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            return 1.0;
        }
        (self.total_runs - self.total_failures) as f64 / self.total_runs as f64
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_run = Some(at);
        self.last_success = Some(at);
        self.consecutive_failures = 0;
        self.total_runs += 1;
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.last_run = Some(at);
        self.last_error = Some(error.into());
        self.consecutive_failures += 1;
        self.total_runs += 1;
        self.total_failures += 1;
    }

    pub fn is_unhealthy(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold
    }
}
