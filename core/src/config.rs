//! Layered YAML configuration (spec §6 "Configuration").
//!
//! Grounded on the teacher's `Config::load` fallback chain: explicit path →
//! project-local `trend.yaml` → user config dir → built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrency: u32,
    pub default_timeout_seconds: u64,
    pub tick_retry_max: u32,
    pub unhealthy_threshold: u32,
    pub unhealthy_cooldown_seconds: u64,
    pub rate_window_seconds: u64,
    /// In-flight-tick high-water mark; reaching it engages backpressure
    /// (spec §4.5 "Backpressure").
    pub backpressure_high_water: usize,
    /// Depth backpressure must drain to before new ticks are accepted again.
    pub backpressure_low_water: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            default_timeout_seconds: 300,
            tick_retry_max: 3,
            unhealthy_threshold: 3,
            unhealthy_cooldown_seconds: 300,
            rate_window_seconds: 3600,
            backpressure_high_water: 32,
            backpressure_low_water: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub semantic_threshold: f64,
    pub lookback_days: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: 0.92,
            lookback_days: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub threshold: f64,
    pub min_cluster_size: usize,
    pub recall_window_hours: i64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threshold: 0.78,
            min_cluster_size: 2,
            recall_window_hours: 72,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerWeights {
    pub engagement: f64,
    pub velocity: f64,
    pub freshness: f64,
    pub age: f64,
}

impl Default for RankerWeights {
    fn default() -> Self {
        Self {
            engagement: 1.0,
            velocity: 1.0,
            freshness: 1.0,
            age: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    pub weights: RankerWeights,
    pub tau_hours: f64,
    pub diversity_cap: usize,
    pub top_n: usize,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            weights: RankerWeights::default(),
            tau_hours: 48.0,
            diversity_cap: 3,
            top_n: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub overall_deadline_seconds: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            overall_deadline_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub vector_dim: usize,
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            vector_dim: 32,
            sqlite_path: "trend.sqlite3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8088".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub dedup: DedupConfig,
    pub cluster: ClusterConfig,
    pub ranker: RankerConfig,
    pub run: RunConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Fallback chain: explicit path, then `./trend.yaml`, then
    /// `<user config dir>/trendcore/trend.yaml`, then built-in defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            return Self::from_file(path);
        }

        let local = PathBuf::from("trend.yaml");
        if local.exists() {
            return Self::from_file(&local);
        }

        if let Some(dir) = dirs::config_dir() {
            let user_path = dir.join("trendcore").join("trend.yaml");
            if user_path.exists() {
                return Self::from_file(&user_path);
            }
        }

        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = Config::default();
        assert_eq!(config.scheduler.max_concurrency, 8);
        assert_eq!(config.dedup.semantic_threshold, 0.92);
        assert_eq!(config.cluster.threshold, 0.78);
        assert_eq!(config.ranker.tau_hours, 48.0);
        assert_eq!(config.ranker.diversity_cap, 3);
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults_for_missing_fields() {
        let yaml = "scheduler:\n  max_concurrency: 16\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scheduler.max_concurrency, 16);
        assert_eq!(config.scheduler.default_timeout_seconds, 300);
        assert_eq!(config.dedup.semantic_threshold, 0.92);
    }
}
