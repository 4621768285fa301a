use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{CollectError, RawItem};

/// Static metadata a Collector declares at registration (spec §4.1, §6).
#[derive(Debug, Clone)]
pub struct PluginMeta {
    pub category: String,
    pub rate_limit_per_hour: u32,
    /// A minimal cron-like schedule, e.g. `@every 5m`, `@hourly`, `@daily`.
    pub cron_expression: String,
    pub timeout: Duration,
    /// `1` forces serial (non-overlapping) ticks for this plugin.
    pub concurrency_hint: u32,
}

impl PluginMeta {
    pub fn new(category: impl Into<String>, cron_expression: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            rate_limit_per_hour: 60,
            cron_expression: cron_expression.into(),
            timeout: Duration::from_secs(300),
            concurrency_hint: u32::MAX,
        }
    }

    pub fn with_rate_limit(mut self, per_hour: u32) -> Self {
        self.rate_limit_per_hour = per_hour;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency_hint(mut self, hint: u32) -> Self {
        self.concurrency_hint = hint;
        self
    }

    pub fn serial_only(&self) -> bool {
        self.concurrency_hint == 1
    }
}

/// Context passed into `collect()`; carries cancellation and a sandboxed
/// working directory, per spec §4.1 and §9 ("cancellation is a first-class
/// argument").
#[derive(Clone)]
pub struct CollectorContext {
    pub cancellation: tokio_util::sync::CancellationToken,
    pub working_dir: std::path::PathBuf,
}

/// A source-specific producer of RawItems. Collectors are pure: no storage
/// access, no shared mutable state with other plugins (spec §4.1).
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;
    fn metadata(&self) -> PluginMeta;
    async fn collect(&self, ctx: &CollectorContext) -> Result<Vec<RawItem>, CollectError>;
}
