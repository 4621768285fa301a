//! Demo/fixture Collectors (spec §4.1 ambient addition). Exercise the
//! failure taxonomy the end-to-end scenarios in spec §8 run against.
//! Test/demo-only: no production control surface depends on these.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{CollectError, RawItem};
use crate::plugin::{Collector, CollectorContext, PluginMeta};

/// Produces a handful of deterministic, well-formed items every tick.
pub struct DemoCollector {
    name: String,
    tick: AtomicU32,
}

impl DemoCollector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tick: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Collector for DemoCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> PluginMeta {
        PluginMeta::new("news", "@every 5m").with_rate_limit(120)
    }

    async fn collect(&self, _ctx: &CollectorContext) -> Result<Vec<RawItem>, CollectError> {
        let tick = self.tick.fetch_add(1, Ordering::SeqCst);
        let items = (0..3)
            .map(|i| {
                RawItem::new(
                    self.name.clone(),
                    format!("tick{tick}-item{i}"),
                    format!("Demo headline {tick}-{i}"),
                )
                .with_content(format!("Demo body for item {i} on tick {tick}."))
                .with_metric("likes", (i * 7 + tick) as f64)
                .with_metric("shares", (i * 2) as f64)
            })
            .collect();
        Ok(items)
    }
}

/// Always fails with a transient network error, to exercise the
/// Scheduler's bounded-retry path (spec §4.5).
pub struct FlakyCollector {
    name: String,
}

impl FlakyCollector {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Collector for FlakyCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> PluginMeta {
        PluginMeta::new("news", "@every 10m")
    }

    async fn collect(&self, _ctx: &CollectorContext) -> Result<Vec<RawItem>, CollectError> {
        Err(CollectError::network(format!("{} is unreachable", self.name)))
    }
}

/// Sleeps past its own declared timeout, to exercise the Scheduler's
/// `tokio::time::timeout` deadline and cancellation path (spec §4.5, §9).
pub struct SlowCollector {
    name: String,
}

impl SlowCollector {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Collector for SlowCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> PluginMeta {
        PluginMeta::new("news", "@every 10m").with_timeout(Duration::from_millis(50))
    }

    async fn collect(&self, ctx: &CollectorContext) -> Result<Vec<RawItem>, CollectError> {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(vec![]),
            _ = ctx.cancellation.cancelled() => Err(CollectError::network("cancelled")),
        }
    }
}

/// Always reports a configuration error, a class the Scheduler never
/// retries (spec §4.1, §4.5).
pub struct ConfigErrorCollector {
    name: String,
}

impl ConfigErrorCollector {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Collector for ConfigErrorCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> PluginMeta {
        PluginMeta::new("news", "@daily")
    }

    async fn collect(&self, _ctx: &CollectorContext) -> Result<Vec<RawItem>, CollectError> {
        Err(CollectError::config(format!("{} is missing an API key", self.name)))
    }
}

/// Registers the fixture plugins at daemon startup (spec §4.2 ambient
/// addition: "explicit registration call ... invoked at program start").
pub async fn register_builtin_plugins(registry: &crate::plugin::PluginRegistry) {
    let plugins: Vec<Arc<dyn Collector>> = vec![
        Arc::new(DemoCollector::new("demo-tech")),
        Arc::new(DemoCollector::new("demo-markets")),
        Arc::new(FlakyCollector::new("flaky-source")),
        Arc::new(SlowCollector::new("slow-source")),
        Arc::new(ConfigErrorCollector::new("misconfigured-source")),
    ];
    for plugin in plugins {
        if let Err(err) = registry.register(plugin).await {
            tracing::warn!(error = %err, "failed to register builtin plugin");
        }
    }
}
