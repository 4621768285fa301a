//! Scheduler (spec §4.5). Drives each registered, enabled plugin on its
//! cron-like schedule, enforces the PreCheck/health/rate preconditions,
//! executes `collect()` under a deadline with bounded retries, and hands
//! surviving items to the Pipeline Engine.
//!
//! Grounded on the teacher's `scheduler::core::Scheduler` (bounded
//! concurrency + sliding-window rate state) and
//! `watcher::main_watcher::MainWatcher::run` (per-source `interval` poll
//! loop), generalized here to one `tokio::time::interval` task per plugin
//! instead of one global watcher loop.

mod cron;

pub use cron::{parse_cron, CronError};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use trendstore::{CacheStore, ItemStore, PipelineRun, RunStatus, RunStore, TopicStore, TrendStore, VectorStore};

use crate::config::{ClusterConfig, DedupConfig, RankerConfig};
use crate::convert::convert;
use crate::domain::{CollectError, ErrorClass};
use crate::health::HealthTracker;
use crate::lock::FingerprintLocks;
use crate::pipeline::{PipelineContext, PipelineEngine};
use crate::plugin::{CollectorContext, PluginMeta, PluginRegistry};
use crate::ratelimit::RateLimiter;

const RETRY_BACKOFFS: [Duration; 3] = [Duration::from_millis(250), Duration::from_millis(500), Duration::from_secs(1)];
const RETRY_CAP: Duration = Duration::from_secs(5);

/// Why a tick was skipped without running the plugin (spec §4.5 PreCheck exits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    Disabled,
    Unhealthy,
    RateLimited,
    Backpressure,
}

/// Decrements the in-flight counter when a tick leaves scope, however it
/// returns, so backpressure tracking can't leak a slot on an early return.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Outcome of one tick, returned to both the interval loop and `run_now`.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Completed { run_id: Uuid },
    Failed { run_id: Uuid, message: String },
}

/// Shared state and storage handles a tick needs. Grouped into one struct
/// (rather than threading each field through every call) the same way
/// `PipelineContext` bundles the stages' dependencies.
pub struct Scheduler {
    registry: Arc<PluginRegistry>,
    health: Arc<HealthTracker>,
    rate_limiter: Arc<RateLimiter>,
    locks: Arc<FingerprintLocks>,
    item_store: Arc<dyn ItemStore>,
    vector_store: Arc<dyn VectorStore>,
    cache_store: Arc<dyn CacheStore>,
    topic_store: Arc<dyn TopicStore>,
    trend_store: Arc<dyn TrendStore>,
    run_store: Arc<dyn RunStore>,
    engine: Arc<PipelineEngine>,
    semaphore: Arc<Semaphore>,
    dedup: DedupConfig,
    cluster: ClusterConfig,
    ranker: RankerConfig,
    working_dir: std::path::PathBuf,
    run_deadline: Duration,
    in_flight: Arc<AtomicUsize>,
    backpressure_engaged: Arc<AtomicBool>,
    backpressure_high_water: usize,
    backpressure_low_water: usize,
}

#[allow(clippy::too_many_arguments)]
impl Scheduler {
    pub fn new(
        registry: Arc<PluginRegistry>,
        health: Arc<HealthTracker>,
        rate_limiter: Arc<RateLimiter>,
        locks: Arc<FingerprintLocks>,
        item_store: Arc<dyn ItemStore>,
        vector_store: Arc<dyn VectorStore>,
        cache_store: Arc<dyn CacheStore>,
        topic_store: Arc<dyn TopicStore>,
        trend_store: Arc<dyn TrendStore>,
        run_store: Arc<dyn RunStore>,
        engine: Arc<PipelineEngine>,
        max_concurrency: usize,
        dedup: DedupConfig,
        cluster: ClusterConfig,
        ranker: RankerConfig,
        working_dir: std::path::PathBuf,
        run_deadline: Duration,
        backpressure_high_water: usize,
        backpressure_low_water: usize,
    ) -> Self {
        Self {
            registry,
            health,
            rate_limiter,
            locks,
            item_store,
            vector_store,
            cache_store,
            topic_store,
            trend_store,
            run_store,
            engine,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            dedup,
            cluster,
            ranker,
            working_dir,
            run_deadline,
            in_flight: Arc::new(AtomicUsize::new(0)),
            backpressure_engaged: Arc::new(AtomicBool::new(false)),
            backpressure_high_water,
            backpressure_low_water,
        }
    }

    /// Current number of ticks collecting, processing, or persisting, used
    /// as a stand-in for the Persister's literal queue depth (spec §4.5
    /// "Backpressure") since this implementation has no separate queue
    /// stage — a tick occupies its slot from backpressure-check through
    /// pipeline completion.
    pub fn queue_depth(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn backpressure_engaged(&self) -> bool {
        self.backpressure_engaged.load(Ordering::SeqCst)
    }

    /// Hysteresis gate: once engaged, stays engaged until depth drains to
    /// the low-water mark, even if it dips below the high-water mark in
    /// between (spec §4.5: "stops accepting new ticks until the queue
    /// drains to the low-water mark").
    fn check_backpressure(&self) -> bool {
        let depth = self.in_flight.load(Ordering::SeqCst);
        if self.backpressure_engaged.load(Ordering::SeqCst) {
            if depth <= self.backpressure_low_water {
                self.backpressure_engaged.store(false, Ordering::SeqCst);
                false
            } else {
                true
            }
        } else if depth >= self.backpressure_high_water {
            self.backpressure_engaged.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Spawns the `tokio::time::interval` loop for one plugin, parsing its
    /// `cron_expression` into a fixed period (spec §4.5 ambient addition).
    /// Runs until `shutdown` is cancelled. The cron expression is resolved
    /// up front so a bad expression fails at startup, not inside the task.
    pub async fn spawn_plugin_loop(
        self: &Arc<Self>,
        plugin_name: String,
        shutdown: CancellationToken,
    ) -> Result<tokio::task::JoinHandle<()>, CronError> {
        let period = match self.registry.get_any(&plugin_name).await {
            Ok(plugin) => parse_cron(&plugin.metadata().cron_expression)?,
            Err(_) => Duration::from_secs(300),
        };

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcome = scheduler.tick(&plugin_name, false).await;
                        tracing::debug!(plugin = %plugin_name, ?outcome, "tick complete");
                    }
                }
            }
        });
        Ok(handle)
    }

    /// On-demand trigger (spec §4.5 §6 `POST /run_now`). When
    /// `override_checks` is true, PreCheck steps 2–3 (health/rate) are
    /// skipped, but the result still updates health and rate tracking.
    pub async fn run_now(&self, plugin_name: &str, override_checks: bool) -> TickOutcome {
        self.tick(plugin_name, override_checks).await
    }

    async fn tick(&self, plugin_name: &str, override_checks: bool) -> TickOutcome {
        // Step 1: resolve plugin from registry; missing or disabled -> Skipped.
        let plugin = match self.registry.get_any(plugin_name).await {
            Ok(p) => p,
            Err(_) => return TickOutcome::Skipped(SkipReason::NotFound),
        };
        if self.registry.get(plugin_name).await.is_err() && !override_checks {
            return TickOutcome::Skipped(SkipReason::Disabled);
        }
        let meta = plugin.metadata();

        if !override_checks {
            // Step 2: health.
            if self.health.is_unhealthy(plugin_name).await && !self.health.cooldown_elapsed(plugin_name).await {
                return TickOutcome::Skipped(SkipReason::Unhealthy);
            }
            // Step 3: rate limit.
            let allow = self.rate_limiter.allow(plugin_name, meta.rate_limit_per_hour).await;
            if !allow.allowed {
                return TickOutcome::Skipped(SkipReason::RateLimited);
            }
            // Step 3b: backpressure, composed with the rate limiter (spec §4.5).
            if self.check_backpressure() {
                return TickOutcome::Skipped(SkipReason::Backpressure);
            }
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _inflight_guard = InFlightGuard(Arc::clone(&self.in_flight));

        // Bounded global concurrency (default N=8); a plugin with
        // concurrency_hint==1 additionally serializes against its own
        // overlapping ticks via the fingerprint lock registry.
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");
        let _serial_guard = if meta.serial_only() {
            Some(self.locks.acquire(&format!("plugin-serial:{plugin_name}")).await)
        } else {
            None
        };

        let started = Instant::now();
        let mut run = PipelineRun::new(plugin_name.to_string(), Utc::now());
        run.status = RunStatus::Running;
        if let Err(err) = self.run_store.upsert(&run).await {
            tracing::warn!(plugin = plugin_name, error = %err, "failed to record run start");
        }
        let run_id = run.id;

        // Step 4: collect() under a deadline, with bounded retries for
        // transient errors (spec §4.5 "Ordering & tie-breaks").
        let items = match self.collect_with_retry(&plugin, &meta, plugin_name).await {
            Ok(items) => items,
            Err(err) => {
                self.health.record_failure(plugin_name, err.message.clone(), started.elapsed()).await;
                if err.class == ErrorClass::Config {
                    // A misconfigured plugin won't fix itself between ticks;
                    // disable it rather than retry it into unhealthy status.
                    if let Err(disable_err) = self.registry.set_enabled(plugin_name, false).await {
                        tracing::warn!(plugin = plugin_name, error = %disable_err, "failed to auto-disable misconfigured plugin");
                    } else {
                        tracing::warn!(plugin = plugin_name, "disabled plugin after configuration error");
                    }
                }
                run.errors.push(err.message.clone());
                run.finish(RunStatus::Failed, Utc::now());
                self.record_run_finish(run).await;
                return TickOutcome::Failed { run_id, message: err.message };
            }
        };

        // Step 5: success — record health, convert, run the pipeline.
        self.health.record_success(plugin_name, started.elapsed()).await;

        let processed: Vec<_> = items.into_iter().filter_map(convert).collect();
        run.items_collected = processed.len() as u64;

        let mut ctx = PipelineContext::new(
            run.id,
            Arc::clone(&self.item_store),
            Arc::clone(&self.vector_store),
            Arc::clone(&self.cache_store),
            Arc::clone(&self.topic_store),
            Arc::clone(&self.trend_store),
            Arc::clone(&self.locks),
            self.dedup.clone(),
            self.cluster.clone(),
            self.ranker.clone(),
        );

        // The pipeline itself runs under its own overall deadline,
        // independent of the per-collect() timeout (spec §4.5 "Cancellation
        // & timeouts": "The pipeline itself has an overall deadline per run").
        match tokio::time::timeout(self.run_deadline, self.engine.run(processed, &mut ctx)).await {
            Ok(Ok((_, outcome))) => {
                run.items_processed = outcome.items_processed;
                run.items_deduplicated = outcome.items_deduplicated;
                run.topics_created = outcome.topics_created;
                run.trends_created = outcome.trends_created;
                run.finish(RunStatus::Completed, Utc::now());
                self.record_run_finish(run).await;
                TickOutcome::Completed { run_id }
            }
            Ok(Err(err)) => {
                run.errors.push(err.to_string());
                run.finish(RunStatus::Failed, Utc::now());
                self.record_run_finish(run).await;
                TickOutcome::Failed { run_id, message: err.to_string() }
            }
            Err(_) => {
                let message = format!("pipeline exceeded its {:?} overall deadline", self.run_deadline);
                run.errors.push(message.clone());
                run.finish(RunStatus::Failed, Utc::now());
                self.record_run_finish(run).await;
                TickOutcome::Failed { run_id, message }
            }
        }
    }

    /// Exponential backoff (250ms, 500ms, 1s, capped at 5s), at most 3
    /// retries, only for transient errors (spec §4.5).
    async fn collect_with_retry(
        &self,
        plugin: &Arc<dyn crate::plugin::Collector>,
        meta: &PluginMeta,
        plugin_name: &str,
    ) -> Result<Vec<crate::domain::RawItem>, CollectError> {
        let mut attempt = 0usize;
        loop {
            let cancellation = CancellationToken::new();
            let ctx = CollectorContext {
                cancellation: cancellation.clone(),
                working_dir: self.working_dir.clone(),
            };
            let outcome = tokio::time::timeout(meta.timeout, plugin.collect(&ctx)).await;
            match outcome {
                Ok(Ok(items)) => return Ok(items),
                Ok(Err(err)) => {
                    if err.is_transient() && attempt < RETRY_BACKOFFS.len() {
                        let delay = err.retry_after.unwrap_or(RETRY_BACKOFFS[attempt]).min(RETRY_CAP);
                        tracing::warn!(plugin = plugin_name, attempt, ?delay, error = %err, "transient collect error, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
                Err(_) => {
                    cancellation.cancel();
                    return Err(CollectError::network(format!(
                        "{plugin_name} exceeded its {:?} timeout",
                        meta.timeout
                    )));
                }
            }
        }
    }

    /// Non-blocking completion write with a delayed retry task on failure,
    /// mirroring the Persister's `vector_pending` reconciliation shape
    /// rather than inventing a second mechanism (spec §4.9 ambient addition).
    async fn record_run_finish(&self, run: PipelineRun) {
        if let Err(err) = self.run_store.upsert(&run).await {
            tracing::warn!(run_id = %run.id, error = %err, "failed to record run completion, retrying in background");
            let run_store = Arc::clone(&self.run_store);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                if let Err(err) = run_store.upsert(&run).await {
                    tracing::error!(run_id = %run.id, error = %err, "run completion retry failed");
                }
            });
        }
    }

    /// Compensating pass for the Persister's two-phase write (spec §8
    /// property 9): re-attempts the `VectorStore` upsert for every item
    /// left `vector_pending` by an earlier outage, promoting it to
    /// `processed` on success. Safe to call repeatedly or on a timer; items
    /// with no stored embedding are left pending (nothing to retry).
    pub async fn reconcile_vector_pending(&self, limit: i64) -> Result<u64, trendstore::StorageError> {
        let pending = self
            .item_store
            .list_by_status(trendstore::ItemStatus::VectorPending, limit)
            .await?;

        let mut reconciled = 0u64;
        for item in pending {
            let Some(embedding) = item.embedding.clone() else {
                continue;
            };
            let meta = trendstore::VectorMeta {
                language: item.language.clone(),
                category: item.category.clone(),
                published_at: item.published_at,
                collected_at: item.collected_at,
            };
            match self.vector_store.upsert(item.id, embedding, meta).await {
                Ok(()) => {
                    self.item_store.set_status(item.id, trendstore::ItemStatus::Processed).await?;
                    reconciled += 1;
                }
                Err(err) => {
                    tracing::warn!(item = %item.id, error = %err, "vector_pending reconciliation still failing");
                }
            }
        }
        Ok(reconciled)
    }
}
