//! trendd — the daemon binary. Entry point only: parses the CLI, loads
//! configuration, wires every storage/registry/health/scheduler instance
//! together, and dispatches the chosen subcommand. Grounded on the
//! teacher's `main.rs` (`setup_logging` + `Config::load` + `Cli::parse`
//! shape).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use trendcore::cli::{Cli, Command};
use trendcore::config::Config;
use trendcore::demo::register_builtin_plugins;
use trendcore::health::HealthTracker;
use trendcore::lock::FingerprintLocks;
use trendcore::pipeline::{Clusterer, Deduplicator, LanguageDetector, Normalizer, PipelineEngine, Persister, Ranker};
use trendcore::plugin::PluginRegistry;
use trendcore::ratelimit::RateLimiter;
use trendcore::scheduler::Scheduler;

use trendstore::{CacheStore, InMemoryCacheStore, InMemoryVectorStore, ItemStore, RelationalStore, RunStore, TopicStore, TrendStore, VectorStore};

fn setup_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose).context("failed to initialize logging")?;

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    info!(sqlite_path = %config.storage.sqlite_path, "trendd starting");

    let relational = RelationalStore::open(&config.storage.sqlite_path)
        .context("failed to open relational storage")?;
    let item_store: Arc<dyn ItemStore> = Arc::new(relational.items);
    let topic_store: Arc<dyn TopicStore> = Arc::new(relational.topics);
    let trend_store: Arc<dyn TrendStore> = Arc::new(relational.trends);
    let run_store: Arc<dyn RunStore> = Arc::new(relational.runs);
    let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let cache_store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());

    let registry = Arc::new(PluginRegistry::new());
    register_builtin_plugins(&registry).await;

    let health = Arc::new(HealthTracker::new(
        config.scheduler.unhealthy_threshold,
        Duration::from_secs(config.scheduler.unhealthy_cooldown_seconds),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(Duration::from_secs(config.scheduler.rate_window_seconds)));
    let locks = Arc::new(FingerprintLocks::new());

    let engine = Arc::new(PipelineEngine::new(vec![
        Box::new(Normalizer),
        Box::new(LanguageDetector),
        Box::new(Deduplicator),
        Box::new(Clusterer),
        Box::new(Ranker),
        Box::new(Persister),
    ]));

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&registry),
        Arc::clone(&health),
        Arc::clone(&rate_limiter),
        Arc::clone(&locks),
        Arc::clone(&item_store),
        Arc::clone(&vector_store),
        Arc::clone(&cache_store),
        Arc::clone(&topic_store),
        Arc::clone(&trend_store),
        Arc::clone(&run_store),
        engine,
        config.scheduler.max_concurrency as usize,
        config.dedup.clone(),
        config.cluster.clone(),
        config.ranker.clone(),
        PathBuf::from("."),
        Duration::from_secs(config.run.overall_deadline_seconds),
        config.scheduler.backpressure_high_water,
        config.scheduler.backpressure_low_water,
    ));

    match cli.command {
        Command::Run { plugin, override_checks } => run_once(&scheduler, &registry, plugin, override_checks).await,
        Command::Serve => serve(scheduler, registry, run_store, health, cache_store, &config).await,
        Command::Plugins => print_plugins(&registry).await,
        Command::Status { limit } => print_status(&run_store, limit).await,
    }
}

async fn run_once(
    scheduler: &Scheduler,
    registry: &PluginRegistry,
    plugin: Option<String>,
    override_checks: bool,
) -> Result<()> {
    let names = match plugin {
        Some(name) => vec![name],
        None => registry.names_in_registration_order().await,
    };
    for name in names {
        let outcome = scheduler.run_now(&name, override_checks).await;
        println!("{name}: {outcome:?}");
    }
    Ok(())
}

async fn serve(
    scheduler: Arc<Scheduler>,
    registry: Arc<PluginRegistry>,
    run_store: Arc<dyn RunStore>,
    health: Arc<HealthTracker>,
    cache_store: Arc<dyn CacheStore>,
    config: &Config,
) -> Result<()> {
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();
    for entry in registry.list(true).await {
        let handle = scheduler
            .spawn_plugin_loop(entry.name.clone(), shutdown.clone())
            .await
            .with_context(|| format!("invalid cron expression for plugin {}", entry.name))?;
        handles.push(handle);
    }
    handles.push(spawn_vector_pending_reconciler(Arc::clone(&scheduler), shutdown.clone()));

    let state = trendcore::api::AppState {
        registry,
        scheduler,
        run_store,
        health,
        cache_store,
    };
    let router = trendcore::api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.api.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.api.bind_address))?;
    info!(address = %config.api.bind_address, "control surface listening");

    tokio::select! {
        result = axum::serve(listener, router) => { result.context("server error")?; }
        _ = tokio::signal::ctrl_c() => { info!("shutdown signal received"); }
    }

    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Periodically retries `vector_pending` items left behind by a
/// `VectorStore` outage (spec §8 property 9), on the same interval-loop
/// shape as `Scheduler::spawn_plugin_loop`.
fn spawn_vector_pending_reconciler(scheduler: Arc<Scheduler>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match scheduler.reconcile_vector_pending(500).await {
                        Ok(count) if count > 0 => info!(count, "reconciled vector_pending items"),
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "vector_pending reconciliation pass failed"),
                    }
                }
            }
        }
    })
}

async fn print_plugins(registry: &PluginRegistry) -> Result<()> {
    for entry in registry.list(false).await {
        println!(
            "{:<24} category={:<10} enabled={:<5} rate_limit={:<4}/h cron={}",
            entry.name, entry.meta.category, entry.enabled, entry.meta.rate_limit_per_hour, entry.meta.cron_expression
        );
    }
    Ok(())
}

async fn print_status(run_store: &Arc<dyn RunStore>, limit: usize) -> Result<()> {
    let runs = run_store.list_recent(limit as i64).await.context("failed to list runs")?;
    for run in runs {
        println!(
            "{} {:<16} {:<10} items={} topics={} trends={}",
            run.started_at.to_rfc3339(),
            run.plugin,
            run.status,
            run.items_processed,
            run.topics_created,
            run.trends_created
        );
    }
    Ok(())
}
