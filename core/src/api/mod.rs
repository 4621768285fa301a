//! HTTP control surface (spec §6). An `axum` router sharing one `AppState`
//! with the CLI, so business logic lives in `Scheduler`/`PluginRegistry`
//! and never in a handler — grounded on
//! `ultrafast-gateway::server::{AppState, create_server}`'s thin-handler
//! shape.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trendstore::{CacheStore, PluginHealth, RunStore};

use crate::health::HealthTracker;
use crate::plugin::PluginRegistry;
use crate::scheduler::{Scheduler, SkipReason, TickOutcome};

const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 3600);
const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Shared state handed to every handler, mirroring the CLI's own handle so
/// both surfaces call the same code (spec §6).
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PluginRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub run_store: Arc<dyn RunStore>,
    pub health: Arc<HealthTracker>,
    pub cache_store: Arc<dyn CacheStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/run_now", post(run_now))
        .route("/plugins", get(list_plugins))
        .route("/plugins/{name}/enabled", post(set_enabled))
        .route("/runs/{run_id}", get(get_run))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RunNowRequest {
    plugin: String,
    #[serde(default)]
    override_checks: bool,
}

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "status", rename_all = "snake_case")]
enum RunNowResponse {
    Skipped { reason: String },
    Completed { run_id: Uuid },
    Failed { run_id: Uuid, message: String },
}

impl From<TickOutcome> for RunNowResponse {
    fn from(outcome: TickOutcome) -> Self {
        match outcome {
            TickOutcome::Skipped(reason) => RunNowResponse::Skipped {
                reason: skip_reason_str(reason).to_string(),
            },
            TickOutcome::Completed { run_id } => RunNowResponse::Completed { run_id },
            TickOutcome::Failed { run_id, message } => RunNowResponse::Failed { run_id, message },
        }
    }
}

fn skip_reason_str(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::NotFound => "not_found",
        SkipReason::Disabled => "disabled",
        SkipReason::Unhealthy => "unhealthy",
        SkipReason::RateLimited => "rate_limited",
        SkipReason::Backpressure => "backpressure",
    }
}

/// `POST /run_now` — triggers a plugin immediately. An `Idempotency-Key`
/// header is honored via the CacheStore with a 24h TTL (spec §6): a
/// repeat call with the same key returns the cached result instead of
/// triggering a second run.
async fn run_now(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RunNowRequest>,
) -> Response {
    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| format!("idempotency:{s}"));

    if let Some(key) = &idempotency_key {
        if let Ok(Some(cached)) = state.cache_store.get(key).await {
            if let Ok(response) = serde_json::from_str::<RunNowResponse>(&cached) {
                return Json(response).into_response();
            }
        }
    }

    let outcome = state.scheduler.run_now(&req.plugin, req.override_checks).await;
    let response = RunNowResponse::from(outcome);

    if let Some(key) = &idempotency_key {
        if let Ok(body) = serde_json::to_string(&response) {
            if let Err(err) = state.cache_store.setex(key, body, IDEMPOTENCY_TTL).await {
                tracing::warn!(error = %err, "failed to cache idempotency response");
            }
        }
    }

    Json(response).into_response()
}

#[derive(Debug, Serialize)]
struct PluginView {
    name: String,
    category: String,
    enabled: bool,
    rate_limit_per_hour: u32,
    cron_expression: String,
    unhealthy: bool,
    consecutive_failures: u32,
    success_rate: f64,
}

/// `GET /plugins` — list with enabled flag and current health (spec §6).
async fn list_plugins(State(state): State<AppState>) -> Json<Vec<PluginView>> {
    let entries = state.registry.list(false).await;
    let mut views = Vec::with_capacity(entries.len());
    for entry in entries {
        let (unhealthy, consecutive_failures, success_rate) = match state.health.status(&entry.name).await {
            Some((health, rate)) => (state.health.is_unhealthy(&entry.name).await, health.consecutive_failures, rate),
            None => (false, 0, 1.0),
        };
        views.push(PluginView {
            name: entry.name,
            category: entry.meta.category,
            enabled: entry.enabled,
            rate_limit_per_hour: entry.meta.rate_limit_per_hour,
            cron_expression: entry.meta.cron_expression,
            unhealthy,
            consecutive_failures,
            success_rate,
        });
    }
    Json(views)
}

#[derive(Debug, Deserialize)]
struct SetEnabledRequest {
    enabled: bool,
}

/// `POST /plugins/{name}/enabled`
async fn set_enabled(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SetEnabledRequest>,
) -> StatusCode {
    match state.registry.set_enabled(&name, req.enabled).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::NOT_FOUND,
    }
}

/// `GET /runs/{run_id}`
async fn get_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    match state.run_store.get(run_id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to fetch run");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthView {
    plugin_count: usize,
    unhealthy_count: usize,
    queue_depth: usize,
    backpressure_engaged: bool,
    plugins: Vec<PluginHealthView>,
}

#[derive(Debug, Serialize)]
struct PluginHealthView {
    plugin: String,
    consecutive_failures: u32,
    success_rate: f64,
}

/// `GET /health` — aggregate health: unhealthy plugin count, queue depth,
/// backpressure flag (spec §6).
async fn health(State(state): State<AppState>) -> Json<HealthView> {
    let all: Vec<(PluginHealth, f64)> = state.health.all().await;
    let unhealthy_count = state.health.unhealthy_count().await;
    Json(HealthView {
        plugin_count: all.len(),
        unhealthy_count,
        queue_depth: state.scheduler.queue_depth(),
        backpressure_engaged: state.scheduler.backpressure_engaged(),
        plugins: all
            .into_iter()
            .map(|(health, rate)| PluginHealthView {
                plugin: health.plugin,
                consecutive_failures: health.consecutive_failures,
                success_rate: rate,
            })
            .collect(),
    })
}
