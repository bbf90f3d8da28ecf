//! Process-wide health status and the `GET /health` endpoint.
//!
//! The agent publishes into a [`HealthMonitor`] after every state change and
//! every run; the HTTP handler only reads a snapshot, so a request never
//! waits on an in-flight sync.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status snapshot; 503 when unhealthy |
//!
//! Unknown paths answer with the JSON error body
//! `{ "error": { "code": "not_found", "message": "..." } }`.

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::hash::format_date;
use crate::models::RunStats;

/// Agent state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentState {
    Idle,
    Syncing,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
struct Tracker {
    state: AgentState,
    last_run_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_error_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_run_failed: bool,
    watcher_error: Option<String>,
    total_runs: u64,
    success_count: u64,
    error_count: u64,
    totals: RunStats,
    pending_run: bool,
    conflict_artifacts: usize,
}

impl Default for Tracker {
    fn default() -> Self {
        Self {
            state: AgentState::Idle,
            last_run_at: None,
            last_success_at: None,
            last_error_at: None,
            last_error: None,
            last_run_failed: false,
            watcher_error: None,
            total_runs: 0,
            success_count: 0,
            error_count: 0,
            totals: RunStats::default(),
            pending_run: false,
            conflict_artifacts: 0,
        }
    }
}

impl Tracker {
    fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            1.0
        } else {
            self.success_count as f64 / self.total_runs as f64
        }
    }

    fn status(&self) -> HealthStatus {
        if self.total_runs == 0 {
            return match self.watcher_error {
                Some(_) => HealthStatus::Degraded,
                None => HealthStatus::Healthy,
            };
        }
        let rate = self.success_rate();
        if (self.success_count == 0 && self.error_count > 0) || rate < 0.5 {
            HealthStatus::Unhealthy
        } else if self.last_run_failed || self.watcher_error.is_some() || rate < 0.9 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Shared, lock-briefly health state.
pub struct HealthMonitor {
    started: Instant,
    tracker: RwLock<Tracker>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            tracker: RwLock::new(Tracker::default()),
        }
    }

    fn update(&self, f: impl FnOnce(&mut Tracker)) {
        let mut tracker = self.tracker.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut tracker);
    }

    pub fn set_state(&self, state: AgentState) {
        self.update(|t| t.state = state);
    }

    pub fn set_pending(&self, pending: bool) {
        self.update(|t| t.pending_run = pending);
    }

    pub fn set_conflict_artifacts(&self, count: usize) {
        self.update(|t| t.conflict_artifacts = count);
    }

    pub fn record_success(&self, stats: &RunStats) {
        let now = Utc::now();
        self.update(|t| {
            t.total_runs += 1;
            t.success_count += 1;
            t.last_run_at = Some(now);
            t.last_success_at = Some(now);
            t.last_run_failed = false;
            // a completed run means events are flowing again
            t.watcher_error = None;
            t.totals.absorb(stats);
        });
    }

    pub fn record_failure(&self, error: &str) {
        let now = Utc::now();
        self.update(|t| {
            t.total_runs += 1;
            t.error_count += 1;
            t.last_run_at = Some(now);
            t.last_error_at = Some(now);
            t.last_error = Some(error.to_string());
            t.last_run_failed = true;
        });
    }

    pub fn record_watcher_error(&self, error: &str) {
        let now = Utc::now();
        self.update(|t| {
            t.watcher_error = Some(error.to_string());
            t.last_error_at = Some(now);
            t.last_error = Some(error.to_string());
        });
    }

    pub fn status(&self) -> HealthStatus {
        self.tracker.read().unwrap_or_else(PoisonError::into_inner).status()
    }

    pub fn snapshot(&self) -> HealthReport {
        let t = self
            .tracker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        HealthReport {
            status: t.status(),
            state: t.state,
            uptime_secs: self.started.elapsed().as_secs(),
            last_run_at: t.last_run_at.map(format_date),
            last_success_at: t.last_success_at.map(format_date),
            last_error_at: t.last_error_at.map(format_date),
            last_error: t.last_error.clone(),
            stats: HealthStats {
                total_runs: t.total_runs,
                success_count: t.success_count,
                error_count: t.error_count,
                success_rate: t.success_rate(),
                updated: t.totals.updated,
                skipped: t.totals.skipped,
                conflicts: t.totals.conflicts,
                errors: t.totals.errors,
            },
            pending_run: t.pending_run,
            conflict_artifacts: t.conflict_artifacts,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: format_date(Utc::now()),
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub state: AgentState,
    pub uptime_secs: u64,
    pub last_run_at: Option<String>,
    pub last_success_at: Option<String>,
    pub last_error_at: Option<String>,
    pub last_error: Option<String>,
    pub stats: HealthStats,
    pub pending_run: bool,
    pub conflict_artifacts: usize,
    pub version: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStats {
    pub total_runs: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub updated: u64,
    pub skipped: u64,
    pub conflicts: u64,
    pub errors: u64,
}

// ============ Router ============

pub fn router(monitor: Arc<HealthMonitor>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .fallback(handle_not_found)
        .layer(cors)
        .with_state(monitor)
}

/// Serve the health router on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    monitor: Arc<HealthMonitor>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "health endpoint listening");
    }
    axum::serve(listener, router(monitor))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn handle_health(State(monitor): State<Arc<HealthMonitor>>) -> Response {
    let report = monitor.snapshot();
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(report)).into_response()
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

async fn handle_not_found(uri: Uri) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "not_found".to_string(),
            message: format!("no route for {}", uri.path()),
        },
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}
