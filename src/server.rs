//! Health and metrics endpoints, plus the webhook route when enabled.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::metrics::Metrics;
use crate::repository::Repository;
use crate::scheduler::SchedulerState;
use crate::shutdown::Shutdown;
use crate::webhook::{self, WebhookState};
use crate::{SERVICE_NAME, VERSION};

/// Consecutive failed cycles before `/health` reports `degraded`.
const DEGRADED_AFTER: u32 = 5;
/// Consecutive failed cycles before `/health` answers 503.
const UNAVAILABLE_AFTER: u32 = 10;

/// Scheduler progress as seen by `/health`.
#[derive(Clone)]
pub struct HealthState {
    scheduler_state: Arc<RwLock<SchedulerState>>,
    last_cycle: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_cycle_games: Arc<RwLock<usize>>,
    consecutive_errors: Arc<RwLock<u32>>,
    halted: Arc<AtomicBool>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            scheduler_state: Arc::new(RwLock::new(SchedulerState::Idle)),
            last_cycle: Arc::new(RwLock::new(None)),
            last_cycle_games: Arc::new(RwLock::new(0)),
            consecutive_errors: Arc::new(RwLock::new(0)),
            halted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn record_success(&self, games: usize) {
        *self.last_cycle.write().await = Some(Utc::now());
        *self.last_cycle_games.write().await = games;
        *self.consecutive_errors.write().await = 0;
    }

    pub async fn record_error(&self) {
        *self.consecutive_errors.write().await += 1;
    }

    pub async fn set_scheduler_state(&self, state: SchedulerState) {
        *self.scheduler_state.write().await = state;
    }

    pub async fn scheduler_state(&self) -> SchedulerState {
        *self.scheduler_state.read().await
    }

    pub async fn consecutive_errors(&self) -> u32 {
        *self.consecutive_errors.read().await
    }

    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub health: HealthState,
    pub metrics: Arc<Metrics>,
    pub repo: Arc<dyn Repository>,
}

/// Build the HTTP surface. The webhook route is mounted only when given.
pub fn router(state: AppState, webhook: Option<WebhookState>) -> Router {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    match webhook {
        Some(webhook) => app.merge(webhook::router(webhook)),
        None => app,
    }
}

/// Serve on an already-bound listener until the shutdown signal fires.
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    mut shutdown: Shutdown,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP server listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let health = &state.health;
    let last_cycle = *health.last_cycle.read().await;
    let last_cycle_games = *health.last_cycle_games.read().await;
    let errors = health.consecutive_errors().await;
    let scheduler_state = health.scheduler_state().await;
    let halted = health.is_halted();

    let database = match state.repo.ping().await {
        Ok(()) => "ok",
        Err(_) => "unreachable",
    };

    let status = if halted {
        "halted"
    } else if errors > DEGRADED_AFTER {
        "degraded"
    } else {
        "ok"
    };

    let http_status = if halted || errors > UNAVAILABLE_AFTER {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(json!({
            "service": SERVICE_NAME,
            "version": VERSION,
            "status": status,
            "scheduler_state": scheduler_state,
            "last_cycle": last_cycle.map(|t| t.to_rfc3339()),
            "last_cycle_games": last_cycle_games,
            "consecutive_errors": errors,
            "database": database,
        })),
    )
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.prometheus(),
    )
}
