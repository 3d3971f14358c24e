//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when results can only be polled
    pub status: String,
    /// Module name ("kindred-match")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Live realtime connections
    pub connections: usize,
    /// Tasks waiting for a worker
    pub queued_tasks: usize,
    /// Tasks recorded Pending or Running
    pub in_flight_tasks: i64,
}

/// GET /api/v1/health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let in_flight_tasks = match crate::db::tasks::count_in_flight(&state.db).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to count in-flight tasks");
            -1
        }
    };

    let status = if state.result_bus.is_closed() || in_flight_tasks < 0 {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "kindred-match".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        connections: state.gateway.connection_count().await,
        queued_tasks: state.orchestrator.queue_depth(),
        in_flight_tasks,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/api/v1/health", get(health_check))
}
