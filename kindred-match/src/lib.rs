//! kindred-match library interface
//!
//! Community matching service: accepts onboarding submissions, runs the
//! sanitize → embed → match → decide → publish pipeline on a bounded worker
//! pool, and pushes results to the user's live realtime connections.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod realtime;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use kindred_common::bus::ResultBus;
use kindred_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServiceConfig;
use crate::models::{TaskError, TaskErrorKind};
use crate::realtime::RealtimeGateway;
use crate::services::{
    DataStore, DecisionEngine, HybridMatcher, LanguageModel, MatchPipeline, SqliteDataStore, TaskOrchestrator,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<ServiceConfig>,
    pub orchestrator: TaskOrchestrator,
    pub gateway: Arc<RealtimeGateway>,
    pub store: Arc<dyn DataStore>,
    /// Lifecycle events for the SSE feed
    pub event_bus: EventBus,
    /// Per-user finished results
    pub result_bus: ResultBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

/// Wire up the pipeline, worker pool and realtime gateway
///
/// Tasks left unfinished by a previous process are failed first. Background
/// loops stop when `shutdown` is cancelled.
pub async fn start_services(
    db: SqlitePool,
    config: Arc<ServiceConfig>,
    language_model: Arc<dyn LanguageModel>,
    shutdown: CancellationToken,
) -> anyhow::Result<AppState> {
    let restarted = TaskError::new(TaskErrorKind::Internal, None, "service restarted");
    let stale = db::tasks::fail_stale_tasks(&db, &restarted).await?;
    if stale > 0 {
        info!(stale, "Recovered tasks left over from previous run");
    }

    let store: Arc<dyn DataStore> = Arc::new(SqliteDataStore::new(db.clone()));
    let event_bus = EventBus::new(config.realtime.bus_capacity);
    let result_bus = ResultBus::new(config.realtime.bus_capacity);

    let matcher = HybridMatcher::new(store.clone(), config.matcher.clone());
    let decision = DecisionEngine::new(store.clone(), language_model.clone(), config.decision.clone());
    let pipeline = Arc::new(MatchPipeline::new(
        db.clone(),
        language_model,
        store.clone(),
        matcher,
        decision,
        result_bus.clone(),
        event_bus.clone(),
        config.pipeline.clone(),
    ));
    let orchestrator = TaskOrchestrator::start(pipeline, shutdown.clone());

    let gateway = Arc::new(RealtimeGateway::new(config.realtime.clone()));
    gateway.start(result_bus.clone(), shutdown)?;

    Ok(AppState {
        db,
        config,
        orchestrator,
        gateway,
        store,
        event_bus,
        result_bus,
        startup_time: Utc::now(),
    })
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::match_routes())
        .merge(api::realtime_routes())
        .merge(api::community_routes())
        .merge(api::identity_routes())
        .merge(api::health_routes())
        .route("/api/v1/events", get(api::match_event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
