//! Match workflow API handlers
//!
//! POST /api/v1/match, GET /api/v1/match/:task_id

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{Submission, TaskError, TaskErrorKind, TaskStatus},
    AppState,
};

/// POST /api/v1/match response
#[derive(Debug, Serialize)]
pub struct SubmitMatchResponse {
    pub task_id: Uuid,
    pub status: &'static str,
    pub estimated_time_ms: u64,
    pub delivery_channel_key: String,
}

/// GET /api/v1/match/:task_id response while the task is in flight
#[derive(Debug, Serialize)]
pub struct ProcessingResponse {
    pub task_id: Uuid,
    pub status: &'static str,
    pub step: &'static str,
}

/// GET /api/v1/match/:task_id response for a failed task
#[derive(Debug, Serialize)]
pub struct FailedResponse {
    pub task_id: Uuid,
    pub status: &'static str,
    pub error: TaskError,
}

/// POST /api/v1/match
///
/// Records the task and returns 202 immediately; the result arrives over
/// the realtime channel or by polling.
pub async fn submit_match(
    State(state): State<AppState>,
    payload: Result<Json<Submission>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitMatchResponse>)> {
    let Json(submission) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let receipt = state.orchestrator.submit(submission).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitMatchResponse {
            task_id: receipt.task_id,
            status: "processing",
            estimated_time_ms: receipt.estimated_time_ms,
            delivery_channel_key: receipt.delivery_channel_key,
        }),
    ))
}

/// GET /api/v1/match/:task_id
pub async fn get_match_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Response> {
    let task_id = Uuid::parse_str(&task_id)
        .map_err(|_| ApiError::NotFound(format!("Task not found: {}", task_id)))?;

    let task = state
        .orchestrator
        .status(task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Task not found: {}", task_id)))?;

    let response = match task.status {
        TaskStatus::Succeeded { result } => (StatusCode::OK, Json(result)).into_response(),
        TaskStatus::Failed { error } => {
            let status = failure_status(error.kind);
            (
                status,
                Json(FailedResponse {
                    task_id,
                    status: "failed",
                    error,
                }),
            )
                .into_response()
        }
        in_flight => (
            StatusCode::ACCEPTED,
            Json(ProcessingResponse {
                task_id,
                status: "processing",
                step: in_flight.step_name().unwrap_or("queued"),
            }),
        )
            .into_response(),
    };

    Ok(response)
}

/// HTTP status for a failed task
pub fn failure_status(kind: TaskErrorKind) -> StatusCode {
    match kind {
        TaskErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        TaskErrorKind::CollaboratorUnavailable => StatusCode::BAD_GATEWAY,
        TaskErrorKind::Rejected => StatusCode::SERVICE_UNAVAILABLE,
        TaskErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build match workflow routes
pub fn match_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/match", post(submit_match))
        .route("/api/v1/match/:task_id", get(get_match_status))
}
