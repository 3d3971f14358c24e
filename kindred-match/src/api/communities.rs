//! Popular communities endpoint
//!
//! GET /api/v1/popular-communities?limit=N

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use kindred_common::CandidateCommunity;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    services::DataStore,
    AppState,
};

pub const DEFAULT_POPULAR_LIMIT: usize = 10;
pub const MAX_POPULAR_LIMIT: usize = 50;

#[derive(Debug, Default, Deserialize)]
pub struct PopularQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PopularCommunitiesResponse {
    pub communities: Vec<CandidateCommunity>,
}

/// GET /api/v1/popular-communities
///
/// Ordered by member count, then 7-day activity.
pub async fn popular_communities(
    State(state): State<AppState>,
    Query(query): Query<PopularQuery>,
) -> ApiResult<Json<PopularCommunitiesResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_POPULAR_LIMIT)
        .clamp(1, MAX_POPULAR_LIMIT);

    let communities = state
        .store
        .popular_communities(limit)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(PopularCommunitiesResponse { communities }))
}

/// Build community routes
pub fn community_routes() -> Router<AppState> {
    Router::new().route("/api/v1/popular-communities", get(popular_communities))
}
