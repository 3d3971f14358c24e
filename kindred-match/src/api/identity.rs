//! Identity provider webhook
//!
//! POST /webhooks/identity keeps the `users` table in step with the
//! identity provider. Only delivery-level problems (bad secret) are HTTP
//! errors; payload and storage problems answer 200 so the sender does not
//! retry an event that will never succeed.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    db::users::{self, UserRecord},
    error::{ApiError, ApiResult},
    AppState,
};

/// Header carrying the shared webhook secret
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Top-level webhook envelope
#[derive(Debug, Deserialize)]
pub struct IdentityEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct EmailAddress {
    pub email_address: String,
}

/// Data block of user.created / user.updated
#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    #[serde(default)]
    pub public_metadata: serde_json::Value,
}

impl From<UserPayload> for UserRecord {
    fn from(payload: UserPayload) -> Self {
        let metadata = if payload.public_metadata.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            payload.public_metadata
        };

        UserRecord {
            email: payload.email_addresses.into_iter().next().map(|e| e.email_address),
            user_id: payload.id,
            first_name: payload.first_name,
            last_name: payload.last_name,
            username: payload.username,
            metadata,
            is_active: true,
        }
    }
}

/// Data block of user.deleted
#[derive(Debug, Deserialize)]
pub struct DeletedPayload {
    pub id: String,
}

/// Webhook acknowledgement
#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl WebhookResponse {
    fn ok(event_type: String) -> Self {
        Self {
            status: "ok",
            event_type: Some(event_type),
            detail: None,
        }
    }

    fn ignored(event_type: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            status: "ignored",
            event_type,
            detail: Some(detail.into()),
        }
    }

    fn error(event_type: String) -> Self {
        Self {
            status: "error",
            event_type: Some(event_type),
            detail: Some("sync failed, check server logs".to_string()),
        }
    }
}

/// POST /webhooks/identity
pub async fn identity_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let Some(expected) = state.config.identity.webhook_secret.as_deref() else {
        error!("Identity webhook received but no webhook secret is configured");
        return Err(ApiError::Internal("Webhook secret not configured".to_string()));
    };

    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("Identity webhook without secret header");
            ApiError::BadRequest("Missing webhook secret".to_string())
        })?;

    if provided != expected {
        warn!("Identity webhook with wrong secret");
        return Err(ApiError::BadRequest("Invalid webhook secret".to_string()));
    }

    let event: IdentityEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Unparseable identity webhook payload");
            return Ok(Json(WebhookResponse::ignored(None, "unparseable payload")));
        }
    };

    info!(event_type = %event.event_type, "Identity webhook received");

    let outcome = match event.event_type.as_str() {
        "user.created" | "user.updated" => match serde_json::from_value::<UserPayload>(event.data) {
            Ok(payload) => {
                let record = UserRecord::from(payload);
                users::upsert_user(&state.db, &record).await.map(|_| {
                    info!(user_id = %record.user_id, "User profile synced");
                })
            }
            Err(e) => {
                warn!(error = %e, "Malformed user payload");
                return Ok(Json(WebhookResponse::ignored(Some(event.event_type), "malformed user data")));
            }
        },
        "user.deleted" => match serde_json::from_value::<DeletedPayload>(event.data) {
            Ok(payload) => users::soft_delete_user(&state.db, &payload.id).await.map(|found| {
                info!(user_id = %payload.id, found, "User soft-deleted");
            }),
            Err(e) => {
                warn!(error = %e, "Malformed deletion payload");
                return Ok(Json(WebhookResponse::ignored(Some(event.event_type), "malformed user data")));
            }
        },
        other => {
            info!(event_type = other, "Unhandled identity event type, ignoring");
            return Ok(Json(WebhookResponse::ignored(Some(event.event_type), "unhandled event type")));
        }
    };

    match outcome {
        Ok(()) => Ok(Json(WebhookResponse::ok(event.event_type))),
        Err(e) => {
            error!(event_type = %event.event_type, error = %e, "Identity sync failed");
            Ok(Json(WebhookResponse::error(event.event_type)))
        }
    }
}

/// Build identity webhook routes
pub fn identity_routes() -> Router<AppState> {
    Router::new().route("/webhooks/identity", post(identity_webhook))
}
