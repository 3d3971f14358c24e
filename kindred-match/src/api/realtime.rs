//! WebSocket endpoint for per-user result push
//!
//! GET /ws?user_id=... (or `x-user-id` header)

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    error::{ApiError, ApiResult},
    realtime::protocol,
    AppState,
};

/// Header carrying the user identity when it is not in the query string
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub user_id: Option<String>,
}

/// Identity from the query string, else from the `x-user-id` header
pub fn connection_identity(params: &ConnectParams, headers: &HeaderMap) -> Option<String> {
    let non_blank = |id: &str| {
        let id = id.trim();
        (!id.is_empty()).then(|| id.to_string())
    };

    params.user_id.as_deref().and_then(non_blank).or_else(|| {
        headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(non_blank)
    })
}

/// GET /ws
///
/// Connections without an identity are refused before the upgrade.
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    upgrade: Option<WebSocketUpgrade>,
) -> ApiResult<Response> {
    let user_id = connection_identity(&params, &headers)
        .ok_or_else(|| ApiError::Unauthorized("user_id is required".to_string()))?;

    let upgrade = upgrade.ok_or_else(|| ApiError::BadRequest("WebSocket upgrade required".to_string()))?;

    Ok(upgrade.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let handle = match state.gateway.connect(&user_id).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Rejecting realtime connection");
            return;
        }
    };
    let connection = handle.connection;
    let replies = handle.sender;
    let mut outbound = handle.outbound;

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize realtime message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let reply = protocol::handle_text(&connection.user_id, &text);
                if replies.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %connection.connection_id, error = %e, "WebSocket read error");
                break;
            }
        }
    }

    state.gateway.disconnect(&connection).await;
    writer.abort();
    info!(
        user_id = %connection.user_id,
        connection_id = %connection.connection_id,
        "Realtime connection closed"
    );
}

/// Build realtime routes
pub fn realtime_routes() -> Router<AppState> {
    Router::new().route("/ws", get(websocket_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_identity_prefers_query() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("from-header"));
        let params = ConnectParams {
            user_id: Some("from-query".to_string()),
        };
        assert_eq!(connection_identity(&params, &headers).as_deref(), Some("from-query"));
    }

    #[test]
    fn test_identity_falls_back_to_header() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("u-7"));
        assert_eq!(
            connection_identity(&ConnectParams::default(), &headers).as_deref(),
            Some("u-7")
        );
    }

    #[test]
    fn test_blank_identity_is_none() {
        let params = ConnectParams {
            user_id: Some("   ".to_string()),
        };
        assert_eq!(connection_identity(&params, &HeaderMap::new()), None);
    }
}
