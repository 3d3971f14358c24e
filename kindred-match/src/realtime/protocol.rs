//! Realtime wire protocol
//!
//! JSON text frames tagged by `event`.

use chrono::{DateTime, Utc};
use kindred_common::bus::channel_key;
use kindred_common::MatchResult;
use serde::{Deserialize, Serialize};

/// Server → client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, right after the connection is registered
    ConnectionStatus {
        status: String,
        user_id: String,
        message: String,
    },
    /// A finished match, same payload as a successful status poll
    MatchResult { status: String, result: MatchResult },
    Pong { timestamp: DateTime<Utc> },
    SubscriptionConfirmed { task_id: String, channel: String },
    Error { message: String },
}

impl ServerMessage {
    pub fn connected(user_id: &str) -> Self {
        ServerMessage::ConnectionStatus {
            status: "connected".to_string(),
            user_id: user_id.to_string(),
            message: "Ready to receive match updates".to_string(),
        }
    }

    pub fn completed(result: MatchResult) -> Self {
        ServerMessage::MatchResult {
            status: "completed".to_string(),
            result,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Client → server messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    SubscribeMatch {
        #[serde(default)]
        task_id: Option<String>,
    },
}

/// Answer a client message
///
/// Stateless: neither heartbeat nor task subscription touches the registry.
pub fn respond(user_id: &str, message: ClientMessage) -> ServerMessage {
    match message {
        ClientMessage::Ping => ServerMessage::Pong { timestamp: Utc::now() },
        ClientMessage::SubscribeMatch { task_id } => match task_id.filter(|id| !id.trim().is_empty()) {
            Some(task_id) => {
                tracing::info!(user_id, task_id = %task_id, "Client subscribed to task");
                ServerMessage::SubscriptionConfirmed {
                    task_id,
                    channel: channel_key(user_id),
                }
            }
            None => ServerMessage::error("Missing task_id"),
        },
    }
}

/// Parse and answer one text frame
pub fn handle_text(user_id: &str, text: &str) -> ServerMessage {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => respond(user_id, message),
        Err(e) => ServerMessage::error(format!("Unrecognized message: {}", e)),
    }
}
