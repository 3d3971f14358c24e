//! Connection Registry
//!
//! Maps each user to the set of live connections opened under that identity.
//! A user may hold several connections (tabs, devices); a user with none has
//! no entry at all.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::gateway::GatewayError;
use super::protocol::ServerMessage;

/// One live realtime connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub connection_id: Uuid,
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
}

struct ConnectionEntry {
    connection: Connection,
    sender: mpsc::Sender<ServerMessage>,
}

/// Outcome of fanning one message out to a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    /// Connections removed because the send failed or timed out
    pub evicted: usize,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    users: RwLock<HashMap<String, HashMap<Uuid, ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection under `user_id`
    ///
    /// Messages for the connection are pushed into `sender`; the caller owns
    /// the receiving end and forwards it to the socket.
    pub async fn register(
        &self,
        user_id: &str,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<Connection, GatewayError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(GatewayError::InvalidConnection("user_id is required".to_string()));
        }

        let connection = Connection {
            connection_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            connected_at: Utc::now(),
        };

        let mut users = self.users.write().await;
        let set = users.entry(connection.user_id.clone()).or_default();
        set.insert(
            connection.connection_id,
            ConnectionEntry {
                connection: connection.clone(),
                sender,
            },
        );

        info!(
            user_id = %connection.user_id,
            connection_id = %connection.connection_id,
            user_connections = set.len(),
            "Realtime connection registered"
        );
        Ok(connection)
    }

    /// Remove a connection; unknown ids are ignored
    ///
    /// Returns true if the connection was present.
    pub async fn unregister(&self, user_id: &str, connection_id: Uuid) -> bool {
        let mut users = self.users.write().await;
        let removed = remove_entry(&mut users, user_id, connection_id);
        if removed {
            info!(user_id, connection_id = %connection_id, "Realtime connection unregistered");
        }
        removed
    }

    /// Send `message` to every live connection of `user_id`
    ///
    /// Sends run concurrently, each bounded by `timeout`. A connection whose
    /// send fails or times out is evicted; the others are unaffected.
    pub async fn deliver(&self, user_id: &str, message: ServerMessage, timeout: Duration) -> DeliveryReport {
        let targets: Vec<(Uuid, mpsc::Sender<ServerMessage>)> = {
            let users = self.users.read().await;
            match users.get(user_id) {
                Some(set) => set
                    .iter()
                    .map(|(id, entry)| (*id, entry.sender.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut report = DeliveryReport {
            attempted: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            return report;
        }

        let sends = targets.into_iter().map(|(connection_id, sender)| {
            let message = message.clone();
            async move {
                let ok = sender.send_timeout(message, timeout).await.is_ok();
                (connection_id, ok)
            }
        });
        let outcomes = join_all(sends).await;

        let failed: Vec<Uuid> = outcomes
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(connection_id, _)| *connection_id)
            .collect();
        report.delivered = outcomes.len() - failed.len();

        if !failed.is_empty() {
            let mut users = self.users.write().await;
            for connection_id in failed {
                if remove_entry(&mut users, user_id, connection_id) {
                    warn!(user_id, connection_id = %connection_id, "Delivery failed, connection evicted");
                    report.evicted += 1;
                }
            }
        }

        debug!(user_id, ?report, "Fan-out complete");
        report
    }

    /// Live connections of one user
    pub async fn connections_for(&self, user_id: &str) -> Vec<Connection> {
        let users = self.users.read().await;
        users
            .get(user_id)
            .map(|set| set.values().map(|entry| entry.connection.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn has_user(&self, user_id: &str) -> bool {
        self.users.read().await.contains_key(user_id)
    }

    /// Total live connections across all users
    pub async fn connection_count(&self) -> usize {
        self.users.read().await.values().map(HashMap::len).sum()
    }

    /// Users with at least one live connection
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

fn remove_entry(
    users: &mut HashMap<String, HashMap<Uuid, ConnectionEntry>>,
    user_id: &str,
    connection_id: Uuid,
) -> bool {
    let Some(set) = users.get_mut(user_id) else {
        return false;
    };
    let removed = set.remove(&connection_id).is_some();
    if set.is_empty() {
        users.remove(user_id);
    }
    removed
}
