//! Realtime Gateway
//!
//! Holds one wildcard subscription to the Result Bus for the whole process
//! and fans each result out to the live connections of its user. Each fan-out
//! runs as its own task so a stalled connection never holds up the loop.
//! Results for users without a connection are dropped here; they remain
//! available by status polling.

use kindred_common::bus::{ResultBus, ResultEnvelope, Subscription, SubscriptionError, ALL_USERS_PATTERN};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::protocol::ServerMessage;
use super::registry::{Connection, ConnectionRegistry, DeliveryReport};
use crate::config::RealtimeConfig;
use crate::utils::{retry_with_backoff, RetryPolicy};

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connection attempt without a usable identity
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// Result Bus subscription could not be (re-)established
    #[error("Result bus unavailable: {0}")]
    BusUnavailable(String),
}

/// A registered connection and both ends of its outbound buffer
///
/// `sender` lets the socket handler queue direct replies behind any pushed
/// results; `outbound` is drained by the socket writer.
pub struct ConnectionHandle {
    pub connection: Connection,
    pub sender: mpsc::Sender<ServerMessage>,
    pub outbound: mpsc::Receiver<ServerMessage>,
}

pub struct RealtimeGateway {
    registry: Arc<ConnectionRegistry>,
    config: RealtimeConfig,
}

impl RealtimeGateway {
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Subscribe to every user channel and start the fan-out loop
    ///
    /// Fails only if the initial subscription cannot be made. The loop runs
    /// until `shutdown` is cancelled or resubscription is exhausted.
    pub fn start(
        self: &Arc<Self>,
        result_bus: ResultBus,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, GatewayError> {
        let subscription = result_bus
            .psubscribe(ALL_USERS_PATTERN)
            .map_err(|e| GatewayError::BusUnavailable(e.to_string()))?;

        info!(pattern = ALL_USERS_PATTERN, "Realtime gateway subscribed to result bus");

        let gateway = Arc::clone(self);
        Ok(tokio::spawn(async move {
            gateway.run(result_bus, subscription, shutdown).await;
        }))
    }

    async fn run(self: Arc<Self>, result_bus: ResultBus, mut subscription: Subscription, shutdown: CancellationToken) {
        let mut deliveries = JoinSet::new();

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(finished) = deliveries.join_next(), if !deliveries.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "Result delivery task failed");
                    }
                    continue;
                }
                received = subscription.recv() => received,
            };

            match received {
                Ok(envelope) => {
                    let gateway = Arc::clone(&self);
                    deliveries.spawn(async move {
                        gateway.deliver_result(&envelope).await;
                    });
                }
                Err(SubscriptionError::Lagged(skipped)) => {
                    warn!(skipped, "Realtime gateway lagged, results skipped (still pollable)");
                }
                Err(SubscriptionError::Closed) => {
                    warn!("Result bus subscription closed, resubscribing");
                    let resubscribed = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        resubscribed = self.resubscribe(&result_bus) => resubscribed,
                    };
                    match resubscribed {
                        Ok(fresh) => subscription = fresh,
                        Err(e) => {
                            error!(error = %e, "Realtime gateway giving up on result bus");
                            break;
                        }
                    }
                }
            }
        }

        deliveries.shutdown().await;
        info!("Realtime gateway stopped");
    }

    async fn resubscribe(&self, result_bus: &ResultBus) -> Result<Subscription, GatewayError> {
        let policy = RetryPolicy::attempts(
            self.config.resubscribe_attempts,
            Duration::from_millis(self.config.resubscribe_initial_backoff_ms),
            Duration::from_millis(self.config.resubscribe_max_backoff_ms),
        );

        retry_with_backoff(
            "result_bus_resubscribe",
            &policy,
            |_| true,
            || async { result_bus.psubscribe(ALL_USERS_PATTERN) },
        )
        .await
        .map_err(|e| GatewayError::BusUnavailable(e.to_string()))
    }

    /// Push one published result to its user's live connections
    pub async fn deliver_result(&self, envelope: &ResultEnvelope) -> DeliveryReport {
        if !self.registry.has_user(&envelope.user_id).await {
            info!(
                user_id = %envelope.user_id,
                task_id = %envelope.result.task_id,
                "No live connection for user, result available by polling only"
            );
            return DeliveryReport::default();
        }

        let message = ServerMessage::completed(envelope.result.as_ref().clone());
        let report = self
            .registry
            .deliver(&envelope.user_id, message, self.config.delivery_timeout())
            .await;

        debug!(
            user_id = %envelope.user_id,
            task_id = %envelope.result.task_id,
            delivered = report.delivered,
            evicted = report.evicted,
            "Match result pushed"
        );
        report
    }

    /// Register a connection and queue its connection acknowledgement
    pub async fn connect(&self, user_id: &str) -> Result<ConnectionHandle, GatewayError> {
        let (sender, outbound) = mpsc::channel(self.config.connection_buffer.max(1));
        let ack = ServerMessage::connected(user_id.trim());

        let connection = self.registry.register(user_id, sender.clone()).await?;
        if sender.try_send(ack).is_err() {
            warn!(connection_id = %connection.connection_id, "Could not queue connection acknowledgement");
        }

        Ok(ConnectionHandle {
            connection,
            sender,
            outbound,
        })
    }

    pub async fn disconnect(&self, connection: &Connection) {
        self.registry
            .unregister(&connection.user_id, connection.connection_id)
            .await;
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.connection_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_common::{MatchResult, MatchTier};
    use uuid::Uuid;

    fn result_for(user_id: &str) -> MatchResult {
        MatchResult {
            task_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            tier: MatchTier::Fallback,
            matches: Vec::new(),
            auto_joined_community: None,
            ai_intro_generated: false,
            introduction: None,
            profile_update_requested: true,
            processing_time_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_connect_queues_acknowledgement() {
        let gateway = RealtimeGateway::new(RealtimeConfig::default());
        let mut handle = gateway.connect("alice").await.unwrap();

        assert_eq!(handle.connection.user_id, "alice");
        assert_eq!(handle.outbound.recv().await, Some(ServerMessage::connected("alice")));
        assert_eq!(gateway.connection_count().await, 1);

        gateway.disconnect(&handle.connection).await;
        assert_eq!(gateway.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_connect_without_identity_fails() {
        let gateway = RealtimeGateway::new(RealtimeConfig::default());
        assert!(matches!(
            gateway.connect("").await,
            Err(GatewayError::InvalidConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_published_result_reaches_only_its_user() {
        let bus = ResultBus::new(16);
        let gateway = Arc::new(RealtimeGateway::new(RealtimeConfig::default()));
        let shutdown = CancellationToken::new();
        let handle = gateway.start(bus.clone(), shutdown.clone()).unwrap();

        let mut alice = gateway.connect("alice").await.unwrap();
        let mut bob = gateway.connect("bob").await.unwrap();
        alice.outbound.recv().await.unwrap();
        bob.outbound.recv().await.unwrap();

        let result = result_for("alice");
        bus.publish(result.clone()).unwrap();

        let pushed = tokio::time::timeout(Duration::from_secs(1), alice.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed, ServerMessage::completed(result));
        assert!(bob.outbound.try_recv().is_err());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_connection_does_not_delay_other_users() {
        let bus = ResultBus::new(16);
        let config = RealtimeConfig {
            connection_buffer: 1,
            delivery_timeout_ms: 2_000,
            ..Default::default()
        };
        let gateway = Arc::new(RealtimeGateway::new(config));
        let shutdown = CancellationToken::new();
        let handle = gateway.start(bus.clone(), shutdown.clone()).unwrap();

        // The unread acknowledgement fills the one-slot buffer
        let _slow = gateway.connect("slow").await.unwrap();
        let mut fast = gateway.connect("fast").await.unwrap();
        fast.outbound.recv().await.unwrap();

        bus.publish(result_for("slow")).unwrap();
        let result = result_for("fast");
        bus.publish(result.clone()).unwrap();

        let pushed = tokio::time::timeout(Duration::from_millis(500), fast.outbound.recv())
            .await
            .expect("fast user waited on the stalled connection")
            .unwrap();
        assert_eq!(pushed, ServerMessage::completed(result));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_exits_when_bus_stays_closed() {
        let bus = ResultBus::new(4);
        let config = RealtimeConfig {
            resubscribe_attempts: 2,
            resubscribe_initial_backoff_ms: 1,
            resubscribe_max_backoff_ms: 2,
            ..Default::default()
        };
        let gateway = Arc::new(RealtimeGateway::new(config));
        let handle = gateway.start(bus.clone(), CancellationToken::new()).unwrap();

        bus.close();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_on_closed_bus_fails() {
        let bus = ResultBus::new(4);
        bus.close();
        let gateway = Arc::new(RealtimeGateway::new(RealtimeConfig::default()));
        assert!(matches!(
            gateway.start(bus, CancellationToken::new()),
            Err(GatewayError::BusUnavailable(_))
        ));
    }
}
