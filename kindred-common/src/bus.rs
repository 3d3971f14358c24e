//! Result Bus: per-user publish/subscribe of finished match results
//!
//! Results are published on a channel keyed by user (`match_updates_{user_id}`).
//! Subscribers register a channel pattern; a trailing `*` matches every
//! channel with that prefix, so `match_updates_*` covers all users.
//!
//! Built on `tokio::broadcast`, like [`crate::events::EventBus`]:
//! - Publishing never blocks on slow subscribers
//! - A subscriber that falls behind observes `Lagged` and keeps going
//! - Closing the bus ends every subscription with `Closed`

use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::matching::MatchResult;

/// Prefix of every per-user result channel
pub const CHANNEL_PREFIX: &str = "match_updates_";

/// Pattern matching every per-user result channel
pub const ALL_USERS_PATTERN: &str = "match_updates_*";

/// Deterministic delivery channel key for a user
pub fn channel_key(user_id: &str) -> String {
    format!("{}{}", CHANNEL_PREFIX, user_id)
}

/// Extract the user id from a result channel key
pub fn user_id_from_channel(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(CHANNEL_PREFIX)
        .filter(|user_id| !user_id.is_empty())
}

/// Result Bus errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus has been closed; no further publish or subscribe is possible
    #[error("Result bus is closed")]
    Closed,
}

/// Errors observed by a subscription while receiving
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Subscriber fell behind; this many messages were skipped
    #[error("Subscription lagged, {0} messages skipped")]
    Lagged(u64),

    /// The bus was closed
    #[error("Result bus closed")]
    Closed,
}

/// Published result together with its routing key
#[derive(Debug, Clone)]
pub struct ResultEnvelope {
    pub channel: String,
    pub user_id: String,
    pub result: Arc<MatchResult>,
}

/// Channel pattern: exact key or `prefix*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPattern {
    Exact(String),
    Prefix(String),
}

impl ChannelPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => ChannelPattern::Prefix(prefix.to_string()),
            None => ChannelPattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, channel: &str) -> bool {
        match self {
            ChannelPattern::Exact(key) => key == channel,
            ChannelPattern::Prefix(prefix) => channel.starts_with(prefix.as_str()),
        }
    }
}

/// Publish/subscribe primitive keyed by user identifier
///
/// Cloning is cheap; all clones share one underlying channel.
#[derive(Clone)]
pub struct ResultBus {
    tx: Arc<RwLock<Option<broadcast::Sender<ResultEnvelope>>>>,
    capacity: usize,
}

impl ResultBus {
    /// Create a bus buffering up to `capacity` undelivered results per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: Arc::new(RwLock::new(Some(tx))),
            capacity,
        }
    }

    /// Publish a result on its user's channel
    ///
    /// Returns the number of subscribers that received it. Zero subscribers
    /// is not an error: the result stays available through status polling.
    pub fn publish(&self, result: MatchResult) -> Result<usize, BusError> {
        let guard = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(BusError::Closed)?;

        let envelope = ResultEnvelope {
            channel: channel_key(&result.user_id),
            user_id: result.user_id.clone(),
            result: Arc::new(result),
        };

        match tx.send(envelope) {
            Ok(count) => {
                tracing::debug!(subscribers = count, "Published match result");
                Ok(count)
            }
            Err(_) => Ok(0),
        }
    }

    /// Subscribe to every channel matching `pattern`
    pub fn psubscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        let guard = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(BusError::Closed)?;
        Ok(Subscription {
            rx: tx.subscribe(),
            pattern: ChannelPattern::parse(pattern),
        })
    }

    /// Close the bus; every live subscription observes `Closed`
    pub fn close(&self) {
        let mut guard = self.tx.write().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            tracing::info!("Result bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Current number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Live pattern subscription on the Result Bus
pub struct Subscription {
    rx: broadcast::Receiver<ResultEnvelope>,
    pattern: ChannelPattern,
}

impl Subscription {
    /// Wait for the next result whose channel matches this subscription
    pub async fn recv(&mut self) -> Result<ResultEnvelope, SubscriptionError> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if self.pattern.matches(&envelope.channel) => return Ok(envelope),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(SubscriptionError::Lagged(skipped))
                }
                Err(broadcast::error::RecvError::Closed) => return Err(SubscriptionError::Closed),
            }
        }
    }

    pub fn pattern(&self) -> &ChannelPattern {
        &self.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchTier;
    use uuid::Uuid;

    fn result_for(user_id: &str) -> MatchResult {
        MatchResult {
            task_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            tier: MatchTier::Explorer,
            matches: Vec::new(),
            auto_joined_community: None,
            ai_intro_generated: false,
            introduction: None,
            profile_update_requested: false,
            processing_time_ms: 12,
        }
    }

    #[test]
    fn test_channel_key_roundtrip() {
        let key = channel_key("user_42");
        assert_eq!(key, "match_updates_user_42");
        assert_eq!(user_id_from_channel(&key), Some("user_42"));
        assert_eq!(user_id_from_channel("match_updates_"), None);
        assert_eq!(user_id_from_channel("other_user_42"), None);
    }

    #[test]
    fn test_pattern_matching() {
        let all = ChannelPattern::parse(ALL_USERS_PATTERN);
        assert!(all.matches("match_updates_alice"));
        assert!(!all.matches("presence_alice"));

        let one = ChannelPattern::parse("match_updates_alice");
        assert!(one.matches("match_updates_alice"));
        assert!(!one.matches("match_updates_alice2"));
    }

    #[tokio::test]
    async fn test_wildcard_subscriber_receives_all_users() {
        let bus = ResultBus::new(16);
        let mut sub = bus.psubscribe(ALL_USERS_PATTERN).unwrap();

        assert_eq!(bus.publish(result_for("alice")).unwrap(), 1);
        assert_eq!(bus.publish(result_for("bob")).unwrap(), 1);

        assert_eq!(sub.recv().await.unwrap().user_id, "alice");
        let second = sub.recv().await.unwrap();
        assert_eq!(second.user_id, "bob");
        assert_eq!(second.channel, "match_updates_bob");
    }

    #[tokio::test]
    async fn test_exact_subscriber_filters_other_users() {
        let bus = ResultBus::new(16);
        let mut sub = bus.psubscribe("match_updates_bob").unwrap();

        bus.publish(result_for("alice")).unwrap();
        bus.publish(result_for("bob")).unwrap();

        assert_eq!(sub.recv().await.unwrap().user_id, "bob");
    }

    #[test]
    fn test_publish_without_subscribers_is_not_an_error() {
        let bus = ResultBus::new(4);
        assert_eq!(bus.publish(result_for("alice")), Ok(0));
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let bus = ResultBus::new(4);
        let mut sub = bus.psubscribe(ALL_USERS_PATTERN).unwrap();

        bus.close();

        assert!(bus.is_closed());
        assert_eq!(sub.recv().await.unwrap_err(), SubscriptionError::Closed);
        assert_eq!(bus.publish(result_for("alice")), Err(BusError::Closed));
        assert!(bus.psubscribe(ALL_USERS_PATTERN).is_err());
    }
}
