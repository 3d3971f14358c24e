//! Lifecycle event types and EventBus
//!
//! Task lifecycle events are an operator feed (SSE). They are distinct from
//! the Result Bus, which carries finished results to end users.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::matching::MatchTier;

/// Kindred lifecycle events
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MatchEvent {
    /// Submission accepted and queued for a worker
    TaskQueued {
        task_id: Uuid,
        user_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A pipeline step began
    StepStarted {
        task_id: Uuid,
        /// Step name ("sanitize", "embed", "match", "decide", "publish")
        step: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Task reached Succeeded
    TaskSucceeded {
        task_id: Uuid,
        user_id: String,
        tier: MatchTier,
        match_count: usize,
        processing_time_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Task reached Failed
    TaskFailed {
        task_id: Uuid,
        user_id: String,
        /// Error kind ("collaborator_unavailable", "deadline_exceeded", ...)
        kind: String,
        /// Step in flight when the task failed, if any
        step: Option<String>,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl MatchEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            MatchEvent::TaskQueued { .. } => "TaskQueued",
            MatchEvent::StepStarted { .. } => "StepStarted",
            MatchEvent::TaskSucceeded { .. } => "TaskSucceeded",
            MatchEvent::TaskFailed { .. } => "TaskFailed",
        }
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            MatchEvent::TaskQueued { task_id, .. }
            | MatchEvent::StepStarted { task_id, .. }
            | MatchEvent::TaskSucceeded { task_id, .. }
            | MatchEvent::TaskFailed { task_id, .. } => *task_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central distribution bus for lifecycle events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
///
/// # Examples
///
/// ```
/// use kindred_common::events::{EventBus, MatchEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(MatchEvent::TaskQueued {
///     task_id: uuid::Uuid::new_v4(),
///     user_id: "user_1".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MatchEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: MatchEvent) -> Result<usize, broadcast::error::SendError<MatchEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MatchEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = MatchEvent::StepStarted {
            task_id: Uuid::nil(),
            step: "embed".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StepStarted");
        assert_eq!(json["step"], "embed");
        assert_eq!(event.event_type(), "StepStarted");
    }

    #[test]
    fn test_emit_without_subscribers_errors_but_lossy_does_not() {
        let bus = EventBus::new(10);
        let event = MatchEvent::TaskQueued {
            task_id: Uuid::new_v4(),
            user_id: "u".to_string(),
            timestamp: chrono::Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let task_id = Uuid::new_v4();

        for step in ["sanitize", "embed"] {
            bus.emit_lossy(MatchEvent::StepStarted {
                task_id,
                step: step.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }

        match rx.recv().await.unwrap() {
            MatchEvent::StepStarted { step, .. } => assert_eq!(step, "sanitize"),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(rx.recv().await.unwrap().task_id(), task_id);
    }
}
