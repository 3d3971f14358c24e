//! Match task state machine
//!
//! A task progresses Pending → Running(step) … → Succeeded | Failed.
//! Terminal states are final: once Succeeded or Failed a task never
//! transitions again.

use chrono::{DateTime, Utc};
use kindred_common::MatchResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Pipeline step currently in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    /// Strip PII and enrich tags
    Sanitize,
    /// Produce the interest vector
    Embed,
    /// Hybrid Matcher
    Match,
    /// Decision Engine (may auto-join)
    Decide,
    /// Store result and publish on the Result Bus
    Publish,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Sanitize => "sanitize",
            PipelineStep::Embed => "embed",
            PipelineStep::Match => "match",
            PipelineStep::Decide => "decide",
            PipelineStep::Publish => "publish",
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classification surfaced to pollers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// Language model or data store call failed
    CollaboratorUnavailable,
    /// Hard wall-clock budget exhausted
    DeadlineExceeded,
    /// Task never ran (queue full or shutting down)
    Rejected,
    Internal,
}

impl TaskErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskErrorKind::CollaboratorUnavailable => "collaborator_unavailable",
            TaskErrorKind::DeadlineExceeded => "deadline_exceeded",
            TaskErrorKind::Rejected => "rejected",
            TaskErrorKind::Internal => "internal",
        }
    }
}

/// Terminal failure payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    /// Step in flight when the task failed
    pub step: Option<PipelineStep>,
    /// Human-readable cause
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, step: Option<PipelineStep>, message: impl Into<String>) -> Self {
        Self {
            kind,
            step,
            message: message.into(),
        }
    }

    pub fn deadline_exceeded(step: Option<PipelineStep>, limit: Duration) -> Self {
        Self::new(
            TaskErrorKind::DeadlineExceeded,
            step,
            format!("task exceeded hard limit of {} ms", limit.as_millis()),
        )
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step {
            Some(step) => write!(f, "{} during {}: {}", self.kind.as_str(), step, self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

/// Observable task status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running { step: PipelineStep },
    Succeeded { result: MatchResult },
    Failed { error: TaskError },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded { .. } | TaskStatus::Failed { .. })
    }

    /// Short state name, stored alongside the JSON payload for querying
    pub fn name(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running { .. } => "running",
            TaskStatus::Succeeded { .. } => "succeeded",
            TaskStatus::Failed { .. } => "failed",
        }
    }

    /// Step name reported to pollers while the task is still processing
    pub fn step_name(&self) -> Option<&'static str> {
        match self {
            TaskStatus::Pending => Some("queued"),
            TaskStatus::Running { step } => Some(step.as_str()),
            _ => None,
        }
    }
}

/// One match task (owned by exactly one orchestrator worker)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchTask {
    pub task_id: Uuid,
    pub user_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// created_at + hard limit
    pub deadline: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchTask {
    /// New Pending task with a fresh id and a deadline `hard_limit` from now
    pub fn new(user_id: impl Into<String>, hard_limit: Duration) -> Self {
        let now = Utc::now();
        let budget = chrono::Duration::from_std(hard_limit)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX / 1_000_000));
        Self {
            task_id: Uuid::new_v4(),
            user_id: user_id.into(),
            status: TaskStatus::Pending,
            created_at: now,
            deadline: now + budget,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to a new status
    ///
    /// Returns false (and leaves the task untouched) if the task is already
    /// terminal.
    pub fn transition_to(&mut self, status: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }
}
