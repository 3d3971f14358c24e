//! Per-task match pipeline: sanitize → embed → match → decide → publish
//!
//! Each step records Running(step) before it starts. The whole sequence runs
//! under the hard deadline; the soft deadline only trims best-effort work
//! (LM sanitization, the introduction).

use chrono::Utc;
use kindred_common::bus::ResultBus;
use kindred_common::events::{EventBus, MatchEvent};
use kindred_common::MatchResult;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db;
use crate::models::{PipelineStep, Submission, TaskError, TaskErrorKind, TaskStatus};
use crate::services::data_store::DataStore;
use crate::services::decision_engine::{DecisionContext, DecisionEngine};
use crate::services::hybrid_matcher::HybridMatcher;
use crate::services::language_model::{embedding_payload, LanguageModel};
use crate::services::pii::scrub_pii;

/// Step failure that ends the task
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{step} collaborator unavailable: {message}")]
    CollaboratorUnavailable { step: PipelineStep, message: String },

    #[error("deadline exceeded during {step:?}")]
    DeadlineExceeded { step: Option<PipelineStep> },

    #[error("internal error: {message}")]
    Internal { step: Option<PipelineStep>, message: String },
}

impl PipelineError {
    fn collaborator(step: PipelineStep, err: impl std::fmt::Display) -> Self {
        PipelineError::CollaboratorUnavailable {
            step,
            message: err.to_string(),
        }
    }

    pub fn to_task_error(&self, hard_limit: std::time::Duration) -> TaskError {
        match self {
            PipelineError::CollaboratorUnavailable { step, message } => {
                TaskError::new(TaskErrorKind::CollaboratorUnavailable, Some(*step), message.clone())
            }
            PipelineError::DeadlineExceeded { step } => TaskError::deadline_exceeded(*step, hard_limit),
            PipelineError::Internal { step, message } => {
                TaskError::new(TaskErrorKind::Internal, *step, message.clone())
            }
        }
    }
}

/// Work item handed from the ingestion path to a worker
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: Uuid,
    pub submission: Submission,
    /// When the task entered Pending; both deadlines count from here
    pub enqueued_at: Instant,
}

/// Pipeline output once the Succeeded write has been attempted
struct Completion {
    result: MatchResult,
    /// False when the task was already terminal
    recorded: bool,
}

/// Everything a worker needs to run one task
pub struct MatchPipeline {
    db: SqlitePool,
    language_model: Arc<dyn LanguageModel>,
    store: Arc<dyn DataStore>,
    matcher: HybridMatcher,
    decision: DecisionEngine,
    result_bus: ResultBus,
    event_bus: EventBus,
    config: PipelineConfig,
}

impl MatchPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        language_model: Arc<dyn LanguageModel>,
        store: Arc<dyn DataStore>,
        matcher: HybridMatcher,
        decision: DecisionEngine,
        result_bus: ResultBus,
        event_bus: EventBus,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            language_model,
            store,
            matcher,
            decision,
            result_bus,
            event_bus,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Run one task to a terminal state and return that state
    pub async fn run_task(&self, job: QueuedTask) -> TaskStatus {
        let task_id = job.task_id;
        let hard_limit = self.config.hard_limit();
        let hard_deadline = job.enqueued_at + hard_limit;

        if Instant::now() >= hard_deadline {
            let error = TaskError::deadline_exceeded(None, hard_limit);
            self.mark_failed(task_id, &job.submission.user_id, error.clone()).await;
            return TaskStatus::Failed { error };
        }

        let (step_tx, step_rx) = watch::channel(None::<PipelineStep>);

        let outcome = tokio::time::timeout_at(hard_deadline, self.execute(&job, &step_tx)).await;

        match outcome {
            Ok(Ok(Completion { result, recorded })) => {
                // Outside the deadline: once Succeeded is stored the push always follows
                if recorded {
                    self.publish(&result);
                }
                TaskStatus::Succeeded { result }
            }
            Ok(Err(pipeline_error)) => {
                let error = pipeline_error.to_task_error(hard_limit);
                self.mark_failed(task_id, &job.submission.user_id, error.clone()).await;
                TaskStatus::Failed { error }
            }
            Err(_) => {
                let step = *step_rx.borrow();
                let error = PipelineError::DeadlineExceeded { step }.to_task_error(hard_limit);
                self.mark_failed(task_id, &job.submission.user_id, error.clone()).await;
                TaskStatus::Failed { error }
            }
        }
    }

    async fn execute(
        &self,
        job: &QueuedTask,
        step_tx: &watch::Sender<Option<PipelineStep>>,
    ) -> Result<Completion, PipelineError> {
        let task_id = job.task_id;
        let submission = &job.submission;
        let soft_deadline = job.enqueued_at + self.config.soft_limit();

        // Step 1: sanitize (never fails the task)
        self.enter_step(task_id, PipelineStep::Sanitize, step_tx).await?;
        let (clean_bio, tags) = self.sanitize(task_id, submission, soft_deadline).await;

        // Step 2: embed (no local fallback)
        self.enter_step(task_id, PipelineStep::Embed, step_tx).await?;
        let payload = embedding_payload(&clean_bio, &tags);
        let vector = self
            .language_model
            .embed(&payload)
            .await
            .map_err(|e| PipelineError::collaborator(PipelineStep::Embed, e))?;

        if let Err(e) = self.store.save_user_vector(&submission.user_id, &vector).await {
            warn!(task_id = %task_id, error = %e, "Failed to cache user vector");
        }

        // Step 3: match
        self.enter_step(task_id, PipelineStep::Match, step_tx).await?;
        let ranked = self
            .matcher
            .find_matches(&vector, &submission.city, &submission.timezone)
            .await
            .map_err(|e| PipelineError::collaborator(PipelineStep::Match, e))?;

        // Step 4: decide
        self.enter_step(task_id, PipelineStep::Decide, step_tx).await?;
        let context = DecisionContext {
            task_id,
            user_id: submission.user_id.clone(),
            user_bio: clean_bio,
            soft_deadline,
        };
        let mut result = self
            .decision
            .decide(&context, ranked)
            .await
            .map_err(|e| PipelineError::collaborator(PipelineStep::Decide, e))?;

        // Step 5: publish
        self.enter_step(task_id, PipelineStep::Publish, step_tx).await?;
        result.processing_time_ms = job.enqueued_at.elapsed().as_millis() as u64;
        let recorded = self.record_success(&result).await?;

        Ok(Completion { result, recorded })
    }

    /// LM sanitization with local regex fallback
    ///
    /// Falls back (keeping the original tags) on LM failure or once the soft
    /// deadline has passed.
    async fn sanitize(
        &self,
        task_id: Uuid,
        submission: &Submission,
        soft_deadline: Instant,
    ) -> (String, Vec<String>) {
        if Instant::now() < soft_deadline {
            let call = self
                .language_model
                .sanitize(&submission.raw_bio, &submission.interest_tags);

            match tokio::time::timeout_at(soft_deadline, call).await {
                Ok(Ok(profile)) => {
                    debug!(task_id = %task_id, pii_found = profile.pii_found, "Bio sanitized by language model");
                    let tags = if profile.enriched_tags.is_empty() {
                        submission.interest_tags.clone()
                    } else {
                        profile.enriched_tags
                    };
                    return (profile.sanitized_bio, tags);
                }
                Ok(Err(e)) => {
                    warn!(task_id = %task_id, error = %e, "Sanitize failed, using local PII scrub");
                }
                Err(_) => {
                    warn!(task_id = %task_id, "Sanitize hit soft deadline, using local PII scrub");
                }
            }
        } else {
            warn!(task_id = %task_id, "Soft deadline already passed, using local PII scrub");
        }

        let scrubbed = scrub_pii(&submission.raw_bio);
        (scrubbed.text, submission.interest_tags.clone())
    }

    /// Record the step as current, locally and in the status store
    async fn enter_step(
        &self,
        task_id: Uuid,
        step: PipelineStep,
        step_tx: &watch::Sender<Option<PipelineStep>>,
    ) -> Result<(), PipelineError> {
        step_tx.send_replace(Some(step));
        debug!(task_id = %task_id, step = %step, "Entering pipeline step");

        let written = db::tasks::update_status(
            &self.db,
            task_id,
            &TaskStatus::Running { step },
            self.config.save_retry_max_wait_ms,
        )
        .await
        .map_err(|e| PipelineError::Internal {
            step: Some(step),
            message: format!("failed to record progress: {}", e),
        })?;

        if !written {
            return Err(PipelineError::Internal {
                step: Some(step),
                message: "task is already terminal".to_string(),
            });
        }

        self.event_bus.emit_lossy(MatchEvent::StepStarted {
            task_id,
            step: step.as_str().to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Mark Succeeded unless the task is already terminal
    ///
    /// Returns false when a duplicate completion was absorbed.
    async fn record_success(&self, result: &MatchResult) -> Result<bool, PipelineError> {
        let written = db::tasks::update_status(
            &self.db,
            result.task_id,
            &TaskStatus::Succeeded { result: result.clone() },
            self.config.save_retry_max_wait_ms,
        )
        .await
        .map_err(|e| PipelineError::Internal {
            step: Some(PipelineStep::Publish),
            message: format!("failed to store result: {}", e),
        })?;

        if !written {
            info!(task_id = %result.task_id, "Task already terminal, duplicate completion absorbed");
            return Ok(false);
        }

        info!(
            task_id = %result.task_id,
            user_id = %result.user_id,
            tier = %result.tier,
            matches = result.matches.len(),
            processing_time_ms = result.processing_time_ms,
            "Match task succeeded"
        );

        self.event_bus.emit_lossy(MatchEvent::TaskSucceeded {
            task_id: result.task_id,
            user_id: result.user_id.clone(),
            tier: result.tier,
            match_count: result.matches.len(),
            processing_time_ms: result.processing_time_ms,
            timestamp: Utc::now(),
        });

        Ok(true)
    }

    /// Push a stored result onto the Result Bus
    fn publish(&self, result: &MatchResult) {
        match self.result_bus.publish(result.clone()) {
            Ok(subscribers) => debug!(task_id = %result.task_id, subscribers, "Result published"),
            Err(e) => warn!(task_id = %result.task_id, error = %e, "Result bus unavailable, result is poll-only"),
        }
    }

    /// Move a task to Failed unless it is already terminal
    pub async fn mark_failed(&self, task_id: Uuid, user_id: &str, error: TaskError) {
        mark_failed(&self.db, &self.event_bus, &self.config, task_id, user_id, error).await;
    }
}

/// Guarded Failed transition shared by workers and the ingestion path
pub(crate) async fn mark_failed(
    pool: &SqlitePool,
    event_bus: &EventBus,
    config: &PipelineConfig,
    task_id: Uuid,
    user_id: &str,
    error: TaskError,
) {
    let status = TaskStatus::Failed { error: error.clone() };

    match db::tasks::update_status(pool, task_id, &status, config.save_retry_max_wait_ms).await {
        Ok(true) => {
            error!(task_id = %task_id, user_id = %user_id, error = %error, "Match task failed");
            event_bus.emit_lossy(MatchEvent::TaskFailed {
                task_id,
                user_id: user_id.to_string(),
                kind: error.kind.as_str().to_string(),
                step: error.step.map(|step| step.as_str().to_string()),
                message: error.message,
                timestamp: Utc::now(),
            });
        }
        Ok(false) => {
            debug!(task_id = %task_id, "Task already terminal, failure not recorded");
        }
        Err(e) => {
            error!(task_id = %task_id, error = %e, "Failed to record task failure");
        }
    }
}
