//! Task Orchestrator
//!
//! `submit` records a Pending task and queues it without waiting on the
//! pipeline. A dispatcher hands queued tasks to a bounded worker pool
//! (semaphore permits); excess submissions wait in the bounded queue and are
//! rejected once it is full.

pub mod pipeline;

pub use pipeline::{MatchPipeline, PipelineError, QueuedTask};

use chrono::Utc;
use kindred_common::bus::channel_key;
use kindred_common::events::MatchEvent;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::models::{MatchTask, Submission, TaskError, TaskErrorKind};

/// Submission-time errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    /// Bounded task queue is full; the task was recorded as Failed(Rejected)
    #[error("Task queue is full")]
    QueueFull { task_id: Uuid },

    #[error("Orchestrator is shutting down")]
    ShuttingDown { task_id: Uuid },

    #[error("Storage error: {0}")]
    Storage(#[from] kindred_common::Error),
}

/// Handle returned to the submitter
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub task_id: Uuid,
    pub estimated_time_ms: u64,
    /// Result Bus / realtime channel key for this user
    pub delivery_channel_key: String,
}

/// Owns the task queue and the worker pool
#[derive(Clone)]
pub struct TaskOrchestrator {
    pipeline: Arc<MatchPipeline>,
    queue_tx: mpsc::Sender<QueuedTask>,
}

impl TaskOrchestrator {
    /// Create the queue and spawn the dispatcher
    ///
    /// The dispatcher stops when `shutdown` is cancelled; tasks still queued
    /// at that point stay Pending and are failed by stale-task recovery on
    /// the next start.
    pub fn start(pipeline: Arc<MatchPipeline>, shutdown: CancellationToken) -> Self {
        let config = pipeline.config();
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let workers = config.workers.max(1);

        tokio::spawn(dispatch(pipeline.clone(), queue_rx, workers, shutdown));

        info!(workers, queue_capacity = config.queue_capacity, "Task orchestrator started");

        Self { pipeline, queue_tx }
    }

    /// Record a Pending task and queue it
    ///
    /// Never waits on pipeline work.
    pub async fn submit(&self, mut submission: Submission) -> Result<SubmitReceipt, OrchestratorError> {
        submission.normalize();
        if let Some(field) = submission.missing_field() {
            return Err(OrchestratorError::InvalidSubmission(format!("{} is required", field)));
        }

        let config = self.pipeline.config();
        let task = MatchTask::new(submission.user_id.clone(), config.hard_limit());
        let enqueued_at = Instant::now();

        db::tasks::insert_task(self.pipeline.db(), &task, config.save_retry_max_wait_ms).await?;

        let receipt = SubmitReceipt {
            task_id: task.task_id,
            estimated_time_ms: config.estimated_time_ms,
            delivery_channel_key: channel_key(&submission.user_id),
        };
        let user_id = submission.user_id.clone();

        let job = QueuedTask {
            task_id: task.task_id,
            submission,
            enqueued_at,
        };

        match self.queue_tx.try_send(job) {
            Ok(()) => {
                info!(task_id = %task.task_id, user_id = %user_id, "Match task queued");
                self.pipeline.event_bus().emit_lossy(MatchEvent::TaskQueued {
                    task_id: task.task_id,
                    user_id,
                    timestamp: Utc::now(),
                });
                Ok(receipt)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(task_id = %task.task_id, "Task queue full, rejecting submission");
                let error = TaskError::new(TaskErrorKind::Rejected, None, "task queue is full");
                self.pipeline.mark_failed(task.task_id, &user_id, error).await;
                Err(OrchestratorError::QueueFull { task_id: task.task_id })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let error = TaskError::new(TaskErrorKind::Rejected, None, "service is shutting down");
                self.pipeline.mark_failed(task.task_id, &user_id, error).await;
                Err(OrchestratorError::ShuttingDown { task_id: task.task_id })
            }
        }
    }

    /// Current task state, if the task exists
    pub async fn status(&self, task_id: Uuid) -> Result<Option<MatchTask>, OrchestratorError> {
        Ok(db::tasks::load_task(self.pipeline.db(), task_id).await?)
    }

    /// Tasks waiting for a worker
    pub fn queue_depth(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    pub fn pipeline(&self) -> &Arc<MatchPipeline> {
        &self.pipeline
    }
}

/// Hand queued tasks to workers, at most `workers` at a time
async fn dispatch(
    pipeline: Arc<MatchPipeline>,
    mut queue_rx: mpsc::Receiver<QueuedTask>,
    workers: usize,
    shutdown: CancellationToken,
) {
    let slots = Arc::new(Semaphore::new(workers));

    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = queue_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let _permit = permit;
            pipeline.run_task(job).await;
        });
    }

    info!("Task dispatcher stopped");
}
