//! Data models for kindred-match

pub mod submission;
pub mod task;

pub use submission::Submission;
pub use task::{MatchTask, PipelineStep, TaskError, TaskErrorKind, TaskStatus};
