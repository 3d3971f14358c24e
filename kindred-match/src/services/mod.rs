//! Matching services
//!
//! External collaborators (language model, data store) sit behind traits;
//! the matcher, decision engine and orchestrator are built on them.

pub mod data_store;
pub mod decision_engine;
pub mod hybrid_matcher;
pub mod language_model;
pub mod pii;
pub mod task_orchestrator;

pub use data_store::{DataStore, DataStoreError, SqliteDataStore};
pub use decision_engine::DecisionEngine;
pub use hybrid_matcher::HybridMatcher;
pub use language_model::{LanguageModel, LanguageModelError, OpenAiClient};
pub use task_orchestrator::{MatchPipeline, OrchestratorError, TaskOrchestrator};
