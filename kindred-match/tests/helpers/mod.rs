//! Shared fixtures for kindred-match integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use kindred_common::Introduction;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use kindred_match::config::ServiceConfig;
use kindred_match::db;
use kindred_match::db::communities::CommunityRecord;
use kindred_match::models::{MatchTask, Submission};
use kindred_match::services::language_model::{IntroductionRequest, SanitizedProfile};
use kindred_match::services::{LanguageModel, LanguageModelError};
use kindred_match::AppState;

pub const CITY: &str = "Austin";
pub const TIMEZONE: &str = "America/Chicago";

/// Unit vector the scripted model returns for every embed call
pub const USER_VECTOR: [f32; 3] = [1.0, 0.0, 0.0];

/// Fresh single-connection in-memory database with the schema applied
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_schema(&pool).await.unwrap();
    pool
}

/// File-backed database with a multi-connection pool
///
/// Connections contend in SQLite itself; keep `dir` alive for the test.
pub async fn file_pool(dir: &tempfile::TempDir, max_connections: u32) -> SqlitePool {
    db::init_database_pool(&dir.path().join("kindred.db"), max_connections)
        .await
        .unwrap()
}

/// Insert an active community in the test locality with its vector
pub async fn seed_community(pool: &SqlitePool, id: &str, category: &str, members: i64, vector: &[f32]) {
    seed_community_in(pool, id, category, members, vector, CITY, TIMEZONE).await;
}

pub async fn seed_community_in(
    pool: &SqlitePool,
    id: &str,
    category: &str,
    members: i64,
    vector: &[f32],
    city: &str,
    timezone: &str,
) {
    let record = CommunityRecord {
        community_id: id.to_string(),
        name: format!("{} community", id),
        category: category.to_string(),
        description: format!("People who love {}", category),
        city: city.to_string(),
        timezone: timezone.to_string(),
        member_count: members,
        is_active: true,
    };
    db::communities::upsert_community(pool, &record).await.unwrap();
    db::vectors::upsert_community_vector(pool, id, vector).await.unwrap();
}

/// Vector with cosine similarity `score` to [`USER_VECTOR`]
pub fn vector_with_score(score: f32) -> Vec<f32> {
    vec![score, (1.0 - score * score).max(0.0).sqrt(), 0.0]
}

pub fn submission(user_id: &str) -> Submission {
    Submission {
        user_id: user_id.to_string(),
        raw_bio: "I love climbing. Reach me at climber@example.com or 512-555-0199".to_string(),
        interest_tags: vec!["climbing".to_string(), "coffee".to_string()],
        city: CITY.to_string(),
        timezone: TIMEZONE.to_string(),
    }
}

/// How the scripted model answers sanitize
#[derive(Debug, Clone)]
pub enum SanitizeScript {
    /// Return this bio with tags appended by the model
    Clean,
    Fail,
    /// Sleep this long before answering
    Delay(Duration),
}

/// Deterministic stand-in for the language model service
pub struct ScriptedLanguageModel {
    pub sanitize: SanitizeScript,
    /// None makes embed fail
    pub embedding: Option<Vec<f32>>,
    pub embed_delay: Duration,
    pub toxicity: f64,
    pub fail_introduce: bool,
    pub sanitize_calls: AtomicUsize,
    pub introduce_calls: AtomicUsize,
    /// Last text passed to embed
    pub last_embedded: std::sync::Mutex<Option<String>>,
}

impl Default for ScriptedLanguageModel {
    fn default() -> Self {
        Self {
            sanitize: SanitizeScript::Clean,
            embedding: Some(USER_VECTOR.to_vec()),
            embed_delay: Duration::ZERO,
            toxicity: 0.01,
            fail_introduce: false,
            sanitize_calls: AtomicUsize::new(0),
            introduce_calls: AtomicUsize::new(0),
            last_embedded: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    async fn sanitize(&self, bio: &str, tags: &[String]) -> Result<SanitizedProfile, LanguageModelError> {
        self.sanitize_calls.fetch_add(1, Ordering::SeqCst);
        match &self.sanitize {
            SanitizeScript::Clean => {}
            SanitizeScript::Fail => return Err(LanguageModelError::Network("connection refused".to_string())),
            SanitizeScript::Delay(delay) => tokio::time::sleep(*delay).await,
        }

        let mut enriched = tags.to_vec();
        enriched.push("outdoors".to_string());
        Ok(SanitizedProfile {
            sanitized_bio: format!("[model] {}", bio.split('.').next().unwrap_or_default()),
            enriched_tags: enriched,
            pii_found: true,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LanguageModelError> {
        *self.last_embedded.lock().unwrap() = Some(text.to_string());
        if !self.embed_delay.is_zero() {
            tokio::time::sleep(self.embed_delay).await;
        }
        self.embedding.clone().ok_or_else(|| LanguageModelError::Api {
            status: 503,
            message: "embedding service down".to_string(),
        })
    }

    async fn moderate(&self, _text: &str) -> Result<f64, LanguageModelError> {
        Ok(self.toxicity)
    }

    async fn introduce(&self, request: &IntroductionRequest) -> Result<Introduction, LanguageModelError> {
        self.introduce_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_introduce {
            return Err(LanguageModelError::InvalidResponse("empty completion".to_string()));
        }
        let mentioned_member = request.active_members.first().cloned();
        let text = match &mentioned_member {
            Some(member) => format!("Welcome to {}! @{} says hi.", request.community_name, member),
            None => format!("Welcome to {}!", request.community_name),
        };
        Ok(Introduction { text, mentioned_member })
    }
}

/// Defaults with a shorter budget so deadline tests run quickly
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.pipeline.workers = 2;
    config.pipeline.queue_capacity = 16;
    config.identity.webhook_secret = Some("test-secret".to_string());
    config
}

/// Wire up the full service against `pool` and `language_model`
pub async fn test_app_state_with(
    pool: SqlitePool,
    language_model: Arc<ScriptedLanguageModel>,
    config: ServiceConfig,
) -> AppState {
    kindred_match::start_services(pool, Arc::new(config), language_model, CancellationToken::new())
        .await
        .unwrap()
}

pub async fn test_app_state() -> AppState {
    test_app_state_with(test_pool().await, Arc::new(ScriptedLanguageModel::default()), test_config()).await
}

/// Poll the status store until the task is terminal
pub async fn wait_for_terminal(state: &AppState, task_id: Uuid) -> MatchTask {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        if let Some(task) = state.orchestrator.status(task_id).await.unwrap() {
            if task.is_terminal() {
                return task;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "task {} never finished", task_id);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
