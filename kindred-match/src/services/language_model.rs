//! Language model service client
//!
//! Four single-shot, stateless operations: sanitize, embed, moderate and
//! introduce. Each may fail independently; callers decide whether a failure
//! is fatal.
//!
//! # API Reference
//! - Chat completions: `{base_url}/chat/completions`
//! - Embeddings: `{base_url}/embeddings`
//! - Moderation: `{base_url}/moderations`

use async_trait::async_trait;
use kindred_common::Introduction;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::LanguageModelConfig;

/// Language model errors
#[derive(Debug, Error)]
pub enum LanguageModelError {
    /// Transport failure or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status from the service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Language model not configured: {0}")]
    NotConfigured(String),
}

/// Result of sanitize: cleaned bio plus enriched tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedProfile {
    pub sanitized_bio: String,
    pub enriched_tags: Vec<String>,
    #[serde(default)]
    pub pii_found: bool,
}

/// Inputs for an introduction post
#[derive(Debug, Clone, PartialEq)]
pub struct IntroductionRequest {
    pub user_bio: String,
    pub community_name: String,
    pub community_description: String,
    /// Most active first; the first entry is @mentioned
    pub active_members: Vec<String>,
}

/// Language model service contract
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Strip PII and enrich interest tags
    async fn sanitize(&self, bio: &str, tags: &[String]) -> Result<SanitizedProfile, LanguageModelError>;

    /// Fixed-dimension embedding of `text`
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LanguageModelError>;

    /// Toxicity score in [0, 1]
    async fn moderate(&self, text: &str) -> Result<f64, LanguageModelError>;

    /// Short welcome post for a new member
    async fn introduce(&self, request: &IntroductionRequest) -> Result<Introduction, LanguageModelError>;
}

/// Text submitted for embedding: `Bio: {bio}\nInterests: {tags}`
pub fn embedding_payload(bio: &str, tags: &[String]) -> String {
    format!("Bio: {}\nInterests: {}", bio, tags.join(", "))
}

/// OpenAI-compatible HTTP client
pub struct OpenAiClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    embedding_dimension: usize,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    category_scores: CategoryScores,
}

#[derive(Deserialize)]
struct CategoryScores {
    #[serde(default)]
    hate: f64,
    #[serde(default)]
    harassment: f64,
    #[serde(default)]
    violence: f64,
    #[serde(default)]
    sexual: f64,
}

impl CategoryScores {
    fn max_score(&self) -> f64 {
        [self.hate, self.harassment, self.violence, self.sexual]
            .into_iter()
            .fold(0.0, f64::max)
    }
}

impl OpenAiClient {
    pub fn new(config: &LanguageModelConfig) -> Result<Self, LanguageModelError> {
        if config.base_url.trim().is_empty() {
            return Err(LanguageModelError::NotConfigured("base_url is empty".to_string()));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| LanguageModelError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            embedding_dimension: config.embedding_dimension,
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, LanguageModelError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "Calling language model");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LanguageModelError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LanguageModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| LanguageModelError::InvalidResponse(e.to_string()))
    }

    async fn chat(
        &self,
        system: &str,
        prompt: String,
        temperature: f32,
        max_tokens: u32,
        json_mode: bool,
    ) -> Result<String, LanguageModelError> {
        let mut body = json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response: ChatResponse = self.post("chat/completions", body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| LanguageModelError::InvalidResponse("empty chat completion".to_string()))
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn sanitize(&self, bio: &str, tags: &[String]) -> Result<SanitizedProfile, LanguageModelError> {
        let prompt = format!(
            "Analyze the following user bio and:\n\
             1. Remove any PII (phone numbers, email addresses, physical addresses)\n\
             2. Return a cleaned bio\n\
             3. Extract and add implied interest tags (e.g. \"I code daily\" -> \"Programming\")\n\
             4. Return the enriched tags list\n\n\
             Bio: {:?}\nCurrent Tags: {:?}\n\n\
             Respond in JSON: {{\"sanitized_bio\": string, \"enriched_tags\": [string], \"pii_found\": bool}}",
            bio, tags
        );

        let content = self
            .chat("You are a data sanitization expert.", prompt, 0.3, 300, true)
            .await?;

        serde_json::from_str::<SanitizedProfile>(&content)
            .map_err(|e| LanguageModelError::InvalidResponse(format!("sanitize payload: {}", e)))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LanguageModelError> {
        let response: EmbeddingResponse = self
            .post(
                "embeddings",
                json!({"model": self.embedding_model, "input": text}),
            )
            .await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| LanguageModelError::InvalidResponse("no embedding returned".to_string()))?;

        if embedding.len() != self.embedding_dimension {
            return Err(LanguageModelError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                self.embedding_dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }

    async fn moderate(&self, text: &str) -> Result<f64, LanguageModelError> {
        let response: ModerationResponse = self.post("moderations", json!({"input": text})).await?;

        response
            .results
            .first()
            .map(|result| result.category_scores.max_score())
            .ok_or_else(|| LanguageModelError::InvalidResponse("no moderation result".to_string()))
    }

    async fn introduce(&self, request: &IntroductionRequest) -> Result<Introduction, LanguageModelError> {
        let mentioned_member = request.active_members.first().cloned();
        let mention = mentioned_member
            .as_deref()
            .map(|member| format!("@{}", member))
            .unwrap_or_else(|| "nobody in particular".to_string());

        let prompt = format!(
            "Write a friendly, non-corporate introduction for a new community member.\n\n\
             Community: {}\nDescription: {}\nNew Member Bio: {}\nActive Member to Mention: {}\n\n\
             Requirements:\n\
             - At most 3 sentences\n\
             - Mention {} naturally\n\
             - Highlight shared interests\n\n\
             Reply with the introduction text only.",
            request.community_name, request.community_description, request.user_bio, mention, mention
        );

        let text = self
            .chat("You are a community onboarding assistant.", prompt, 0.7, 150, false)
            .await?;

        Ok(Introduction {
            text,
            mentioned_member,
        })
    }
}
