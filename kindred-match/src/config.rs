//! Service configuration for kindred-match
//!
//! Resolution priority (lowest to highest):
//! compiled defaults → TOML file → environment variables → CLI arguments.
//! CLI overrides are applied by the binary after [`ServiceConfig::load`].

use kindred_common::config::{env_override, load_toml_config, resolve_config_path};
use kindred_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "KINDRED_CONFIG";

/// Default config file name under `<config_dir>/kindred/`
pub const CONFIG_FILE_NAME: &str = "kindred-match.toml";

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub language_model: LanguageModelConfig,
    pub matcher: MatcherConfig,
    pub decision: DecisionConfig,
    pub pipeline: PipelineConfig,
    pub realtime: RealtimeConfig,
    pub identity: IdentityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path; `None` selects the platform data directory
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 8,
        }
    }
}

impl DatabaseConfig {
    /// Resolved database file location
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|d| d.join("kindred"))
                .unwrap_or_else(|| PathBuf::from("./kindred_data"))
                .join("kindred.db")
        })
    }
}

/// Language model service endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub timeout_secs: u64,
}

impl Default for LanguageModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: 1536,
            timeout_secs: 5,
        }
    }
}

/// Hybrid Matcher policy constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum rows returned by the locality filter
    pub locality_limit: usize,
    /// Hits requested from the restricted similarity search
    pub similarity_top_k: usize,
    /// Maximum length of the ranked list returned by match()
    pub result_limit: usize,
    /// Head of the list inspected for a single-category run
    pub diversity_window: usize,
    /// Position a different-category entry is moved to
    pub diversity_insert_index: usize,
    /// Popular communities used when the locality filter is empty
    pub locality_fallback_limit: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            locality_limit: 1000,
            similarity_top_k: 20,
            result_limit: 20,
            diversity_window: 3,
            diversity_insert_index: 2,
            locality_fallback_limit: 5,
        }
    }
}

/// Decision Engine policy constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Top score strictly above this is Soulmate
    pub soulmate_threshold: f64,
    /// Top score at or above this (and not Soulmate) is Explorer
    pub explorer_threshold: f64,
    pub explorer_choices: usize,
    pub popular_limit: usize,
    /// Introductions at or above this toxicity are not surfaced
    pub toxicity_limit: f64,
    pub intro_member_limit: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            soulmate_threshold: 0.87,
            explorer_threshold: 0.55,
            explorer_choices: 5,
            popular_limit: 5,
            toxicity_limit: 0.75,
            intro_member_limit: 5,
        }
    }
}

/// Task Orchestrator budgets and worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub hard_limit_ms: u64,
    pub soft_limit_ms: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Advertised to clients in the ingestion response
    pub estimated_time_ms: u64,
    pub save_retry_max_wait_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hard_limit_ms: 10_000,
            soft_limit_ms: 8_000,
            workers: 8,
            queue_capacity: 1024,
            estimated_time_ms: 2_000,
            save_retry_max_wait_ms: 2_000,
        }
    }
}

impl PipelineConfig {
    pub fn hard_limit(&self) -> Duration {
        Duration::from_millis(self.hard_limit_ms)
    }

    pub fn soft_limit(&self) -> Duration {
        Duration::from_millis(self.soft_limit_ms)
    }
}

/// Realtime Gateway and Result Bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub bus_capacity: usize,
    /// Outbound message buffer per connection
    pub connection_buffer: usize,
    /// Per-connection send timeout during fan-out
    pub delivery_timeout_ms: u64,
    pub resubscribe_attempts: u32,
    pub resubscribe_initial_backoff_ms: u64,
    pub resubscribe_max_backoff_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            connection_buffer: 32,
            delivery_timeout_ms: 2_000,
            resubscribe_attempts: 5,
            resubscribe_initial_backoff_ms: 100,
            resubscribe_max_backoff_ms: 5_000,
        }
    }
}

impl RealtimeConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Shared secret expected in `x-webhook-secret`; webhooks are refused when unset
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "kindred_match=info,kindred_common=info,tower_http=info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load defaults, then the TOML file (if any), then environment overrides
    pub fn load(cli_config_path: Option<&str>) -> Result<Self> {
        let path = resolve_config_path(cli_config_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME);
        let mut config: ServiceConfig = load_toml_config(path.as_deref())?;
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `KINDRED_*` environment variable overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(host) = env_override::<String>("KINDRED_HOST")? {
            self.server.host = host;
        }
        if let Some(port) = env_override::<u16>("KINDRED_PORT")? {
            self.server.port = port;
        }
        if let Some(path) = env_override::<PathBuf>("KINDRED_DATABASE_PATH")? {
            self.database.path = Some(path);
        }
        if let Some(url) = env_override::<String>("KINDRED_LM_BASE_URL")? {
            self.language_model.base_url = url;
        }
        if let Some(key) = env_override::<String>("KINDRED_LM_API_KEY")? {
            self.language_model.api_key = key;
        }
        if let Some(secret) = env_override::<String>("KINDRED_WEBHOOK_SECRET")? {
            self.identity.webhook_secret = Some(secret);
        }
        if let Some(workers) = env_override::<usize>("KINDRED_WORKERS")? {
            self.pipeline.workers = workers;
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        let decision = &self.decision;
        if decision.explorer_threshold > decision.soulmate_threshold {
            return Err(Error::Config(format!(
                "decision.explorer_threshold ({}) exceeds decision.soulmate_threshold ({})",
                decision.explorer_threshold, decision.soulmate_threshold
            )));
        }

        let pipeline = &self.pipeline;
        if pipeline.soft_limit_ms >= pipeline.hard_limit_ms {
            return Err(Error::Config(format!(
                "pipeline.soft_limit_ms ({}) must be below pipeline.hard_limit_ms ({})",
                pipeline.soft_limit_ms, pipeline.hard_limit_ms
            )));
        }
        if pipeline.workers == 0 {
            return Err(Error::Config("pipeline.workers must be at least 1".to_string()));
        }
        if pipeline.queue_capacity == 0 {
            return Err(Error::Config("pipeline.queue_capacity must be at least 1".to_string()));
        }
        if self.realtime.bus_capacity == 0 {
            return Err(Error::Config("realtime.bus_capacity must be at least 1".to_string()));
        }

        let matcher = &self.matcher;
        if matcher.diversity_insert_index >= matcher.diversity_window {
            return Err(Error::Config(format!(
                "matcher.diversity_insert_index ({}) must be inside matcher.diversity_window ({})",
                matcher.diversity_insert_index, matcher.diversity_window
            )));
        }
        if matcher.similarity_top_k == 0 {
            return Err(Error::Config("matcher.similarity_top_k must be at least 1".to_string()));
        }

        Ok(())
    }
}
