//! Decision Engine
//!
//! Classifies a ranked candidate list into a tier and performs that tier's
//! side effects:
//! - Soulmate: keep the top entry, auto-join it, optionally introduce the user
//! - Explorer: keep the top entries as a choice set
//! - Fallback: substitute the global popular list and request a profile update
//!
//! Every candidate list goes through [`DecisionEngine::decide`], including the
//! popular list the matcher returns when the locality filter is empty.

use kindred_common::{Introduction, MatchResult, MatchTier, ScoredCandidate};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DecisionConfig;
use crate::services::data_store::{DataStore, DataStoreError};
use crate::services::language_model::{IntroductionRequest, LanguageModel};

/// Classify a top similarity score
///
/// `> soulmate_threshold` is Soulmate, `>= explorer_threshold` is Explorer,
/// anything lower (or no score at all, or NaN) is Fallback.
pub fn classify(top_score: Option<f64>, config: &DecisionConfig) -> MatchTier {
    match top_score {
        Some(score) if score > config.soulmate_threshold => MatchTier::Soulmate,
        Some(score) if score >= config.explorer_threshold => MatchTier::Explorer,
        _ => MatchTier::Fallback,
    }
}

/// Per-task inputs to a decision
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub task_id: Uuid,
    pub user_id: String,
    /// Sanitized bio, used for the introduction
    pub user_bio: String,
    /// Past this instant the introduction is skipped
    pub soft_deadline: Instant,
}

pub struct DecisionEngine {
    store: Arc<dyn DataStore>,
    language_model: Arc<dyn LanguageModel>,
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(store: Arc<dyn DataStore>, language_model: Arc<dyn LanguageModel>, config: DecisionConfig) -> Self {
        Self {
            store,
            language_model,
            config,
        }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Turn a ranked list into a Match Result
    ///
    /// `processing_time_ms` is left at 0 for the caller to fill in.
    /// Data store failures (auto-join, popular list) propagate; introduction
    /// failures never do.
    pub async fn decide(
        &self,
        context: &DecisionContext,
        mut ranked: Vec<ScoredCandidate>,
    ) -> Result<MatchResult, DataStoreError> {
        let top_score = ranked.first().map(|c| c.similarity_score);
        let tier = classify(top_score, &self.config);
        debug!(task_id = %context.task_id, tier = %tier, top_score = ?top_score, "Classified match");

        let mut result = MatchResult {
            task_id: context.task_id,
            user_id: context.user_id.clone(),
            tier,
            matches: Vec::new(),
            auto_joined_community: None,
            ai_intro_generated: false,
            introduction: None,
            profile_update_requested: false,
            processing_time_ms: 0,
        };

        match tier {
            MatchTier::Soulmate => {
                ranked.truncate(1);
                let Some(top) = ranked.first() else {
                    return Ok(result);
                };
                let community_id = top.community_id().to_string();

                let outcome = self.store.auto_join(&context.user_id, &community_id).await?;
                info!(
                    task_id = %context.task_id,
                    user_id = %context.user_id,
                    community_id = %community_id,
                    outcome = ?outcome,
                    "Soulmate auto-join"
                );

                if outcome.is_new() {
                    result.introduction = self.introduce_within_deadline(context, &community_id).await;
                    result.ai_intro_generated = result.introduction.is_some();
                }

                result.auto_joined_community = Some(community_id);
                result.matches = ranked;
            }
            MatchTier::Explorer => {
                ranked.truncate(self.config.explorer_choices);
                result.matches = ranked;
            }
            MatchTier::Fallback => {
                let popular = self.store.popular_communities(self.config.popular_limit).await?;
                result.matches = popular.into_iter().map(ScoredCandidate::unscored).collect();
                result.profile_update_requested = true;
            }
        }

        Ok(result)
    }

    async fn introduce_within_deadline(&self, context: &DecisionContext, community_id: &str) -> Option<Introduction> {
        if Instant::now() >= context.soft_deadline {
            warn!(task_id = %context.task_id, "Soft deadline passed, skipping introduction");
            return None;
        }

        match tokio::time::timeout_at(context.soft_deadline, self.introduce(context, community_id)).await {
            Ok(introduction) => introduction,
            Err(_) => {
                warn!(task_id = %context.task_id, "Introduction abandoned at soft deadline");
                None
            }
        }
    }

    /// Generate and moderate an introduction
    ///
    /// Returns None on any failure or when the text is too toxic to surface.
    async fn introduce(&self, context: &DecisionContext, community_id: &str) -> Option<Introduction> {
        let details = match self.store.community_details(community_id).await {
            Ok(Some(details)) => details,
            Ok(None) => {
                warn!(community_id, "Community vanished before introduction");
                return None;
            }
            Err(e) => {
                warn!(community_id, error = %e, "Failed to load community for introduction");
                return None;
            }
        };

        let active_members = self
            .store
            .active_members(community_id, self.config.intro_member_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(community_id, error = %e, "Failed to load active members, introducing without mention");
                Vec::new()
            });

        let request = IntroductionRequest {
            user_bio: context.user_bio.clone(),
            community_name: details.name,
            community_description: details.description,
            active_members,
        };

        let introduction = match self.language_model.introduce(&request).await {
            Ok(introduction) => introduction,
            Err(e) => {
                warn!(task_id = %context.task_id, error = %e, "Introduction generation failed");
                return None;
            }
        };

        match self.language_model.moderate(&introduction.text).await {
            Ok(score) if score < self.config.toxicity_limit => Some(introduction),
            Ok(score) => {
                warn!(task_id = %context.task_id, toxicity = score, "Introduction withheld by moderation");
                None
            }
            Err(e) => {
                warn!(task_id = %context.task_id, error = %e, "Moderation failed, withholding introduction");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        let config = DecisionConfig::default();
        assert_eq!(classify(Some(0.90), &config), MatchTier::Soulmate);
        assert_eq!(classify(Some(0.870001), &config), MatchTier::Soulmate);
        assert_eq!(classify(Some(0.87), &config), MatchTier::Explorer);
        assert_eq!(classify(Some(0.70), &config), MatchTier::Explorer);
        assert_eq!(classify(Some(0.55), &config), MatchTier::Explorer);
        assert_eq!(classify(Some(0.549999), &config), MatchTier::Fallback);
        assert_eq!(classify(Some(0.0), &config), MatchTier::Fallback);
        assert_eq!(classify(None, &config), MatchTier::Fallback);
        assert_eq!(classify(Some(f64::NAN), &config), MatchTier::Fallback);
    }

    #[test]
    fn test_thresholds_come_from_config() {
        let config = DecisionConfig {
            soulmate_threshold: 0.95,
            explorer_threshold: 0.3,
            ..Default::default()
        };
        assert_eq!(classify(Some(0.9), &config), MatchTier::Explorer);
        assert_eq!(classify(Some(0.3), &config), MatchTier::Explorer);
        assert_eq!(classify(Some(0.96), &config), MatchTier::Soulmate);
    }
}
