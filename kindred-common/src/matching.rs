//! Match domain types shared between the pipeline and delivery paths
//!
//! A [`MatchResult`] is the unit of delivery: the same payload is stored for
//! status polling and published on the Result Bus for realtime delivery.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Decision Engine outcome classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    /// Top similarity above the soulmate threshold: auto-join the best community
    Soulmate,
    /// Top similarity within the explorer band: present a short choice set
    Explorer,
    /// Weak or missing signal: popular communities plus a profile update request
    Fallback,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Soulmate => "soulmate",
            MatchTier::Explorer => "explorer",
            MatchTier::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for MatchTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only community snapshot taken from the data store at match time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCommunity {
    pub community_id: String,
    pub name: String,
    pub category: String,
    pub member_count: i64,
    /// Messages posted in the community over the last 7 days
    pub recent_activity_count: i64,
}

/// Candidate community with its cosine similarity to the user's vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    #[serde(flatten)]
    pub community: CandidateCommunity,
    /// Cosine similarity in [-1.0, 1.0]; 0.0 for popularity fallbacks
    pub similarity_score: f64,
}

impl ScoredCandidate {
    pub fn new(community: CandidateCommunity, similarity_score: f64) -> Self {
        Self {
            community,
            similarity_score,
        }
    }

    /// Popularity-list entry with the fixed fallback score of 0.0
    pub fn unscored(community: CandidateCommunity) -> Self {
        Self::new(community, 0.0)
    }

    pub fn community_id(&self) -> &str {
        &self.community.community_id
    }

    pub fn category(&self) -> &str {
        &self.community.category
    }

    /// Ranking order: score descending, then member_count descending, then
    /// community_id ascending. Total and deterministic (NaN scores sort last).
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        match (self.similarity_score.is_nan(), other.similarity_score.is_nan()) {
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            _ => {}
        }
        other
            .similarity_score
            .partial_cmp(&self.similarity_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.community.member_count.cmp(&self.community.member_count))
            .then_with(|| self.community.community_id.cmp(&other.community.community_id))
    }
}

/// Sort candidates into ranking order in place
pub fn sort_by_rank(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| a.rank_cmp(b));
}

/// AI-written welcome post for a soulmate auto-join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Introduction {
    pub text: String,
    /// Active member @mentioned in the text, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentioned_member: Option<String>,
}

/// Final outcome of one match task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub task_id: Uuid,
    pub user_id: String,
    pub tier: MatchTier,
    /// Ranked matches; length depends on tier (1, up to 5, or popular list)
    pub matches: Vec<ScoredCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_joined_community: Option<String>,
    #[serde(default)]
    pub ai_intro_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction: Option<Introduction>,
    #[serde(default)]
    pub profile_update_requested: bool,
    /// Filled in by the orchestrator once the whole pipeline has run
    pub processing_time_ms: u64,
}

impl MatchResult {
    /// Top-ranked match, if any
    pub fn top_match(&self) -> Option<&ScoredCandidate> {
        self.matches.first()
    }
}
