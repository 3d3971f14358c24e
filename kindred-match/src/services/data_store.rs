//! Data store contract and SQLite implementation
//!
//! The relational store and the vector index sit behind one trait so the
//! matcher and decision engine can be exercised against scripted stores.

use async_trait::async_trait;
use kindred_common::CandidateCommunity;
use sqlx::SqlitePool;
use std::cmp::Ordering;
use thiserror::Error;

use crate::db::communities::{self, CommunityDetails};
use crate::db::memberships::{self, JoinOutcome};
use crate::db::vectors;

/// Data store errors
#[derive(Debug, Error)]
pub enum DataStoreError {
    /// Underlying storage failed
    #[error("Storage error: {0}")]
    Storage(#[from] kindred_common::Error),

    #[error("Data store unavailable: {0}")]
    Unavailable(String),
}

/// One similarity search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityHit {
    pub community_id: String,
    /// Cosine similarity in [-1.0, 1.0]
    pub score: f64,
}

/// Data store contract used by the matching pipeline
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Active communities in exactly this city and timezone
    async fn filter_by_locality(
        &self,
        city: &str,
        timezone: &str,
        limit: usize,
    ) -> Result<Vec<CandidateCommunity>, DataStoreError>;

    /// Top `top_k` communities by cosine similarity, restricted to `candidate_ids`
    async fn similarity_search(
        &self,
        vector: &[f32],
        candidate_ids: &[String],
        top_k: usize,
    ) -> Result<Vec<SimilarityHit>, DataStoreError>;

    /// Globally popular active communities
    async fn popular_communities(&self, limit: usize) -> Result<Vec<CandidateCommunity>, DataStoreError>;

    /// Idempotent membership upsert
    async fn auto_join(&self, user_id: &str, community_id: &str) -> Result<JoinOutcome, DataStoreError>;

    async fn community_details(&self, community_id: &str) -> Result<Option<CommunityDetails>, DataStoreError>;

    /// Member display names, most active first
    async fn active_members(&self, community_id: &str, limit: usize) -> Result<Vec<String>, DataStoreError>;

    /// Cache the user's latest interest vector
    async fn save_user_vector(&self, user_id: &str, vector: &[f32]) -> Result<(), DataStoreError>;
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0)
    }
}

/// SQLite-backed data store
#[derive(Clone)]
pub struct SqliteDataStore {
    pool: SqlitePool,
}

impl SqliteDataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DataStore for SqliteDataStore {
    async fn filter_by_locality(
        &self,
        city: &str,
        timezone: &str,
        limit: usize,
    ) -> Result<Vec<CandidateCommunity>, DataStoreError> {
        Ok(communities::filter_by_locality(&self.pool, city, timezone, limit).await?)
    }

    async fn similarity_search(
        &self,
        vector: &[f32],
        candidate_ids: &[String],
        top_k: usize,
    ) -> Result<Vec<SimilarityHit>, DataStoreError> {
        let stored = vectors::load_community_vectors(&self.pool, candidate_ids).await?;

        let mut scored: Vec<(SimilarityHit, i64)> = stored
            .into_iter()
            .filter(|stored| {
                if stored.vector.len() != vector.len() {
                    tracing::warn!(
                        community_id = %stored.community_id,
                        expected = vector.len(),
                        actual = stored.vector.len(),
                        "Skipping community vector with wrong dimension"
                    );
                    return false;
                }
                true
            })
            .map(|stored| {
                let hit = SimilarityHit {
                    score: cosine_similarity(vector, &stored.vector),
                    community_id: stored.community_id,
                };
                (hit, stored.member_count)
            })
            .collect();

        // Order matches ScoredCandidate::rank_cmp
        scored.sort_by(|(a, a_members), (b, b_members)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b_members.cmp(a_members))
                .then_with(|| a.community_id.cmp(&b.community_id))
        });

        let mut hits: Vec<SimilarityHit> = scored.into_iter().map(|(hit, _)| hit).collect();
        hits.truncate(top_k);

        Ok(hits)
    }

    async fn popular_communities(&self, limit: usize) -> Result<Vec<CandidateCommunity>, DataStoreError> {
        Ok(communities::popular_communities(&self.pool, limit).await?)
    }

    async fn auto_join(&self, user_id: &str, community_id: &str) -> Result<JoinOutcome, DataStoreError> {
        Ok(memberships::auto_join(&self.pool, user_id, community_id).await?)
    }

    async fn community_details(&self, community_id: &str) -> Result<Option<CommunityDetails>, DataStoreError> {
        Ok(communities::get_community_details(&self.pool, community_id).await?)
    }

    async fn active_members(&self, community_id: &str, limit: usize) -> Result<Vec<String>, DataStoreError> {
        Ok(communities::active_members(&self.pool, community_id, limit).await?)
    }

    async fn save_user_vector(&self, user_id: &str, vector: &[f32]) -> Result<(), DataStoreError> {
        Ok(vectors::save_user_vector(&self.pool, user_id, vector).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_and_opposite() {
        let a = [1.0, 2.0, 3.0];
        let b = [-1.0, -2.0, -3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }
}
