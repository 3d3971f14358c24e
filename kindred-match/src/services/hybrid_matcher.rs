//! Hybrid Matcher
//!
//! Narrows the community population to a ranked, diversified shortlist:
//! 1. Locality filter (city + timezone) bounds the cost of stage 2
//! 2. Cosine similarity search restricted to the stage-1 ids
//! 3. Diversity injection over the head of the ranked list
//!
//! Deterministic for identical inputs and an unchanged data store.

use kindred_common::matching::sort_by_rank;
use kindred_common::{CandidateCommunity, ScoredCandidate};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::MatcherConfig;
use crate::services::data_store::{DataStore, DataStoreError, SimilarityHit};

pub struct HybridMatcher {
    store: Arc<dyn DataStore>,
    config: MatcherConfig,
}

impl HybridMatcher {
    pub fn new(store: Arc<dyn DataStore>, config: MatcherConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Ranked, diversified candidates for a user vector and locality
    ///
    /// At most `result_limit` entries. When no community shares the user's
    /// locality, the global popular list is returned with score 0.0 and
    /// stages 2-3 are skipped.
    pub async fn find_matches(
        &self,
        vector: &[f32],
        city: &str,
        timezone: &str,
    ) -> Result<Vec<ScoredCandidate>, DataStoreError> {
        // Stage 1: locality filter
        let local = self
            .store
            .filter_by_locality(city, timezone, self.config.locality_limit)
            .await?;

        if local.is_empty() {
            warn!(city, timezone, "No communities in locality, falling back to popular list");
            let popular = self
                .store
                .popular_communities(self.config.locality_fallback_limit)
                .await?;
            return Ok(popular.into_iter().map(ScoredCandidate::unscored).collect());
        }

        debug!(candidates = local.len(), "Locality filter complete");

        // Stage 2: restricted similarity search
        let candidate_ids: Vec<String> = local.iter().map(|c| c.community_id.clone()).collect();
        let hits = self
            .store
            .similarity_search(vector, &candidate_ids, self.config.similarity_top_k)
            .await?;

        let mut ranked = merge_hits(local, hits);
        sort_by_rank(&mut ranked);
        ranked.truncate(self.config.result_limit);

        // Stage 3: diversity injection
        if inject_diversity(
            &mut ranked,
            self.config.diversity_window,
            self.config.diversity_insert_index,
        ) {
            debug!("Diversity injection reordered the head of the list");
        }

        Ok(ranked)
    }
}

/// Attach hit scores to their locality records
///
/// Hits without a locality record are stale index entries and are dropped.
/// Repeated hits for one id keep the first score.
pub fn merge_hits(local: Vec<CandidateCommunity>, hits: Vec<SimilarityHit>) -> Vec<ScoredCandidate> {
    let mut by_id: HashMap<String, CandidateCommunity> = local
        .into_iter()
        .map(|community| (community.community_id.clone(), community))
        .collect();

    let mut merged = Vec::with_capacity(hits.len());
    for hit in hits {
        match by_id.remove(&hit.community_id) {
            Some(community) => merged.push(ScoredCandidate::new(community, hit.score)),
            None => debug!(community_id = %hit.community_id, "Dropping hit without locality record"),
        }
    }
    merged
}

/// Break up a single-category run at the head of a ranked list
///
/// If the first `window` entries all share one category, the first later
/// entry with a different category is moved (not copied) to `insert_index`.
/// Lists no longer than `window`, or with a mixed head, are unchanged.
/// Returns true if the list was reordered.
pub fn inject_diversity(ranked: &mut Vec<ScoredCandidate>, window: usize, insert_index: usize) -> bool {
    if window == 0 || ranked.len() <= window || insert_index >= window {
        return false;
    }

    let head_category = ranked[0].category();
    if ranked[1..window].iter().any(|c| c.category() != head_category) {
        return false;
    }

    let Some(offset) = ranked[window..]
        .iter()
        .position(|c| c.category() != head_category)
    else {
        return false;
    };

    let moved = ranked.remove(window + offset);
    ranked.insert(insert_index, moved);
    true
}
