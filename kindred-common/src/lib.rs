//! # Kindred Common Library
//!
//! Shared code for the Kindred matching services including:
//! - Match domain types (tiers, candidates, match results)
//! - Result Bus (per-user publish/subscribe of finished results)
//! - Lifecycle events (MatchEvent enum) and EventBus
//! - Configuration file resolution
//! - Common error type

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod matching;

pub use error::{Error, Result};
pub use matching::{CandidateCommunity, Introduction, MatchResult, MatchTier, ScoredCandidate};
