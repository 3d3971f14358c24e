//! Community membership operations
//!
//! Auto-join is an idempotent upsert: concurrent or retried joins for the
//! same (user_id, community_id) pair produce exactly one membership row.

use chrono::Utc;
use kindred_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use super::timestamp;

/// Outcome of an auto-join attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOutcome {
    /// Membership created by this call
    Joined,
    /// Membership already existed; nothing changed
    AlreadyMember,
}

impl JoinOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, JoinOutcome::Joined)
    }
}

/// Add the user to the community if not already a member
///
/// A new membership increments `member_count` in the same transaction.
pub async fn auto_join(pool: &SqlitePool, user_id: &str, community_id: &str) -> Result<JoinOutcome> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO community_members (user_id, community_id, joined_at)
        VALUES (?, ?, ?)
        ON CONFLICT (user_id, community_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(community_id)
    .bind(timestamp(Utc::now()))
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if inserted == 0 {
        tx.rollback().await?;
        return Ok(JoinOutcome::AlreadyMember);
    }

    sqlx::query("UPDATE communities SET member_count = member_count + 1 WHERE community_id = ?")
        .bind(community_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(JoinOutcome::Joined)
}

/// Number of membership rows for a (user, community) pair (0 or 1)
pub async fn membership_count(pool: &SqlitePool, user_id: &str, community_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM community_members WHERE user_id = ? AND community_id = ?",
    )
    .bind(user_id)
    .bind(community_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}
