//! Community database operations
//!
//! Snapshots returned here are read once per task and never cached.

use chrono::{DateTime, Utc};
use kindred_common::{CandidateCommunity, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{recent_activity_cutoff, timestamp};

/// Shared projection: snapshot columns plus 7-day message count
const SNAPSHOT_SELECT: &str = r#"
    SELECT
        c.community_id,
        c.name,
        c.category,
        c.member_count,
        COALESCE(ca.message_count, 0) AS recent_activity_count
    FROM communities c
    LEFT JOIN (
        SELECT community_id, COUNT(*) AS message_count
        FROM community_activity
        WHERE posted_at >= ?
        GROUP BY community_id
    ) ca ON c.community_id = ca.community_id
"#;

/// Community row as written by seeding and admin tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityRecord {
    pub community_id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub city: String,
    pub timezone: String,
    #[serde(default)]
    pub member_count: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Metadata used when writing an introduction
#[derive(Debug, Clone, PartialEq)]
pub struct CommunityDetails {
    pub community_id: String,
    pub name: String,
    pub category: String,
    pub description: String,
}

fn snapshot_from_row(row: &SqliteRow) -> CandidateCommunity {
    CandidateCommunity {
        community_id: row.get("community_id"),
        name: row.get("name"),
        category: row.get("category"),
        member_count: row.get("member_count"),
        recent_activity_count: row.get("recent_activity_count"),
    }
}

/// Active communities in exactly this city and timezone
///
/// Ordered by member_count, then 7-day activity, both descending; community_id
/// ascending keeps the order total.
pub async fn filter_by_locality(
    pool: &SqlitePool,
    city: &str,
    timezone: &str,
    limit: usize,
) -> Result<Vec<CandidateCommunity>> {
    let query = format!(
        "{} WHERE c.city = ? AND c.timezone = ? AND c.is_active = 1 \
         ORDER BY c.member_count DESC, recent_activity_count DESC, c.community_id ASC \
         LIMIT ?",
        SNAPSHOT_SELECT
    );

    let rows = sqlx::query(&query)
        .bind(recent_activity_cutoff())
        .bind(city)
        .bind(timezone)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    Ok(rows.iter().map(snapshot_from_row).collect())
}

/// Globally popular active communities
pub async fn popular_communities(pool: &SqlitePool, limit: usize) -> Result<Vec<CandidateCommunity>> {
    let query = format!(
        "{} WHERE c.is_active = 1 \
         ORDER BY c.member_count DESC, recent_activity_count DESC, c.community_id ASC \
         LIMIT ?",
        SNAPSHOT_SELECT
    );

    let rows = sqlx::query(&query)
        .bind(recent_activity_cutoff())
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    Ok(rows.iter().map(snapshot_from_row).collect())
}

/// Load name, category and description for one community
pub async fn get_community_details(pool: &SqlitePool, community_id: &str) -> Result<Option<CommunityDetails>> {
    let row = sqlx::query(
        "SELECT community_id, name, category, description FROM communities WHERE community_id = ?",
    )
    .bind(community_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| CommunityDetails {
        community_id: row.get("community_id"),
        name: row.get("name"),
        category: row.get("category"),
        description: row.get("description"),
    }))
}

/// Usernames of the community's members, most active (7 days) first
///
/// Members without a username fall back to their user_id.
pub async fn active_members(pool: &SqlitePool, community_id: &str, limit: usize) -> Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT
            cm.user_id,
            COALESCE(u.username, cm.user_id) AS display_name,
            COUNT(ca.activity_id) AS message_count
        FROM community_members cm
        LEFT JOIN users u ON u.user_id = cm.user_id
        LEFT JOIN community_activity ca ON ca.user_id = cm.user_id
            AND ca.community_id = cm.community_id
            AND ca.posted_at >= ?
        WHERE cm.community_id = ?
            AND COALESCE(u.is_active, 1) = 1
        GROUP BY cm.user_id, display_name
        ORDER BY message_count DESC, cm.user_id ASC
        LIMIT ?
        "#,
    )
    .bind(recent_activity_cutoff())
    .bind(community_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| row.get("display_name")).collect())
}

/// Insert or replace a community row
pub async fn upsert_community(pool: &SqlitePool, community: &CommunityRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO communities (
            community_id, name, category, description, city, timezone,
            member_count, is_active, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(community_id) DO UPDATE SET
            name = excluded.name,
            category = excluded.category,
            description = excluded.description,
            city = excluded.city,
            timezone = excluded.timezone,
            member_count = excluded.member_count,
            is_active = excluded.is_active
        "#,
    )
    .bind(&community.community_id)
    .bind(&community.name)
    .bind(&community.category)
    .bind(&community.description)
    .bind(&community.city)
    .bind(&community.timezone)
    .bind(community.member_count)
    .bind(community.is_active)
    .bind(timestamp(Utc::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Record one message posted in a community
pub async fn record_activity(
    pool: &SqlitePool,
    community_id: &str,
    user_id: &str,
    posted_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO community_activity (community_id, user_id, posted_at) VALUES (?, ?, ?)")
        .bind(community_id)
        .bind(user_id)
        .bind(timestamp(posted_at))
        .execute(pool)
        .await?;

    Ok(())
}
