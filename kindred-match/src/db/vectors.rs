//! Vector storage
//!
//! Vectors are stored as JSON arrays of f32. Similarity is computed in
//! process by the data store over a restricted id set.

use chrono::Utc;
use kindred_common::Result;
use sqlx::{Row, SqlitePool};

use super::timestamp;

/// Insert or replace a community's interest vector
pub async fn upsert_community_vector(pool: &SqlitePool, community_id: &str, vector: &[f32]) -> Result<()> {
    let encoded = serde_json::to_string(vector)?;

    sqlx::query(
        r#"
        INSERT INTO community_vectors (community_id, vector, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(community_id) DO UPDATE SET
            vector = excluded.vector,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(community_id)
    .bind(encoded)
    .bind(timestamp(Utc::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// A community vector with the member count used for tie-breaks
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVector {
    pub community_id: String,
    pub member_count: i64,
    pub vector: Vec<f32>,
}

/// Load vectors for the given community ids only
///
/// Ids without a stored vector are absent from the result.
pub async fn load_community_vectors(pool: &SqlitePool, community_ids: &[String]) -> Result<Vec<StoredVector>> {
    if community_ids.is_empty() {
        return Ok(Vec::new());
    }

    let id_list = serde_json::to_string(community_ids)?;

    let rows = sqlx::query(
        r#"
        SELECT v.community_id, v.vector, COALESCE(c.member_count, 0) AS member_count
        FROM community_vectors v
        LEFT JOIN communities c ON c.community_id = v.community_id
        WHERE v.community_id IN (SELECT value FROM json_each(?))
        "#,
    )
    .bind(id_list)
    .fetch_all(pool)
    .await?;

    let mut vectors = Vec::with_capacity(rows.len());
    for row in rows {
        let community_id: String = row.get("community_id");
        let raw: String = row.get("vector");
        match serde_json::from_str::<Vec<f32>>(&raw) {
            Ok(vector) => vectors.push(StoredVector {
                community_id,
                member_count: row.get("member_count"),
                vector,
            }),
            Err(e) => {
                tracing::warn!(community_id = %community_id, error = %e, "Skipping undecodable community vector");
            }
        }
    }

    Ok(vectors)
}

/// Cache the user's latest interest vector
pub async fn save_user_vector(pool: &SqlitePool, user_id: &str, vector: &[f32]) -> Result<()> {
    let encoded = serde_json::to_string(vector)?;

    sqlx::query(
        r#"
        INSERT INTO user_vectors (user_id, vector, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            vector = excluded.vector,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id)
    .bind(encoded)
    .bind(timestamp(Utc::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a cached user vector
pub async fn load_user_vector(pool: &SqlitePool, user_id: &str) -> Result<Option<Vec<f32>>> {
    let raw: Option<String> = sqlx::query_scalar("SELECT vector FROM user_vectors WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    raw.map(|raw| serde_json::from_str::<Vec<f32>>(&raw).map_err(kindred_common::Error::from))
        .transpose()
}
