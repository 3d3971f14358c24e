//! User profile bookkeeping from identity sync events
//!
//! Profile rows are never consulted for match correctness; they feed
//! @mention display names only.

use chrono::Utc;
use kindred_common::Result;
use sqlx::{Row, SqlitePool};

use super::timestamp;

/// Profile fields carried by identity sync events
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserRecord {
    pub user_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub metadata: serde_json::Value,
    pub is_active: bool,
}

/// Insert or update a user; always (re)activates the row
pub async fn upsert_user(pool: &SqlitePool, user: &UserRecord) -> Result<()> {
    let metadata = serde_json::to_string(&user.metadata)?;
    let now = timestamp(Utc::now());

    sqlx::query(
        r#"
        INSERT INTO users (
            user_id, email, first_name, last_name, username, metadata,
            is_active, created_at, updated_at, deleted_at
        ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, NULL)
        ON CONFLICT(user_id) DO UPDATE SET
            email = excluded.email,
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            username = COALESCE(excluded.username, users.username),
            metadata = excluded.metadata,
            is_active = 1,
            updated_at = excluded.updated_at,
            deleted_at = NULL
        "#,
    )
    .bind(&user.user_id)
    .bind(&user.email)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.username)
    .bind(metadata)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a user inactive
///
/// Returns false if no such user exists. Repeating the call is harmless.
pub async fn soft_delete_user(pool: &SqlitePool, user_id: &str) -> Result<bool> {
    let now = timestamp(Utc::now());

    let affected = sqlx::query(
        "UPDATE users SET is_active = 0, deleted_at = COALESCE(deleted_at, ?), updated_at = ? WHERE user_id = ?",
    )
    .bind(&now)
    .bind(&now)
    .bind(user_id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected > 0)
}

/// Load a user row
pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<Option<UserRecord>> {
    let row = sqlx::query(
        "SELECT user_id, email, first_name, last_name, username, metadata, is_active FROM users WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let metadata: String = row.get("metadata");
    Ok(Some(UserRecord {
        user_id: row.get("user_id"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        username: row.get("username"),
        metadata: serde_json::from_str(&metadata)?,
        is_active: row.get("is_active"),
    }))
}
