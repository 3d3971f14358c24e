//! Database access for kindred-match
//!
//! SQLite holds communities, memberships, community and user vectors, user
//! profiles and match task status.

pub mod communities;
pub mod memberships;
pub mod tasks;
pub mod users;
pub mod vectors;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Window for `recent_activity_count` and member activity ranking
pub const RECENT_ACTIVITY_DAYS: i64 = 7;

/// Initialize database connection pool
///
/// Creates the parent directory and the schema if missing.
pub async fn init_database_pool(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(&db_url)
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create kindred tables if they don't exist
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS communities (
            community_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            city TEXT NOT NULL,
            timezone TEXT NOT NULL,
            member_count INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_communities_locality ON communities (city, timezone, is_active)",
        r#"
        CREATE TABLE IF NOT EXISTS community_activity (
            activity_id INTEGER PRIMARY KEY AUTOINCREMENT,
            community_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            posted_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_activity_community ON community_activity (community_id, posted_at)",
        r#"
        CREATE TABLE IF NOT EXISTS community_members (
            user_id TEXT NOT NULL,
            community_id TEXT NOT NULL,
            joined_at TEXT NOT NULL,
            PRIMARY KEY (user_id, community_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS community_vectors (
            community_id TEXT PRIMARY KEY,
            vector TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            email TEXT,
            first_name TEXT,
            last_name TEXT,
            username TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS user_vectors (
            user_id TEXT PRIMARY KEY,
            vector TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS match_tasks (
            task_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            state TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            deadline TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_match_tasks_state ON match_tasks (state)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database tables initialized");

    Ok(())
}

/// Fixed-width UTC timestamp so stored values compare lexicographically
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp
pub fn parse_timestamp(value: &str) -> kindred_common::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| kindred_common::Error::Internal(format!("Failed to parse timestamp {}: {}", value, e)))
}

/// Lower bound for "recent" activity
pub fn recent_activity_cutoff() -> String {
    timestamp(Utc::now() - chrono::Duration::days(RECENT_ACTIVITY_DAYS))
}
