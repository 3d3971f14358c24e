//! Match task persistence
//!
//! Status is stored as JSON next to a short `state` column. Every status
//! write is guarded so that a terminal task is never overwritten.

use chrono::Utc;
use kindred_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, timestamp};
use crate::models::{MatchTask, TaskError, TaskStatus};
use crate::utils::retry_on_lock;

/// Insert a freshly created task
///
/// Uses retry_on_lock to ride out transient lock contention.
pub async fn insert_task(pool: &SqlitePool, task: &MatchTask, max_wait_ms: u64) -> Result<()> {
    // Prepare all data before acquiring a connection
    let task_id = task.task_id.to_string();
    let status = serde_json::to_string(&task.status)?;
    let state = task.status.name();
    let created_at = timestamp(task.created_at);
    let deadline = timestamp(task.deadline);
    let updated_at = timestamp(task.updated_at);

    retry_on_lock("insert_task", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO match_tasks (task_id, user_id, state, status, created_at, deadline, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task_id)
        .bind(&task.user_id)
        .bind(state)
        .bind(&status)
        .bind(&created_at)
        .bind(&deadline)
        .bind(&updated_at)
        .execute(pool)
        .await?;

        Ok::<_, Error>(())
    })
    .await
}

/// Write a new status unless the task is already terminal
///
/// Returns false when the task is terminal (or unknown) and nothing was
/// written.
pub async fn update_status(
    pool: &SqlitePool,
    task_id: Uuid,
    status: &TaskStatus,
    max_wait_ms: u64,
) -> Result<bool> {
    let task_id = task_id.to_string();
    let encoded = serde_json::to_string(status)?;
    let state = status.name();
    let updated_at = timestamp(Utc::now());

    let affected = retry_on_lock("update_task_status", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            UPDATE match_tasks
            SET state = ?, status = ?, updated_at = ?
            WHERE task_id = ? AND state NOT IN ('succeeded', 'failed')
            "#,
        )
        .bind(state)
        .bind(&encoded)
        .bind(&updated_at)
        .bind(&task_id)
        .execute(pool)
        .await?;

        Ok::<_, Error>(result.rows_affected())
    })
    .await?;

    Ok(affected == 1)
}

/// Load a task by id
pub async fn load_task(pool: &SqlitePool, task_id: Uuid) -> Result<Option<MatchTask>> {
    let row = sqlx::query(
        r#"
        SELECT task_id, user_id, status, created_at, deadline, updated_at
        FROM match_tasks
        WHERE task_id = ?
        "#,
    )
    .bind(task_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: String = row.get("status");
    let status: TaskStatus = serde_json::from_str(&status)
        .map_err(|e| Error::Internal(format!("Failed to deserialize task status: {}", e)))?;

    let stored_id: String = row.get("task_id");
    let task_id = Uuid::parse_str(&stored_id)
        .map_err(|e| Error::Internal(format!("Invalid stored task id {}: {}", stored_id, e)))?;

    Ok(Some(MatchTask {
        task_id,
        user_id: row.get("user_id"),
        status,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        deadline: parse_timestamp(&row.get::<String, _>("deadline"))?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
    }))
}

/// Fail every task a previous process left Pending or Running
///
/// Returns the number of tasks marked Failed.
pub async fn fail_stale_tasks(pool: &SqlitePool, error: &TaskError) -> Result<u64> {
    let status = serde_json::to_string(&TaskStatus::Failed { error: error.clone() })?;

    let affected = sqlx::query(
        r#"
        UPDATE match_tasks
        SET state = 'failed', status = ?, updated_at = ?
        WHERE state IN ('pending', 'running')
        "#,
    )
    .bind(status)
    .bind(timestamp(Utc::now()))
    .execute(pool)
    .await?
    .rows_affected();

    if affected > 0 {
        tracing::warn!(count = affected, "Marked stale match tasks as failed");
    }

    Ok(affected)
}

/// Number of tasks not yet terminal
pub async fn count_in_flight(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM match_tasks WHERE state IN ('pending', 'running')")
        .fetch_one(pool)
        .await?;

    Ok(count)
}
