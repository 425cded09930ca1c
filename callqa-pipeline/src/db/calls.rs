//! Call record database operations
//!
//! Status transitions are guarded `UPDATE ... WHERE processing_status = ?`
//! compare-and-set statements; a zero-row update means another writer won
//! the race. The guard is the pipeline's only locking mechanism.

use callqa_common::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{CallRecord, ProcessingStatus};

use super::{parse_datetime, parse_uuid};

/// Call metadata delivered by the platform sync
#[derive(Debug, Clone)]
pub struct NewCall {
    pub call_id: String,
    pub activity_name: String,
    pub call_time: String,
    pub duration: Option<i64>,
    pub direction: Option<String>,
    pub answered: Option<bool>,
    pub agent_id: Option<Uuid>,
    pub question_group_id: Option<Uuid>,
    /// `synced` when a rubric group could be mapped, `skipped` otherwise
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
}

fn row_to_call(row: &sqlx::sqlite::SqliteRow) -> Result<CallRecord> {
    let id: String = row.get("id");
    let agent_id: Option<String> = row.get("agent_id");
    let question_group_id: Option<String> = row.get("question_group_id");
    let status: String = row.get("processing_status");
    let last_processed_at: Option<String> = row.get("last_processed_at");
    let created_at: String = row.get("created_at");

    Ok(CallRecord {
        id: parse_uuid(&id, "id")?,
        call_id: row.get("call_id"),
        activity_name: row.get("activity_name"),
        call_time: row.get("call_time"),
        duration: row.get("duration"),
        direction: row.get("direction"),
        answered: row.get::<Option<i64>, _>("answered").map(|v| v != 0),
        agent_id: agent_id
            .map(|s| parse_uuid(&s, "agent_id"))
            .transpose()?,
        question_group_id: question_group_id
            .map(|s| parse_uuid(&s, "question_group_id"))
            .transpose()?,
        processing_status: ProcessingStatus::parse(&status).ok_or_else(|| {
            callqa_common::Error::Internal(format!("Unknown processing status: {}", status))
        })?,
        processing_error: row.get("processing_error"),
        retry_count: row.get("retry_count"),
        last_processed_at: last_processed_at
            .map(|s| parse_datetime(&s, "last_processed_at"))
            .transpose()?,
        qa_score: row.get("qa_score"),
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

/// Insert a newly synced call; existing call ids are left untouched.
///
/// Returns true when a row was inserted.
pub async fn insert_if_new(pool: &SqlitePool, call: &NewCall) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO calls (
            id, call_id, activity_name, call_time, duration, direction,
            answered, agent_id, question_group_id, processing_status,
            processing_error, retry_count, last_processed_at, qa_score,
            created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, NULL, ?)
        ON CONFLICT(call_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&call.call_id)
    .bind(&call.activity_name)
    .bind(&call.call_time)
    .bind(call.duration)
    .bind(&call.direction)
    .bind(call.answered.map(i64::from))
    .bind(call.agent_id.map(|id| id.to_string()))
    .bind(call.question_group_id.map(|id| id.to_string()))
    .bind(call.processing_status.as_str())
    .bind(&call.processing_error)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Load a call by its platform call id
pub async fn get_by_call_id(pool: &SqlitePool, call_id: &str) -> Result<Option<CallRecord>> {
    let row = sqlx::query("SELECT * FROM calls WHERE call_id = ?")
        .bind(call_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_call).transpose()
}

/// Load a call by its document id
pub async fn get_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<CallRecord>> {
    let row = sqlx::query("SELECT * FROM calls WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_call).transpose()
}

/// List calls in a given status, oldest first, up to `limit`
pub async fn list_by_status(
    pool: &SqlitePool,
    status: ProcessingStatus,
    limit: u32,
) -> Result<Vec<CallRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM calls WHERE processing_status = ? ORDER BY created_at ASC LIMIT ?",
    )
    .bind(status.as_str())
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_call).collect()
}

/// List recent calls for the read API, newest first
pub async fn list_recent(pool: &SqlitePool, limit: u32) -> Result<Vec<CallRecord>> {
    let rows = sqlx::query("SELECT * FROM calls ORDER BY call_time DESC LIMIT ?")
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_call).collect()
}

/// Guarded status flip claiming a record for pool work.
///
/// Sets `last_processed_at` so the stale scan can time the job. Returns
/// false when the record was not in `from` (another tick claimed it).
pub async fn claim(
    pool: &SqlitePool,
    id: Uuid,
    from: ProcessingStatus,
    to: ProcessingStatus,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE calls
        SET processing_status = ?, last_processed_at = ?
        WHERE id = ? AND processing_status = ?
        "#,
    )
    .bind(to.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Guarded success transition; clears any previous processing error
pub async fn mark_completed(
    pool: &SqlitePool,
    id: Uuid,
    from: ProcessingStatus,
    to: ProcessingStatus,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE calls
        SET processing_status = ?, processing_error = NULL, last_processed_at = ?
        WHERE id = ? AND processing_status = ?
        "#,
    )
    .bind(to.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Guarded terminal failure with a sanitized error summary
pub async fn mark_failed(
    pool: &SqlitePool,
    id: Uuid,
    from: ProcessingStatus,
    error: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE calls
        SET processing_status = 'failed', processing_error = ?, last_processed_at = ?
        WHERE id = ? AND processing_status = ?
        "#,
    )
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Guarded skip for transcribed calls with no rubric group
pub async fn mark_skipped(pool: &SqlitePool, id: Uuid, error: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE calls
        SET processing_status = 'skipped', processing_error = ?, last_processed_at = ?
        WHERE id = ? AND processing_status = 'transcribed'
        "#,
    )
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Guarded rollback one step after a cancelled job, so the record re-enters
/// the queue on the next tick
pub async fn rollback(
    pool: &SqlitePool,
    id: Uuid,
    from: ProcessingStatus,
    to: ProcessingStatus,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE calls
        SET processing_status = ?, last_processed_at = ?
        WHERE id = ? AND processing_status = ?
        "#,
    )
    .bind(to.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// List in-flight calls whose job started before `older_than`
pub async fn list_stale(
    pool: &SqlitePool,
    status: ProcessingStatus,
    older_than: chrono::DateTime<Utc>,
    limit: u32,
) -> Result<Vec<CallRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM calls
        WHERE processing_status = ?
          AND last_processed_at IS NOT NULL
          AND last_processed_at < ?
        ORDER BY last_processed_at ASC
        LIMIT ?
        "#,
    )
    .bind(status.as_str())
    .bind(older_than.to_rfc3339())
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_call).collect()
}

/// Stale recovery back to `synced`, bumping the retry count
pub async fn recover_stale(
    pool: &SqlitePool,
    id: Uuid,
    from: ProcessingStatus,
    retry_count: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE calls
        SET processing_status = 'synced', retry_count = ?, last_processed_at = ?
        WHERE id = ? AND processing_status = ?
        "#,
    )
    .bind(retry_count)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Stale job past the retry limit becomes a permanent failure
pub async fn fail_stale(
    pool: &SqlitePool,
    id: Uuid,
    from: ProcessingStatus,
    retry_count: i64,
    error: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE calls
        SET processing_status = 'failed', processing_error = ?, retry_count = ?,
            last_processed_at = ?
        WHERE id = ? AND processing_status = ?
        "#,
    )
    .bind(error)
    .bind(retry_count)
    .bind(Utc::now().to_rfc3339())
    .bind(id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::memory_pool;

    fn new_call(call_id: &str) -> NewCall {
        NewCall {
            call_id: call_id.to_string(),
            activity_name: format!("activity-{}", call_id),
            call_time: "2026-07-01T10:00:00Z".to_string(),
            duration: Some(120),
            direction: Some("in".to_string()),
            answered: Some(true),
            agent_id: None,
            question_group_id: None,
            processing_status: ProcessingStatus::Synced,
            processing_error: None,
        }
    }

    #[tokio::test]
    async fn test_insert_if_new_skips_existing() {
        let pool = memory_pool().await;

        assert!(insert_if_new(&pool, &new_call("c-1")).await.unwrap());
        assert!(!insert_if_new(&pool, &new_call("c-1")).await.unwrap());

        let call = get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
        assert_eq!(call.processing_status, ProcessingStatus::Synced);
        assert_eq!(call.retry_count, 0);
        assert!(call.qa_score.is_none());
    }

    #[tokio::test]
    async fn test_claim_is_guarded() {
        let pool = memory_pool().await;
        insert_if_new(&pool, &new_call("c-1")).await.unwrap();
        let call = get_by_call_id(&pool, "c-1").await.unwrap().unwrap();

        assert!(claim(
            &pool,
            call.id,
            ProcessingStatus::Synced,
            ProcessingStatus::Transcribing
        )
        .await
        .unwrap());

        // Second claim loses the race: status no longer matches.
        assert!(!claim(
            &pool,
            call.id,
            ProcessingStatus::Synced,
            ProcessingStatus::Transcribing
        )
        .await
        .unwrap());

        let call = get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
        assert_eq!(call.processing_status, ProcessingStatus::Transcribing);
        assert!(call.last_processed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_failed_records_error() {
        let pool = memory_pool().await;
        insert_if_new(&pool, &new_call("c-1")).await.unwrap();
        let call = get_by_call_id(&pool, "c-1").await.unwrap().unwrap();

        claim(
            &pool,
            call.id,
            ProcessingStatus::Synced,
            ProcessingStatus::Transcribing,
        )
        .await
        .unwrap();
        mark_failed(&pool, call.id, ProcessingStatus::Transcribing, "boom")
            .await
            .unwrap();

        let call = get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
        assert_eq!(call.processing_status, ProcessingStatus::Failed);
        assert_eq!(call.processing_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_list_by_status_honors_limit() {
        let pool = memory_pool().await;
        for i in 0..5 {
            insert_if_new(&pool, &new_call(&format!("c-{}", i)))
                .await
                .unwrap();
        }

        let batch = list_by_status(&pool, ProcessingStatus::Synced, 3)
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
    }
}
