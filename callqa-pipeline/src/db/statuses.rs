//! Platform status to rubric-group mapping
//!
//! The ingestion sync assigns a call's rubric group from the platform
//! status tags carried on the activity; only statuses flagged active for
//! QA are synced at all.

use callqa_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;

/// One platform status tag and its QA mapping
#[derive(Debug, Clone)]
pub struct PlatformStatus {
    pub status_id: String,
    pub name: String,
    pub title: String,
    pub question_group_id: Option<Uuid>,
    pub is_active_for_qa: bool,
}

fn row_to_status(row: &sqlx::sqlite::SqliteRow) -> Result<PlatformStatus> {
    let question_group_id: Option<String> = row.get("question_group_id");
    Ok(PlatformStatus {
        status_id: row.get("status_id"),
        name: row.get("name"),
        title: row.get("title"),
        question_group_id: question_group_id
            .map(|s| parse_uuid(&s, "question_group_id"))
            .transpose()?,
        is_active_for_qa: row.get::<i64, _>("is_active_for_qa") != 0,
    })
}

/// Statuses currently enabled for QA sync
pub async fn list_active(pool: &SqlitePool) -> Result<Vec<PlatformStatus>> {
    let rows = sqlx::query("SELECT * FROM platform_statuses WHERE is_active_for_qa = 1")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_status).collect()
}

/// Rubric group mapped to a status id, if any
pub async fn group_for_status(pool: &SqlitePool, status_id: &str) -> Result<Option<Uuid>> {
    let row: Option<Option<String>> = sqlx::query_scalar(
        "SELECT question_group_id FROM platform_statuses WHERE status_id = ? AND is_active_for_qa = 1",
    )
    .bind(status_id)
    .fetch_optional(pool)
    .await?;

    match row.flatten() {
        Some(raw) => Ok(Some(parse_uuid(&raw, "question_group_id")?)),
        None => Ok(None),
    }
}

/// Upsert a status mapping
pub async fn upsert(pool: &SqlitePool, status: &PlatformStatus) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO platform_statuses (status_id, name, title, question_group_id, is_active_for_qa)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(status_id) DO UPDATE SET
            name = excluded.name,
            title = excluded.title,
            question_group_id = excluded.question_group_id,
            is_active_for_qa = excluded.is_active_for_qa
        "#,
    )
    .bind(&status.status_id)
    .bind(&status.name)
    .bind(&status.title)
    .bind(status.question_group_id.map(|id| id.to_string()))
    .bind(i64::from(status.is_active_for_qa))
    .execute(pool)
    .await?;

    Ok(())
}
