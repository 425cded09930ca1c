//! Read access to the aggregate statistics tables
//!
//! All mutations go through `crate::stats` (the statistics maintainer) so
//! the apply/revert symmetry lives in one place.

use callqa_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{CallStats, QuestionStats};

use super::{parse_datetime, parse_uuid};

fn row_to_call_stats(row: &sqlx::sqlite::SqliteRow) -> Result<CallStats> {
    let agent_id: String = row.get("agent_id");
    let question_group_id: String = row.get("question_group_id");
    let last_updated_at: String = row.get("last_updated_at");

    Ok(CallStats {
        agent_id: parse_uuid(&agent_id, "agent_id")?,
        question_group_id: parse_uuid(&question_group_id, "question_group_id")?,
        analyzed_count: row.get("analyzed_count"),
        total_score: row.get("total_score"),
        total_duration: row.get("total_duration"),
        last_updated_at: parse_datetime(&last_updated_at, "last_updated_at")?,
    })
}

fn row_to_question_stats(row: &sqlx::sqlite::SqliteRow) -> Result<QuestionStats> {
    let group_id: String = row.get("group_id");
    let last_updated_at: String = row.get("last_updated_at");

    Ok(QuestionStats {
        question_id: row.get("question_id"),
        group_id: parse_uuid(&group_id, "group_id")?,
        tak_count: row.get("tak_count"),
        nie_count: row.get("nie_count"),
        total_count: row.get("total_count"),
        last_updated_at: parse_datetime(&last_updated_at, "last_updated_at")?,
    })
}

/// Load the (agent, group) statistics row, if it exists
pub async fn get_call_stats(
    pool: &SqlitePool,
    agent_id: Uuid,
    question_group_id: Uuid,
) -> Result<Option<CallStats>> {
    let row = sqlx::query("SELECT * FROM call_stats WHERE agent_id = ? AND question_group_id = ?")
        .bind(agent_id.to_string())
        .bind(question_group_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_call_stats).transpose()
}

/// All statistics rows for one agent
pub async fn list_call_stats_by_agent(pool: &SqlitePool, agent_id: Uuid) -> Result<Vec<CallStats>> {
    let rows = sqlx::query("SELECT * FROM call_stats WHERE agent_id = ?")
        .bind(agent_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_call_stats).collect()
}

/// All call statistics rows
pub async fn list_all_call_stats(pool: &SqlitePool) -> Result<Vec<CallStats>> {
    let rows = sqlx::query("SELECT * FROM call_stats")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_call_stats).collect()
}

/// Load one question's tally row, if it exists
pub async fn get_question_stats(
    pool: &SqlitePool,
    question_id: &str,
) -> Result<Option<QuestionStats>> {
    let row = sqlx::query("SELECT * FROM question_stats WHERE question_id = ?")
        .bind(question_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_question_stats).transpose()
}

/// All tally rows for a rubric group
pub async fn list_question_stats_by_group(
    pool: &SqlitePool,
    group_id: Uuid,
) -> Result<Vec<QuestionStats>> {
    let rows = sqlx::query("SELECT * FROM question_stats WHERE group_id = ?")
        .bind(group_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_question_stats).collect()
}

/// All question tally rows
pub async fn list_all_question_stats(pool: &SqlitePool) -> Result<Vec<QuestionStats>> {
    let rows = sqlx::query("SELECT * FROM question_stats")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_question_stats).collect()
}
