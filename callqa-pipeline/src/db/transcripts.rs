//! Transcript database operations
//!
//! Transcripts are created only by successful transcription jobs. The QA
//! analysis columns are written exclusively through the statistics
//! maintainer's transactions so aggregates never drift from the stored
//! results.

use callqa_common::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::models::{HumanReview, QaAnalysis, Transcript, Utterance};

use super::parse_datetime;

fn row_to_transcript(row: &sqlx::sqlite::SqliteRow) -> Result<Transcript> {
    let utterances: String = row.get("utterances");
    let utterances: Vec<Utterance> = serde_json::from_str(&utterances)
        .map_err(|e| Error::Internal(format!("Failed to deserialize utterances: {}", e)))?;

    let qa_completed_at: Option<String> = row.get("qa_completed_at");
    let qa_results: Option<String> = row.get("qa_results");
    let qa_analysis = match (qa_completed_at, qa_results) {
        (Some(completed_at), Some(results)) => Some(QaAnalysis {
            completed_at: parse_datetime(&completed_at, "qa_completed_at")?,
            results: serde_json::from_str(&results)
                .map_err(|e| Error::Internal(format!("Failed to deserialize qa_results: {}", e)))?,
        }),
        _ => None,
    };

    let human_review: Option<String> = row.get("human_review");
    let human_review = human_review
        .map(|raw| {
            serde_json::from_str::<HumanReview>(&raw)
                .map_err(|e| Error::Internal(format!("Failed to deserialize human_review: {}", e)))
        })
        .transpose()?;

    let created_at: String = row.get("created_at");

    Ok(Transcript {
        call_id: row.get("call_id"),
        text: row.get("text"),
        language_code: row.get("language_code"),
        utterances,
        qa_analysis,
        human_review,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

/// Persist a freshly produced transcript (insert or replace text fields;
/// QA columns are left untouched on conflict)
pub async fn upsert(
    pool: &SqlitePool,
    call_id: &str,
    text: &str,
    language_code: &str,
    utterances: &[Utterance],
) -> Result<()> {
    let utterances_json = serde_json::to_string(utterances)
        .map_err(|e| Error::Internal(format!("Failed to serialize utterances: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO transcripts (call_id, text, language_code, utterances, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(call_id) DO UPDATE SET
            text = excluded.text,
            language_code = excluded.language_code,
            utterances = excluded.utterances
        "#,
    )
    .bind(call_id)
    .bind(text)
    .bind(language_code)
    .bind(utterances_json)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a transcript by call id
pub async fn get_by_call_id(pool: &SqlitePool, call_id: &str) -> Result<Option<Transcript>> {
    let row = sqlx::query("SELECT * FROM transcripts WHERE call_id = ?")
        .bind(call_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_transcript).transpose()
}

/// Check whether a transcript exists (the transcription cache test)
pub async fn exists(pool: &SqlitePool, call_id: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transcripts WHERE call_id = ?")
        .bind(call_id)
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}

/// Delete a transcript (forced re-transcription path)
pub async fn delete(pool: &SqlitePool, call_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM transcripts WHERE call_id = ?")
        .bind(call_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Write the QA analysis columns inside the caller's transaction
pub async fn write_qa_analysis(
    conn: &mut SqliteConnection,
    call_id: &str,
    analysis: &QaAnalysis,
) -> Result<()> {
    let results_json = serde_json::to_string(&analysis.results)
        .map_err(|e| Error::Internal(format!("Failed to serialize qa_results: {}", e)))?;

    let result = sqlx::query(
        "UPDATE transcripts SET qa_completed_at = ?, qa_results = ? WHERE call_id = ?",
    )
    .bind(analysis.completed_at.to_rfc3339())
    .bind(results_json)
    .bind(call_id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "Transcript not found for call {}",
            call_id
        )));
    }

    Ok(())
}

/// Remove the QA analysis columns inside the caller's transaction
pub async fn clear_qa_analysis(conn: &mut SqliteConnection, call_id: &str) -> Result<()> {
    sqlx::query("UPDATE transcripts SET qa_completed_at = NULL, qa_results = NULL WHERE call_id = ?")
        .bind(call_id)
        .execute(conn)
        .await?;

    Ok(())
}

/// Save a human review payload on an existing transcript
pub async fn save_human_review(
    pool: &SqlitePool,
    call_id: &str,
    review: &HumanReview,
) -> Result<()> {
    let review_json = serde_json::to_string(review)
        .map_err(|e| Error::Internal(format!("Failed to serialize human_review: {}", e)))?;

    let result = sqlx::query("UPDATE transcripts SET human_review = ? WHERE call_id = ?")
        .bind(review_json)
        .bind(call_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "Transcript not found for call {}",
            call_id
        )));
    }

    Ok(())
}
