//! Manual pipeline controls
//!
//! The admin surface's entry points into the state machine: retrying a
//! failed call, reprocessing from scratch, clearing an analysis and
//! editing a single answer. Every path that discards or replaces counted
//! results reverts the statistics in the same transaction, and the final
//! status update is guarded so concurrent mutations lose cleanly instead
//! of double-reverting.

use callqa_common::events::{EventBus, PipelineEvent, StatsDirection};
use callqa_common::{Error, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::db;
use crate::models::{CallRecord, ProcessingStatus, QaAnalysis};
use crate::stats;

/// Retry a failed call: `failed -> synced`, bumping the retry count.
///
/// The record re-enters the pipeline on the next scheduler tick.
pub async fn retry_call(db: &SqlitePool, call_id: &str) -> Result<CallRecord> {
    let call = require_call(db, call_id).await?;

    if call.processing_status != ProcessingStatus::Failed {
        return Err(Error::InvalidInput(format!(
            "Call {} is not failed (status: {})",
            call_id, call.processing_status
        )));
    }

    let updated = sqlx::query(
        r#"
        UPDATE calls
        SET processing_status = 'synced', retry_count = retry_count + 1,
            last_processed_at = ?
        WHERE id = ? AND processing_status = 'failed'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(call.id.to_string())
    .execute(db)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(Error::InvalidInput(format!(
            "Call {} changed state concurrently",
            call_id
        )));
    }

    tracing::info!(call_id = %call_id, "Call queued for retry");
    require_call(db, call_id).await
}

/// Reprocess a call from scratch: `analyzed`/`failed` -> `synced`.
///
/// A counted analysis is reverted and discarded in the same transaction as
/// the status change, so the next analysis applies onto clean aggregates.
pub async fn reprocess_call(
    db: &SqlitePool,
    event_bus: &EventBus,
    call_id: &str,
) -> Result<CallRecord> {
    let call = require_call(db, call_id).await?;

    if !matches!(
        call.processing_status,
        ProcessingStatus::Analyzed | ProcessingStatus::Failed
    ) {
        return Err(Error::InvalidInput(format!(
            "Call {} cannot be reprocessed (status: {})",
            call_id, call.processing_status
        )));
    }

    let analysis = stored_analysis(db, call_id).await?;

    let mut tx = db.begin().await?;

    if let Some(analysis) = &analysis {
        stats::revert(&mut tx, &call, &analysis.results).await?;
        db::transcripts::clear_qa_analysis(&mut tx, call_id).await?;
    }

    let updated = sqlx::query(
        r#"
        UPDATE calls
        SET processing_status = 'synced', processing_error = NULL,
            last_processed_at = ?
        WHERE id = ? AND processing_status IN ('analyzed', 'failed')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(call.id.to_string())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        // Another mutation won the race; dropping the transaction rolls
        // back the revert.
        return Err(Error::InvalidInput(format!(
            "Call {} changed state concurrently",
            call_id
        )));
    }

    tx.commit().await?;

    if analysis.is_some() {
        emit_stats_adjusted(event_bus, &call, StatsDirection::Reverted);
    }

    tracing::info!(call_id = %call_id, "Call queued for reprocessing");
    require_call(db, call_id).await
}

/// Clear a call's analysis: revert statistics, drop the stored results and
/// downgrade `analyzed -> transcribed`.
pub async fn clear_qa_analysis(
    db: &SqlitePool,
    event_bus: &EventBus,
    call_id: &str,
) -> Result<CallRecord> {
    let call = require_call(db, call_id).await?;

    let analysis = match stored_analysis(db, call_id).await? {
        Some(analysis) => analysis,
        None => return Ok(call),
    };

    let mut tx = db.begin().await?;

    stats::revert(&mut tx, &call, &analysis.results).await?;
    db::transcripts::clear_qa_analysis(&mut tx, call_id).await?;

    sqlx::query(
        r#"
        UPDATE calls
        SET processing_status = 'transcribed', last_processed_at = ?
        WHERE id = ? AND processing_status = 'analyzed'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(call.id.to_string())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    emit_stats_adjusted(event_bus, &call, StatsDirection::Reverted);

    tracing::info!(call_id = %call_id, "Cleared QA analysis");
    require_call(db, call_id).await
}

/// Edit a single answer and propagate the tally and score deltas.
///
/// Only the affected question's buckets move; `analyzed_count`,
/// `total_count` and `total_duration` are untouched because no call was
/// added or removed.
pub async fn edit_answer(
    db: &SqlitePool,
    call_id: &str,
    question_id: &str,
    new_answer: &str,
    new_justification: Option<&str>,
) -> Result<QaAnalysis> {
    let call = require_call(db, call_id).await?;

    let mut analysis = stored_analysis(db, call_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("No QA analysis for call {}", call_id)))?;

    let result = analysis
        .results
        .iter_mut()
        .find(|r| r.question_id == question_id)
        .ok_or_else(|| {
            Error::NotFound(format!(
                "Question {} not found in analysis for call {}",
                question_id, call_id
            ))
        })?;

    let old_answer = result.answer.clone();
    result.answer = new_answer.to_string();
    if let Some(justification) = new_justification {
        result.justification = justification.to_string();
    }

    let mut tx = db.begin().await?;

    db::transcripts::write_qa_analysis(&mut tx, call_id, &analysis).await?;
    stats::apply_answer_edit(
        &mut tx,
        &call,
        question_id,
        &old_answer,
        new_answer,
        &analysis.results,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        call_id = %call_id,
        question_id = %question_id,
        old_answer = %old_answer,
        new_answer = %new_answer,
        "Edited QA answer"
    );

    Ok(analysis)
}

async fn require_call(db: &SqlitePool, call_id: &str) -> Result<CallRecord> {
    db::calls::get_by_call_id(db, call_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Call not found: {}", call_id)))
}

async fn stored_analysis(db: &SqlitePool, call_id: &str) -> Result<Option<QaAnalysis>> {
    Ok(db::transcripts::get_by_call_id(db, call_id)
        .await?
        .and_then(|t| t.qa_analysis))
}

fn emit_stats_adjusted(event_bus: &EventBus, call: &CallRecord, direction: StatsDirection) {
    event_bus.emit_lossy(PipelineEvent::StatsAdjusted {
        call_id: call.call_id.clone(),
        agent_id: call.agent_id,
        direction,
        timestamp: Utc::now(),
    });
}
