//! Statistics maintainer
//!
//! Incremental aggregate maintenance for `call_stats` and `question_stats`.
//! There is no background recomputation job: every mutation that changes a
//! call's analysis outcome routes through exactly one of the three
//! operations here, inside the same transaction as the transcript/call
//! write it accompanies. `apply` and `revert` are exact mirrors, so any
//! sequence of edits, reprocesses and clears leaves the aggregates equal
//! to a from-scratch recomputation over the currently-analyzed calls.
//!
//! A call contributes to the aggregates at most once at any time: `apply`
//! is only called for a call with no counted analysis, and `revert` must
//! run before anything discards or replaces an existing analysis.

use callqa_common::Result;
use chrono::Utc;
use sqlx::SqliteConnection;

use crate::models::{CallRecord, QaResult};

/// Answer string counted as positive in all tallies
pub const ANSWER_POSITIVE: &str = "Tak";
/// Answer string counted as negative
pub const ANSWER_NEGATIVE: &str = "Nie";
/// Sentinel recorded when a single question failed analysis
pub const ANSWER_ERROR: &str = "Error";

/// Score a result list: `round(100 * positive / total)`, 0 when empty.
///
/// Only the exact string "Tak" is positive; "Error" and any other answer
/// count against the score but are not tallied as "Nie".
pub fn compute_qa_score(results: &[QaResult]) -> i64 {
    if results.is_empty() {
        return 0;
    }
    let tak = results.iter().filter(|r| r.answer == ANSWER_POSITIVE).count();
    ((tak as f64 / results.len() as f64) * 100.0).round() as i64
}

/// Count a freshly analyzed call into the aggregates.
///
/// Sets `calls.qa_score`, adds +1/+score/+duration to the (agent, group)
/// call-stats row and +1 tallies per question, creating rows on demand.
/// No-op when the call has no agent or rubric group (nothing to attribute).
pub async fn apply(
    conn: &mut SqliteConnection,
    call: &CallRecord,
    results: &[QaResult],
) -> Result<()> {
    let (agent_id, group_id) = match (call.agent_id, call.question_group_id) {
        (Some(agent_id), Some(group_id)) => (agent_id, group_id),
        _ => return Ok(()),
    };

    let qa_score = compute_qa_score(results);
    let now = Utc::now().to_rfc3339();

    sqlx::query("UPDATE calls SET qa_score = ? WHERE id = ?")
        .bind(qa_score)
        .bind(call.id.to_string())
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO call_stats (
            agent_id, question_group_id, analyzed_count, total_score,
            total_duration, last_updated_at
        ) VALUES (?, ?, 1, ?, ?, ?)
        ON CONFLICT(agent_id, question_group_id) DO UPDATE SET
            analyzed_count = analyzed_count + 1,
            total_score = total_score + excluded.total_score,
            total_duration = total_duration + excluded.total_duration,
            last_updated_at = excluded.last_updated_at
        "#,
    )
    .bind(agent_id.to_string())
    .bind(group_id.to_string())
    .bind(qa_score)
    .bind(call.duration.unwrap_or(0))
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    for result in results {
        let tak = i64::from(result.answer == ANSWER_POSITIVE);
        let nie = i64::from(result.answer == ANSWER_NEGATIVE);

        sqlx::query(
            r#"
            INSERT INTO question_stats (
                question_id, group_id, tak_count, nie_count, total_count,
                last_updated_at
            ) VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT(question_id) DO UPDATE SET
                tak_count = tak_count + excluded.tak_count,
                nie_count = nie_count + excluded.nie_count,
                total_count = total_count + 1,
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(&result.question_id)
        .bind(group_id.to_string())
        .bind(tak)
        .bind(nie)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Remove a previously counted analysis from the aggregates.
///
/// The exact inverse of `apply`, keyed to the results and `qa_score`
/// stored at the time of the mutation. Counters are floored at zero to
/// tolerate earlier inconsistency. Clears `calls.qa_score`.
pub async fn revert(
    conn: &mut SqliteConnection,
    call: &CallRecord,
    results: &[QaResult],
) -> Result<()> {
    let (agent_id, group_id) = match (call.agent_id, call.question_group_id) {
        (Some(agent_id), Some(group_id)) => (agent_id, group_id),
        _ => return Ok(()),
    };

    let qa_score = call.qa_score.unwrap_or(0);
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        UPDATE call_stats SET
            analyzed_count = MAX(0, analyzed_count - 1),
            total_score = MAX(0, total_score - ?),
            total_duration = MAX(0, total_duration - ?),
            last_updated_at = ?
        WHERE agent_id = ? AND question_group_id = ?
        "#,
    )
    .bind(qa_score)
    .bind(call.duration.unwrap_or(0))
    .bind(&now)
    .bind(agent_id.to_string())
    .bind(group_id.to_string())
    .execute(&mut *conn)
    .await?;

    for result in results {
        let tak = i64::from(result.answer == ANSWER_POSITIVE);
        let nie = i64::from(result.answer == ANSWER_NEGATIVE);

        sqlx::query(
            r#"
            UPDATE question_stats SET
                tak_count = MAX(0, tak_count - ?),
                nie_count = MAX(0, nie_count - ?),
                total_count = MAX(0, total_count - 1),
                last_updated_at = ?
            WHERE question_id = ?
            "#,
        )
        .bind(tak)
        .bind(nie)
        .bind(&now)
        .bind(&result.question_id)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query("UPDATE calls SET qa_score = NULL WHERE id = ?")
        .bind(call.id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Adjust the aggregates after a single human-edited answer.
///
/// Moves one tally between buckets on the affected question and propagates
/// the recomputed score delta into `call_stats.total_score`. No call is
/// added or removed, so `analyzed_count`, `total_count` and
/// `total_duration` stay untouched.
pub async fn apply_answer_edit(
    conn: &mut SqliteConnection,
    call: &CallRecord,
    question_id: &str,
    old_answer: &str,
    new_answer: &str,
    updated_results: &[QaResult],
) -> Result<()> {
    if old_answer == new_answer {
        return Ok(());
    }

    let (agent_id, group_id) = match (call.agent_id, call.question_group_id) {
        (Some(agent_id), Some(group_id)) => (agent_id, group_id),
        _ => return Ok(()),
    };

    let now = Utc::now().to_rfc3339();

    let tak_delta =
        i64::from(new_answer == ANSWER_POSITIVE) - i64::from(old_answer == ANSWER_POSITIVE);
    let nie_delta =
        i64::from(new_answer == ANSWER_NEGATIVE) - i64::from(old_answer == ANSWER_NEGATIVE);

    sqlx::query(
        r#"
        UPDATE question_stats SET
            tak_count = MAX(0, tak_count + ?),
            nie_count = MAX(0, nie_count + ?),
            last_updated_at = ?
        WHERE question_id = ?
        "#,
    )
    .bind(tak_delta)
    .bind(nie_delta)
    .bind(&now)
    .bind(question_id)
    .execute(&mut *conn)
    .await?;

    let new_score = compute_qa_score(updated_results);
    let old_score = call.qa_score.unwrap_or(0);
    let score_delta = new_score - old_score;

    sqlx::query("UPDATE calls SET qa_score = ? WHERE id = ?")
        .bind(new_score)
        .bind(call.id.to_string())
        .execute(&mut *conn)
        .await?;

    if score_delta != 0 {
        sqlx::query(
            r#"
            UPDATE call_stats SET
                total_score = total_score + ?,
                last_updated_at = ?
            WHERE agent_id = ? AND question_group_id = ?
            "#,
        )
        .bind(score_delta)
        .bind(&now)
        .bind(agent_id.to_string())
        .bind(group_id.to_string())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}
