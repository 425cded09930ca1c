//! Shared fixtures for integration tests

// Each integration test binary compiles its own copy; not every helper is
// used by every binary.
#![allow(dead_code)]

use callqa_pipeline::db;
use callqa_pipeline::db::calls::NewCall;
use callqa_pipeline::models::{
    ProcessingStatus, QaAnalysis, QaResult, RubricGroup, RubricQuestion, Utterance,
};
use callqa_pipeline::stats;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

/// In-memory pool limited to one connection so every query sees the same
/// database
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    db::init_tables(&pool).await.expect("init tables");
    pool
}

/// Seed a rubric group with `question_count` active yes/no questions
/// (q1..qN)
pub async fn seed_group(pool: &SqlitePool, question_count: usize) -> Uuid {
    let group_id = Uuid::new_v4();

    db::rubric::upsert_group(
        pool,
        &RubricGroup {
            id: group_id,
            name: "sprzedaz".to_string(),
            display_name: "Sprzedaz".to_string(),
            system_prompt: "Jestes audytorem jakosci rozmow.".to_string(),
        },
    )
    .await
    .expect("seed group");

    for i in 0..question_count {
        db::rubric::upsert_question(
            pool,
            &RubricQuestion {
                question_id: format!("q{}", i + 1),
                group_id,
                question: format!("Pytanie numer {}?", i + 1),
                context: String::new(),
                reference_script: None,
                good_examples: vec![],
                bad_examples: vec![],
                possible_answers: vec!["Tak".to_string(), "Nie".to_string()],
                sort_order: (i + 1) as i64,
                is_active: true,
            },
        )
        .await
        .expect("seed question");
    }

    group_id
}

/// Seed an agent and return its id
pub async fn seed_agent(pool: &SqlitePool, username: &str) -> Uuid {
    db::agents::upsert_by_username(pool, username, "Jan Kowalski", Some("101"))
        .await
        .expect("seed agent")
}

/// Seed a call record in the given status
pub async fn seed_call(
    pool: &SqlitePool,
    call_id: &str,
    agent_id: Option<Uuid>,
    group_id: Option<Uuid>,
    status: ProcessingStatus,
    duration: i64,
) -> Uuid {
    db::calls::insert_if_new(
        pool,
        &NewCall {
            call_id: call_id.to_string(),
            activity_name: format!("activity-{}", call_id),
            call_time: "2026-07-01T10:00:00Z".to_string(),
            duration: Some(duration),
            direction: Some("in".to_string()),
            answered: Some(true),
            agent_id,
            question_group_id: group_id,
            processing_status: status,
            processing_error: None,
        },
    )
    .await
    .expect("seed call");

    db::calls::get_by_call_id(pool, call_id)
        .await
        .expect("load call")
        .expect("call exists")
        .id
}

/// Seed a transcript for a call
pub async fn seed_transcript(pool: &SqlitePool, call_id: &str) {
    db::transcripts::upsert(
        pool,
        call_id,
        "Dzien dobry, w czym moge pomoc?",
        "pl",
        &[Utterance {
            speaker: 0,
            transcript: "Dzien dobry, w czym moge pomoc?".to_string(),
            start: 0.0,
            end: 2.5,
        }],
    )
    .await
    .expect("seed transcript");
}

/// Build a result list of `total` answers with the first `tak` positive
pub fn results_with_tak(total: usize, tak: usize) -> Vec<QaResult> {
    (0..total)
        .map(|i| QaResult {
            question_id: format!("q{}", i + 1),
            question: format!("Pytanie numer {}?", i + 1),
            answer: if i < tak { "Tak" } else { "Nie" }.to_string(),
            justification: "test".to_string(),
        })
        .collect()
}

/// Persist an analysis the way the analysis job does: write the results,
/// apply the statistics deltas and flip the call to `analyzed`, all in one
/// transaction
pub async fn analyze_call(pool: &SqlitePool, call_id: &str, results: Vec<QaResult>) {
    let call = db::calls::get_by_call_id(pool, call_id)
        .await
        .expect("load call")
        .expect("call exists");

    let analysis = QaAnalysis {
        completed_at: Utc::now(),
        results,
    };

    let mut tx = pool.begin().await.expect("begin");
    db::transcripts::write_qa_analysis(&mut tx, call_id, &analysis)
        .await
        .expect("write analysis");
    stats::apply(&mut tx, &call, &analysis.results)
        .await
        .expect("apply stats");
    sqlx::query("UPDATE calls SET processing_status = 'analyzed' WHERE id = ?")
        .bind(call.id.to_string())
        .execute(&mut *tx)
        .await
        .expect("set analyzed");
    tx.commit().await.expect("commit");
}

/// Recompute the expected (analyzed_count, total_score, total_duration)
/// for one (agent, group) pair from the currently stored analyses
pub async fn recompute_call_stats(
    pool: &SqlitePool,
    agent_id: Uuid,
    group_id: Uuid,
) -> (i64, i64, i64) {
    let calls = db::calls::list_recent(pool, 500).await.expect("list calls");

    let mut analyzed_count = 0i64;
    let mut total_score = 0i64;
    let mut total_duration = 0i64;

    for call in calls {
        if call.agent_id != Some(agent_id) || call.question_group_id != Some(group_id) {
            continue;
        }
        if call.processing_status != ProcessingStatus::Analyzed {
            continue;
        }
        let transcript = db::transcripts::get_by_call_id(pool, &call.call_id)
            .await
            .expect("load transcript");
        if let Some(analysis) = transcript.and_then(|t| t.qa_analysis) {
            analyzed_count += 1;
            total_score += stats::compute_qa_score(&analysis.results);
            total_duration += call.duration.unwrap_or(0);
        }
    }

    (analyzed_count, total_score, total_duration)
}

/// Recompute expected (tak, nie, total) for one question across all
/// stored analyses
pub async fn recompute_question_stats(pool: &SqlitePool, question_id: &str) -> (i64, i64, i64) {
    let calls = db::calls::list_recent(pool, 500).await.expect("list calls");

    let mut tak = 0i64;
    let mut nie = 0i64;
    let mut total = 0i64;

    for call in calls {
        if call.processing_status != ProcessingStatus::Analyzed {
            continue;
        }
        let transcript = db::transcripts::get_by_call_id(pool, &call.call_id)
            .await
            .expect("load transcript");
        if let Some(analysis) = transcript.and_then(|t| t.qa_analysis) {
            for result in &analysis.results {
                if result.question_id == question_id {
                    total += 1;
                    if result.answer == "Tak" {
                        tak += 1;
                    } else if result.answer == "Nie" {
                        nie += 1;
                    }
                }
            }
        }
    }

    (tak, nie, total)
}
