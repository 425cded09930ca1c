//! Scheduler integration tests
//!
//! Exercises the state machine end to end with real pools: status-guard
//! idempotency, skip-without-group, stale recovery and the failure path
//! through the completion callbacks.

mod common;

use async_trait::async_trait;
use callqa_common::events::EventBus;
use callqa_pipeline::db;
use callqa_pipeline::jobs::{Analyzer, Transcriber};
use callqa_pipeline::models::ProcessingStatus;
use callqa_pipeline::pipeline::{PipelineScheduler, RetryPolicy, SchedulerConfig};
use callqa_pipeline::services::llm::{AnswerModel, LlmAnswer, LlmError};
use callqa_pipeline::services::platform::{PlatformClient, PlatformConfig};
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use common::*;

struct AlwaysTak;

#[async_trait]
impl AnswerModel for AlwaysTak {
    async fn answer(&self, _system: &str, _user: &str) -> Result<LlmAnswer, LlmError> {
        Ok(LlmAnswer {
            thought_process: String::new(),
            answer: "Tak".to_string(),
            justification: "test".to_string(),
        })
    }
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        enabled: true,
        tick_interval: Duration::from_secs(120),
        batch_size: 10,
        stale_threshold: ChronoDuration::minutes(15),
        stale_retry_limit: 3,
        stale_scan_limit: 50,
        transcription_parallelism: 3,
        analysis_parallelism: 5,
        retry: RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(5),
            base: 2,
        },
    }
}

/// Scheduler wired with an unconfigured platform (transcriptions fail
/// fatally) and a scripted LLM
fn scheduler(pool: &SqlitePool, llm: Option<Arc<dyn AnswerModel>>) -> PipelineScheduler {
    let event_bus = EventBus::new(64);
    let platform = Arc::new(PlatformClient::new(PlatformConfig::default()).unwrap());

    let transcriber = Arc::new(Transcriber::new(
        pool.clone(),
        platform,
        None,
        event_bus.clone(),
    ));
    let analyzer = Arc::new(
        Analyzer::new(pool.clone(), llm, event_bus.clone())
            .with_retry_settings(2, Duration::from_millis(1)),
    );

    PipelineScheduler::new(pool.clone(), event_bus, transcriber, analyzer, test_config())
}

async fn wait_for_status(pool: &SqlitePool, call_id: &str, expected: ProcessingStatus) {
    for _ in 0..200 {
        let call = db::calls::get_by_call_id(pool, call_id)
            .await
            .unwrap()
            .unwrap();
        if call.processing_status == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let call = db::calls::get_by_call_id(pool, call_id)
        .await
        .unwrap()
        .unwrap();
    panic!(
        "call {} never reached {:?}, stuck in {:?} ({:?})",
        call_id, expected, call.processing_status, call.processing_error
    );
}

fn backdate(minutes: i64) -> String {
    (Utc::now() - ChronoDuration::minutes(minutes)).to_rfc3339()
}

#[tokio::test]
async fn test_tick_claims_each_record_exactly_once() {
    let pool = memory_pool().await;
    for i in 0..3 {
        seed_call(
            &pool,
            &format!("c-{}", i),
            None,
            None,
            ProcessingStatus::Synced,
            60,
        )
        .await;
    }

    let sched = scheduler(&pool, None);

    let first = sched.tick().await.unwrap();
    assert_eq!(first.enqueued_transcriptions, 3);

    // The guarded flip already moved every record out of `synced`; an
    // immediately overlapping tick finds nothing to claim.
    let second = sched.tick().await.unwrap();
    assert_eq!(second.enqueued_transcriptions, 0);
}

#[tokio::test]
async fn test_transcription_failure_lands_in_failed() {
    let pool = memory_pool().await;
    seed_call(&pool, "c-1", None, None, ProcessingStatus::Synced, 60).await;

    let sched = scheduler(&pool, None);
    sched.tick().await.unwrap();

    // No STT provider configured: the job fails fatally and the callback
    // records a sanitized summary.
    wait_for_status(&pool, "c-1", ProcessingStatus::Failed).await;

    let call = db::calls::get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
    let error = call.processing_error.unwrap();
    assert!(error.starts_with("Transcription failed: "));
    assert!(error.contains("No transcription API configured"));
}

#[tokio::test]
async fn test_transcribed_without_group_is_skipped() {
    let pool = memory_pool().await;
    seed_call(&pool, "c-1", None, None, ProcessingStatus::Transcribed, 60).await;

    let sched = scheduler(&pool, None);
    let summary = sched.tick().await.unwrap();

    assert_eq!(summary.skipped_no_group, 1);
    assert_eq!(summary.enqueued_analyses, 0);

    let call = db::calls::get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
    assert_eq!(call.processing_status, ProcessingStatus::Skipped);
    assert_eq!(
        call.processing_error.as_deref(),
        Some("No question group assigned")
    );
}

#[tokio::test]
async fn test_analysis_flow_reaches_analyzed() {
    let pool = memory_pool().await;
    let group_id = seed_group(&pool, 2).await;
    let agent_id = seed_agent(&pool, "jkowalski").await;

    seed_call(
        &pool,
        "c-1",
        Some(agent_id),
        Some(group_id),
        ProcessingStatus::Transcribed,
        120,
    )
    .await;
    seed_transcript(&pool, "c-1").await;

    let sched = scheduler(&pool, Some(Arc::new(AlwaysTak)));
    let summary = sched.tick().await.unwrap();
    assert_eq!(summary.enqueued_analyses, 1);

    wait_for_status(&pool, "c-1", ProcessingStatus::Analyzed).await;

    let call = db::calls::get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
    assert_eq!(call.qa_score, Some(100));
    assert_eq!(call.processing_error, None);

    let row = db::stats::get_call_stats(&pool, agent_id, group_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.analyzed_count, 1);
    assert_eq!(row.total_score, 100);
}

#[tokio::test]
async fn test_stale_recovery_increments_then_fails() {
    let pool = memory_pool().await;
    let group_id = seed_group(&pool, 1).await;
    let call_doc_id = seed_call(
        &pool,
        "c-1",
        None,
        Some(group_id),
        ProcessingStatus::Analyzing,
        60,
    )
    .await;

    // Simulate a job whose callback never fired 20 minutes ago, with two
    // scheduler-level recoveries already burned.
    sqlx::query(
        "UPDATE calls SET last_processed_at = ?, retry_count = 2 WHERE id = ?",
    )
    .bind(backdate(20))
    .bind(call_doc_id.to_string())
    .execute(&pool)
    .await
    .unwrap();

    let sched = scheduler(&pool, None);
    let summary = sched.tick().await.unwrap();
    assert_eq!(summary.recovered_stale, 1);
    assert_eq!(summary.failed_stale, 0);

    let call = db::calls::get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
    assert_eq!(call.processing_status, ProcessingStatus::Synced);
    assert_eq!(call.retry_count, 3);

    // Back in flight and stale again, now at the retry limit: permanent
    // failure.
    sqlx::query(
        "UPDATE calls SET processing_status = 'analyzing', last_processed_at = ? WHERE id = ?",
    )
    .bind(backdate(20))
    .bind(call_doc_id.to_string())
    .execute(&pool)
    .await
    .unwrap();

    let summary = sched.tick().await.unwrap();
    assert_eq!(summary.recovered_stale, 0);
    assert_eq!(summary.failed_stale, 1);

    let call = db::calls::get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
    assert_eq!(call.processing_status, ProcessingStatus::Failed);
    assert_eq!(call.retry_count, 3);
    assert_eq!(
        call.processing_error.as_deref(),
        Some("Stale job after 3 attempts")
    );
}

#[tokio::test]
async fn test_fresh_in_flight_jobs_are_not_recovered() {
    let pool = memory_pool().await;
    let call_doc_id = seed_call(&pool, "c-1", None, None, ProcessingStatus::Transcribing, 60).await;

    sqlx::query("UPDATE calls SET last_processed_at = ? WHERE id = ?")
        .bind(backdate(5))
        .bind(call_doc_id.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let sched = scheduler(&pool, None);
    let summary = sched.tick().await.unwrap();
    assert_eq!(summary.recovered_stale, 0);
    assert_eq!(summary.failed_stale, 0);

    let call = db::calls::get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
    assert_eq!(call.processing_status, ProcessingStatus::Transcribing);
}

#[tokio::test]
async fn test_disabled_pipeline_skips_tick() {
    let pool = memory_pool().await;
    seed_call(&pool, "c-1", None, None, ProcessingStatus::Synced, 60).await;

    let mut config = test_config();
    config.enabled = false;

    let event_bus = EventBus::new(16);
    let platform = Arc::new(PlatformClient::new(PlatformConfig::default()).unwrap());
    let transcriber = Arc::new(Transcriber::new(
        pool.clone(),
        platform,
        None,
        event_bus.clone(),
    ));
    let analyzer = Arc::new(Analyzer::new(pool.clone(), None, event_bus.clone()));
    let sched = PipelineScheduler::new(pool.clone(), event_bus, transcriber, analyzer, config);

    let summary = sched.tick().await.unwrap();
    assert!(summary.skipped);
    assert_eq!(summary.enqueued_transcriptions, 0);

    let call = db::calls::get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
    assert_eq!(call.processing_status, ProcessingStatus::Synced);
}

#[tokio::test]
async fn test_all_error_analysis_ends_failed() {
    struct AlwaysBlocked;

    #[async_trait]
    impl AnswerModel for AlwaysBlocked {
        async fn answer(&self, _system: &str, _user: &str) -> Result<LlmAnswer, LlmError> {
            Err(LlmError::ContentBlocked("PROHIBITED_CONTENT".to_string()))
        }
    }

    let pool = memory_pool().await;
    let group_id = seed_group(&pool, 2).await;
    let agent_id = seed_agent(&pool, "jkowalski").await;

    seed_call(
        &pool,
        "c-1",
        Some(agent_id),
        Some(group_id),
        ProcessingStatus::Transcribed,
        90,
    )
    .await;
    seed_transcript(&pool, "c-1").await;

    let sched = scheduler(&pool, Some(Arc::new(AlwaysBlocked)));
    sched.tick().await.unwrap();

    // The result set was written, but the record ends failed, not
    // analyzed, and contributes nothing to the aggregates.
    wait_for_status(&pool, "c-1", ProcessingStatus::Failed).await;

    let transcript = db::transcripts::get_by_call_id(&pool, "c-1")
        .await
        .unwrap()
        .unwrap();
    assert!(transcript.qa_analysis.is_some());

    let call = db::calls::get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
    assert_eq!(call.qa_score, None);
    assert!(call
        .processing_error
        .unwrap()
        .starts_with("Analysis failed: "));

    assert!(db::stats::get_call_stats(&pool, agent_id, group_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_group_for_unknown_call_is_unclaimed() {
    // A transcribed record pointing at a deleted group still enqueues; the
    // job fails fatally and the record lands in failed for inspection.
    let pool = memory_pool().await;
    seed_call(
        &pool,
        "c-1",
        None,
        Some(Uuid::new_v4()),
        ProcessingStatus::Transcribed,
        60,
    )
    .await;
    seed_transcript(&pool, "c-1").await;

    let sched = scheduler(&pool, Some(Arc::new(AlwaysTak)));
    let summary = sched.tick().await.unwrap();
    assert_eq!(summary.enqueued_analyses, 1);

    wait_for_status(&pool, "c-1", ProcessingStatus::Failed).await;

    let call = db::calls::get_by_call_id(&pool, "c-1").await.unwrap().unwrap();
    assert!(call
        .processing_error
        .unwrap()
        .contains("Question group not found"));
}
