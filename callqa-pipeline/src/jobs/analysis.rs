//! Rubric analysis job
//!
//! Evaluates every active question of the call's rubric group against the
//! LLM provider, independently and concurrently. Provider rate limits and
//! overloads are retried here with their own attempt ceiling (the pool's
//! retry layer only sees whole-job failures); a content-safety rejection
//! fails just the affected question with an `"Error"` sentinel answer.
//!
//! The full result set is persisted as one transaction together with the
//! statistics deltas: any previously counted analysis is reverted, the new
//! results are written, then applied. If every question errored the job
//! reports terminal failure even though the results were written, so the
//! call lands in `failed` rather than `analyzed`.

use callqa_common::events::{EventBus, PipelineEvent};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::db;
use crate::jobs::prompt;
use crate::models::{format_utterances_as_dialog, QaAnalysis, QaResult, RubricQuestion};
use crate::pipeline::pool::JobError;
use crate::services::llm::AnswerModel;
use crate::stats;

/// Job-level retry ceiling for provider rate limits and overloads
const MAX_QUESTION_ATTEMPTS: u32 = 5;
/// Base backoff between question attempts, doubled per attempt
const QUESTION_BASE_DELAY: Duration = Duration::from_secs(5);

/// Executes analysis jobs against the LLM provider
pub struct Analyzer {
    db: SqlitePool,
    llm: Option<Arc<dyn AnswerModel>>,
    event_bus: EventBus,
    max_attempts: u32,
    base_delay: Duration,
}

impl Analyzer {
    pub fn new(db: SqlitePool, llm: Option<Arc<dyn AnswerModel>>, event_bus: EventBus) -> Self {
        Self {
            db,
            llm,
            event_bus,
            max_attempts: MAX_QUESTION_ATTEMPTS,
            base_delay: QUESTION_BASE_DELAY,
        }
    }

    /// Override the per-question retry behavior (tests use short delays)
    pub fn with_retry_settings(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.base_delay = base_delay;
        self
    }

    /// Run one analysis job for a call and its assigned rubric group
    pub async fn run(&self, call_id: &str, group_id: uuid::Uuid) -> Result<(), JobError> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| JobError::fatal("LLM API key not configured"))?;

        let transcript = db::transcripts::get_by_call_id(&self.db, call_id)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?
            .ok_or_else(|| {
                JobError::transient(format!("Transcript not found for call {}", call_id))
            })?;

        let call = db::calls::get_by_call_id(&self.db, call_id)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?
            .ok_or_else(|| JobError::transient(format!("Call not found: {}", call_id)))?;

        let group = db::rubric::get_group(&self.db, group_id)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?
            .ok_or_else(|| JobError::fatal(format!("Question group not found: {}", group_id)))?;

        let questions = db::rubric::list_active_questions(&self.db, group_id)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;
        if questions.is_empty() {
            return Err(JobError::fatal("No active questions found for this group"));
        }

        let formatted_transcript = if transcript.utterances.is_empty() {
            transcript.text.clone()
        } else {
            format_utterances_as_dialog(&transcript.utterances)
        };

        let agent_name = match call.agent_id {
            Some(agent_id) => db::agents::get(&self.db, agent_id)
                .await
                .map_err(|e| JobError::transient(e.to_string()))?
                .map(|a| a.display_name),
            None => None,
        };

        let system_prompt = prompt::build_system_prompt(&group.system_prompt, agent_name.as_deref());

        tracing::info!(
            call_id = %call_id,
            group = %group.name,
            questions = questions.len(),
            "Analyzing call"
        );

        // All questions evaluated independently; completion order is
        // irrelevant but the result list preserves rubric order.
        let results: Vec<QaResult> = futures::future::join_all(
            questions
                .iter()
                .enumerate()
                .map(|(i, question)| {
                    self.answer_question(
                        llm,
                        &system_prompt,
                        &formatted_transcript,
                        question,
                        i,
                        questions.len(),
                    )
                }),
        )
        .await;

        let analysis = QaAnalysis {
            completed_at: Utc::now(),
            results,
        };

        let error_count = analysis
            .results
            .iter()
            .filter(|r| r.answer == stats::ANSWER_ERROR)
            .count();
        let all_errored = error_count == analysis.results.len();

        let mut tx = self
            .db
            .begin()
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        // A prior analysis being replaced must leave the aggregates first;
        // apply/revert stay symmetric so the call counts at most once.
        if let Some(existing) = &transcript.qa_analysis {
            stats::revert(&mut tx, &call, &existing.results)
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
        }

        db::transcripts::write_qa_analysis(&mut tx, call_id, &analysis)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        // An all-error result set is a failed analysis: the results are
        // kept for inspection but the call must not count as analyzed, so
        // no score is cached and no deltas are applied.
        if !all_errored {
            stats::apply(&mut tx, &call, &analysis.results)
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        let qa_score = if all_errored {
            None
        } else {
            Some(stats::compute_qa_score(&analysis.results))
        };

        self.event_bus.emit_lossy(PipelineEvent::AnalysisCompleted {
            call_id: call_id.to_string(),
            question_count: analysis.results.len(),
            error_count,
            qa_score,
            timestamp: Utc::now(),
        });

        tracing::info!(
            call_id = %call_id,
            questions = analysis.results.len(),
            errors = error_count,
            "Completed analysis"
        );

        if all_errored {
            return Err(JobError::fatal(
                "All questions failed analysis - content may be blocked by safety filters",
            ));
        }

        Ok(())
    }

    /// Answer one question, retrying transient provider errors with
    /// backoff. Never fails the job: terminal per-question errors become
    /// an `"Error"` result.
    async fn answer_question(
        &self,
        llm: &Arc<dyn AnswerModel>,
        system_prompt: &str,
        transcript: &str,
        question: &RubricQuestion,
        index: usize,
        total: usize,
    ) -> QaResult {
        let user_prompt = prompt::build_user_prompt(transcript, question);
        let mut attempt: u32 = 1;

        loop {
            match llm.answer(system_prompt, &user_prompt).await {
                Ok(answer) => {
                    tracing::info!(
                        question_id = %question.question_id,
                        progress = format!("{}/{}", index + 1, total),
                        answer = %answer.answer,
                        "Question answered"
                    );
                    return QaResult {
                        question_id: question.question_id.clone(),
                        question: question.question.clone(),
                        answer: answer.answer,
                        justification: answer.justification,
                    };
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = err
                        .retry_after()
                        .unwrap_or_else(|| self.base_delay * 2u32.pow(attempt - 1));
                    tracing::warn!(
                        question_id = %question.question_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Provider busy, retrying question"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        question_id = %question.question_id,
                        attempt,
                        error = %err,
                        "Question failed analysis"
                    );
                    return QaResult {
                        question_id: question.question_id.clone(),
                        question: question.question.clone(),
                        answer: stats::ANSWER_ERROR.to_string(),
                        justification: format!("Failed to analyze: {}", err),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::calls::NewCall;
    use crate::db::test_util::memory_pool;
    use crate::models::{ProcessingStatus, RubricGroup, Utterance};
    use crate::services::llm::{LlmAnswer, LlmError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Scripted fake provider: answers by question text, optionally
    /// failing the first N attempts
    struct FakeModel {
        answers: HashMap<String, String>,
        fail_first: usize,
        attempts: AtomicUsize,
        failure: Mutex<Option<fn() -> LlmError>>,
    }

    impl FakeModel {
        fn answering(answers: &[(&str, &str)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(q, a)| (q.to_string(), a.to_string()))
                    .collect(),
                fail_first: 0,
                attempts: AtomicUsize::new(0),
                failure: Mutex::new(None),
            }
        }

        fn failing_always(failure: fn() -> LlmError) -> Self {
            Self {
                answers: HashMap::new(),
                fail_first: usize::MAX,
                attempts: AtomicUsize::new(0),
                failure: Mutex::new(Some(failure)),
            }
        }

        fn failing_first(n: usize, failure: fn() -> LlmError, answers: &[(&str, &str)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(q, a)| (q.to_string(), a.to_string()))
                    .collect(),
                fail_first: n,
                attempts: AtomicUsize::new(0),
                failure: Mutex::new(Some(failure)),
            }
        }
    }

    #[async_trait]
    impl AnswerModel for FakeModel {
        async fn answer(
            &self,
            _system_prompt: &str,
            user_prompt: &str,
        ) -> Result<LlmAnswer, LlmError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                let failure = self.failure.lock().unwrap();
                if let Some(make) = *failure {
                    return Err(make());
                }
            }

            let answer = self
                .answers
                .iter()
                .find(|(question, _)| user_prompt.contains(question.as_str()))
                .map(|(_, a)| a.clone())
                .unwrap_or_else(|| "Nie".to_string());

            Ok(LlmAnswer {
                thought_process: String::new(),
                answer,
                justification: "test".to_string(),
            })
        }
    }

    struct Fixture {
        pool: SqlitePool,
        group_id: Uuid,
        call_doc_id: Uuid,
    }

    async fn fixture(question_count: usize) -> Fixture {
        let pool = memory_pool().await;
        let group_id = Uuid::new_v4();

        db::rubric::upsert_group(
            &pool,
            &RubricGroup {
                id: group_id,
                name: "sprzedaz".to_string(),
                display_name: "Sprzedaz".to_string(),
                system_prompt: "Jestes audytorem jakosci rozmow.".to_string(),
            },
        )
        .await
        .unwrap();

        for i in 0..question_count {
            db::rubric::upsert_question(
                &pool,
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
            .unwrap();
        }

        let agent_id = db::agents::upsert_by_username(&pool, "jkowalski", "Jan Kowalski", None)
            .await
            .unwrap();

        db::calls::insert_if_new(
            &pool,
            &NewCall {
                call_id: "c-1".to_string(),
                activity_name: "act-1".to_string(),
                call_time: "2026-07-01T10:00:00Z".to_string(),
                duration: Some(300),
                direction: Some("in".to_string()),
                answered: Some(true),
                agent_id: Some(agent_id),
                question_group_id: Some(group_id),
                processing_status: ProcessingStatus::Synced,
                processing_error: None,
            },
        )
        .await
        .unwrap();

        db::transcripts::upsert(
            &pool,
            "c-1",
            "Dzien dobry",
            "pl",
            &[Utterance {
                speaker: 0,
                transcript: "Dzien dobry".to_string(),
                start: 0.0,
                end: 1.0,
            }],
        )
        .await
        .unwrap();

        let call_doc_id = db::calls::get_by_call_id(&pool, "c-1")
            .await
            .unwrap()
            .unwrap()
            .id;

        Fixture {
            pool,
            group_id,
            call_doc_id,
        }
    }

    fn analyzer(pool: &SqlitePool, model: FakeModel) -> Analyzer {
        Analyzer::new(pool.clone(), Some(Arc::new(model)), EventBus::new(16))
            .with_retry_settings(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_analysis_persists_results_in_question_order() {
        let fx = fixture(3).await;
        let worker = analyzer(
            &fx.pool,
            FakeModel::answering(&[
                ("Pytanie numer 1?", "Tak"),
                ("Pytanie numer 2?", "Nie"),
                ("Pytanie numer 3?", "Tak"),
            ]),
        );

        worker.run("c-1", fx.group_id).await.unwrap();

        let transcript = db::transcripts::get_by_call_id(&fx.pool, "c-1")
            .await
            .unwrap()
            .unwrap();
        let analysis = transcript.qa_analysis.unwrap();
        let ids: Vec<&str> = analysis
            .results
            .iter()
            .map(|r| r.question_id.as_str())
            .collect();
        assert_eq!(ids, vec!["q1", "q2", "q3"]);

        // 2 of 3 positive
        let call = db::calls::get_by_id(&fx.pool, fx.call_doc_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(call.qa_score, Some(67));

        let question_stats = db::stats::get_question_stats(&fx.pool, "q1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(question_stats.tak_count, 1);
        assert_eq!(question_stats.total_count, 1);
    }

    #[tokio::test]
    async fn test_all_errors_report_failure_but_persist() {
        let fx = fixture(2).await;
        let worker = analyzer(
            &fx.pool,
            FakeModel::failing_always(|| LlmError::ContentBlocked("PROHIBITED_CONTENT".to_string())),
        );

        let err = worker.run("c-1", fx.group_id).await.unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("All questions failed"));

        // The result set was still written.
        let transcript = db::transcripts::get_by_call_id(&fx.pool, "c-1")
            .await
            .unwrap()
            .unwrap();
        let analysis = transcript.qa_analysis.unwrap();
        assert_eq!(analysis.results.len(), 2);
        assert!(analysis.results.iter().all(|r| r.answer == "Error"));
        assert!(analysis.results[0]
            .justification
            .contains("Content blocked by safety filters"));

        // A failed analysis never contributes to the aggregates.
        let call = db::calls::get_by_id(&fx.pool, fx.call_doc_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(call.qa_score, None);
        assert!(db::stats::list_all_call_stats(&fx.pool)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_with_hint() {
        let fx = fixture(1).await;
        let worker = analyzer(
            &fx.pool,
            FakeModel::failing_first(
                1,
                || LlmError::RateLimited {
                    message: "quota".to_string(),
                    retry_after: Some(Duration::from_millis(1)),
                },
                &[("Pytanie numer 1?", "Tak")],
            ),
        );

        worker.run("c-1", fx.group_id).await.unwrap();

        let call = db::calls::get_by_id(&fx.pool, fx.call_doc_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(call.qa_score, Some(100));
    }

    #[tokio::test]
    async fn test_reanalysis_counts_call_once() {
        let fx = fixture(2).await;

        let worker = analyzer(
            &fx.pool,
            FakeModel::answering(&[("Pytanie numer 1?", "Tak"), ("Pytanie numer 2?", "Tak")]),
        );
        worker.run("c-1", fx.group_id).await.unwrap();

        let worker = analyzer(
            &fx.pool,
            FakeModel::answering(&[("Pytanie numer 1?", "Nie"), ("Pytanie numer 2?", "Tak")]),
        );
        worker.run("c-1", fx.group_id).await.unwrap();

        let call = db::calls::get_by_id(&fx.pool, fx.call_doc_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(call.qa_score, Some(50));

        let agent_stats = db::stats::list_all_call_stats(&fx.pool).await.unwrap();
        assert_eq!(agent_stats.len(), 1);
        assert_eq!(agent_stats[0].analyzed_count, 1);
        assert_eq!(agent_stats[0].total_score, 50);
        assert_eq!(agent_stats[0].total_duration, 300);

        let q1 = db::stats::get_question_stats(&fx.pool, "q1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(q1.total_count, 1);
        assert_eq!(q1.tak_count, 0);
        assert_eq!(q1.nie_count, 1);
    }

    #[tokio::test]
    async fn test_empty_group_is_fatal() {
        let fx = fixture(0).await;
        let worker = analyzer(&fx.pool, FakeModel::answering(&[]));

        let err = worker.run("c-1", fx.group_id).await.unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("No active questions"));
    }
}
