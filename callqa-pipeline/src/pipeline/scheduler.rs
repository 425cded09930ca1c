//! Pipeline scheduler
//!
//! Periodic control loop advancing call records through the processing
//! state machine. Each tick claims bounded batches of `synced` and
//! `transcribed` records, submits one job per record to the matching pool,
//! and recovers stale in-flight records whose completion callback never
//! fired.
//!
//! Every transition is a guarded compare-and-set on the current status, so
//! overlapping ticks are tolerated: the flip to `transcribing`/`analyzing`
//! acts as a single-assignment lock and a record can never be
//! double-enqueued.

use callqa_common::events::{EventBus, PipelineEvent};
use callqa_common::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db;
use crate::jobs::{Analyzer, Transcriber};
use crate::models::{CallRecord, ProcessingStatus};
use crate::pipeline::errfmt::sanitize_error;
use crate::pipeline::pool::{CompletionHandler, JobOutcome, JobRunner, RetryPolicy, WorkerPool};

/// Scheduler tuning knobs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Master switch; ticks no-op when false
    pub enabled: bool,
    pub tick_interval: Duration,
    /// Records taken per status per tick
    pub batch_size: u32,
    /// Age after which an in-flight job counts as stale
    pub stale_threshold: chrono::Duration,
    /// Scheduler-level stale recoveries before permanent failure
    pub stale_retry_limit: i64,
    /// In-flight records examined per status per tick
    pub stale_scan_limit: u32,
    pub transcription_parallelism: usize,
    pub analysis_parallelism: usize,
    /// Pool-level retry policy shared by both pools
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: Duration::from_secs(120),
            batch_size: 10,
            stale_threshold: chrono::Duration::minutes(15),
            stale_retry_limit: 3,
            stale_scan_limit: 50,
            transcription_parallelism: 3,
            analysis_parallelism: 5,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub skipped: bool,
    pub enqueued_transcriptions: usize,
    pub enqueued_analyses: usize,
    pub skipped_no_group: usize,
    pub recovered_stale: usize,
    pub failed_stale: usize,
}

/// Periodic pipeline control loop
pub struct PipelineScheduler {
    db: SqlitePool,
    event_bus: EventBus,
    transcriber: Arc<Transcriber>,
    analyzer: Arc<Analyzer>,
    transcription_pool: WorkerPool,
    analysis_pool: WorkerPool,
    config: SchedulerConfig,
}

impl PipelineScheduler {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        transcriber: Arc<Transcriber>,
        analyzer: Arc<Analyzer>,
        config: SchedulerConfig,
    ) -> Self {
        let transcription_pool = WorkerPool::new(
            "transcription",
            config.transcription_parallelism,
            config.retry.clone(),
        );
        let analysis_pool = WorkerPool::new(
            "analysis",
            config.analysis_parallelism,
            config.retry.clone(),
        );

        Self {
            db,
            event_bus,
            transcriber,
            analyzer,
            transcription_pool,
            analysis_pool,
            config,
        }
    }

    /// Run one scheduling tick
    pub async fn tick(&self) -> Result<TickSummary> {
        if !self.config.enabled {
            return Ok(TickSummary {
                skipped: true,
                ..Default::default()
            });
        }

        let mut summary = TickSummary::default();

        self.enqueue_transcriptions(&mut summary).await?;
        self.enqueue_analyses(&mut summary).await?;
        self.recover_stale_jobs(&mut summary).await?;

        self.event_bus.emit_lossy(PipelineEvent::SchedulerTick {
            enqueued_transcriptions: summary.enqueued_transcriptions,
            enqueued_analyses: summary.enqueued_analyses,
            recovered_stale: summary.recovered_stale,
            timestamp: Utc::now(),
        });

        Ok(summary)
    }

    /// Step 1: claim `synced` records and submit transcription jobs
    async fn enqueue_transcriptions(&self, summary: &mut TickSummary) -> Result<()> {
        let batch = db::calls::list_by_status(
            &self.db,
            ProcessingStatus::Synced,
            self.config.batch_size,
        )
        .await?;

        for call in batch {
            let claimed = db::calls::claim(
                &self.db,
                call.id,
                ProcessingStatus::Synced,
                ProcessingStatus::Transcribing,
            )
            .await?;
            if !claimed {
                continue;
            }

            self.emit_status(&call.call_id, ProcessingStatus::Transcribing, None);

            let agent_name = match call.agent_id {
                Some(agent_id) => db::agents::get(&self.db, agent_id)
                    .await?
                    .map(|a| a.display_name),
                None => None,
            };

            let runner = self.transcription_runner(&call, agent_name);
            let on_complete = self.transcription_completion(&call);
            self.transcription_pool
                .enqueue(format!("transcribe:{}", call.call_id), runner, on_complete);

            summary.enqueued_transcriptions += 1;
        }

        Ok(())
    }

    /// Step 2: claim `transcribed` records and submit analysis jobs;
    /// records with no rubric group are skipped synchronously
    async fn enqueue_analyses(&self, summary: &mut TickSummary) -> Result<()> {
        let batch = db::calls::list_by_status(
            &self.db,
            ProcessingStatus::Transcribed,
            self.config.batch_size,
        )
        .await?;

        for call in batch {
            let group_id = match call.question_group_id {
                Some(group_id) => group_id,
                None => {
                    if db::calls::mark_skipped(&self.db, call.id, "No question group assigned")
                        .await?
                    {
                        self.emit_status(
                            &call.call_id,
                            ProcessingStatus::Skipped,
                            Some("No question group assigned".to_string()),
                        );
                        summary.skipped_no_group += 1;
                    }
                    continue;
                }
            };

            let claimed = db::calls::claim(
                &self.db,
                call.id,
                ProcessingStatus::Transcribed,
                ProcessingStatus::Analyzing,
            )
            .await?;
            if !claimed {
                continue;
            }

            self.emit_status(&call.call_id, ProcessingStatus::Analyzing, None);

            let runner = self.analysis_runner(&call, group_id);
            let on_complete = self.analysis_completion(&call);
            self.analysis_pool
                .enqueue(format!("analyze:{}", call.call_id), runner, on_complete);

            summary.enqueued_analyses += 1;
        }

        Ok(())
    }

    /// Step 3: recover in-flight records whose callback never fired
    async fn recover_stale_jobs(&self, summary: &mut TickSummary) -> Result<()> {
        let cutoff = Utc::now() - self.config.stale_threshold;

        for status in [ProcessingStatus::Transcribing, ProcessingStatus::Analyzing] {
            let stale = db::calls::list_stale(
                &self.db,
                status,
                cutoff,
                self.config.stale_scan_limit,
            )
            .await?;

            for call in stale {
                if call.retry_count >= self.config.stale_retry_limit {
                    let error = format!("Stale job after {} attempts", call.retry_count);
                    if db::calls::fail_stale(&self.db, call.id, status, call.retry_count, &error)
                        .await?
                    {
                        tracing::warn!(call_id = %call.call_id, status = %status, "Stale job failed permanently");
                        self.emit_status(&call.call_id, ProcessingStatus::Failed, Some(error));
                        summary.failed_stale += 1;
                    }
                } else if db::calls::recover_stale(&self.db, call.id, status, call.retry_count + 1)
                    .await?
                {
                    tracing::warn!(
                        call_id = %call.call_id,
                        status = %status,
                        retry_count = call.retry_count + 1,
                        "Recovered stale job"
                    );
                    self.emit_status(&call.call_id, ProcessingStatus::Synced, None);
                    summary.recovered_stale += 1;
                }
            }
        }

        Ok(())
    }

    fn transcription_runner(&self, call: &CallRecord, agent_name: Option<String>) -> JobRunner {
        let transcriber = self.transcriber.clone();
        let call_id = call.call_id.clone();
        let activity_name = call.activity_name.clone();

        Box::new(move || {
            let transcriber = transcriber.clone();
            let call_id = call_id.clone();
            let activity_name = activity_name.clone();
            let agent_name = agent_name.clone();
            Box::pin(async move {
                transcriber
                    .run(&call_id, &activity_name, agent_name.as_deref(), false)
                    .await
            })
        })
    }

    fn analysis_runner(&self, call: &CallRecord, group_id: uuid::Uuid) -> JobRunner {
        let analyzer = self.analyzer.clone();
        let call_id = call.call_id.clone();

        Box::new(move || {
            let analyzer = analyzer.clone();
            let call_id = call_id.clone();
            Box::pin(async move { analyzer.run(&call_id, group_id).await })
        })
    }

    fn transcription_completion(&self, call: &CallRecord) -> CompletionHandler {
        self.completion_handler(
            call,
            ProcessingStatus::Transcribing,
            ProcessingStatus::Transcribed,
            ProcessingStatus::Synced,
            "Transcription failed",
        )
    }

    fn analysis_completion(&self, call: &CallRecord) -> CompletionHandler {
        self.completion_handler(
            call,
            ProcessingStatus::Analyzing,
            ProcessingStatus::Analyzed,
            ProcessingStatus::Transcribed,
            "Analysis failed",
        )
    }

    /// Build the callback advancing the state machine on a job's terminal
    /// outcome: success moves forward, failure lands in `failed` with a
    /// sanitized summary, cancellation rolls back one step
    fn completion_handler(
        &self,
        call: &CallRecord,
        in_flight: ProcessingStatus,
        on_success: ProcessingStatus,
        on_cancel: ProcessingStatus,
        failure_prefix: &'static str,
    ) -> CompletionHandler {
        let db = self.db.clone();
        let event_bus = self.event_bus.clone();
        let call_doc_id = call.id;
        let call_id = call.call_id.clone();

        Box::new(move |outcome| {
            Box::pin(async move {
                let result = match &outcome {
                    JobOutcome::Success => {
                        match db::calls::mark_completed(&db, call_doc_id, in_flight, on_success)
                            .await
                        {
                            Ok(true) => {
                                tracing::info!(call_id = %call_id, status = %on_success, "Job complete");
                                emit_status(&event_bus, &call_id, on_success, None);
                                Ok(())
                            }
                            Ok(false) => {
                                tracing::warn!(call_id = %call_id, "Completion ignored: record left {} state", in_flight);
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    }
                    JobOutcome::Failed { error } => {
                        let summary = format!("{}: {}", failure_prefix, sanitize_error(error));
                        match db::calls::mark_failed(&db, call_doc_id, in_flight, &summary).await {
                            Ok(true) => {
                                tracing::error!(call_id = %call_id, error = %summary, "Job failed");
                                emit_status(
                                    &event_bus,
                                    &call_id,
                                    ProcessingStatus::Failed,
                                    Some(summary),
                                );
                                Ok(())
                            }
                            Ok(false) => Ok(()),
                            Err(e) => Err(e),
                        }
                    }
                    JobOutcome::Cancelled => {
                        match db::calls::rollback(&db, call_doc_id, in_flight, on_cancel).await {
                            Ok(true) => {
                                tracing::info!(call_id = %call_id, status = %on_cancel, "Job cancelled, rolled back");
                                emit_status(&event_bus, &call_id, on_cancel, None);
                                Ok(())
                            }
                            Ok(false) => Ok(()),
                            Err(e) => Err(e),
                        }
                    }
                };

                if let Err(e) = result {
                    tracing::error!(call_id = %call_id, error = %e, "Failed to record job outcome");
                }
            })
        })
    }

    fn emit_status(&self, call_id: &str, status: ProcessingStatus, error: Option<String>) {
        emit_status(&self.event_bus, call_id, status, error);
    }

    /// Shut down both pools; running jobs roll back via their cancellation
    /// callbacks
    pub fn shutdown(&self) {
        self.transcription_pool.shutdown();
        self.analysis_pool.shutdown();
    }

    /// Spawn the periodic tick loop
    pub fn spawn_loop(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.shutdown();
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                match self.tick().await {
                    Ok(summary) if !summary.skipped => {
                        tracing::debug!(
                            transcriptions = summary.enqueued_transcriptions,
                            analyses = summary.enqueued_analyses,
                            recovered = summary.recovered_stale,
                            "Scheduler tick complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Scheduler tick failed");
                    }
                }
            }
        })
    }
}

fn emit_status(
    event_bus: &EventBus,
    call_id: &str,
    status: ProcessingStatus,
    error: Option<String>,
) {
    event_bus.emit_lossy(PipelineEvent::CallStatusChanged {
        call_id: call_id.to_string(),
        status: status.as_str().to_string(),
        error,
        timestamp: Utc::now(),
    });
}
