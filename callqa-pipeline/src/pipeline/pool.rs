//! Bounded worker pool with pool-level retry
//!
//! `enqueue` returns immediately; jobs execute on semaphore-bounded tokio
//! tasks. Transient failures are retried with exponential backoff up to the
//! configured attempt limit; non-retryable errors fail immediately. The
//! completion callback fires exactly once per job with the terminal
//! outcome, including `Cancelled` on shutdown, so the scheduler's state
//! machine never stalls waiting for a job that silently disappeared.
//!
//! Provider-specific retry handling (rate-limit hints, per-question
//! backoff) lives inside the job bodies with its own attempt ceiling; the
//! pool layer only retries whole jobs on transient infrastructure errors.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Pool-level retry policy for transient job failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Exponential base; attempt N waits `initial_backoff * base^(N-1)`
    pub base: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(5),
            base: 2,
        }
    }
}

/// Error returned by a job attempt
#[derive(Debug)]
pub struct JobError {
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    /// Transient failure; the pool may retry
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Permanent failure; fails the job on the first occurrence
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobError {}

/// Terminal outcome delivered to the completion callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed { error: String },
    Cancelled,
}

/// One job attempt; invoked once per retry
pub type JobRunner = Box<dyn Fn() -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

/// Invoked exactly once with the terminal outcome
pub type CompletionHandler = Box<dyn FnOnce(JobOutcome) -> BoxFuture<'static, ()> + Send>;

struct QueuedJob {
    label: String,
    runner: JobRunner,
    on_complete: CompletionHandler,
}

/// Bounded-concurrency job executor
pub struct WorkerPool {
    name: &'static str,
    tx: mpsc::UnboundedSender<QueuedJob>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn a pool executing at most `max_parallelism` jobs concurrently
    pub fn new(name: &'static str, max_parallelism: usize, retry: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(dispatch_loop(
            name,
            max_parallelism,
            retry,
            rx,
            cancel.clone(),
        ));

        Self { name, tx, cancel }
    }

    /// Submit a job; returns immediately.
    ///
    /// After `shutdown` the completion callback still fires (with
    /// `Cancelled`), preserving the exactly-once guarantee.
    pub fn enqueue(&self, label: impl Into<String>, runner: JobRunner, on_complete: CompletionHandler) {
        let label = label.into();

        if self.cancel.is_cancelled() {
            tracing::warn!(pool = self.name, job = %label, "Pool shut down, cancelling job");
            tokio::spawn(on_complete(JobOutcome::Cancelled));
            return;
        }

        let job = QueuedJob {
            label,
            runner,
            on_complete,
        };

        if let Err(err) = self.tx.send(job) {
            // Dispatcher gone; deliver the cancellation outcome ourselves.
            let job = err.0;
            tracing::warn!(pool = self.name, job = %job.label, "Pool dispatcher stopped, cancelling job");
            tokio::spawn((job.on_complete)(JobOutcome::Cancelled));
        }
    }

    /// Cancel all queued and running jobs; their callbacks fire with
    /// `Cancelled`
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn dispatch_loop(
    name: &'static str,
    max_parallelism: usize,
    retry: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(max_parallelism));

    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => return,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                (job.on_complete)(JobOutcome::Cancelled).await;
                break;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let retry = retry.clone();
        let job_cancel = cancel.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = run_with_retry(name, &job.label, &job.runner, &retry, &job_cancel).await;
            (job.on_complete)(outcome).await;
        });
    }

    // Shutdown: drain the queue so no callback is lost.
    while let Ok(job) = rx.try_recv() {
        (job.on_complete)(JobOutcome::Cancelled).await;
    }
}

async fn run_with_retry(
    pool_name: &'static str,
    label: &str,
    runner: &JobRunner,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> JobOutcome {
    let mut attempt: u32 = 1;

    loop {
        if cancel.is_cancelled() {
            return JobOutcome::Cancelled;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return JobOutcome::Cancelled,
            result = (runner)() => result,
        };

        match result {
            Ok(()) => {
                tracing::debug!(pool = pool_name, job = %label, attempt, "Job succeeded");
                return JobOutcome::Success;
            }
            Err(err) if !err.retryable => {
                tracing::error!(pool = pool_name, job = %label, attempt, error = %err, "Job failed (non-retryable)");
                return JobOutcome::Failed { error: err.message };
            }
            Err(err) if attempt >= retry.max_attempts => {
                tracing::error!(pool = pool_name, job = %label, attempt, error = %err, "Job failed, retries exhausted");
                return JobOutcome::Failed { error: err.message };
            }
            Err(err) => {
                let backoff = retry.initial_backoff * retry.base.pow(attempt - 1);
                tracing::warn!(
                    pool = pool_name,
                    job = %label,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Job failed, will retry after backoff"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return JobOutcome::Cancelled,
                    _ = tokio::time::sleep(backoff) => {}
                }
                attempt += 1;
            }
        }
    }
}
