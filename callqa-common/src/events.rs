//! Event types for the CallQA event system
//!
//! Pipeline components emit events on a broadcast bus; the SSE endpoint and
//! tests subscribe to observe progress without polling the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// CallQA event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A scheduler tick finished
    SchedulerTick {
        enqueued_transcriptions: usize,
        enqueued_analyses: usize,
        recovered_stale: usize,
        timestamp: DateTime<Utc>,
    },

    /// A call's processing status changed
    CallStatusChanged {
        call_id: String,
        status: String,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Transcription finished for a call
    TranscriptionCompleted {
        call_id: String,
        from_cache: bool,
        utterance_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// QA analysis finished for a call
    AnalysisCompleted {
        call_id: String,
        question_count: usize,
        error_count: usize,
        qa_score: Option<i64>,
        timestamp: DateTime<Utc>,
    },

    /// A sync pass against the call-center platform finished
    CallsSynced {
        inserted: usize,
        total_seen: usize,
        timestamp: DateTime<Utc>,
    },

    /// Aggregate statistics were adjusted for a call
    StatsAdjusted {
        call_id: String,
        agent_id: Option<Uuid>,
        direction: StatsDirection,
        timestamp: DateTime<Utc>,
    },
}

/// Whether a statistics delta was applied or reverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsDirection {
    Applied,
    Reverted,
}

/// Broadcast event bus for pipeline events
///
/// Thin wrapper over `tokio::sync::broadcast`; events emitted with no
/// subscribers are dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
