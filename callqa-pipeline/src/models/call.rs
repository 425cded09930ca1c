//! Call record lifecycle state machine
//!
//! A call progresses through:
//! synced -> transcribing -> transcribed -> analyzing -> analyzed
//! with `skipped` (no rubric group) and `failed` as off-ramps, and manual
//! retry/reprocess transitions feeding records back to `synced`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing status of a call record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Delivered by the platform sync, waiting for transcription
    Synced,
    /// Transcription job in flight
    Transcribing,
    /// Transcript persisted, waiting for analysis
    Transcribed,
    /// Analysis job in flight
    Analyzing,
    /// QA analysis persisted and counted in the aggregates
    Analyzed,
    /// No rubric group assigned; terminal
    Skipped,
    /// Terminal failure, awaiting manual retry or reprocess
    Failed,
}

impl ProcessingStatus {
    /// Stable string form used in the database and the API
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Synced => "synced",
            ProcessingStatus::Transcribing => "transcribing",
            ProcessingStatus::Transcribed => "transcribed",
            ProcessingStatus::Analyzing => "analyzing",
            ProcessingStatus::Analyzed => "analyzed",
            ProcessingStatus::Skipped => "skipped",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// Parse the database string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "synced" => Some(ProcessingStatus::Synced),
            "transcribing" => Some(ProcessingStatus::Transcribing),
            "transcribed" => Some(ProcessingStatus::Transcribed),
            "analyzing" => Some(ProcessingStatus::Analyzing),
            "analyzed" => Some(ProcessingStatus::Analyzed),
            "skipped" => Some(ProcessingStatus::Skipped),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }

    /// True for states the pipeline never advances on its own
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Analyzed | ProcessingStatus::Skipped | ProcessingStatus::Failed
        )
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded call with its lifecycle status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Generated document id
    pub id: Uuid,
    /// Platform-assigned call identifier (unique)
    pub call_id: String,
    /// Platform activity name; the recording reference
    pub activity_name: String,
    /// Call start time as reported by the platform
    pub call_time: String,
    /// Call duration in seconds
    pub duration: Option<i64>,
    /// "in" / "out"
    pub direction: Option<String>,
    pub answered: Option<bool>,
    /// Linked agent, when the platform identified one
    pub agent_id: Option<Uuid>,
    /// Rubric group assigned at ingestion from the status mapping
    pub question_group_id: Option<Uuid>,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub retry_count: i64,
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Cached 0-100 score; set iff the call is currently counted as analyzed
    pub qa_score: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A call-center agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub display_name: String,
    /// Platform login; the stable identity used for upserts
    pub username: String,
    pub extension: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ProcessingStatus::Synced,
            ProcessingStatus::Transcribing,
            ProcessingStatus::Transcribed,
            ProcessingStatus::Analyzing,
            ProcessingStatus::Analyzed,
            ProcessingStatus::Skipped,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(ProcessingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ProcessingStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ProcessingStatus::Skipped.is_terminal());
        assert!(ProcessingStatus::Analyzed.is_terminal());
        assert!(ProcessingStatus::Failed.is_terminal());
        assert!(!ProcessingStatus::Synced.is_terminal());
        assert!(!ProcessingStatus::Transcribing.is_terminal());
    }
}
