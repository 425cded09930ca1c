//! Transcript and QA analysis models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One speaker turn in a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Diarized speaker index (0-based)
    pub speaker: i64,
    pub transcript: String,
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
}

/// Answer to one rubric question for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaResult {
    pub question_id: String,
    pub question: String,
    /// Exact answer string; `"Tak"` counts as positive, `"Error"` marks a
    /// per-question failure
    pub answer: String,
    pub justification: String,
}

/// Full analysis outcome for a call, in rubric question order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaAnalysis {
    pub completed_at: DateTime<Utc>,
    pub results: Vec<QaResult>,
}

/// Human review payload fetched from the platform's QA forms.
///
/// The answer map is an explicit question-id -> answer-strings schema,
/// validated when the payload crosses the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanReview {
    pub review_id: String,
    pub activity_name: String,
    pub answers: BTreeMap<String, Vec<String>>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Transcript of one call, one-to-one with a call record by call id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub call_id: String,
    pub text: String,
    pub language_code: String,
    pub utterances: Vec<Utterance>,
    pub qa_analysis: Option<QaAnalysis>,
    pub human_review: Option<HumanReview>,
    pub created_at: DateTime<Utc>,
}

/// Merge consecutive same-speaker utterances into single turns.
///
/// Speech-to-text providers emit word- or segment-level chunks; the QA
/// prompt wants one line per speaker turn.
pub fn merge_consecutive_utterances(utterances: &[Utterance]) -> Vec<Utterance> {
    let mut merged: Vec<Utterance> = Vec::new();

    for u in utterances {
        match merged.last_mut() {
            Some(last) if last.speaker == u.speaker => {
                last.transcript.push(' ');
                last.transcript.push_str(&u.transcript);
                last.end = u.end;
            }
            _ => merged.push(u.clone()),
        }
    }

    merged
}

/// Format utterances as a `[Speaker N]: ...` dialog for the analysis prompt
pub fn format_utterances_as_dialog(utterances: &[Utterance]) -> String {
    merge_consecutive_utterances(utterances)
        .iter()
        .map(|u| format!("[Speaker {}]: {}", u.speaker, u.transcript))
        .collect::<Vec<_>>()
        .join("\n\n")
}
