//! Incrementally maintained aggregate statistics rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per (agent, rubric-group) call statistics.
///
/// `total_score` and `total_duration` always equal the sums over exactly
/// the calls currently counted in `analyzed_count`; the average is derived,
/// never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStats {
    pub agent_id: Uuid,
    pub question_group_id: Uuid,
    pub analyzed_count: i64,
    pub total_score: i64,
    pub total_duration: i64,
    pub last_updated_at: DateTime<Utc>,
}

impl CallStats {
    /// Derived average score, rounded; 0 when nothing is counted
    pub fn average_score(&self) -> i64 {
        if self.analyzed_count > 0 {
            ((self.total_score as f64) / (self.analyzed_count as f64)).round() as i64
        } else {
            0
        }
    }
}

/// Per-question answer tallies across all analyzed calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionStats {
    pub question_id: String,
    pub group_id: Uuid,
    pub tak_count: i64,
    pub nie_count: i64,
    pub total_count: i64,
    pub last_updated_at: DateTime<Utc>,
}

impl QuestionStats {
    /// Percentage of positive answers, rounded; 0 when nothing is counted
    pub fn pass_rate(&self) -> i64 {
        if self.total_count > 0 {
            ((self.tak_count as f64) / (self.total_count as f64) * 100.0).round() as i64
        } else {
            0
        }
    }
}
