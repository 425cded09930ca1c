//! Rubric configuration consumed read-only by the pipeline

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named set of rubric questions sharing a grading system prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricGroup {
    pub id: Uuid,
    /// Slug form of the display name
    pub name: String,
    pub display_name: String,
    /// May contain an `{{agentName}}` placeholder
    pub system_prompt: String,
}

/// One rubric question with its supporting context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricQuestion {
    /// Stable question identifier, unique across groups
    pub question_id: String,
    pub group_id: Uuid,
    pub question: String,
    /// Grading rules injected as a `<rules>` prompt section
    pub context: String,
    pub reference_script: Option<String>,
    pub good_examples: Vec<String>,
    pub bad_examples: Vec<String>,
    /// Authoritative valid answers; exactly "Tak" is positive for tallies
    pub possible_answers: Vec<String>,
    pub sort_order: i64,
    pub is_active: bool,
}
