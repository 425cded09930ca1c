//! Data models for the CallQA processing pipeline

pub mod call;
pub mod rubric;
pub mod stats;
pub mod transcript;

pub use call::{Agent, CallRecord, ProcessingStatus};
pub use rubric::{RubricGroup, RubricQuestion};
pub use stats::{CallStats, QuestionStats};
pub use transcript::{
    format_utterances_as_dialog, merge_consecutive_utterances, HumanReview, QaAnalysis, QaResult,
    Transcript, Utterance,
};
