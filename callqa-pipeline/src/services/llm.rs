//! LLM provider client for rubric answering
//!
//! Gemini structured-output client: each request carries a response schema
//! for `{thought_process, answer, justification}` and comes back as JSON.
//! Errors are classified into content-safety rejections (never retried),
//! rate limits (retried honoring the provider's retry-delay hint) and
//! overload (retried with exponential backoff); the attempt loop itself
//! lives in the analysis job.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const GEMINI_MODEL: &str = "gemini-3-flash-preview";

/// LLM client errors
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key configured; non-retryable
    #[error("LLM API key not configured")]
    MissingApiKey,

    /// Content-safety rejection; scoped to the single question, never
    /// retried
    #[error("Content blocked by safety filters ({0})")]
    ContentBlocked(String),

    /// Quota or rate limit; retryable, optionally with a provider hint
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Capacity problem (overloaded / 503 / UNAVAILABLE); retryable
    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LlmError {
    /// True for errors worth another attempt within the job's ceiling
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. } | LlmError::Overloaded(_))
    }

    /// Provider-supplied retry-after hint, when one was parsed
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Structured answer for one rubric question
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmAnswer {
    /// Chain-of-thought kept for observability, not persisted
    #[serde(default)]
    pub thought_process: String,
    pub answer: String,
    pub justification: String,
}

/// LLM provider contract for rubric answering
#[async_trait]
pub trait AnswerModel: Send + Sync {
    async fn answer(&self, system_prompt: &str, user_prompt: &str) -> Result<LlmAnswer, LlmError>;
}

static RETRY_IN_SECONDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry\s+in\s+(\d+(?:\.\d+)?)\s*s").expect("valid regex")
});
static RETRY_DELAY_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""retryDelay"\s*:\s*"(\d+(?:\.\d+)?)\s*s""#).expect("valid regex")
});

/// Extract a retry-after hint from a provider error payload.
///
/// Understands both the human text form ("retry in 7s") and the structured
/// `retryDelay` field some responses embed.
pub fn extract_retry_delay(error_text: &str) -> Option<Duration> {
    for pattern in [&RETRY_IN_SECONDS, &RETRY_DELAY_FIELD] {
        if let Some(captures) = pattern.captures(error_text) {
            if let Ok(seconds) = captures[1].parse::<f64>() {
                return Some(Duration::from_millis((seconds * 1000.0).ceil() as u64));
            }
        }
    }
    None
}

/// Classify an error payload by its status code and body text
fn classify_error(status: u16, body: &str) -> LlmError {
    if body.contains("PROHIBITED_CONTENT") {
        return LlmError::ContentBlocked("PROHIBITED_CONTENT".to_string());
    }

    if status == 429 || body.contains("RESOURCE_EXHAUSTED") || body.contains("quota") {
        return LlmError::RateLimited {
            message: first_line(body),
            retry_after: extract_retry_delay(body),
        };
    }

    if status == 503 || body.contains("UNAVAILABLE") || body.contains("overloaded") {
        return LlmError::Overloaded(first_line(body));
    }

    LlmError::ApiError(status, first_line(body))
}

fn first_line(body: &str) -> String {
    body.lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .chars()
        .take(200)
        .collect()
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

/// Gemini structured-output client
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Self::with_model(api_key, GEMINI_MODEL.to_string())
    }

    pub fn with_model(api_key: String, model: String) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model,
        })
    }

    fn response_schema() -> serde_json::Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "thought_process": {
                    "type": "STRING",
                    "description": "Chain of thought analysis with quotes from the transcription and logical reasoning"
                },
                "answer": {
                    "type": "STRING",
                    "description": "The selected answer from the possible answers list"
                },
                "justification": {
                    "type": "STRING",
                    "description": "One sentence explaining why this answer was chosen based on the transcription"
                }
            },
            "required": ["thought_process", "answer", "justification"]
        })
    }
}

#[async_trait]
impl AnswerModel for GeminiClient {
    async fn answer(&self, system_prompt: &str, user_prompt: &str) -> Result<LlmAnswer, LlmError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_BASE_URL, self.model, self.api_key
        );

        let request = json!({
            "systemInstruction": {
                "parts": [{"text": system_prompt}]
            },
            "contents": [{
                "role": "user",
                "parts": [{"text": user_prompt}]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": Self::response_schema()
            }
        });

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body));
        }

        let parsed: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        if let Some(feedback) = &parsed.prompt_feedback {
            if let Some(reason) = &feedback.block_reason {
                return Err(LlmError::ContentBlocked(reason.clone()));
            }
        }

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError("No candidates in response".to_string()))?;

        if let Some(reason) = &candidate.finish_reason {
            if reason == "PROHIBITED_CONTENT" || reason == "SAFETY" {
                return Err(LlmError::ContentBlocked(reason.clone()));
            }
        }

        let text = candidate
            .content
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| LlmError::ParseError("No text part in candidate".to_string()))?;

        serde_json::from_str(&text)
            .map_err(|e| LlmError::ParseError(format!("Invalid structured answer: {}", e)))
    }
}
