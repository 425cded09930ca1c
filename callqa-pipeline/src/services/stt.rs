//! Speech-to-text provider clients
//!
//! Two providers behind one trait: ElevenLabs (preferred when configured,
//! word-level timings merged into utterances client-side) and Deepgram
//! (returns utterances directly). The job layer picks whichever the
//! configuration resolved.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::models::{merge_consecutive_utterances, Utterance};

const ELEVENLABS_STT_URL: &str = "https://api.elevenlabs.io/v1/speech-to-text";
const ELEVENLABS_MODEL: &str = "scribe_v2";
const DEEPGRAM_STT_URL: &str = "https://api.deepgram.com/v1/listen";
const DEEPGRAM_MODEL: &str = "nova-3";

/// Speech-to-text client errors
#[derive(Debug, Error)]
pub enum SttError {
    /// No API key configured; non-retryable
    #[error("Speech-to-text API key not configured")]
    MissingApiKey,

    #[error("Network error: {0}")]
    NetworkError(String),

    /// Provider error; payload-too-large and rate-limit responses are
    /// retryable with backoff at the pool layer
    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl SttError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SttError::MissingApiKey)
    }
}

/// Transcription result normalized across providers
#[derive(Debug, Clone)]
pub struct SttResult {
    pub text: String,
    pub language_code: String,
    pub utterances: Vec<Utterance>,
}

/// Speech-to-text provider contract
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe an audio buffer with optional biasing vocabulary
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        language: &str,
        keyterms: &[String],
    ) -> Result<SttResult, SttError>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

// ============================================================================
// ElevenLabs
// ============================================================================

#[derive(Debug, Deserialize)]
struct ElevenLabsResponse {
    text: String,
    #[serde(rename = "languageCode")]
    language_code: Option<String>,
    #[serde(default)]
    words: Vec<ElevenLabsWord>,
}

#[derive(Debug, Deserialize)]
struct ElevenLabsWord {
    text: String,
    start: Option<f64>,
    end: Option<f64>,
    #[serde(rename = "speakerId")]
    speaker_id: Option<String>,
}

/// Convert word-level output into merged speaker utterances
fn utterances_from_words(words: &[ElevenLabsWord]) -> Vec<Utterance> {
    let speaker_number = |id: &Option<String>| -> i64 {
        id.as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0)
    };

    let word_utterances: Vec<Utterance> = words
        .iter()
        .map(|w| Utterance {
            speaker: speaker_number(&w.speaker_id),
            transcript: w.text.clone(),
            start: w.start.unwrap_or(0.0),
            end: w.end.unwrap_or(0.0),
        })
        .collect();

    merge_consecutive_utterances(&word_utterances)
}

/// ElevenLabs speech-to-text client
pub struct ElevenLabsStt {
    http: reqwest::Client,
    api_key: String,
}

impl ElevenLabsStt {
    pub fn new(api_key: String) -> Result<Self, SttError> {
        if api_key.trim().is_empty() {
            return Err(SttError::MissingApiKey);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| SttError::NetworkError(e.to_string()))?;

        Ok(Self { http, api_key })
    }
}

#[async_trait]
impl SpeechToText for ElevenLabsStt {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        language: &str,
        keyterms: &[String],
    ) -> Result<SttResult, SttError> {
        tracing::debug!(bytes = audio.len(), "Starting ElevenLabs transcription");
        let started = std::time::Instant::now();

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio).file_name("recording"),
            )
            .text("model_id", ELEVENLABS_MODEL)
            .text("language_code", language.to_string())
            .text("diarize", "true")
            .text("timestamps_granularity", "word");

        for keyterm in keyterms {
            form = form.text("keyterms[]", keyterm.clone());
        }

        let response = self
            .http
            .post(ELEVENLABS_STT_URL)
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SttError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SttError::ApiError(status.as_u16(), body));
        }

        let body: ElevenLabsResponse = response
            .json()
            .await
            .map_err(|e| SttError::ParseError(e.to_string()))?;

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ElevenLabs transcription completed"
        );

        let utterances = utterances_from_words(&body.words);

        Ok(SttResult {
            text: body.text,
            language_code: body.language_code.unwrap_or_else(|| language.to_string()),
            utterances,
        })
    }

    fn provider_name(&self) -> &'static str {
        "elevenlabs"
    }
}

// ============================================================================
// Deepgram
// ============================================================================

#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Debug, Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
    #[serde(default)]
    utterances: Vec<DeepgramUtterance>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

#[derive(Debug, Deserialize)]
struct DeepgramUtterance {
    speaker: Option<i64>,
    transcript: String,
    start: f64,
    end: f64,
}

/// Deepgram speech-to-text client
pub struct DeepgramStt {
    http: reqwest::Client,
    api_key: String,
}

impl DeepgramStt {
    pub fn new(api_key: String) -> Result<Self, SttError> {
        if api_key.trim().is_empty() {
            return Err(SttError::MissingApiKey);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| SttError::NetworkError(e.to_string()))?;

        Ok(Self { http, api_key })
    }
}

#[async_trait]
impl SpeechToText for DeepgramStt {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        language: &str,
        keyterms: &[String],
    ) -> Result<SttResult, SttError> {
        tracing::debug!(bytes = audio.len(), "Starting Deepgram transcription");
        let started = std::time::Instant::now();

        let mut params: Vec<(String, String)> = vec![
            ("model".to_string(), DEEPGRAM_MODEL.to_string()),
            ("language".to_string(), language.to_string()),
            ("diarize".to_string(), "true".to_string()),
            ("punctuate".to_string(), "true".to_string()),
            ("utterances".to_string(), "true".to_string()),
            ("smart_format".to_string(), "true".to_string()),
        ];
        for keyterm in keyterms {
            params.push(("keyterm".to_string(), keyterm.clone()));
        }

        let response = self
            .http
            .post(DEEPGRAM_STT_URL)
            .query(&params)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/*")
            .body(audio)
            .send()
            .await
            .map_err(|e| SttError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SttError::ApiError(status.as_u16(), body));
        }

        let body: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| SttError::ParseError(e.to_string()))?;

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Deepgram transcription completed"
        );

        let text = body
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .ok_or_else(|| SttError::ParseError("No transcript in response".to_string()))?;

        let utterances = body
            .results
            .utterances
            .iter()
            .map(|u| Utterance {
                speaker: u.speaker.unwrap_or(0),
                transcript: u.transcript.clone(),
                start: u.start,
                end: u.end,
            })
            .collect();

        Ok(SttResult {
            text,
            language_code: language.to_string(),
            utterances,
        })
    }

    fn provider_name(&self) -> &'static str {
        "deepgram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_rejected() {
        assert!(matches!(
            ElevenLabsStt::new("  ".to_string()),
            Err(SttError::MissingApiKey)
        ));
        assert!(matches!(
            DeepgramStt::new(String::new()),
            Err(SttError::MissingApiKey)
        ));
    }

    #[test]
    fn test_words_merge_into_utterances() {
        let words = vec![
            ElevenLabsWord {
                text: "Dzien".to_string(),
                start: Some(0.0),
                end: Some(0.4),
                speaker_id: Some("0".to_string()),
            },
            ElevenLabsWord {
                text: "dobry".to_string(),
                start: Some(0.4),
                end: Some(0.9),
                speaker_id: Some("0".to_string()),
            },
            ElevenLabsWord {
                text: "Witam".to_string(),
                start: Some(1.2),
                end: Some(1.7),
                speaker_id: Some("1".to_string()),
            },
        ];

        let utterances = utterances_from_words(&words);
        assert_eq!(utterances.len(), 2);
        assert_eq!(utterances[0].transcript, "Dzien dobry");
        assert_eq!(utterances[0].end, 0.9);
        assert_eq!(utterances[1].speaker, 1);
    }

    #[test]
    fn test_unparseable_speaker_defaults_to_zero() {
        let words = vec![ElevenLabsWord {
            text: "Halo".to_string(),
            start: None,
            end: None,
            speaker_id: Some("speaker_a".to_string()),
        }];
        let utterances = utterances_from_words(&words);
        assert_eq!(utterances[0].speaker, 0);
    }

    #[test]
    fn test_deepgram_response_parses() {
        let json = r#"{
            "results": {
                "channels": [{"alternatives": [{"transcript": "Dzien dobry, w czym moge pomoc?"}]}],
                "utterances": [
                    {"speaker": 0, "transcript": "Dzien dobry, w czym moge pomoc?", "start": 0.1, "end": 2.4}
                ]
            }
        }"#;
        let body: DeepgramResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.results.utterances.len(), 1);
        assert_eq!(body.results.channels[0].alternatives[0].transcript.len(), 31);
    }

    #[test]
    fn test_error_retryability() {
        assert!(SttError::ApiError(429, "rate limited".to_string()).is_retryable());
        assert!(SttError::ApiError(413, "payload too large".to_string()).is_retryable());
        assert!(SttError::NetworkError("timeout".to_string()).is_retryable());
        assert!(!SttError::MissingApiKey.is_retryable());
    }
}
