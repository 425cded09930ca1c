//! Transcription job
//!
//! Fetches the recording, runs the configured speech-to-text provider and
//! persists the transcript. An existing transcript is a success-from-cache
//! unless a forced re-transcription was requested, in which case it is
//! deleted first.

use callqa_common::events::{EventBus, PipelineEvent};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::db;
use crate::pipeline::pool::JobError;
use crate::services::platform::{PlatformClient, PlatformError};
use crate::services::stt::{SpeechToText, SttError};

/// Transcription language requested from the providers
const TRANSCRIPTION_LANGUAGE: &str = "pl";

impl From<PlatformError> for JobError {
    fn from(err: PlatformError) -> Self {
        if err.is_retryable() {
            JobError::transient(err.to_string())
        } else {
            JobError::fatal(err.to_string())
        }
    }
}

impl From<SttError> for JobError {
    fn from(err: SttError) -> Self {
        if err.is_retryable() {
            JobError::transient(err.to_string())
        } else {
            JobError::fatal(err.to_string())
        }
    }
}

/// Executes transcription jobs against the platform and the configured
/// speech-to-text provider
pub struct Transcriber {
    db: SqlitePool,
    platform: Arc<PlatformClient>,
    stt: Option<Arc<dyn SpeechToText>>,
    event_bus: EventBus,
}

impl Transcriber {
    pub fn new(
        db: SqlitePool,
        platform: Arc<PlatformClient>,
        stt: Option<Arc<dyn SpeechToText>>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            platform,
            stt,
            event_bus,
        }
    }

    /// Run one transcription job.
    ///
    /// `force` deletes any existing transcript and re-fetches the audio;
    /// otherwise an existing transcript short-circuits as a cache hit.
    pub async fn run(
        &self,
        call_id: &str,
        activity_name: &str,
        agent_name: Option<&str>,
        force: bool,
    ) -> Result<(), JobError> {
        let exists = db::transcripts::exists(&self.db, call_id)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        if exists {
            if !force {
                tracing::info!(call_id = %call_id, "Transcript already exists, using cache");
                self.event_bus.emit_lossy(PipelineEvent::TranscriptionCompleted {
                    call_id: call_id.to_string(),
                    from_cache: true,
                    utterance_count: 0,
                    timestamp: Utc::now(),
                });
                return Ok(());
            }

            db::transcripts::delete(&self.db, call_id)
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
        }

        let stt = self
            .stt
            .as_ref()
            .ok_or_else(|| JobError::fatal("No transcription API configured"))?;

        tracing::info!(call_id = %call_id, activity = %activity_name, "Fetching recording");
        let audio = self.platform.fetch_recording(activity_name).await?;

        let mut keyterms = db::settings::get_transcription_keyterms(&self.db)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;
        if let Some(name) = agent_name {
            if !keyterms.iter().any(|k| k == name) {
                keyterms.push(name.to_string());
            }
        }

        tracing::info!(
            call_id = %call_id,
            provider = stt.provider_name(),
            bytes = audio.len(),
            "Transcribing recording"
        );

        let result = stt
            .transcribe(audio, TRANSCRIPTION_LANGUAGE, &keyterms)
            .await?;

        db::transcripts::upsert(
            &self.db,
            call_id,
            &result.text,
            &result.language_code,
            &result.utterances,
        )
        .await
        .map_err(|e| JobError::transient(e.to_string()))?;

        tracing::info!(
            call_id = %call_id,
            utterances = result.utterances.len(),
            "Saved transcript"
        );

        self.event_bus.emit_lossy(PipelineEvent::TranscriptionCompleted {
            call_id: call_id.to_string(),
            from_cache: false,
            utterance_count: result.utterances.len(),
            timestamp: Utc::now(),
        });

        Ok(())
    }
}
