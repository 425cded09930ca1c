//! Configuration resolution for the pipeline service
//!
//! Provider credentials resolve through three tiers with Database -> ENV ->
//! TOML priority; the database is authoritative so keys entered through the
//! admin surface win over deployment configuration.

use callqa_common::config::TomlConfig;
use callqa_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::settings;
use crate::pipeline::SchedulerConfig;
use crate::services::llm::{AnswerModel, GeminiClient};
use crate::services::platform::PlatformConfig;
use crate::services::stt::{DeepgramStt, ElevenLabsStt, SpeechToText};

/// Validate a key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve one setting through Database -> ENV -> TOML
async fn resolve_key(
    db: &SqlitePool,
    label: &str,
    db_key: &str,
    env_var: &str,
    toml_value: Option<&str>,
) -> Result<Option<String>> {
    let db_value = settings::get(db, db_key).await?.filter(|v| is_valid_key(v));
    let env_value = std::env::var(env_var).ok().filter(|v| is_valid_key(v));
    let toml_value = toml_value.filter(|v| is_valid_key(v)).map(String::from);

    let mut sources = Vec::new();
    if db_value.is_some() {
        sources.push("database");
    }
    if env_value.is_some() {
        sources.push("environment");
    }
    if toml_value.is_some() {
        sources.push("TOML");
    }

    if sources.len() > 1 {
        warn!(
            "{} found in multiple sources: {}. Using {} (highest priority).",
            label,
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(source) = sources.first() {
        info!("{} loaded from {}", label, source);
    }

    Ok(db_value.or(env_value).or(toml_value))
}

/// Platform connection settings, ENV overriding TOML
pub fn resolve_platform_config(toml: &TomlConfig) -> PlatformConfig {
    let env = |name: &str| std::env::var(name).ok().filter(|v| is_valid_key(v));

    PlatformConfig {
        base_url: env("CALLQA_PLATFORM_URL").or_else(|| toml.platform_url.clone()),
        login: env("CALLQA_PLATFORM_LOGIN").or_else(|| toml.platform_login.clone()),
        password: env("CALLQA_PLATFORM_PASSWORD").or_else(|| toml.platform_password.clone()),
    }
}

/// Build the speech-to-text provider: ElevenLabs preferred, Deepgram as
/// fallback, `None` when neither key resolves
pub async fn build_stt_provider(
    db: &SqlitePool,
    toml: &TomlConfig,
) -> Result<Option<Arc<dyn SpeechToText>>> {
    if let Some(key) = resolve_key(
        db,
        "ElevenLabs API key",
        settings::KEY_ELEVENLABS_API_KEY,
        "CALLQA_ELEVENLABS_API_KEY",
        toml.elevenlabs_api_key.as_deref(),
    )
    .await?
    {
        match ElevenLabsStt::new(key) {
            Ok(client) => {
                info!("Using ElevenLabs for transcription");
                return Ok(Some(Arc::new(client)));
            }
            Err(e) => warn!("Failed to initialize ElevenLabs client: {}", e),
        }
    }

    if let Some(key) = resolve_key(
        db,
        "Deepgram API key",
        settings::KEY_DEEPGRAM_API_KEY,
        "CALLQA_DEEPGRAM_API_KEY",
        toml.deepgram_api_key.as_deref(),
    )
    .await?
    {
        match DeepgramStt::new(key) {
            Ok(client) => {
                info!("Using Deepgram for transcription");
                return Ok(Some(Arc::new(client)));
            }
            Err(e) => warn!("Failed to initialize Deepgram client: {}", e),
        }
    }

    warn!("No transcription API configured - transcription jobs will fail until a key is set");
    Ok(None)
}

/// Build the LLM provider, `None` when no key resolves
pub async fn build_llm_provider(
    db: &SqlitePool,
    toml: &TomlConfig,
) -> Result<Option<Arc<dyn AnswerModel>>> {
    if let Some(key) = resolve_key(
        db,
        "Gemini API key",
        settings::KEY_GEMINI_API_KEY,
        "CALLQA_GEMINI_API_KEY",
        toml.gemini_api_key.as_deref(),
    )
    .await?
    {
        match GeminiClient::new(key) {
            Ok(client) => return Ok(Some(Arc::new(client))),
            Err(e) => warn!("Failed to initialize Gemini client: {}", e),
        }
    }

    warn!("No LLM API key configured - analysis jobs will fail until a key is set");
    Ok(None)
}

/// Scheduler configuration from the TOML pipeline section, with the
/// production defaults filled in
pub fn scheduler_config(toml: &TomlConfig) -> SchedulerConfig {
    let defaults = SchedulerConfig::default();
    let pipeline = &toml.pipeline;

    SchedulerConfig {
        enabled: pipeline.enabled.unwrap_or(defaults.enabled),
        tick_interval: pipeline
            .tick_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.tick_interval),
        batch_size: pipeline.batch_size.unwrap_or(defaults.batch_size),
        stale_threshold: pipeline
            .stale_threshold_mins
            .map(chrono::Duration::minutes)
            .unwrap_or(defaults.stale_threshold),
        stale_retry_limit: pipeline
            .stale_retry_limit
            .unwrap_or(defaults.stale_retry_limit),
        stale_scan_limit: defaults.stale_scan_limit,
        transcription_parallelism: pipeline
            .transcription_parallelism
            .unwrap_or(defaults.transcription_parallelism),
        analysis_parallelism: pipeline
            .analysis_parallelism
            .unwrap_or(defaults.analysis_parallelism),
        retry: defaults.retry,
    }
}
