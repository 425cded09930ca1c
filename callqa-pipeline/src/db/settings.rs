//! Settings key/value persistence
//!
//! Provider API keys and the transcription keyterm list live here; the
//! database is the authoritative tier of the Database -> ENV -> TOML
//! resolution implemented in `crate::config`.

use callqa_common::{Error, Result};
use sqlx::SqlitePool;

pub const KEY_ELEVENLABS_API_KEY: &str = "elevenlabs_api_key";
pub const KEY_DEEPGRAM_API_KEY: &str = "deepgram_api_key";
pub const KEY_GEMINI_API_KEY: &str = "gemini_api_key";
pub const KEY_TRANSCRIPTION_KEYTERMS: &str = "transcription_keyterms";

/// Read a setting value
pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(value)
}

/// Write a setting value
pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Keyterm list used to bias transcription, stored as a JSON array
pub async fn get_transcription_keyterms(pool: &SqlitePool) -> Result<Vec<String>> {
    match get(pool, KEY_TRANSCRIPTION_KEYTERMS).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| Error::Internal(format!("Failed to deserialize keyterms: {}", e))),
        None => Ok(Vec::new()),
    }
}

/// Replace the keyterm list
pub async fn set_transcription_keyterms(pool: &SqlitePool, keyterms: &[String]) -> Result<()> {
    let raw = serde_json::to_string(keyterms)
        .map_err(|e| Error::Internal(format!("Failed to serialize keyterms: {}", e)))?;
    set(pool, KEY_TRANSCRIPTION_KEYTERMS, &raw).await
}
