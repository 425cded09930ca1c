//! Configuration loading and data folder resolution
//!
//! Data folder priority: environment variable, then TOML config file, then
//! an OS-dependent default. Provider credentials follow a separate
//! Database -> ENV -> TOML resolution implemented in the service crate.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TOML configuration file contents (`~/.config/callqa/callqa.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Data folder holding the SQLite database
    pub data_folder: Option<String>,

    /// Call-center platform base URL
    pub platform_url: Option<String>,
    /// Call-center platform login
    pub platform_login: Option<String>,
    /// Call-center platform password
    pub platform_password: Option<String>,

    /// ElevenLabs speech-to-text API key
    pub elevenlabs_api_key: Option<String>,
    /// Deepgram speech-to-text API key
    pub deepgram_api_key: Option<String>,
    /// Gemini API key for rubric analysis
    pub gemini_api_key: Option<String>,

    /// Pipeline tuning (all optional, defaults applied by the service)
    #[serde(default)]
    pub pipeline: PipelineToml,
}

/// Pipeline tuning knobs from the TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineToml {
    /// Master switch; the scheduler no-ops when false
    pub enabled: Option<bool>,
    /// Seconds between scheduler ticks
    pub tick_interval_secs: Option<u64>,
    /// Calls taken per status per tick
    pub batch_size: Option<u32>,
    /// Minutes before an in-flight job counts as stale
    pub stale_threshold_mins: Option<i64>,
    /// Scheduler-level stale retries before permanent failure
    pub stale_retry_limit: Option<i64>,
    /// Transcription pool parallelism
    pub transcription_parallelism: Option<usize>,
    /// Analysis pool parallelism
    pub analysis_parallelism: Option<usize>,
}

/// Resolve the data folder.
///
/// Priority:
/// 1. `CALLQA_DATA_FOLDER` environment variable
/// 2. `data_folder` key in the TOML config file
/// 3. OS-dependent default (`~/.local/share/callqa` on Linux)
pub fn resolve_data_folder() -> PathBuf {
    if let Ok(path) = std::env::var("CALLQA_DATA_FOLDER") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Ok(config) = load_toml_config() {
        if let Some(folder) = config.data_folder {
            if !folder.trim().is_empty() {
                return PathBuf::from(folder);
            }
        }
    }

    default_data_folder()
}

/// OS-dependent default data folder
fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("callqa"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/callqa"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("callqa"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/callqa"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("callqa"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\callqa"))
    } else {
        PathBuf::from("./callqa_data")
    }
}

/// Default path of the TOML config file
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("callqa").join("callqa.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Load the TOML config file from its default location.
///
/// A missing file is not an error; it yields the default (empty) config.
pub fn load_toml_config() -> Result<TomlConfig> {
    let path = default_config_path()?;
    load_toml_config_from(&path)
}

/// Load a TOML config file from an explicit path
pub fn load_toml_config_from(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write a TOML config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Ensure the data folder exists, creating it if missing
pub fn ensure_data_folder(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Database file path inside the data folder
pub fn database_path(data_folder: &Path) -> PathBuf {
    data_folder.join("callqa.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_file_yields_default() {
        let dir = tempdir().unwrap();
        let config = load_toml_config_from(&dir.path().join("nope.toml")).unwrap();
        assert!(config.platform_url.is_none());
        assert!(config.pipeline.enabled.is_none());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("callqa.toml");

        let config = TomlConfig {
            platform_url: Some("https://pbx.example.com".to_string()),
            gemini_api_key: Some("key-123".to_string()),
            pipeline: PipelineToml {
                enabled: Some(true),
                batch_size: Some(5),
                ..Default::default()
            },
            ..Default::default()
        };

        write_toml_config(&config, &path).unwrap();
        let loaded = load_toml_config_from(&path).unwrap();

        assert_eq!(loaded.platform_url.as_deref(), Some("https://pbx.example.com"));
        assert_eq!(loaded.gemini_api_key.as_deref(), Some("key-123"));
        assert_eq!(loaded.pipeline.batch_size, Some(5));
    }

    #[test]
    fn test_database_path() {
        assert!(database_path(Path::new("/tmp/data")).ends_with("callqa.db"));
    }
}
