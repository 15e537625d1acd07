//! TOML configuration file loading
//!
//! Supports `~/.config/voice-tutor/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TutorConfigFile {
    /// Remote service access
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Model selection
    #[serde(default)]
    pub models: ModelsFileConfig,

    /// Audio settings
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Session behavior
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Remote service configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    /// API key for the generative language service
    pub key: Option<String>,

    /// Base URL (e.g. `https://generativelanguage.googleapis.com/v1beta`)
    pub base_url: Option<String>,
}

/// Model identifiers
#[derive(Debug, Default, Deserialize)]
pub struct ModelsFileConfig {
    /// Model used for analysis and rephrasing
    pub analysis: Option<String>,

    /// Model used for speech synthesis
    pub tts: Option<String>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Sample rate of synthesized PCM
    pub tts_sample_rate: Option<u32>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Where settings and conversation history live
    pub data_dir: Option<String>,

    /// Prior turns sent with each analysis
    pub context_turns: Option<usize>,
}

/// Load the TOML config file from the standard path
///
/// Returns `TutorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> TutorConfigFile {
    config_file_path().map_or_else(TutorConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`
///
/// Returns `TutorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> TutorConfigFile {
    if !path.exists() {
        return TutorConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                TutorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TutorConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voice-tutor/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-tutor").join("config.toml"))
}
