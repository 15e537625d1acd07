//! Configuration management for the tutor client
//!
//! Values resolve env > TOML file > default.

pub mod file;

use std::path::PathBuf;

use crate::voice::TTS_SAMPLE_RATE;
use crate::{Error, Result};

use file::TutorConfigFile;

/// Default generative language endpoint
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model for analysis and rephrasing
pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.5-flash";

/// Default speech synthesis model
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";

/// Prior turns sent with each analysis request
pub const DEFAULT_CONTEXT_TURNS: usize = 6;

/// Tutor client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API key (`GEMINI_API_KEY`)
    pub api_key: Option<String>,

    /// Service base URL
    pub base_url: String,

    /// Model used for analysis and rephrasing
    pub analysis_model: String,

    /// Model used for speech synthesis
    pub tts_model: String,

    /// Sample rate of synthesized PCM
    pub tts_sample_rate: u32,

    /// Path to data directory (settings, history, exports)
    pub data_dir: PathBuf,

    /// Prior turns sent with each analysis
    pub context_turns: usize,
}

impl Config {
    /// Load configuration from the environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if an environment override cannot be parsed
    pub fn load() -> Result<Self> {
        let config = Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())?;

        // Ensure data dir exists
        std::fs::create_dir_all(&config.data_dir).ok();

        Ok(config)
    }

    /// Resolve configuration from a parsed file and an env lookup
    ///
    /// # Errors
    ///
    /// Returns error if a numeric override is malformed
    pub fn from_sources(
        fc: TutorConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_key = env("GEMINI_API_KEY")
            .or(fc.api.key)
            .filter(|k| !k.trim().is_empty());

        let base_url = env("TUTOR_API_BASE_URL")
            .or(fc.api.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let analysis_model = env("TUTOR_ANALYSIS_MODEL")
            .or(fc.models.analysis)
            .unwrap_or_else(|| DEFAULT_ANALYSIS_MODEL.to_string());

        let tts_model = env("TUTOR_TTS_MODEL")
            .or(fc.models.tts)
            .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string());

        let tts_sample_rate = match env("TUTOR_TTS_SAMPLE_RATE") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid TUTOR_TTS_SAMPLE_RATE: {raw}")))?,
            None => fc.audio.tts_sample_rate.unwrap_or(TTS_SAMPLE_RATE),
        };

        let context_turns = match env("TUTOR_CONTEXT_TURNS") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid TUTOR_CONTEXT_TURNS: {raw}")))?,
            None => fc.session.context_turns.unwrap_or(DEFAULT_CONTEXT_TURNS),
        };

        // Determine data directory (~/.local/share/voice-tutor on Linux)
        let data_dir = env("TUTOR_DATA_DIR")
            .or(fc.session.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            api_key,
            base_url,
            analysis_model,
            tts_model,
            tts_sample_rate,
            data_dir,
            context_turns,
        })
    }

    /// API key, or a configuration error naming the variable to set
    ///
    /// # Errors
    ///
    /// Returns error if no key is configured
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| Error::Config("GEMINI_API_KEY is not set".to_string()))
    }

    /// Learner preferences file
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    /// Saved conversation history
    #[must_use]
    pub fn conversation_path(&self) -> PathBuf {
        self.data_dir.join("conversation.json")
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("voice-tutor"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::file::{ApiFileConfig, ModelsFileConfig, SessionFileConfig};
    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(TutorConfigFile::default(), env_from(&[])).unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.analysis_model, DEFAULT_ANALYSIS_MODEL);
        assert_eq!(config.tts_sample_rate, 24000);
        assert_eq!(config.context_turns, 6);
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn env_overrides_file() {
        let fc = TutorConfigFile {
            api: ApiFileConfig {
                key: Some("from-file".to_string()),
                base_url: Some("http://localhost:9000/".to_string()),
            },
            models: ModelsFileConfig {
                analysis: Some("file-model".to_string()),
                tts: None,
            },
            session: SessionFileConfig {
                data_dir: Some("/tmp/tutor".to_string()),
                context_turns: Some(2),
            },
            ..TutorConfigFile::default()
        };
        let env = env_from(&[("GEMINI_API_KEY", "from-env"), ("TUTOR_CONTEXT_TURNS", "8")]);

        let config = Config::from_sources(fc, env).unwrap();
        assert_eq!(config.require_api_key().unwrap(), "from-env");
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.analysis_model, "file-model");
        assert_eq!(config.tts_model, DEFAULT_TTS_MODEL);
        assert_eq!(config.context_turns, 8);
        assert_eq!(config.settings_path(), PathBuf::from("/tmp/tutor/settings.json"));
    }

    #[test]
    fn blank_key_is_missing() {
        let config =
            Config::from_sources(TutorConfigFile::default(), env_from(&[("GEMINI_API_KEY", "  ")]))
                .unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn malformed_number_is_rejected() {
        let result = Config::from_sources(
            TutorConfigFile::default(),
            env_from(&[("TUTOR_TTS_SAMPLE_RATE", "fast")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
