//! Persisted learner preferences
//!
//! Stored as JSON. Every field has a default, so files written by older
//! versions (or hand-edited ones missing keys) still load; a corrupt file
//! falls back to defaults entirely.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::tutor::TutorParams;

/// Settings shared across the session
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Slowest speech rate a command may set
pub const MIN_SPEECH_RATE: f32 = 0.5;
/// Fastest speech rate a command may set
pub const MAX_SPEECH_RATE: f32 = 2.0;

/// Learner preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub target_language: String,
    /// TTS voice name
    pub voice: String,
    /// Global playback rate
    pub speech_rate: f32,
    /// Empty means the service default
    pub accent: String,
    pub learning_goal: String,
    pub learner_name: String,
    /// Reply mostly in the learner's own language
    pub native_mode: bool,
    /// Start recording again after each reply
    pub shadow_mode: bool,
    /// Match reply speed to the learner's speaking pace
    pub adaptive_pacing: bool,
    /// Calibrate the meter's noise floor
    pub noise_calibration: bool,
    /// Beep on record start/stop
    pub audio_cues: bool,
    /// Pre-synthesize vocabulary audio
    pub prefetch_vocabulary: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_language: "Spanish".to_string(),
            voice: "Kore".to_string(),
            speech_rate: 1.0,
            accent: String::new(),
            learning_goal: "Everyday conversation".to_string(),
            learner_name: String::new(),
            native_mode: false,
            shadow_mode: false,
            adaptive_pacing: true,
            noise_calibration: true,
            audio_cues: true,
            prefetch_vocabulary: true,
        }
    }
}

impl Settings {
    /// Load from `path`, falling back to defaults on any problem
    #[must_use]
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(settings) => {
                    tracing::debug!(path = %path.display(), "loaded settings");
                    settings.sanitized()
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to parse settings, using defaults"
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to read settings"
                );
                Self::default()
            }
        }
    }

    /// Write to `path`, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "saved settings");
        Ok(())
    }

    /// Wrap into the shared handle
    #[must_use]
    pub fn shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    /// Set the speech rate within the supported range
    pub fn set_speech_rate(&mut self, rate: f32) {
        self.speech_rate = rate.clamp(MIN_SPEECH_RATE, MAX_SPEECH_RATE);
    }

    /// Tutoring parameters for service requests
    #[must_use]
    pub fn tutor_params(&self) -> TutorParams {
        let optional = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        TutorParams {
            target_language: self.target_language.clone(),
            learning_goal: self.learning_goal.clone(),
            native_mode: self.native_mode,
            accent: optional(&self.accent),
            learner_name: optional(&self.learner_name),
        }
    }

    /// Replace out-of-range values with defaults
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !self.speech_rate.is_finite() {
            self.speech_rate = defaults.speech_rate;
        }
        self.speech_rate = self.speech_rate.clamp(MIN_SPEECH_RATE, MAX_SPEECH_RATE);
        if self.target_language.trim().is_empty() {
            self.target_language = defaults.target_language;
        }
        if self.voice.trim().is_empty() {
            self.voice = defaults.voice;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Settings::load(&dir.path().join("nope.json")), Settings::default());
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = Settings {
            target_language: "Japanese".to_string(),
            shadow_mode: true,
            speech_rate: 0.9,
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path), settings);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"targetLanguage":"French","unknownKey":42}"#).unwrap();

        let loaded = Settings::load(&path);
        assert_eq!(loaded.target_language, "French");
        assert_eq!(loaded.voice, Settings::default().voice);
        assert!(loaded.adaptive_pacing);
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());

        std::fs::write(&path, r#"{"speechRate":"fast"}"#).unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn out_of_range_rate_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"speechRate":9.0,"voice":" "}"#).unwrap();

        let loaded = Settings::load(&path);
        assert!((loaded.speech_rate - MAX_SPEECH_RATE).abs() < f32::EPSILON);
        assert_eq!(loaded.voice, "Kore");
    }

    #[test]
    fn params_drop_blank_optionals() {
        let params = Settings::default().tutor_params();
        assert!(params.accent.is_none());
        assert!(params.learner_name.is_none());

        let params = Settings {
            accent: "Rioplatense".to_string(),
            ..Settings::default()
        }
        .tutor_params();
        assert_eq!(params.accent.as_deref(), Some("Rioplatense"));
    }
}
