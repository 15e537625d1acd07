//! Error types for the voice tutor

use thiserror::Error;

/// Result type alias for tutor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice tutor
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone access was refused
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Audio encoding/decoding error
    #[error("codec error: {0}")]
    Codec(String),

    /// Analysis or rephrase request failed
    #[error("tutor service error: {0}")]
    Tutor(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Remote speech quota is used up for this session
    #[error("speech quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Service returned a reply we cannot use
    #[error("invalid tutor reply: {0}")]
    Validation(String),

    /// Referenced message does not exist
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Base64 decoding error
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl Error {
    /// Whether this error means the remote speech quota is exhausted
    ///
    /// Besides the dedicated variant, any error whose text mentions
    /// "quota" or `RESOURCE_EXHAUSTED` counts.
    #[must_use]
    pub fn is_quota(&self) -> bool {
        if matches!(self, Self::QuotaExhausted(_)) {
            return true;
        }
        let text = self.to_string().to_lowercase();
        text.contains("quota") || text.contains("resource_exhausted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_variant_is_quota() {
        assert!(Error::QuotaExhausted("daily limit".to_string()).is_quota());
    }

    #[test]
    fn quota_detected_from_message_text() {
        assert!(Error::Tts("429: Quota exceeded for model".to_string()).is_quota());
        assert!(Error::Tts("status RESOURCE_EXHAUSTED".to_string()).is_quota());
    }

    #[test]
    fn other_errors_are_not_quota() {
        assert!(!Error::Tts("connection reset".to_string()).is_quota());
        assert!(!Error::Audio("no output device".to_string()).is_quota());
    }
}
