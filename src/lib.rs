//! Voice Tutor - voice-chat language tutoring client
//!
//! This library provides the core functionality for the tutor:
//! - Microphone capture with a noise-calibrated level meter
//! - Analysis of each utterance by a remote generative service
//! - Speech synthesis with retry, quota detection and on-device fallback
//! - Playback with an unlock gate and pending-playback queue
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    tutor CLI                         │
//! │   chat  │  test-mic  │  test-speaker  │  export     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Response Orchestrator                   │
//! │  Recorder │ Coordinator │ Vocabulary cache │ Pacing  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │        Tutor service (analysis, TTS, rephrase)       │
//! │        cpal devices  │  local speech fallback        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod settings;
pub mod setup;
pub mod speech;
pub mod tutor;
pub mod voice;

pub use chat::{Conversation, Message, MessageId, ResponseOrchestrator};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventSender, TutorEvent};
pub use settings::Settings;
