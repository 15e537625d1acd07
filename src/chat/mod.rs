//! Conversation model and turn orchestration

mod cache;
pub mod export;
mod message;
mod orchestrator;
pub mod pacing;
pub mod repeat;

pub use cache::VocabularyCache;
pub use export::export_html;
pub use message::{Conversation, Message, MessageContent, MessageId, SharedConversation};
pub use orchestrator::{
    MAX_PREFETCH_TERMS, OrchestratorOptions, ResponseOrchestrator, SpeechOutcome, Turn,
};
