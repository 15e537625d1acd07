//! Tutor service: analysis, speech synthesis and rephrasing
//!
//! [`TutorService`] is the boundary to the remote generative service.
//! Everything crossing it is validated into the types in [`types`].

mod gemini;
pub mod prompt;
pub mod retry;
mod types;

use async_trait::async_trait;

pub use gemini::GeminiClient;
pub use retry::RetryPolicy;
pub use types::{
    Analysis, ContextTurn, CulturalNote, Feedback, RawAnalysis, RawReply, RephraseStyle, Speaker,
    SystemCommand, TutorParams, TutorReply, VocabularyItem,
};

use crate::Result;
use crate::voice::Clip;

/// Remote tutoring service
#[async_trait]
pub trait TutorService: Send + Sync {
    /// Transcribe and answer one learner utterance
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the reply does not validate
    async fn analyze(
        &self,
        clip: &Clip,
        context: &[ContextTurn],
        params: &TutorParams,
    ) -> Result<Analysis>;

    /// Synthesize `text` with `voice`, returning base64 PCM16 mono
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::QuotaExhausted`] when the speech quota is used
    /// up, or another error if synthesis fails
    async fn synthesize(&self, text: &str, voice: &str) -> Result<String>;

    /// Restyle an earlier reply
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the reply does not validate
    async fn rephrase(
        &self,
        text: &str,
        style: RephraseStyle,
        params: &TutorParams,
    ) -> Result<TutorReply>;
}
