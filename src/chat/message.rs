//! Conversation messages

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tutor::{ContextTurn, Speaker, TutorReply};
use crate::voice::AudioBuffer;
use crate::{Error, Result};

/// Message identifier
pub type MessageId = Uuid;

/// Conversation shared between the orchestrator and playback
pub type SharedConversation = Arc<Mutex<Conversation>>;

/// What a message says
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum MessageContent {
    /// Learner utterance
    User {
        transcript: String,
        transliteration: Option<String>,
    },
    /// Tutor reply
    Bot(TutorReply),
}

/// One chat message
///
/// Immutable after creation except for a single audio attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    pub content: MessageContent,
    /// Playback rate chosen for this reply (pacing)
    pub playback_rate: Option<f32>,
    #[serde(skip)]
    audio: Option<Arc<AudioBuffer>>,
}

impl Message {
    /// Learner message
    #[must_use]
    pub fn user(transcript: impl Into<String>, transliteration: Option<String>) -> Self {
        Self::new(MessageContent::User {
            transcript: transcript.into(),
            transliteration,
        })
    }

    /// Tutor message
    #[must_use]
    pub fn bot(reply: TutorReply) -> Self {
        Self::new(MessageContent::Bot(reply))
    }

    fn new(content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            content,
            playback_rate: None,
            audio: None,
        }
    }

    /// Set the per-message playback rate
    #[must_use]
    pub fn with_playback_rate(mut self, rate: Option<f32>) -> Self {
        self.playback_rate = rate;
        self
    }

    #[must_use]
    pub const fn is_bot(&self) -> bool {
        matches!(self.content, MessageContent::Bot(_))
    }

    /// The text this message would be spoken or summarized as
    #[must_use]
    pub fn text(&self) -> &str {
        match &self.content {
            MessageContent::User { transcript, .. } => transcript,
            MessageContent::Bot(reply) => &reply.target_text,
        }
    }

    #[must_use]
    pub const fn reply(&self) -> Option<&TutorReply> {
        match &self.content {
            MessageContent::Bot(reply) => Some(reply),
            MessageContent::User { .. } => None,
        }
    }

    #[must_use]
    pub fn audio(&self) -> Option<Arc<AudioBuffer>> {
        self.audio.clone()
    }

    #[must_use]
    pub const fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// Ordered chat history
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load saved history; a missing file is an empty conversation
    ///
    /// Audio is not persisted.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let convo: Self = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), messages = convo.len(), "loaded conversation");
        Ok(convo)
    }

    /// Save history, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Wrap into the shared handle
    #[must_use]
    pub fn shared(self) -> SharedConversation {
        Arc::new(Mutex::new(self))
    }

    /// Append a message and return its id
    pub fn push(&mut self, message: Message) -> MessageId {
        let id = message.id;
        self.messages.push(message);
        id
    }

    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Attach synthesized audio to a message
    ///
    /// Returns `Ok(false)` if the message already has audio; the first
    /// attachment wins.
    ///
    /// # Errors
    ///
    /// Returns error if the message does not exist
    pub fn attach_audio(&mut self, id: MessageId, audio: Arc<AudioBuffer>) -> Result<bool> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::MessageNotFound(id.to_string()))?;

        if message.audio.is_some() {
            tracing::debug!(%id, "audio already attached");
            return Ok(false);
        }
        message.audio = Some(audio);
        Ok(true)
    }

    /// Attached audio and per-message rate, if any
    #[must_use]
    pub fn audio_for(&self, id: MessageId) -> Option<(Arc<AudioBuffer>, Option<f32>)> {
        self.get(id)
            .and_then(|m| m.audio().map(|a| (a, m.playback_rate)))
    }

    /// Most recent tutor message
    #[must_use]
    pub fn last_bot(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_bot())
    }

    /// The last `turns` messages as request context, oldest first
    #[must_use]
    pub fn recent_context(&self, turns: usize) -> Vec<ContextTurn> {
        let start = self.messages.len().saturating_sub(turns);
        self.messages[start..]
            .iter()
            .map(|m| ContextTurn {
                speaker: if m.is_bot() { Speaker::Tutor } else { Speaker::User },
                text: m.text().to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::new(vec![0.0; 10], 24000))
    }

    #[test]
    fn audio_attaches_exactly_once() {
        let mut convo = Conversation::new();
        let id = convo.push(Message::bot(TutorReply::text("hola")));

        assert!(convo.audio_for(id).is_none());
        assert!(convo.attach_audio(id, buffer()).unwrap());

        let other = Arc::new(AudioBuffer::new(vec![0.5; 3], 24000));
        assert!(!convo.attach_audio(id, other).unwrap());
        assert_eq!(convo.audio_for(id).unwrap().0.len(), 10);
    }

    #[test]
    fn attach_to_unknown_message_fails() {
        let mut convo = Conversation::new();
        assert!(matches!(
            convo.attach_audio(Uuid::new_v4(), buffer()),
            Err(Error::MessageNotFound(_))
        ));
    }

    #[test]
    fn recent_context_keeps_order() {
        let mut convo = Conversation::new();
        convo.push(Message::user("uno", None));
        convo.push(Message::bot(TutorReply::text("dos")));
        convo.push(Message::user("tres", None));

        let ctx = convo.recent_context(2);
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[0].speaker, Speaker::Tutor);
        assert_eq!(ctx[0].text, "dos");
        assert_eq!(ctx[1].text, "tres");

        assert_eq!(convo.recent_context(10).len(), 3);
    }

    #[test]
    fn last_bot_skips_user_messages() {
        let mut convo = Conversation::new();
        assert!(convo.last_bot().is_none());
        convo.push(Message::bot(TutorReply::text("primero")));
        convo.push(Message::user("hmm", None));
        assert_eq!(convo.last_bot().unwrap().text(), "primero");
    }

    #[test]
    fn playback_rate_travels_with_audio() {
        let mut convo = Conversation::new();
        let id = convo.push(Message::bot(TutorReply::text("hola")).with_playback_rate(Some(0.9)));
        convo.attach_audio(id, buffer()).unwrap();
        assert_eq!(convo.audio_for(id).unwrap().1, Some(0.9));
    }

    #[test]
    fn saves_and_loads_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history").join("conversation.json");
        assert!(Conversation::load(&path).unwrap().is_empty());

        let mut convo = Conversation::new();
        convo.push(Message::user("hola", Some("o-la".to_string())));
        convo.save(&path).unwrap();

        let back = Conversation::load(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.messages()[0].content, convo.messages()[0].content);
    }

    #[test]
    fn serializes_without_audio() {
        let mut convo = Conversation::new();
        let id = convo.push(Message::bot(TutorReply::text("hola")));
        convo.attach_audio(id, buffer()).unwrap();

        let json = serde_json::to_string(&convo).unwrap();
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 1);
        assert!(!back.messages()[0].has_audio());
    }
}
