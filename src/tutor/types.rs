//! Tutor request/response types
//!
//! Replies arrive as loosely-shaped JSON ([`RawAnalysis`], [`RawReply`]) where
//! every field may be missing. They are validated into [`Analysis`] and
//! [`TutorReply`] before entering the conversation.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Parameters that shape every tutoring request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorParams {
    /// Language being learned (e.g. "Spanish")
    pub target_language: String,
    /// What the learner wants to practice
    pub learning_goal: String,
    /// Reply mostly in the learner's own language
    pub native_mode: bool,
    /// Regional accent for the tutor (e.g. "Mexican")
    pub accent: Option<String>,
    /// How the tutor addresses the learner
    pub learner_name: Option<String>,
}

/// Speaker of a context turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Tutor,
}

/// One prior turn sent as conversation context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// Restyling options for an existing reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RephraseStyle {
    Natural,
    Casual,
    Formal,
}

impl RephraseStyle {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Natural => "natural",
            Self::Casual => "casual",
            Self::Formal => "formal",
        }
    }
}

impl std::str::FromStr for RephraseStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "natural" => Ok(Self::Natural),
            "casual" => Ok(Self::Casual),
            "formal" => Ok(Self::Formal),
            other => Err(Error::Validation(format!("unknown rephrase style: {other}"))),
        }
    }
}

/// A vocabulary item highlighted in a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub term: String,
    pub transliteration: Option<String>,
    pub meaning: String,
    pub part_of_speech: Option<String>,
    /// Equivalent term in the learner's language
    pub source_term: Option<String>,
    pub examples: Vec<String>,
}

/// Cultural context attached to a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CulturalNote {
    pub title: Option<String>,
    pub content: String,
}

/// Correction feedback on the learner's utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub has_error: bool,
    /// e.g. "grammar", "vocabulary", "pronunciation"
    pub category: Option<String>,
    pub correction: Option<String>,
    pub explanation: Option<String>,
}

/// Client-side action requested by the tutor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SystemCommand {
    SetSpeed(f32),
    SetVoice(String),
    OpenSettings,
    CloseSettings,
}

/// Validated tutor reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorReply {
    /// Reply in the target language
    pub target_text: String,
    pub transliteration: Option<String>,
    /// English translation of `target_text`
    pub translation: Option<String>,
    pub feedback: Option<Feedback>,
    pub vocabulary: Vec<VocabularyItem>,
    pub cultural_notes: Vec<CulturalNote>,
    pub command: Option<SystemCommand>,
}

impl TutorReply {
    /// Plain reply with no annotations
    #[must_use]
    pub fn text(target_text: impl Into<String>) -> Self {
        Self {
            target_text: target_text.into(),
            transliteration: None,
            translation: None,
            feedback: None,
            vocabulary: Vec::new(),
            cultural_notes: Vec::new(),
            command: None,
        }
    }
}

/// Validated analysis of one learner utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub user_transcript: String,
    pub user_transliteration: Option<String>,
    /// Language the learner spoke in
    pub detected_language: Option<String>,
    pub reply: TutorReply,
}

// -- Wire shapes --------------------------------------------------------------

/// Analysis as returned by the service
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawAnalysis {
    pub user_transcript: Option<String>,
    pub user_transliteration: Option<String>,
    pub detected_language: Option<String>,
    #[serde(flatten)]
    pub reply: RawReply,
}

/// Reply as returned by the service
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawReply {
    pub target_text: Option<String>,
    pub transliteration: Option<String>,
    pub translation: Option<String>,
    pub feedback: Option<RawFeedback>,
    pub vocabulary: Option<Vec<RawVocabulary>>,
    pub cultural_notes: Option<Vec<RawNote>>,
    pub system_command: Option<RawCommand>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawFeedback {
    pub has_error: Option<bool>,
    pub category: Option<String>,
    pub correction: Option<String>,
    pub explanation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawVocabulary {
    pub term: Option<String>,
    pub transliteration: Option<String>,
    pub meaning: Option<String>,
    pub part_of_speech: Option<String>,
    pub source_term: Option<String>,
    pub examples: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawNote {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawCommand {
    pub action: Option<String>,
    pub value: Option<serde_json::Value>,
}

/// Trim and drop empty strings
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl TryFrom<RawReply> for TutorReply {
    type Error = Error;

    fn try_from(raw: RawReply) -> Result<Self> {
        let target_text = non_empty(raw.target_text)
            .ok_or_else(|| Error::Validation("reply has no target text".to_string()))?;

        let vocabulary = raw
            .vocabulary
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| {
                Some(VocabularyItem {
                    term: non_empty(v.term)?,
                    transliteration: non_empty(v.transliteration),
                    meaning: non_empty(v.meaning).unwrap_or_default(),
                    part_of_speech: non_empty(v.part_of_speech),
                    source_term: non_empty(v.source_term),
                    examples: v.examples.unwrap_or_default(),
                })
            })
            .collect();

        let cultural_notes = raw
            .cultural_notes
            .unwrap_or_default()
            .into_iter()
            .filter_map(|n| {
                Some(CulturalNote {
                    title: non_empty(n.title),
                    content: non_empty(n.content)?,
                })
            })
            .collect();

        let feedback = raw.feedback.map(|f| Feedback {
            has_error: f.has_error.unwrap_or(false),
            category: non_empty(f.category),
            correction: non_empty(f.correction),
            explanation: non_empty(f.explanation),
        });

        Ok(Self {
            target_text,
            transliteration: non_empty(raw.transliteration),
            translation: non_empty(raw.translation),
            feedback,
            vocabulary,
            cultural_notes,
            command: raw.system_command.and_then(parse_command),
        })
    }
}

impl TryFrom<RawAnalysis> for Analysis {
    type Error = Error;

    fn try_from(raw: RawAnalysis) -> Result<Self> {
        Ok(Self {
            user_transcript: non_empty(raw.user_transcript).unwrap_or_default(),
            user_transliteration: non_empty(raw.user_transliteration),
            detected_language: non_empty(raw.detected_language),
            reply: TutorReply::try_from(raw.reply)?,
        })
    }
}

/// Map a wire command onto a [`SystemCommand`]; unknown actions are dropped
#[allow(clippy::cast_possible_truncation)]
fn parse_command(raw: RawCommand) -> Option<SystemCommand> {
    let action = raw.action?.trim().to_lowercase();
    let command = match action.as_str() {
        "set_speed" | "adjust_speed" | "speed" => {
            let value = raw.value.as_ref().and_then(|v| {
                v.as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            })?;
            SystemCommand::SetSpeed(value as f32)
        }
        "set_voice" | "adjust_voice" | "voice" => {
            SystemCommand::SetVoice(raw.value?.as_str()?.trim().to_string())
        }
        "open_settings" => SystemCommand::OpenSettings,
        "close_settings" => SystemCommand::CloseSettings,
        "" | "none" => return None,
        other => {
            tracing::warn!(action = other, "ignoring unknown system command");
            return None;
        }
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis_from(json: &str) -> Result<Analysis> {
        let raw: RawAnalysis = serde_json::from_str(json)?;
        Analysis::try_from(raw)
    }

    #[test]
    fn minimal_reply_validates() {
        let a = analysis_from(r#"{"userTranscript":"hello","targetText":"hola","vocabulary":[]}"#)
            .unwrap();
        assert_eq!(a.user_transcript, "hello");
        assert_eq!(a.reply.target_text, "hola");
        assert!(a.reply.vocabulary.is_empty());
        assert!(a.reply.cultural_notes.is_empty());
        assert!(a.reply.feedback.is_none());
        assert!(a.reply.command.is_none());
    }

    #[test]
    fn missing_target_text_is_rejected() {
        let err = analysis_from(r#"{"userTranscript":"hello"}"#).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = analysis_from(r#"{"userTranscript":"hello","targetText":"   "}"#).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn full_reply_maps_every_field() {
        let json = r#"{
            "userTranscript": "yo tengo hambre",
            "detectedLanguage": "es",
            "targetText": "¡Vamos a comer!",
            "translation": "Let's eat!",
            "feedback": {"hasError": true, "category": "grammar", "correction": "Tengo hambre", "explanation": "Subject pronoun is optional"},
            "vocabulary": [
                {"term": "hambre", "meaning": "hunger", "partOfSpeech": "noun", "examples": ["Tengo hambre"]},
                {"meaning": "no term, dropped"}
            ],
            "culturalNotes": [{"title": "Meals", "content": "Lunch is the main meal"}, {"title": "empty"}],
            "systemCommand": {"action": "set_speed", "value": 0.8}
        }"#;
        let a = analysis_from(json).unwrap();

        assert_eq!(a.detected_language.as_deref(), Some("es"));
        assert_eq!(a.reply.translation.as_deref(), Some("Let's eat!"));
        let fb = a.reply.feedback.unwrap();
        assert!(fb.has_error);
        assert_eq!(fb.category.as_deref(), Some("grammar"));
        assert_eq!(a.reply.vocabulary.len(), 1);
        assert_eq!(a.reply.vocabulary[0].examples, vec!["Tengo hambre"]);
        assert_eq!(a.reply.cultural_notes.len(), 1);
        assert_eq!(a.reply.command, Some(SystemCommand::SetSpeed(0.8)));
    }

    #[test]
    fn voice_and_settings_commands() {
        let cmd = |json: &str| {
            let raw: RawCommand = serde_json::from_str(json).unwrap();
            parse_command(raw)
        };
        assert_eq!(
            cmd(r#"{"action":"set_voice","value":"Puck"}"#),
            Some(SystemCommand::SetVoice("Puck".to_string()))
        );
        assert_eq!(cmd(r#"{"action":"open_settings"}"#), Some(SystemCommand::OpenSettings));
        assert_eq!(cmd(r#"{"action":"SET_SPEED","value":"1.2"}"#), Some(SystemCommand::SetSpeed(1.2)));
        assert_eq!(cmd(r#"{"action":"launch_rockets"}"#), None);
        assert_eq!(cmd(r#"{"action":"set_speed"}"#), None);
    }

    #[test]
    fn rephrase_style_parses() {
        assert_eq!("Casual".parse::<RephraseStyle>().unwrap(), RephraseStyle::Casual);
        assert!("rude".parse::<RephraseStyle>().is_err());
    }
}
