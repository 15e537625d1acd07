//! Prompt construction for tutoring requests

use std::fmt::Write;

use super::types::{ContextTurn, RephraseStyle, Speaker, TutorParams};

/// JSON shape the service is asked to answer with
const REPLY_SCHEMA: &str = r#"{
  "userTranscript": "exact transcript of what the learner said",
  "userTransliteration": "romanization of the transcript, if the script is not Latin",
  "detectedLanguage": "language the learner spoke",
  "targetText": "your reply in the target language",
  "transliteration": "romanization of targetText, if needed",
  "translation": "English translation of targetText",
  "feedback": {"hasError": false, "category": "grammar|vocabulary|pronunciation", "correction": "", "explanation": ""},
  "vocabulary": [{"term": "", "transliteration": "", "meaning": "", "partOfSpeech": "", "sourceTerm": "", "examples": [""]}],
  "culturalNotes": [{"title": "", "content": ""}],
  "systemCommand": {"action": "set_speed|set_voice|open_settings|close_settings", "value": null}
}"#;

/// System instruction shared by analysis and rephrase requests
#[must_use]
pub fn system_instruction(params: &TutorParams) -> String {
    let mut prompt = format!(
        "You are a friendly, patient {lang} tutor holding a spoken conversation. \
         The learner's goal: {goal}.\n",
        lang = params.target_language,
        goal = params.learning_goal,
    );

    if let Some(name) = &params.learner_name {
        let _ = writeln!(prompt, "Address the learner as {name}.");
    }
    if let Some(accent) = &params.accent {
        let _ = writeln!(prompt, "Use vocabulary and phrasing typical of a {accent} accent.");
    }
    if params.native_mode {
        let _ = writeln!(
            prompt,
            "Explain mostly in the learner's own language, quoting short {} phrases to practice.",
            params.target_language
        );
    } else {
        let _ = writeln!(
            prompt,
            "Reply in {}, keeping sentences short and natural for speech.",
            params.target_language
        );
    }

    prompt.push_str(
        "Correct mistakes gently in `feedback`. Highlight at most three useful words in \
         `vocabulary`. Only set `systemCommand` when the learner explicitly asks to change \
         speed, voice or settings.\n",
    );
    let _ = write!(prompt, "Answer with JSON only, in this shape:\n{REPLY_SCHEMA}");
    prompt
}

/// Instruction accompanying the learner's audio
#[must_use]
pub fn analysis_request(context: &[ContextTurn]) -> String {
    let mut prompt = String::new();
    if !context.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for turn in context {
            let speaker = match turn.speaker {
                Speaker::User => "Learner",
                Speaker::Tutor => "Tutor",
            };
            let _ = writeln!(prompt, "{speaker}: {}", turn.text);
        }
        prompt.push('\n');
    }
    prompt.push_str("Transcribe the attached audio from the learner and reply to it.");
    prompt
}

/// Instruction for restyling an earlier reply
#[must_use]
pub fn rephrase_request(text: &str, style: RephraseStyle) -> String {
    let tone = match style {
        RephraseStyle::Natural => "the way a native speaker would naturally say it",
        RephraseStyle::Casual => "in a casual, friendly register",
        RephraseStyle::Formal => "in a polite, formal register",
    };
    format!(
        "Rephrase the following tutor reply {tone}. Keep the meaning. \
         Leave `userTranscript` empty.\n\n{text}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TutorParams {
        TutorParams {
            target_language: "Spanish".to_string(),
            learning_goal: "Travel".to_string(),
            native_mode: false,
            accent: None,
            learner_name: None,
        }
    }

    #[test]
    fn instruction_names_language_and_goal() {
        let prompt = system_instruction(&params());
        assert!(prompt.contains("Spanish tutor"));
        assert!(prompt.contains("Travel"));
        assert!(prompt.contains("\"targetText\""));
        assert!(!prompt.contains("Address the learner"));
    }

    #[test]
    fn optional_params_are_included() {
        let prompt = system_instruction(&TutorParams {
            native_mode: true,
            accent: Some("Argentine".to_string()),
            learner_name: Some("Sam".to_string()),
            ..params()
        });
        assert!(prompt.contains("Address the learner as Sam."));
        assert!(prompt.contains("Argentine accent"));
        assert!(prompt.contains("short Spanish phrases"));
    }

    #[test]
    fn context_is_listed_in_order() {
        let context = vec![
            ContextTurn {
                speaker: Speaker::User,
                text: "hola".to_string(),
            },
            ContextTurn {
                speaker: Speaker::Tutor,
                text: "¡Hola! ¿Qué tal?".to_string(),
            },
        ];
        let prompt = analysis_request(&context);
        let learner = prompt.find("Learner: hola").unwrap();
        let tutor = prompt.find("Tutor: ¡Hola!").unwrap();
        assert!(learner < tutor);

        assert!(!analysis_request(&[]).contains("Conversation so far"));
    }

    #[test]
    fn rephrase_mentions_style() {
        let prompt = rephrase_request("Buenos días", RephraseStyle::Formal);
        assert!(prompt.contains("formal"));
        assert!(prompt.ends_with("Buenos días"));
    }
}
