//! "Repeat" intent detection
//!
//! A fixed multilingual phrase list, matched by equality or prefix.
//! Phrasings outside the list are simply not treated as repeats.

/// What the learner asked to hear again
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepeatRequest {
    /// Replay the previous tutor reply
    Last,
    /// Say this text
    Literal(String),
}

/// Recognized phrases; longer phrases must precede their prefixes
const PHRASES: &[&str] = &[
    // English
    "can you repeat that",
    "could you repeat that",
    "can you say that again",
    "could you say that again",
    "say that again",
    "say it again",
    "repeat after me",
    "repeat that",
    "repeat",
    // Spanish
    "puedes repetir",
    "repítelo",
    "repitelo",
    "repite",
    "repetir",
    "otra vez",
    // French
    "peux-tu répéter",
    "pouvez-vous répéter",
    "répète",
    "répétez",
    "encore une fois",
    // German
    "kannst du das wiederholen",
    "wiederhole",
    "wiederholen",
    "noch einmal",
    "nochmal",
    // Italian
    "puoi ripetere",
    "ripeti",
    "ripetere",
    // Portuguese
    "pode repetir",
    "repita",
    "repete",
    // Japanese
    "もう一度言って",
    "もう一度",
    "繰り返して",
    // Chinese
    "再说一遍",
    "再說一遍",
    "重复",
    // Korean
    "다시 말해 주세요",
    "다시 말해줘",
    "다시",
];

/// Words that carry no content after a repeat phrase
const FILLER: &[&str] = &[
    "please", "again", "that", "it", "por", "favor", "de", "nuevo", "eso", "s'il", "te", "vous",
    "plaît", "plait", "bitte", "per", "favore", "ください", "下さい", "请", "吧", "주세요",
];

/// Punctuation stripped from the edges of an utterance
fn is_edge_punctuation(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '.' | ',' | '!' | '?' | ':' | ';' | '¿' | '¡' | '"' | '\'' | '“' | '”' | '‘' | '’'
                | '«' | '»' | '「' | '」' | '。' | '、' | '！' | '？' | '-' | '…'
        )
}

/// Whether `c` belongs to a script written without spaces between words
fn is_unspaced_script(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF   // Hiragana, Katakana
        | 0x3400..=0x4DBF // CJK extension A
        | 0x4E00..=0x9FFF // CJK unified
        | 0xAC00..=0xD7AF // Hangul syllables
    )
}

/// Detect a repeat request in a learner transcript
#[must_use]
pub fn detect_repeat(transcript: &str) -> Option<RepeatRequest> {
    let original = transcript.trim_matches(is_edge_punctuation);
    if original.is_empty() {
        return None;
    }
    let normalized = original.to_lowercase();

    for phrase in PHRASES {
        if normalized == *phrase {
            return Some(RepeatRequest::Last);
        }
        let Some(rest) = normalized.strip_prefix(phrase) else {
            continue;
        };

        // "repeated" must not match "repeat"
        let ends_unspaced = phrase.chars().last().is_some_and(is_unspaced_script);
        if !ends_unspaced && rest.chars().next().is_some_and(char::is_alphanumeric) {
            continue;
        }

        // Recover the trailing text with its original casing
        let skip = phrase.chars().count();
        let tail: String = original.chars().skip(skip).collect();
        let tail = tail.trim_matches(is_edge_punctuation);

        if is_filler(tail) {
            return Some(RepeatRequest::Last);
        }
        return Some(RepeatRequest::Literal(tail.to_string()));
    }
    None
}

fn is_filler(text: &str) -> bool {
    text.split_whitespace()
        .map(|w| w.trim_matches(is_edge_punctuation).to_lowercase())
        .filter(|w| !w.is_empty())
        .all(|w| FILLER.contains(&w.as_str()))
}
