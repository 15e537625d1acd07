//! Conversation export as a self-contained HTML document

use std::fmt::Write;

use super::message::{Conversation, Message, MessageContent};
use crate::settings::Settings;
use crate::tutor::TutorReply;

const STYLE: &str = "body{font-family:system-ui,sans-serif;max-width:46rem;margin:2rem auto;\
padding:0 1rem;color:#1f2933}h1{font-size:1.4rem}.msg{border-radius:.6rem;padding:.8rem 1rem;\
margin:.8rem 0}.user{background:#e3f2fd}.bot{background:#f5f5f5}.meta{color:#6b7280;\
font-size:.8rem}.translit,.translation{color:#52606d;font-style:italic}.feedback{border-left:\
3px solid #f59e0b;padding-left:.6rem}ul{margin:.4rem 0}";

/// Escape text for HTML element content and attribute values
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the whole conversation
#[must_use]
pub fn export_html(conversation: &Conversation, settings: &Settings) -> String {
    let title = format!("{} practice", settings.target_language);
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<h1>{title}</h1>\n\
         <p class=\"meta\">Goal: {goal} &middot; {count} messages</p>\n",
        title = escape_html(&title),
        goal = escape_html(&settings.learning_goal),
        count = conversation.len(),
    );

    for message in conversation.messages() {
        render_message(&mut html, message);
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn render_message(html: &mut String, message: &Message) {
    let time = message.created_at.format("%Y-%m-%d %H:%M");
    match &message.content {
        MessageContent::User {
            transcript,
            transliteration,
        } => {
            let _ = write!(
                html,
                "<div class=\"msg user\">\n<p class=\"meta\">You &middot; {time}</p>\n<p>{}</p>\n",
                escape_html(transcript)
            );
            if let Some(t) = transliteration {
                let _ = writeln!(html, "<p class=\"translit\">{}</p>", escape_html(t));
            }
        }
        MessageContent::Bot(reply) => {
            let _ = write!(
                html,
                "<div class=\"msg bot\">\n<p class=\"meta\">Tutor &middot; {time}</p>\n<p>{}</p>\n",
                escape_html(&reply.target_text)
            );
            render_reply_details(html, reply);
        }
    }
    html.push_str("</div>\n");
}

fn render_reply_details(html: &mut String, reply: &TutorReply) {
    if let Some(t) = &reply.transliteration {
        let _ = writeln!(html, "<p class=\"translit\">{}</p>", escape_html(t));
    }
    if let Some(t) = &reply.translation {
        let _ = writeln!(html, "<p class=\"translation\">{}</p>", escape_html(t));
    }

    if let Some(feedback) = reply.feedback.as_ref().filter(|f| f.has_error) {
        html.push_str("<div class=\"feedback\">");
        if let Some(category) = &feedback.category {
            let _ = write!(html, "<strong>{}</strong> ", escape_html(category));
        }
        if let Some(correction) = &feedback.correction {
            let _ = write!(html, "{}", escape_html(correction));
        }
        if let Some(explanation) = &feedback.explanation {
            let _ = write!(html, "<br>{}", escape_html(explanation));
        }
        html.push_str("</div>\n");
    }

    if !reply.vocabulary.is_empty() {
        html.push_str("<ul class=\"vocabulary\">\n");
        for item in &reply.vocabulary {
            let _ = write!(html, "<li><strong>{}</strong>", escape_html(&item.term));
            if let Some(t) = &item.transliteration {
                let _ = write!(html, " ({})", escape_html(t));
            }
            if !item.meaning.is_empty() {
                let _ = write!(html, ": {}", escape_html(&item.meaning));
            }
            if let Some(pos) = &item.part_of_speech {
                let _ = write!(html, " <em>{}</em>", escape_html(pos));
            }
            for example in &item.examples {
                let _ = write!(html, "<br><span class=\"translit\">{}</span>", escape_html(example));
            }
            html.push_str("</li>\n");
        }
        html.push_str("</ul>\n");
    }

    for note in &reply.cultural_notes {
        html.push_str("<p class=\"note\">");
        if let Some(title) = &note.title {
            let _ = write!(html, "<strong>{}</strong>: ", escape_html(title));
        }
        let _ = writeln!(html, "{}</p>", escape_html(&note.content));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tutor::{CulturalNote, Feedback, VocabularyItem};

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<b>"Tom & Jerry's"</b>"#),
            "&lt;b&gt;&quot;Tom &amp; Jerry&#39;s&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn renders_every_part_of_a_turn() {
        let mut convo = Conversation::new();
        convo.push(Message::user("yo tengo <hambre>", None));
        convo.push(Message::bot(TutorReply {
            translation: Some("Let's eat!".to_string()),
            feedback: Some(Feedback {
                has_error: true,
                category: Some("grammar".to_string()),
                correction: Some("Tengo hambre".to_string()),
                explanation: None,
            }),
            vocabulary: vec![VocabularyItem {
                term: "hambre".to_string(),
                transliteration: None,
                meaning: "hunger".to_string(),
                part_of_speech: Some("noun".to_string()),
                source_term: None,
                examples: vec![],
            }],
            cultural_notes: vec![CulturalNote {
                title: Some("Meals".to_string()),
                content: "Lunch is the main meal".to_string(),
            }],
            ..TutorReply::text("¡Vamos a comer!")
        }));

        let html = export_html(&convo, &Settings::default());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Spanish practice</title>"));
        assert!(html.contains("yo tengo &lt;hambre&gt;"));
        assert!(!html.contains("<hambre>"));
        assert!(html.contains("¡Vamos a comer!"));
        assert!(html.contains("Let&#39;s eat!"));
        assert!(html.contains("<strong>grammar</strong> Tengo hambre"));
        assert!(html.contains("<strong>hambre</strong>: hunger"));
        assert!(html.contains("<strong>Meals</strong>: Lunch is the main meal"));
        assert!(html.contains("2 messages"));
    }

    #[test]
    fn correct_answers_hide_feedback() {
        let mut convo = Conversation::new();
        convo.push(Message::bot(TutorReply {
            feedback: Some(Feedback {
                has_error: false,
                category: None,
                correction: None,
                explanation: Some("Perfect".to_string()),
            }),
            ..TutorReply::text("¡Muy bien!")
        }));

        let html = export_html(&convo, &Settings::default());
        assert!(!html.contains("class=\"feedback\""));
    }
}
