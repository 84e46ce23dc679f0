//! Memory-control phrases handled before the rule table.

use super::normalize::NormalizedText;
use super::text::{find_trigger, Phrase};

const RESET_PHRASES: &[&str] = &[
    "новый диалог",
    "начнем сначала",
    "начнём сначала",
    "забудь всё",
    "забудь все",
    "очисти историю",
    "сбрось контекст",
];

const FORGET_PREFIXES: &[&str] = &["забудь про", "забудь о", "забудь об", "забудь обо"];

const EVERYTHING: &[&str] = &["всё", "все"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Drop the whole conversation history.
    Reset,
    /// Drop assistant turns mentioning the topic.
    Forget(String),
}

fn quote_or_edge(c: char) -> bool {
    c.is_whitespace() || matches!(c, '"' | '\'' | '«' | '»' | '.' | '!' | ',' | ':')
}

/// Detect a directive at the start of the message.
pub fn detect_directive(text: &NormalizedText) -> Option<Directive> {
    let phrase = Phrase {
        original: text.original.clone(),
        lowered: text.lowered.clone(),
    };

    if let Some((0, end)) = find_trigger(&phrase.lowered, FORGET_PREFIXES) {
        let topic = phrase.after(end);
        let topic = topic.original.trim_matches(quote_or_edge).to_string();
        if topic.is_empty() {
            return None;
        }
        if EVERYTHING.contains(&topic.to_lowercase().as_str()) {
            return Some(Directive::Reset);
        }
        return Some(Directive::Forget(topic));
    }

    match find_trigger(&phrase.lowered, RESET_PHRASES) {
        Some((0, _)) => Some(Directive::Reset),
        _ => None,
    }
}

pub fn reset_reply(removed: usize) -> String {
    if removed == 0 {
        "🧹 Начинаем с чистого листа.".to_string()
    } else {
        format!("🧹 Начинаем с чистого листа. Очистил {} сообщений.", removed)
    }
}

pub fn forget_reply(topic: &str, removed: usize) -> String {
    if removed == 0 {
        format!("Не нашёл в памяти ничего про «{}».", topic)
    } else {
        format!("🧹 Забыл {} сообщений про «{}».", removed, topic)
    }
}
