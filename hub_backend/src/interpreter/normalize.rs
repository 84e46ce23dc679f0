use serde::{Deserialize, Serialize};

use super::text::lower_aligned;

/// Punctuation that carries meaning for dates, amounts and lists.
const KEPT_PUNCTUATION: &[char] = &[
    '.', ',', ':', ';', '!', '?', '-', '+', '(', ')', '/', '%', '"', '\'', '№',
];

/// A user message with noise removed, in two forms: `original` keeps case for
/// storing and echoing, `lowered` is what the rules match against. Both have
/// the same byte layout, so spans found in one apply to the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedText {
    pub original: String,
    pub lowered: String,
}

impl NormalizedText {
    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }
}

fn is_kept(c: char) -> bool {
    c.is_alphanumeric() || c.is_whitespace() || c == '_' || KEPT_PUNCTUATION.contains(&c)
}

pub fn normalize(raw: &str) -> NormalizedText {
    let cleaned: String = raw
        .chars()
        .map(|c| if is_kept(c) { c } else { ' ' })
        .collect();
    let original = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let lowered = lower_aligned(&original);
    NormalizedText { original, lowered }
}
