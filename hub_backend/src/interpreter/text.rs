//! Small string helpers shared by the rules.
//!
//! regex-lite only knows ASCII word boundaries, so whole-word checks on
//! Cyrillic text are done by hand here.

pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn boundary_before(text: &str, start: usize) -> bool {
    text[..start]
        .chars()
        .next_back()
        .map(|c| !is_word_char(c))
        .unwrap_or(true)
}

fn boundary_after(text: &str, end: usize) -> bool {
    text[end..]
        .chars()
        .next()
        .map(|c| !is_word_char(c))
        .unwrap_or(true)
}

/// Byte offset of the first whole-word occurrence of `word` (may be a phrase).
pub fn find_word(text: &str, word: &str) -> Option<usize> {
    if word.is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(pos) = text[from..].find(word) {
        let start = from + pos;
        let end = start + word.len();
        if boundary_before(text, start) && boundary_after(text, end) {
            return Some(start);
        }
        from = start + text[start..].chars().next().map(char::len_utf8).unwrap_or(1);
    }
    None
}

pub fn contains_word(text: &str, word: &str) -> bool {
    find_word(text, word).is_some()
}

pub fn contains_any_word(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| contains_word(text, w))
}

/// Earliest whole-word trigger in `text`; on ties the longest one wins.
/// Returns the byte span of the trigger.
pub fn find_trigger(text: &str, triggers: &[&str]) -> Option<(usize, usize)> {
    triggers
        .iter()
        .filter_map(|t| find_word(text, t).map(|start| (start, start + t.len())))
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
}

/// Drop every whole-word occurrence of each of `words`.
pub fn remove_words(text: &str, words: &[&str]) -> String {
    let mut out = text.to_string();
    for word in words {
        while let Some(start) = find_word(&out, word) {
            out.replace_range(start..start + word.len(), " ");
        }
    }
    collapse_spaces(&out)
}

pub fn cut_span(text: &str, start: usize, end: usize) -> String {
    collapse_spaces(&format!("{} {}", &text[..start], &text[end..]))
}

pub fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim whitespace and list punctuation from both ends.
pub fn trim_punct(text: &str) -> &str {
    text.trim_matches(is_edge_punct)
}

pub fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Capitalize every word, for person names.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            word.split('-')
                .map(capitalize_first)
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keep the first `max` chars, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out = out.trim_end().to_string();
    out.push('…');
    out
}

/// Lowercase char by char, keeping any char whose lowercase form would
/// change its UTF-8 length. The result has the same byte layout as the input.
pub fn lower_aligned(text: &str) -> String {
    text.chars()
        .map(|c| {
            let mut lower = c.to_lowercase();
            match (lower.next(), lower.next()) {
                (Some(l), None) if l.len_utf8() == c.len_utf8() => l,
                _ => c,
            }
        })
        .collect()
}

fn is_edge_punct(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '.' | ':' | ';' | '-' | '!' | '?' | '"' | '\'')
}

/// A fragment of the message in both forms. Searches run on `lowered`, edits
/// are applied to both at the same byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrase {
    pub original: String,
    pub lowered: String,
}

impl Phrase {
    pub fn new(original: &str) -> Self {
        Self {
            original: original.to_string(),
            lowered: lower_aligned(original),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lowered.trim().is_empty()
    }

    pub fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            original: self.original[start..end].to_string(),
            lowered: self.lowered[start..end].to_string(),
        }
    }

    pub fn after(&self, pos: usize) -> Self {
        self.slice(pos, self.lowered.len()).trim_punct()
    }

    pub fn before(&self, pos: usize) -> Self {
        self.slice(0, pos).trim_punct()
    }

    pub fn cut(&self, start: usize, end: usize) -> Self {
        Self {
            original: cut_span(&self.original, start, end),
            lowered: cut_span(&self.lowered, start, end),
        }
    }

    pub fn find_word(&self, word: &str) -> Option<usize> {
        find_word(&self.lowered, word)
    }

    pub fn contains_word(&self, word: &str) -> bool {
        contains_word(&self.lowered, word)
    }

    pub fn remove_words(&self, words: &[&str]) -> Self {
        let mut original = self.original.clone();
        let mut lowered = self.lowered.clone();
        for word in words {
            while let Some(start) = find_word(&lowered, word) {
                let end = start + word.len();
                lowered.replace_range(start..end, " ");
                original.replace_range(start..end, " ");
            }
        }
        Self {
            original: collapse_spaces(&original),
            lowered: collapse_spaces(&lowered),
        }
    }

    pub fn trim_punct(&self) -> Self {
        let start = self.lowered.len() - self.lowered.trim_start_matches(is_edge_punct).len();
        let end = self.lowered.trim_end_matches(is_edge_punct).len();
        if start >= end {
            return Self::new("");
        }
        self.slice(start, end)
    }

    /// Split on `sep`, dropping empty pieces.
    pub fn split_on(&self, sep: char) -> Vec<Self> {
        let mut parts = Vec::new();
        let mut start = 0;
        for (idx, c) in self.lowered.char_indices() {
            if c == sep {
                parts.push(self.slice(start, idx).trim_punct());
                start = idx + c.len_utf8();
            }
        }
        parts.push(self.slice(start, self.lowered.len()).trim_punct());
        parts.into_iter().filter(|p| !p.is_empty()).collect()
    }

    /// Byte spans of whitespace-separated words.
    pub fn word_spans(&self) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut start: Option<usize> = None;
        for (idx, c) in self.lowered.char_indices() {
            match (c.is_whitespace(), start) {
                (true, Some(s)) => {
                    spans.push((s, idx));
                    start = None;
                }
                (false, None) => start = Some(idx),
                _ => {}
            }
        }
        if let Some(s) = start {
            spans.push((s, self.lowered.len()));
        }
        spans
    }

    pub fn words(&self) -> Vec<Self> {
        self.word_spans()
            .into_iter()
            .map(|(start, end)| self.slice(start, end))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_word_respects_cyrillic_boundaries() {
        assert_eq!(find_word("послезавтра", "завтра"), None);
        assert_eq!(find_word("купить завтра", "завтра"), Some("купить ".len()));
        assert!(contains_word("не забыть купить", "не забыть"));
        assert!(!contains_word("купила", "купил"));
    }

    #[test]
    fn earliest_trigger_wins() {
        let span = find_trigger("надо купить хлеб", &["купить", "надо"]);
        assert_eq!(span, Some((0, "надо".len())));
    }

    #[test]
    fn truncation_marks_the_cut() {
        assert_eq!(truncate_chars("абвгд", 3), "абв…");
        assert_eq!(truncate_chars("абв", 3), "абв");
    }

    #[test]
    fn names_are_title_cased() {
        assert_eq!(title_case("анна-мария петрова"), "Анна-Мария Петрова");
        assert_eq!(capitalize_first("ёлка"), "Ёлка");
    }

    #[test]
    fn phrase_edits_keep_original_case() {
        let phrase = Phrase::new("Позвонить Ивану ЗАВТРА, срочно");
        let cleaned = phrase.remove_words(&["срочно", "завтра"]).trim_punct();
        assert_eq!(cleaned.original, "Позвонить Ивану");
        assert_eq!(cleaned.lowered, "позвонить ивану");

        let parts = Phrase::new("Иван Петров, Друг, добрый").split_on(',');
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].original, "Друг");
        assert_eq!(parts[1].lowered, "друг");
        assert_eq!(parts[0].words().len(), 2);
    }

    #[test]
    fn remove_words_keeps_the_rest() {
        assert_eq!(
            remove_words("срочно купить молоко пожалуйста", &["срочно", "пожалуйста"]),
            "купить молоко"
        );
    }
}
