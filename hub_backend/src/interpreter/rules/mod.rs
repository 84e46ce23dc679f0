//! Extraction rules, one strategy per kind of command.

mod contact;
mod finance;
mod knowledge;
mod task;

pub use contact::{DatedContactRule, ExplicitContactRule, UndatedContactRule, UpdateContactRule};
pub use finance::{find_amount, FinanceGoalRule, FinanceTransactionRule};
pub use knowledge::KnowledgeNoteRule;
pub use task::{task_title, CompleteTaskRule, ExplicitTaskRule, GenericTaskRule};

use chrono::NaiveDate;

use super::dates::{find_absolute_date, find_relative_date};
use super::text::{find_trigger, is_word_char, Phrase};

/// Words that may precede a command without changing it.
const LEADING_FILLERS: &[&str] = &[
    "пожалуйста",
    "мне",
    "я",
    "а",
    "и",
    "ещё",
    "еще",
    "также",
    "ну",
    "слушай",
    "срочно",
    "важно",
];

fn strip_dates(phrase: &Phrase, today: NaiveDate, allow_past: bool) -> Phrase {
    let mut out = phrase.clone();
    while let Some(m) = find_absolute_date(&out.lowered, today) {
        out = out.cut(m.start, m.end);
    }
    while let Some(m) = find_relative_date(&out.lowered, today, allow_past) {
        out = out.cut(m.start, m.end);
    }
    out
}

/// Span of the first trigger, provided everything before it is filler or a date.
fn leading_trigger(phrase: &Phrase, triggers: &[&str], today: NaiveDate) -> Option<(usize, usize)> {
    let (start, end) = find_trigger(&phrase.lowered, triggers)?;
    let prefix = phrase.before(start);
    let rest = strip_dates(&prefix, today, false).remove_words(LEADING_FILLERS);
    if rest.trim_punct().is_empty() {
        Some((start, end))
    } else {
        None
    }
}

/// Start of a trigger that ends `phrase` ("отчет готово"). Expects a phrase
/// already trimmed of edge punctuation.
fn trailing_trigger(phrase: &Phrase, triggers: &[&str]) -> Option<usize> {
    triggers
        .iter()
        .filter_map(|t| {
            let start = phrase.lowered.strip_suffix(*t).map(str::len)?;
            let boundary = phrase.lowered[..start]
                .chars()
                .next_back()
                .map(|c| !is_word_char(c))
                .unwrap_or(true);
            boundary.then_some(start)
        })
        .min()
}
