//! Date mentions in Russian free text: `DD.MM[.YY|.YYYY]`, relative words
//! and weekday names.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex_lite::Regex;
use std::sync::OnceLock;

use super::text::{find_word, is_word_char};

/// A recognised date and its byte span in the lowered text (including a
/// leading preposition such as "до" or "в").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateMention {
    pub date: NaiveDate,
    pub start: usize,
    pub end: usize,
}

const FUTURE_OFFSETS: &[(&str, i64)] = &[("послезавтра", 2), ("завтра", 1), ("сегодня", 0)];
const PAST_OFFSETS: &[(&str, i64)] = &[("позавчера", -2), ("вчера", -1)];

const WEEKDAY_FORMS: &[(&str, Weekday)] = &[
    ("понедельник", Weekday::Mon),
    ("понедельника", Weekday::Mon),
    ("вторник", Weekday::Tue),
    ("вторника", Weekday::Tue),
    ("среда", Weekday::Wed),
    ("среду", Weekday::Wed),
    ("среды", Weekday::Wed),
    ("четверг", Weekday::Thu),
    ("четверга", Weekday::Thu),
    ("пятница", Weekday::Fri),
    ("пятницу", Weekday::Fri),
    ("пятницы", Weekday::Fri),
    ("суббота", Weekday::Sat),
    ("субботу", Weekday::Sat),
    ("субботы", Weekday::Sat),
    ("воскресенье", Weekday::Sun),
    ("воскресенья", Weekday::Sun),
];

const DATE_PREPOSITIONS: &[&str] = &["до", "к", "ко", "в", "во", "на", "с"];

fn absolute_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,2})\.(\d{1,2})(?:\.(\d{4}|\d{2}))?").expect("valid date regex")
    })
}

/// Next occurrence of `target` strictly after `today`.
pub fn next_weekday(today: NaiveDate, target: Weekday) -> NaiveDate {
    let current = today.weekday().num_days_from_monday() as i64;
    let wanted = target.num_days_from_monday() as i64;
    let mut delta = wanted - current;
    if delta <= 0 {
        delta += 7;
    }
    today + Duration::days(delta)
}

/// Extend a span backwards over a single preposition ("до 20.10", "в пятницу").
fn widen_with_preposition(text: &str, start: usize) -> usize {
    let before = text[..start].trim_end();
    if before.len() == start {
        return start;
    }
    for prep in DATE_PREPOSITIONS {
        if let Some(prefix) = before.strip_suffix(prep) {
            let ok = prefix
                .chars()
                .next_back()
                .map(|c| !is_word_char(c))
                .unwrap_or(true);
            if ok {
                return prefix.len();
            }
        }
    }
    start
}

pub fn find_absolute_date(text: &str, today: NaiveDate) -> Option<DateMention> {
    for caps in absolute_date_regex().captures_iter(text) {
        let whole = caps.get(0)?;
        let (start, end) = (whole.start(), whole.end());

        // Reject pieces of longer numbers such as amounts "1500.50.1".
        let prev = text[..start].chars().next_back();
        let mut after = text[end..].chars();
        let next = after.next();
        let dotted_tail = next == Some('.') && after.next().map(|c| c.is_ascii_digit()).unwrap_or(false);
        if prev.map(|c| c.is_ascii_digit() || c == '.').unwrap_or(false)
            || next.map(|c| c.is_ascii_digit()).unwrap_or(false)
            || dotted_tail
        {
            continue;
        }

        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = match caps.get(3) {
            Some(y) if y.as_str().len() == 2 => 2000 + y.as_str().parse::<i32>().ok()?,
            Some(y) => y.as_str().parse().ok()?,
            None => today.year(),
        };

        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(DateMention {
                date,
                start: widen_with_preposition(text, start),
                end,
            });
        }
    }
    None
}

/// Whether the absolute date at the start of `text` carried an explicit year.
pub fn has_explicit_year(text: &str) -> bool {
    absolute_date_regex()
        .captures(text)
        .map(|caps| caps.get(3).is_some())
        .unwrap_or(false)
}

/// Relative words and weekday names. Past words ("вчера") only when `allow_past`.
pub fn find_relative_date(text: &str, today: NaiveDate, allow_past: bool) -> Option<DateMention> {
    let mut best: Option<DateMention> = None;
    let mut consider = |word: &str, date: NaiveDate| {
        if let Some(start) = find_word(text, word) {
            let mention = DateMention {
                date,
                start: widen_with_preposition(text, start),
                end: start + word.len(),
            };
            if best.map(|b| mention.start < b.start).unwrap_or(true) {
                best = Some(mention);
            }
        }
    };

    for (word, offset) in FUTURE_OFFSETS {
        consider(word, today + Duration::days(*offset));
    }
    if allow_past {
        for (word, offset) in PAST_OFFSETS {
            consider(word, today + Duration::days(*offset));
        }
    }
    for (word, weekday) in WEEKDAY_FORMS {
        consider(word, next_weekday(today, *weekday));
    }
    best
}

/// Absolute dates win over relative words.
pub fn find_date(text: &str, today: NaiveDate) -> Option<DateMention> {
    find_absolute_date(text, today).or_else(|| find_relative_date(text, today, false))
}

/// Parse a date produced by the LLM: ISO, `DD.MM[.YYYY]` or a relative word.
pub fn parse_date_expression(expr: &str, today: NaiveDate) -> Option<NaiveDate> {
    let expr = expr.trim().to_lowercase();
    if expr.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(&expr, "%Y-%m-%d") {
        return Some(date);
    }
    find_absolute_date(&expr, today)
        .or_else(|| find_relative_date(&expr, today, true))
        .map(|m| m.date)
}
