use chrono::NaiveDate;
use regex_lite::Regex;
use std::sync::OnceLock;

use super::{leading_trigger, strip_dates, LEADING_FILLERS};
use crate::interpreter::action::{Action, TransactionKind};
use crate::interpreter::dates::{find_absolute_date, find_relative_date};
use crate::interpreter::matcher::{Rule, RuleInput, RuleOutcome};
use crate::interpreter::text::{
    capitalize_first, find_trigger, is_word_char, truncate_chars, Phrase,
};

const EXPENSE_TRIGGERS: &[&str] = &[
    "расход",
    "расходы",
    "трата",
    "потратил",
    "потратила",
    "потрачено",
    "купил",
    "купила",
    "заплатил",
    "заплатила",
    "оплатил",
    "оплатила",
];

const INCOME_TRIGGERS: &[&str] = &[
    "доход",
    "получил",
    "получила",
    "заработал",
    "заработала",
    "поступление",
    "пришло",
];

const GOAL_TRIGGERS: &[&str] = &[
    "новая цель",
    "добавь цель",
    "добавить цель",
    "создай цель",
    "финансовая цель",
    "цель",
    "хочу накопить на",
    "накопить на",
    "коплю на",
    "копить на",
];

/// Goal titles must not start with these; they belong to other commands.
const RESERVED_GOAL_WORDS: &[&str] = &["цель", "расход", "доход", "задача", "контакт"];

const CURRENCY_WORDS: &[&str] = &["р", "руб", "рубль", "рубля", "рублей", "rub"];

const LEADING_PREPOSITIONS: &[&str] = &["на", "за", "в", "во", "по", "от", "до", "я"];

const DEFAULT_CATEGORY: &str = "Прочее";
const CATEGORY_MAX_CHARS: usize = 60;
const GOAL_TITLE_MAX_CHARS: usize = 120;

fn amount_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,3}(?: \d{3})+|\d+)(?:[.,](\d{1,2}))?").expect("valid amount regex")
    })
}

fn multiplier(word: &str, attached: bool) -> Option<f64> {
    match word {
        "к" | "k" if attached => Some(1_000.0),
        "тыс" | "тысяч" | "тысячи" | "тысяча" => Some(1_000.0),
        "млн" | "миллион" | "миллиона" | "миллионов" => Some(1_000_000.0),
        _ => None,
    }
}

/// A money amount and its byte span, suffixes ("5к", "10 тыс руб") included.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountMatch {
    pub value: f64,
    pub start: usize,
    pub end: usize,
    /// Followed by a currency word.
    pub marked: bool,
}

/// The word right after `pos`: (its end, the word, whether it touches `pos`).
fn next_word(text: &str, pos: usize) -> Option<(usize, &str, bool)> {
    let tail = &text[pos..];
    let (offset, attached) = match tail.chars().next() {
        Some(c) if is_word_char(c) && !c.is_ascii_digit() => (0, true),
        Some(' ') => (1, false),
        _ => return None,
    };
    let rest = &tail[offset..];
    let len = rest
        .char_indices()
        .find(|(_, c)| !is_word_char(*c) || c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    if len == 0 {
        return None;
    }
    Some((pos + offset + len, &rest[..len], attached))
}

fn all_amounts(text: &str) -> Vec<AmountMatch> {
    let mut found = Vec::new();
    for caps in amount_regex().captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let start = whole.start();
        let mut end = whole.end();

        let prev = text[..start].chars().next_back();
        if prev.map(|c| is_word_char(c) || c == '.' || c == ',').unwrap_or(false) {
            continue;
        }

        let integer: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
        let Ok(mut value) = integer.parse::<f64>() else { continue };
        if let Some(fraction) = caps.get(2) {
            let digits = fraction.as_str();
            let parsed: f64 = digits.parse().unwrap_or(0.0);
            value += parsed / 10f64.powi(digits.len() as i32);
        }

        let mut marked = false;
        if let Some((word_end, word, attached)) = next_word(text, end) {
            let word = word.trim_end_matches('.');
            if let Some(factor) = multiplier(word, attached) {
                value *= factor;
                end = word_end;
                if let Some((cur_end, cur, _)) = next_word(text, end) {
                    if CURRENCY_WORDS.contains(&cur) {
                        marked = true;
                        end = cur_end;
                    }
                }
            } else if CURRENCY_WORDS.contains(&word) {
                marked = true;
                end = word_end;
            } else if attached {
                // "5кг", "3шт": not money
                continue;
            }
        }

        found.push(AmountMatch {
            value,
            start,
            end,
            marked,
        });
    }
    found
}

/// Pick the amount in `text`: the first one with a currency word, else the last one.
pub fn find_amount(text: &str) -> Option<AmountMatch> {
    let amounts = all_amounts(text);
    amounts
        .iter()
        .find(|a| a.marked)
        .or_else(|| amounts.last())
        .copied()
}

fn drop_leading_prepositions(phrase: &Phrase) -> Phrase {
    let mut current = phrase.trim_punct();
    while let Some(word) = LEADING_PREPOSITIONS
        .iter()
        .find(|w| current.find_word(w) == Some(0))
    {
        current = current.after(word.len());
    }
    current
}

/// "потратил 500 на такси вчера", "доход 100 000 зарплата".
pub struct FinanceTransactionRule;

impl Rule for FinanceTransactionRule {
    fn name(&self) -> &'static str {
        "finance_transaction"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let text = input.text();
        let expense = find_trigger(text, EXPENSE_TRIGGERS);
        let income = find_trigger(text, INCOME_TRIGGERS);
        let (kind, (start, end)) = match (expense, income) {
            (Some(e), Some(i)) if i.0 < e.0 => (TransactionKind::Income, i),
            (Some(e), _) => (TransactionKind::Expense, e),
            (None, Some(i)) => (TransactionKind::Income, i),
            (None, None) => return RuleOutcome::Skip,
        };
        // "напомни вернуть 500, он заплатил" is a reminder, not a transaction.
        let prefix = strip_dates(&input.phrase.before(start), input.today, true)
            .remove_words(LEADING_FILLERS);
        if !prefix.trim_punct().is_empty() {
            return RuleOutcome::Skip;
        }
        let body = input.phrase.after(end);

        let dated = strip_dates(&body, input.today, true);
        let (rest, amount, date) = match find_amount(&dated.lowered) {
            Some(amount) => {
                let date = find_absolute_date(text, input.today)
                    .or_else(|| find_relative_date(text, input.today, true))
                    .map(|m| m.date);
                (dated, amount, date)
            }
            None => {
                // "потратил 10.5 на кофе": the only number is a decimal, not DD.MM.
                let rest = strip_relative_dates(&body, input.today);
                let Some(amount) = find_amount(&rest.lowered) else {
                    return RuleOutcome::Skip;
                };
                let date = find_relative_date(text, input.today, true).map(|m| m.date);
                (rest, amount, date)
            }
        };
        if amount.value <= 0.0 || !amount.value.is_finite() {
            return RuleOutcome::Skip;
        }

        let category = rest
            .cut(amount.start, amount.end)
            .remove_words(CURRENCY_WORDS);
        let category = drop_leading_prepositions(&category);
        let category = if category.is_empty() {
            DEFAULT_CATEGORY.to_string()
        } else {
            capitalize_first(&truncate_chars(&category.original, CATEGORY_MAX_CHARS))
        };

        RuleOutcome::Matched(Action::AddTransaction {
            kind,
            amount: amount.value,
            category,
            date: date.unwrap_or(input.today),
        })
    }
}

fn strip_relative_dates(phrase: &Phrase, today: NaiveDate) -> Phrase {
    let mut out = phrase.clone();
    while let Some(m) = find_relative_date(&out.lowered, today, true) {
        out = out.cut(m.start, m.end);
    }
    out
}

/// "цель: отпуск 150 000", "накопить на машину 1,5 млн".
pub struct FinanceGoalRule;

impl Rule for FinanceGoalRule {
    fn name(&self) -> &'static str {
        "finance_goal"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let Some((_, end)) = leading_trigger(input.phrase, GOAL_TRIGGERS, input.today) else {
            return RuleOutcome::Skip;
        };
        let body = input.phrase.after(end);
        let Some(amount) = find_amount(&body.lowered) else {
            return RuleOutcome::Skip;
        };

        let title = body
            .cut(amount.start, amount.end)
            .remove_words(CURRENCY_WORDS);
        let title = drop_leading_prepositions(&title);
        if let Some(first) = title.words().first() {
            if RESERVED_GOAL_WORDS.contains(&first.lowered.as_str()) {
                return RuleOutcome::Skip;
            }
        }

        RuleOutcome::Matched(Action::AddGoal {
            title: capitalize_first(&truncate_chars(&title.original, GOAL_TITLE_MAX_CHARS)),
            target_amount: amount.value,
        })
    }
}
