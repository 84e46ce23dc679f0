//! Policies that stop the matcher from guessing.

use super::action::Action;
use super::matcher::{Rule, RuleInput, RuleOutcome};
use super::text::{contains_any_word, contains_word, find_word};

/// Prefixes that make a message a command even when it ends with `?`.
pub const STRONG_COMMAND_PREFIXES: &[&str] = &[
    "создай",
    "создать",
    "добавь",
    "добавить",
    "запиши",
    "записать",
    "сделай",
    "отметь",
    "напомни",
];

/// Action verbs grouped by meaning; each group counts once.
const ACTION_VERBS: &[(&str, &[&str])] = &[
    ("buy", &["купить", "купи", "куплю", "закупить", "прикупить"]),
    ("call", &["позвонить", "позвони", "позвоню", "созвониться", "перезвонить"]),
    ("write", &["написать", "напиши", "напишу"]),
    ("send", &["отправить", "отправь", "отправлю"]),
    ("pay", &["оплатить", "оплати", "оплачу"]),
    ("pick_up", &["забрать", "забери", "заберу"]),
    ("sign_up", &["записаться", "запишись", "запишусь"]),
    ("meet", &["встретиться", "встречусь", "встретимся"]),
    ("do", &["сделать", "сделаю"]),
    ("order", &["заказать", "закажи", "закажу"]),
    ("carry", &["отнести", "отнеси", "отнесу"]),
    ("prepare", &["подготовить", "подготовь", "подготовлю"]),
];

/// Low-confidence triggers: the user may only be thinking aloud.
pub const SOFT_TRIGGERS: &[&str] = &[
    "мне нужно",
    "мне надо",
    "нужно",
    "надо",
    "не забыть",
    "не забудь",
    "необходимо",
];

const VAGUE_VERBS: &[&str] = &[
    "подумать",
    "обсудить",
    "разобраться",
    "посмотреть",
    "решить",
    "попробовать",
    "придумать",
    "определиться",
    "понять",
    "глянуть",
];

/// Number of distinct action-verb groups mentioned in `text`.
pub fn distinct_action_verbs(text: &str) -> usize {
    ACTION_VERBS
        .iter()
        .filter(|(_, forms)| contains_any_word(text, forms))
        .count()
}

pub fn is_compound_request(text: &str) -> bool {
    distinct_action_verbs(text) > 1
}

pub fn is_vague_intention(text: &str) -> bool {
    contains_any_word(text, SOFT_TRIGGERS) && contains_any_word(text, VAGUE_VERBS)
}

fn starts_with_strong_prefix(text: &str) -> bool {
    STRONG_COMMAND_PREFIXES
        .iter()
        .any(|prefix| find_word(text, prefix) == Some(0))
}

/// A question is never executed as a command.
pub struct QuestionGuard;

impl Rule for QuestionGuard {
    fn name(&self) -> &'static str {
        "question_guard"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let text = input.text();
        if text.contains('?') && !starts_with_strong_prefix(text) {
            RuleOutcome::Stop
        } else {
            RuleOutcome::Skip
        }
    }
}

/// Compound or vague bodies turn into a question back to the user.
pub fn guard_task_body(body: &str, proposed_title: &str) -> Option<Action> {
    if is_compound_request(body) {
        return Some(Action::AskSplit);
    }
    if is_vague_intention(body) {
        return Some(Action::AskClarification {
            proposed_title: proposed_title.to_string(),
        });
    }
    None
}

pub fn mentions_urgency(text: &str) -> bool {
    contains_word(text, "срочно") || contains_word(text, "важно")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_requests_need_two_distinct_verbs() {
        assert!(is_compound_request("купить хлеб и позвонить маме"));
        assert!(!is_compound_request("купить хлеб и купить молоко"));
        assert!(!is_compound_request("купить хлеб, молоко и сыр"));
        assert_eq!(distinct_action_verbs("написать отчет, отправить его и оплатить счет"), 3);
    }

    #[test]
    fn vague_needs_soft_trigger_and_vague_verb() {
        assert!(is_vague_intention("надо подумать об отпуске"));
        assert!(is_vague_intention("не забыть обсудить бюджет"));
        assert!(!is_vague_intention("надо купить хлеб"));
        assert!(!is_vague_intention("подумать об отпуске"));
    }

    #[test]
    fn strong_prefix_detection() {
        assert!(starts_with_strong_prefix("создай задачу?"));
        assert!(starts_with_strong_prefix("напомни, что завтра встреча?"));
        assert!(!starts_with_strong_prefix("создайте что-нибудь?"));
        assert!(!starts_with_strong_prefix("как создать задачу?"));
    }

    #[test]
    fn guard_prefers_split_over_clarification() {
        assert_eq!(
            guard_task_body("надо подумать и позвонить и купить", "X"),
            Some(Action::AskSplit)
        );
        assert_eq!(
            guard_task_body("надо подумать об отпуске", "Подумать об отпуске"),
            Some(Action::AskClarification {
                proposed_title: "Подумать об отпуске".to_string()
            })
        );
        assert_eq!(guard_task_body("купить хлеб", "Купить хлеб"), None);
    }
}
