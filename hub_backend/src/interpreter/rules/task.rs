use chrono::NaiveDate;

use super::{leading_trigger, strip_dates, trailing_trigger, LEADING_FILLERS};
use crate::interpreter::action::{Action, Priority};
use crate::interpreter::dates::find_date;
use crate::interpreter::guards::{guard_task_body, mentions_urgency, SOFT_TRIGGERS};
use crate::interpreter::matcher::{Rule, RuleInput, RuleOutcome};
use crate::interpreter::text::{capitalize_first, truncate_chars, Phrase};

const TITLE_MAX_CHARS: usize = 120;

const TITLE_STOPWORDS: &[&str] = &["срочно", "важно", "пожалуйста", "обязательно"];

const EXPLICIT_TRIGGERS: &[&str] = &[
    "создай задачу",
    "создать задачу",
    "добавь задачу",
    "добавить задачу",
    "новая задача",
    "поставь задачу",
    "запиши задачу",
    "задача",
];

const COMPLETE_LEADING: &[&str] = &[
    "отметь выполненной",
    "отметь выполненным",
    "отметь как выполненную",
    "отметь как выполненное",
    "закрой задачу",
    "задача выполнена",
    "выполнено",
    "выполнил",
    "выполнила",
    "сделано",
    "готово",
];

const COMPLETE_TRAILING: &[&str] = &["выполнено", "выполнена", "сделано", "готово"];

/// Reminder phrasing that is dropped from the title.
const REMINDER_TRIGGERS: &[&str] = &["напомни мне", "напомни"];

const ACTION_TRIGGERS: &[&str] = &[
    "купить",
    "купи",
    "позвонить",
    "позвони",
    "написать",
    "напиши",
    "отправить",
    "отправь",
    "оплатить",
    "оплати",
    "забрать",
    "забери",
    "записаться",
    "запишись",
    "встретиться",
    "сделать",
    "заказать",
    "закажи",
    "отнести",
    "отнеси",
    "подготовить",
    "подготовь",
];

fn drop_leading_fillers(phrase: &Phrase) -> Phrase {
    let mut current = phrase.trim_punct();
    loop {
        let next = LEADING_FILLERS
            .iter()
            .find(|w| current.find_word(w) == Some(0))
            .map(|w| current.after(w.len()));
        match next {
            Some(shorter) => current = shorter,
            None => return current,
        }
    }
}

/// Task title: dates, urgency and politeness words removed, capitalized, capped.
pub fn task_title(body: &Phrase, today: NaiveDate) -> String {
    let cleaned = strip_dates(body, today, false).remove_words(TITLE_STOPWORDS);
    let cleaned = drop_leading_fillers(&cleaned);
    capitalize_first(&truncate_chars(&cleaned.original, TITLE_MAX_CHARS))
}

fn task_action(body: &Phrase, full: &Phrase, today: NaiveDate) -> Action {
    let title = task_title(body, today);
    if let Some(question) = guard_task_body(&full.lowered, &title) {
        return question;
    }

    let deadline = find_date(&body.lowered, today)
        .map(|m| m.date)
        .unwrap_or(today);
    let priority = if mentions_urgency(&full.lowered) {
        Priority::High
    } else {
        Priority::Medium
    };

    Action::CreateTask {
        title,
        deadline: Some(deadline),
        priority,
    }
}

/// "создай задачу …", "новая задача: …".
pub struct ExplicitTaskRule;

impl Rule for ExplicitTaskRule {
    fn name(&self) -> &'static str {
        "explicit_task"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        match leading_trigger(input.phrase, EXPLICIT_TRIGGERS, input.today) {
            Some((start, end)) => {
                let body = input.phrase.cut(start, end);
                RuleOutcome::Matched(task_action(&body, input.phrase, input.today))
            }
            None => RuleOutcome::Skip,
        }
    }
}

/// "выполнено купить молоко", "отчет готово".
pub struct CompleteTaskRule;

impl Rule for CompleteTaskRule {
    fn name(&self) -> &'static str {
        "complete_task"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let fragment = if let Some((_, end)) =
            leading_trigger(input.phrase, COMPLETE_LEADING, input.today)
        {
            input.phrase.after(end)
        } else {
            let trimmed = input.phrase.trim_punct();
            match trailing_trigger(&trimmed, COMPLETE_TRAILING) {
                Some(start) => trimmed.before(start),
                None => return RuleOutcome::Skip,
            }
        };

        let fragment = strip_dates(&fragment, input.today, true)
            .remove_words(&["задачу", "задача"])
            .trim_punct();
        if fragment.is_empty() {
            return RuleOutcome::Skip;
        }

        RuleOutcome::Matched(Action::CompleteTask {
            title_fragment: fragment.original,
        })
    }
}

/// "нужно …", "не забыть …", "напомни …", or a bare action verb.
pub struct GenericTaskRule;

impl Rule for GenericTaskRule {
    fn name(&self) -> &'static str {
        "generic_task"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let triggers: Vec<&str> = SOFT_TRIGGERS
            .iter()
            .chain(REMINDER_TRIGGERS)
            .chain(ACTION_TRIGGERS)
            .copied()
            .collect();

        let Some((start, end)) = leading_trigger(input.phrase, &triggers, input.today) else {
            return RuleOutcome::Skip;
        };

        let trigger = &input.phrase.lowered[start..end];
        let dropped = SOFT_TRIGGERS.contains(&trigger) || REMINDER_TRIGGERS.contains(&trigger);
        let body = if dropped {
            input.phrase.cut(start, end)
        } else {
            input.phrase.clone()
        };

        RuleOutcome::Matched(task_action(&body, input.phrase, input.today))
    }
}
