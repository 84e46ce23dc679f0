use super::leading_trigger;
use crate::interpreter::action::Action;
use crate::interpreter::matcher::{Rule, RuleInput, RuleOutcome};
use crate::interpreter::text::{capitalize_first, truncate_chars};

const KNOWLEDGE_TRIGGERS: &[&str] = &[
    "добавь в базу знаний",
    "добавить в базу знаний",
    "запиши в базу знаний",
    "сохрани в базу знаний",
    "в базу знаний",
    "запомни факт",
    "новая заметка",
    "заметка",
];

const TITLE_PREVIEW_CHARS: usize = 150;

/// "добавь в базу знаний: …", "заметка: …".
pub struct KnowledgeNoteRule;

impl Rule for KnowledgeNoteRule {
    fn name(&self) -> &'static str {
        "knowledge_note"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let Some((_, end)) = leading_trigger(input.phrase, KNOWLEDGE_TRIGGERS, input.today) else {
            return RuleOutcome::Skip;
        };
        let content = capitalize_first(&input.phrase.after(end).original);
        let title = truncate_chars(&content, TITLE_PREVIEW_CHARS);
        RuleOutcome::Matched(Action::CreateKnowledge { title, content })
    }
}
