use chrono::NaiveDate;

use super::action::Action;
use super::guards::QuestionGuard;
use super::normalize::NormalizedText;
use super::rules::{
    CompleteTaskRule, DatedContactRule, ExplicitContactRule, ExplicitTaskRule,
    FinanceGoalRule, FinanceTransactionRule, GenericTaskRule, KnowledgeNoteRule,
    UndatedContactRule, UpdateContactRule,
};
use super::text::Phrase;

/// What a rule sees: the whole message and the date "today" resolves to.
pub struct RuleInput<'a> {
    pub phrase: &'a Phrase,
    pub today: NaiveDate,
}

impl<'a> RuleInput<'a> {
    pub fn text(&self) -> &str {
        &self.phrase.lowered
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// Not for this rule; try the next one.
    Skip,
    Matched(Action),
    /// End matching with no action.
    Stop,
}

pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome;
}

/// Ordered rule table. The first rule that matches or stops decides.
pub struct PatternMatcher {
    rules: Vec<Box<dyn Rule>>,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::with_rules(vec![
            Box::new(QuestionGuard),
            Box::new(DatedContactRule),
            Box::new(ExplicitTaskRule),
            Box::new(CompleteTaskRule),
            Box::new(FinanceTransactionRule),
            Box::new(FinanceGoalRule),
            Box::new(KnowledgeNoteRule),
            Box::new(UpdateContactRule),
            Box::new(ExplicitContactRule),
            Box::new(UndatedContactRule),
            Box::new(GenericTaskRule),
        ])
    }

    pub fn with_rules(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn match_text(&self, text: &NormalizedText, today: NaiveDate) -> Option<Action> {
        if text.is_empty() {
            return None;
        }
        let phrase = Phrase {
            original: text.original.clone(),
            lowered: text.lowered.clone(),
        };
        let input = RuleInput {
            phrase: &phrase,
            today,
        };

        for rule in &self.rules {
            match rule.apply(&input) {
                RuleOutcome::Skip => continue,
                RuleOutcome::Matched(action) => {
                    tracing::debug!("Rule {} matched: {}", rule.name(), action.kind());
                    return Some(action);
                }
                RuleOutcome::Stop => {
                    tracing::debug!("Rule {} stopped matching", rule.name());
                    return None;
                }
            }
        }
        None
    }
}
