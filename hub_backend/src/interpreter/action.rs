use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use crate::store::{Priority, TransactionKind};

/// Optional person attributes shared by creation and update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonFields {
    pub relation: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub strengths: Option<String>,
    pub weaknesses: Option<String>,
    pub workplace: Option<String>,
}

impl PersonFields {
    pub fn is_empty(&self) -> bool {
        self.relation.is_none()
            && self.birth_date.is_none()
            && self.strengths.is_none()
            && self.weaknesses.is_none()
            && self.workplace.is_none()
    }

    pub fn to_attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                attrs.insert(key.to_string(), value.trim().to_string());
            }
        };
        put("relation", self.relation.clone());
        put(
            "birth_date",
            self.birth_date.map(|d| d.format("%Y-%m-%d").to_string()),
        );
        put("strengths", self.strengths.clone());
        put("weaknesses", self.weaknesses.clone());
        put("workplace", self.workplace.clone());
        attrs
    }
}

/// One interpreted user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    CreateTask {
        title: String,
        deadline: Option<NaiveDate>,
        priority: Priority,
    },
    CompleteTask {
        title_fragment: String,
    },
    CreatePerson {
        full_name: String,
        fields: PersonFields,
    },
    UpdatePerson {
        name_query: String,
        fields: PersonFields,
    },
    AddTransaction {
        kind: TransactionKind,
        amount: f64,
        category: String,
        date: NaiveDate,
    },
    AddGoal {
        title: String,
        target_amount: f64,
    },
    CreateKnowledge {
        title: String,
        content: String,
    },
    /// A vague intention; the user is asked to confirm before anything is stored.
    AskClarification {
        proposed_title: String,
    },
    /// Several actions in one message; the user is asked to send them separately.
    AskSplit,
    None,
}

impl Action {
    /// Short label for logs; matches the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::CreateTask { .. } => "create_task",
            Action::CompleteTask { .. } => "complete_task",
            Action::CreatePerson { .. } => "create_person",
            Action::UpdatePerson { .. } => "update_person",
            Action::AddTransaction { .. } => "add_transaction",
            Action::AddGoal { .. } => "add_goal",
            Action::CreateKnowledge { .. } => "create_knowledge",
            Action::AskClarification { .. } => "ask_clarification",
            Action::AskSplit => "ask_split",
            Action::None => "none",
        }
    }
}
