//! Storage seams consumed by the interpreter, memory manager and agent core.
//!
//! `HubDatabase` implements all three traits; tests can swap in their own.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agent::AgentState;
use crate::error::{MemoryError, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::System => "system",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "assistant" => ChatRole::Assistant,
            "system" => ChatRole::System,
            _ => ChatRole::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: i64,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("high") {
            Priority::High
        } else {
            Priority::Medium
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("income") {
            TransactionKind::Income
        } else {
            TransactionKind::Expense
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub title: String,
    pub deadline: Option<NaiveDate>,
    pub priority: Priority,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: i64,
    pub full_name: String,
    /// Free-form attributes: relation, birth_date, strengths, weaknesses, workplace.
    pub attributes: BTreeMap<String, String>,
}

impl PersonRecord {
    pub fn relation(&self) -> Option<&str> {
        self.attributes.get("relation").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRecord {
    pub id: i64,
    pub title: String,
    pub target_amount: f64,
    pub current_amount: f64,
}

/// Read-only view of a user's data used to ground chat answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub open_tasks: Vec<TaskRecord>,
    pub people: Vec<PersonRecord>,
    pub goals: Vec<GoalRecord>,
    pub month_income: f64,
    pub month_expense: f64,
}

pub trait ChatHistoryStore: Send + Sync {
    fn append(&self, user_id: &str, role: ChatRole, content: &str) -> Result<i64, MemoryError>;

    /// Most recent `limit` turns in chronological order.
    fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ChatTurn>, MemoryError>;

    fn count(&self, user_id: &str) -> Result<usize, MemoryError>;

    /// Oldest `limit` turns in chronological order.
    fn oldest(&self, user_id: &str, limit: usize) -> Result<Vec<ChatTurn>, MemoryError>;

    fn delete_by_ids(&self, user_id: &str, ids: &[i64]) -> Result<usize, MemoryError>;

    fn delete_all(&self, user_id: &str) -> Result<usize, MemoryError>;

    /// Ids of assistant turns whose content contains `needle`, ignoring case.
    fn assistant_turns_containing(&self, user_id: &str, needle: &str)
        -> Result<Vec<i64>, MemoryError>;

    /// Delete everything except the newest `keep` turns.
    fn trim_to(&self, user_id: &str, keep: usize) -> Result<usize, MemoryError>;

    /// Atomically delete `ids` and insert one system turn in their place.
    fn replace_with_summary(
        &self,
        user_id: &str,
        ids: &[i64],
        content: &str,
    ) -> Result<i64, MemoryError>;
}

pub trait AgentStateStore: Send + Sync {
    fn load_agent_state(&self, user_id: &str) -> Result<Option<AgentState>, MemoryError>;

    fn save_agent_state(&self, state: &AgentState) -> Result<(), MemoryError>;
}

pub trait EntityStore: Send + Sync {
    fn create_task(
        &self,
        user_id: &str,
        title: &str,
        deadline: Option<NaiveDate>,
        priority: Priority,
    ) -> Result<i64, StoreError>;

    /// First open task whose title contains `fragment`, ignoring case.
    fn find_open_task_matching(
        &self,
        user_id: &str,
        fragment: &str,
    ) -> Result<Option<TaskRecord>, StoreError>;

    fn mark_task_done(&self, user_id: &str, task_id: i64) -> Result<(), StoreError>;

    fn create_person(
        &self,
        user_id: &str,
        full_name: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<i64, StoreError>;

    fn find_people_by_name_substring(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<PersonRecord>, StoreError>;

    /// Merge `attributes` into the stored ones. Strengths and weaknesses are
    /// appended to existing values, other keys are overwritten.
    fn update_person_attributes(
        &self,
        user_id: &str,
        person_id: i64,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    fn create_knowledge_item(
        &self,
        user_id: &str,
        title: &str,
        content: &str,
    ) -> Result<i64, StoreError>;

    fn create_transaction(
        &self,
        user_id: &str,
        kind: TransactionKind,
        amount: f64,
        category: &str,
        date: NaiveDate,
    ) -> Result<i64, StoreError>;

    fn create_goal(&self, user_id: &str, title: &str, target_amount: f64)
        -> Result<i64, StoreError>;

    fn snapshot(&self, user_id: &str, today: NaiveDate) -> Result<EntitySnapshot, StoreError>;
}
