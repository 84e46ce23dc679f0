//! Durable per-user agent state: persona, goals, a trail of recent turns and a
//! one-sentence memory rewritten by the model after every chat turn.

pub mod prompt;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::MemoryError;
use crate::llm_client::{ChatModel, ChatOptions, Message};
use crate::store::AgentStateStore;

pub const DEFAULT_PERSONA: &str = "Ты — личный ассистент YouHub: спокойный, тактичный, \
говоришь по-русски, объясняешь просто, без высокомерия и паники. Ты не эксперт-консультант, \
а умный помощник, который помогает навести порядок в делах, деньгах и отношениях. \
Отвечаешь коротко, по делу, как человек, который хорошо знает пользователя и его контекст.";

const RECENT_ACTIONS_LIMIT: usize = 10;
const TRAIL_PREVIEW_CHARS: usize = 80;
const MEMORY_MAX_TOKENS: u32 = 80;
const PROMPT_GOALS_LIMIT: usize = 5;
const PROMPT_ACTIONS_LIMIT: usize = 5;

const MEMORY_WRITER_PROMPT: &str = "Ты — внутренний модуль памяти ассистента YouHub.
На входе:
- предыдущая краткая память агента (1–2 предложения)
- последнее сообщение пользователя
- последний ответ ассистента

Задача:
- верни ОДНО предложение на русском, которое лучше всего описывает,
  что стоит запомнить про пользователя или его ситуацию в долгую.
- не повторяй детали чата, даты и суммы, только устойчивые предпочтения и паттерны.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub user_id: String,
    pub persona: String,
    pub active_goals: Vec<String>,
    pub recent_actions: Vec<String>,
    pub memory_summary: String,
}

impl AgentState {
    pub fn new(user_id: &str, persona: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            persona: persona.to_string(),
            active_goals: Vec::new(),
            recent_actions: Vec::new(),
            memory_summary: String::new(),
        }
    }

    /// Record one turn in the trail, keeping the newest entries only.
    pub fn record_turn(&mut self, intent: ChatIntent, user_message: &str, reply: &str) {
        self.recent_actions.push(format!(
            "{}: '{}' -> '{}'",
            intent.as_str(),
            preview(user_message),
            preview(reply)
        ));
        if self.recent_actions.len() > RECENT_ACTIONS_LIMIT {
            let excess = self.recent_actions.len() - RECENT_ACTIONS_LIMIT;
            self.recent_actions.drain(..excess);
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(TRAIL_PREVIEW_CHARS).collect()
}

/// Rough label for a chat message, used in the prompt and the action trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatIntent {
    FinanceQuestion,
    TasksQuestion,
    Planning,
    Question,
    Smalltalk,
}

impl ChatIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatIntent::FinanceQuestion => "finance_question",
            ChatIntent::TasksQuestion => "tasks_question",
            ChatIntent::Planning => "planning",
            ChatIntent::Question => "question",
            ChatIntent::Smalltalk => "smalltalk",
        }
    }
}

const FINANCE_MARKERS: &[&str] = &["баланс", "расход", "доход", "деньги", "денег", "финанс", "бюджет"];
const TASK_MARKERS: &[&str] = &["задач", "список дел", "дела"];
const PLANNING_MARKERS: &[&str] = &["план", "приорит", "распис"];
const QUESTION_OPENERS: &[&str] = &["почему", "как ", "что ", "зачем", "когда", "где ", "сколько"];

pub fn analyze_intent(message: &str) -> ChatIntent {
    let text = message.trim().to_lowercase();
    if FINANCE_MARKERS.iter().any(|m| text.contains(m)) {
        ChatIntent::FinanceQuestion
    } else if TASK_MARKERS.iter().any(|m| text.contains(m)) {
        ChatIntent::TasksQuestion
    } else if PLANNING_MARKERS.iter().any(|m| text.contains(m)) {
        ChatIntent::Planning
    } else if text.contains('?') || QUESTION_OPENERS.iter().any(|o| text.starts_with(o)) {
        ChatIntent::Question
    } else {
        ChatIntent::Smalltalk
    }
}

/// Persona and agent memory in front of the data section of the prompt.
pub fn build_system_prompt(state: &AgentState, intent: ChatIntent, data_section: &str) -> String {
    let goals = if state.active_goals.is_empty() {
        "нет зафиксированных целей".to_string()
    } else {
        state
            .active_goals
            .iter()
            .take(PROMPT_GOALS_LIMIT)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };
    let recent = if state.recent_actions.is_empty() {
        "пока нет явных действий агента".to_string()
    } else {
        let skip = state.recent_actions.len().saturating_sub(PROMPT_ACTIONS_LIMIT);
        state.recent_actions[skip..].join("; ")
    };
    let memory = if state.memory_summary.trim().is_empty() {
        "память пока пуста; агент только начинает изучать пользователя"
    } else {
        state.memory_summary.trim()
    };

    format!(
        "Твоя устойчивая личность (persona):\n{}\n\n\
         Память агента (краткие выводы, а не полный чат):\n{}\n\n\
         Активные цели пользователя по версии агента:\n{}\n\n\
         Последние решения/действия агента:\n{}\n\n\
         Текущее намерение пользователя (черновая оценка): {}.\n\n\
         Далее идут структурированные данные пользователя и правила ответа:\n\n{}",
        state.persona,
        memory,
        goals,
        recent,
        intent.as_str(),
        data_section
    )
}

pub struct AgentCore {
    store: Arc<dyn AgentStateStore>,
    default_persona: String,
}

impl AgentCore {
    pub fn new(store: Arc<dyn AgentStateStore>, default_persona: impl Into<String>) -> Self {
        Self {
            store,
            default_persona: default_persona.into(),
        }
    }

    pub fn fresh_state(&self, user_id: &str) -> AgentState {
        AgentState::new(user_id, &self.default_persona)
    }

    /// Stored state, or a fresh one with the default persona.
    pub fn load(&self, user_id: &str) -> Result<AgentState, MemoryError> {
        Ok(self
            .store
            .load_agent_state(user_id)?
            .unwrap_or_else(|| self.fresh_state(user_id)))
    }

    pub fn save(&self, state: &AgentState) -> Result<(), MemoryError> {
        self.store.save_agent_state(state)
    }

    /// Append the turn to the trail and ask the model for a new one-sentence
    /// memory. A failed or empty answer keeps the previous memory.
    pub async fn update_after_turn(
        &self,
        state: &mut AgentState,
        intent: ChatIntent,
        user_message: &str,
        reply: &str,
        model: &dyn ChatModel,
    ) {
        state.record_turn(intent, user_message, reply);
        if !model.is_configured() {
            return;
        }

        let previous = if state.memory_summary.trim().is_empty() {
            "нет"
        } else {
            state.memory_summary.trim()
        };
        let messages = [
            Message::system(MEMORY_WRITER_PROMPT),
            Message::user(format!(
                "Предыдущая память: {}\nСообщение пользователя: {}\nОтвет ассистента: {}",
                previous, user_message, reply
            )),
        ];

        match model
            .chat(&messages, ChatOptions::summary(MEMORY_MAX_TOKENS))
            .await
        {
            Ok(memory) if !memory.trim().is_empty() => {
                state.memory_summary = memory.trim().to_string();
            }
            Ok(_) => tracing::debug!("Memory writer returned nothing for {}", state.user_id),
            Err(e) => tracing::warn!("Memory writer failed for {}: {}", state.user_id, e),
        }
    }
}
