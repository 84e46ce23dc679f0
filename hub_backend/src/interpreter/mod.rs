//! Turns one raw user message into either an executed action or a chat reply.
//!
//! Order of precedence: memory directives, the deterministic rule table, the
//! LLM intent fallback, and finally a contextual chat turn.

pub mod action;
pub mod dates;
pub mod directives;
pub mod executor;
pub mod fallback;
pub mod guards;
pub mod matcher;
pub mod normalize;
pub mod rules;
pub mod text;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::agent::prompt::data_section;
use crate::agent::{analyze_intent, build_system_prompt, AgentCore};
use crate::config::MemoryLimits;
use crate::error::LlmError;
use crate::llm_client::{ChatModel, ChatOptions, Message};
use crate::memory::{turns_to_messages, ConversationMemory, SummaryOutcome};
use crate::store::{AgentStateStore, ChatHistoryStore, EntityStore};

use self::action::Action;
use self::directives::{detect_directive, forget_reply, reset_reply, Directive};
use self::executor::{ActionExecutor, Execution};
use self::fallback::IntentFallback;
use self::matcher::PatternMatcher;
use self::normalize::{normalize, NormalizedText};

pub const EMPTY_MESSAGE_TEXT: &str =
    "Напиши, что нужно сделать. Например: «создай задачу купить молоко завтра».";
pub const NOT_CONFIGURED_TEXT: &str = "🤖 ИИ-ассистент не настроен. Команды вроде «создай задачу …» \
или «расход 500 на такси» работают и без него.";
pub const PROVIDER_ERROR_TEXT: &str = "❌ Не получилось обратиться к ИИ. Попробуй ещё раз чуть позже.";
pub const EMPTY_REPLY_TEXT: &str = "😕 ИИ не прислал ответа.";
const MEMORY_FAILURE_TEXT: &str = "❌ Не получилось изменить историю диалога. Попробуй ещё раз.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleResponse {
    pub response: String,
    /// True only when a mutating action was committed.
    pub action_executed: bool,
}

impl HandleResponse {
    fn reply(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            action_executed: false,
        }
    }
}

impl From<Execution> for HandleResponse {
    fn from(execution: Execution) -> Self {
        Self {
            response: execution.text,
            action_executed: execution.mutated,
        }
    }
}

pub struct Interpreter {
    matcher: PatternMatcher,
    fallback: IntentFallback,
    executor: ActionExecutor,
    memory: ConversationMemory,
    agent: AgentCore,
    entities: Arc<dyn EntityStore>,
    model: Arc<dyn ChatModel>,
    fixed_today: Option<NaiveDate>,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Interpreter {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        history: Arc<dyn ChatHistoryStore>,
        agent_states: Arc<dyn AgentStateStore>,
        model: Arc<dyn ChatModel>,
        limits: MemoryLimits,
        default_persona: &str,
    ) -> Self {
        Self {
            matcher: PatternMatcher::new(),
            fallback: IntentFallback::new(model.clone()),
            executor: ActionExecutor::new(entities.clone()),
            memory: ConversationMemory::new(history, limits),
            agent: AgentCore::new(agent_states, default_persona),
            entities,
            model,
            fixed_today: None,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Pin "today" for date resolution.
    pub fn with_fixed_today(mut self, today: NaiveDate) -> Self {
        self.fixed_today = Some(today);
        self
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn agent(&self) -> &AgentCore {
        &self.agent
    }

    fn today(&self) -> NaiveDate {
        self.fixed_today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .user_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Handle one message. Requests of the same user run one at a time; no
    /// error escapes, every failure becomes a fixed reply.
    pub async fn handle(&self, user_id: &str, message: &str) -> HandleResponse {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let text = normalize(message);
        if text.is_empty() {
            return HandleResponse::reply(EMPTY_MESSAGE_TEXT);
        }

        if let Some(directive) = detect_directive(&text) {
            return self.apply_directive(user_id, directive);
        }

        let today = self.today();
        let action = match self.matcher.match_text(&text, today) {
            Some(action) => Some(action),
            None if self.fallback.is_available() => self.fallback.extract(&text, today).await,
            None => None,
        };

        match action {
            Some(action) if action != Action::None => self.run_action(user_id, &text, &action),
            _ => self.chat(user_id, &text, today).await,
        }
    }

    fn apply_directive(&self, user_id: &str, directive: Directive) -> HandleResponse {
        let result = match &directive {
            Directive::Reset => self.memory.reset(user_id).map(reset_reply),
            Directive::Forget(topic) => self
                .memory
                .forget(user_id, topic)
                .map(|removed| forget_reply(topic, removed)),
        };
        match result {
            Ok(text) => {
                tracing::info!("Applied {:?} for {}", directive, user_id);
                HandleResponse::reply(text)
            }
            Err(e) => {
                tracing::warn!("Failed to apply {:?} for {}: {}", directive, user_id, e);
                HandleResponse::reply(MEMORY_FAILURE_TEXT)
            }
        }
    }

    fn run_action(&self, user_id: &str, text: &NormalizedText, action: &Action) -> HandleResponse {
        let execution = self.executor.execute(user_id, action);
        if let Err(e) = self
            .memory
            .append_turn(user_id, &text.original, &execution.text)
        {
            tracing::warn!("Failed to record action turn for {}: {}", user_id, e);
        }
        execution.into()
    }

    async fn chat(&self, user_id: &str, text: &NormalizedText, today: NaiveDate) -> HandleResponse {
        if !self.model.is_configured() {
            return HandleResponse::reply(NOT_CONFIGURED_TEXT);
        }

        let mut state = self.agent.load(user_id).unwrap_or_else(|e| {
            tracing::warn!("Failed to load agent state for {}: {}", user_id, e);
            self.agent.fresh_state(user_id)
        });
        let intent = analyze_intent(&text.original);
        let snapshot = self.entities.snapshot(user_id, today).unwrap_or_else(|e| {
            tracing::warn!("Failed to load entity snapshot for {}: {}", user_id, e);
            Default::default()
        });
        let window = self.memory.context_window(user_id).unwrap_or_else(|e| {
            tracing::warn!("Failed to load chat history for {}: {}", user_id, e);
            Vec::new()
        });

        let mut messages = vec![Message::system(build_system_prompt(
            &state,
            intent,
            &data_section(&snapshot, today),
        ))];
        messages.extend(turns_to_messages(&window));
        messages.push(Message::user(text.original.clone()));

        let reply = match self.model.chat(&messages, ChatOptions::chat()).await {
            Ok(reply) if reply.trim().is_empty() => return HandleResponse::reply(EMPTY_REPLY_TEXT),
            Ok(reply) => reply.trim().to_string(),
            Err(LlmError::NotConfigured) => return HandleResponse::reply(NOT_CONFIGURED_TEXT),
            Err(e) => {
                if e.is_quota() {
                    tracing::warn!("LLM quota exhausted for {}: {}", user_id, e);
                } else {
                    tracing::error!("LLM chat failed for {}: {}", user_id, e);
                }
                return HandleResponse::reply(PROVIDER_ERROR_TEXT);
            }
        };

        if let Err(e) = self.memory.append_turn(user_id, &text.original, &reply) {
            tracing::warn!("Failed to record chat turn for {}: {}", user_id, e);
        }
        match self.memory.maybe_summarize(user_id, self.model.as_ref()).await {
            Ok(SummaryOutcome::Compacted { replaced, .. }) => {
                tracing::debug!("Summarized {} turns for {}", replaced, user_id)
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Summarization failed for {}: {}", user_id, e),
        }

        self.agent
            .update_after_turn(&mut state, intent, &text.original, &reply, self.model.as_ref())
            .await;
        if let Err(e) = self.agent.save(&state) {
            tracing::warn!("Failed to save agent state for {}: {}", user_id, e);
        }

        HandleResponse::reply(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::HubDatabase;
    use crate::llm_client::testing::{GatedModel, ScriptedModel};
    use crate::store::ChatRole;
    use std::time::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
    }

    fn interpreter(model: Arc<dyn ChatModel>) -> (Interpreter, Arc<HubDatabase>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(HubDatabase::new(dir.path().join("hub.db")).unwrap());
        let interpreter = Interpreter::new(
            db.clone(),
            db.clone(),
            db.clone(),
            model,
            MemoryLimits::default(),
            crate::agent::DEFAULT_PERSONA,
        )
        .with_fixed_today(today());
        (interpreter, db, dir)
    }

    #[tokio::test]
    async fn task_round_trip_without_llm() {
        let model = Arc::new(ScriptedModel::unconfigured());
        let (interpreter, db, _dir) = interpreter(model.clone());

        let created = interpreter.handle("u1", "создай задачу купить молоко").await;
        assert!(created.action_executed);
        assert!(created.response.starts_with("✅ Задача создана: «Купить молоко»"));

        let completed = interpreter.handle("u1", "выполнено купить молоко").await;
        assert_eq!(
            completed,
            HandleResponse {
                response: "✅ Задача выполнена: «Купить молоко»".to_string(),
                action_executed: true,
            }
        );
        assert!(db.snapshot("u1", today()).unwrap().open_tasks.is_empty());
        assert_eq!(interpreter.memory().count("u1").unwrap(), 4);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn compound_request_is_not_executed() {
        let (interpreter, db, _dir) = interpreter(Arc::new(ScriptedModel::unconfigured()));
        let response = interpreter.handle("u1", "купить хлеб и позвонить маме").await;
        assert!(!response.action_executed);
        assert!(response.response.contains("несколько дел"));
        assert!(db.snapshot("u1", today()).unwrap().open_tasks.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_llm_gets_fixed_reply() {
        let (interpreter, _db, _dir) = interpreter(Arc::new(ScriptedModel::unconfigured()));
        assert_eq!(
            interpreter.handle("u1", "как дела?").await,
            HandleResponse::reply(NOT_CONFIGURED_TEXT)
        );
        assert_eq!(interpreter.memory().count("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn quota_error_gets_apology() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(r#"{"intent":"none"}"#.to_string()),
            Err(LlmError::Provider {
                status: 429,
                body: "quota exceeded for key sk-123".to_string(),
            }),
        ]));
        let (interpreter, _db, _dir) = interpreter(model);
        let response = interpreter.handle("u1", "расскажи анекдот").await;
        assert_eq!(response, HandleResponse::reply(PROVIDER_ERROR_TEXT));
        assert!(!response.response.contains("sk-123"));
    }

    #[tokio::test]
    async fn chat_turn_updates_history_and_agent_state() {
        let model = Arc::new(ScriptedModel::replying(&[
            r#"{"intent":"none"}"#,
            "Привет! Всё хорошо, а у тебя?",
            "Пользователь общается дружелюбно.",
        ]));
        let (interpreter, db, _dir) = interpreter(model.clone());
        db.create_task("u1", "Оплатить интернет", Some(today()), Default::default())
            .unwrap();

        let response = interpreter.handle("u1", "привет, как дела").await;
        assert_eq!(response, HandleResponse::reply("Привет! Всё хорошо, а у тебя?"));

        let history = interpreter.memory().history("u1", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[1].content, "Привет! Всё хорошо, а у тебя?");

        let state = interpreter.agent().load("u1").unwrap();
        assert_eq!(state.memory_summary, "Пользователь общается дружелюбно.");
        assert_eq!(state.recent_actions.len(), 1);

        let calls = model.calls();
        assert_eq!(calls.len(), 3);
        let (chat_messages, options) = &calls[1];
        assert_eq!(*options, ChatOptions::chat());
        assert_eq!(chat_messages[0].role, "system");
        assert!(chat_messages[0].content.contains("Оплатить интернет"));
        assert_eq!(chat_messages.last().unwrap().content, "привет, как дела");
    }

    #[tokio::test]
    async fn fallback_action_is_executed() {
        let model = Arc::new(ScriptedModel::replying(&[
            r#"{"intent":"expense","amount":700,"category":"бензин"}"#,
        ]));
        let (interpreter, db, _dir) = interpreter(model);
        let response = interpreter.handle("u1", "ушло 700 на бензин").await;
        assert!(response.action_executed);
        assert_eq!(db.snapshot("u1", today()).unwrap().month_expense, 700.0);
    }

    #[tokio::test]
    async fn directives_edit_memory_without_logging_themselves() {
        let (interpreter, _db, _dir) = interpreter(Arc::new(ScriptedModel::unconfigured()));
        interpreter
            .memory()
            .append_turn("u1", "Что с отпуском?", "Отпуск в Турции запланирован")
            .unwrap();
        interpreter.memory().append_turn("u1", "А погода?", "Солнечно").unwrap();

        let forgot = interpreter.handle("u1", "забудь про отпуск").await;
        assert_eq!(forgot, HandleResponse::reply("🧹 Забыл 1 сообщений про «отпуск»."));
        assert_eq!(interpreter.memory().count("u1").unwrap(), 3);

        let missing = interpreter.handle("u1", "забудь про Египет").await;
        assert_eq!(missing.response, "Не нашёл в памяти ничего про «Египет».");

        let reset = interpreter.handle("u1", "Новый диалог").await;
        assert!(!reset.action_executed);
        assert_eq!(interpreter.memory().count("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_message_is_prompted() {
        let (interpreter, _db, _dir) = interpreter(Arc::new(ScriptedModel::unconfigured()));
        assert_eq!(
            interpreter.handle("u1", " 🎉 ").await,
            HandleResponse::reply(EMPTY_MESSAGE_TEXT)
        );
    }

    #[tokio::test]
    async fn same_user_requests_run_one_at_a_time() {
        let model = Arc::new(GatedModel::new(r#"{"intent":"none"}"#));
        let (interpreter, _db, _dir) = interpreter(model.clone());
        let interpreter = Arc::new(interpreter);

        let first = tokio::spawn({
            let interpreter = interpreter.clone();
            async move { interpreter.handle("u1", "привет").await }
        });
        let second = tokio::spawn({
            let interpreter = interpreter.clone();
            async move { interpreter.handle("u1", "расскажи анекдот").await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(model.active(), 1);

        model.open(16);
        let (first, second) = tokio::join!(first, second);
        assert!(!first.unwrap().action_executed);
        assert!(!second.unwrap().action_executed);
        assert_eq!(model.peak(), 1);

        let roles: Vec<ChatRole> = interpreter
            .memory()
            .history("u1", 10)
            .unwrap()
            .into_iter()
            .map(|turn| turn.role)
            .collect();
        assert_eq!(
            roles,
            vec![ChatRole::User, ChatRole::Assistant, ChatRole::User, ChatRole::Assistant]
        );
    }

    #[tokio::test]
    async fn different_users_are_not_serialized() {
        let model = Arc::new(GatedModel::new(r#"{"intent":"none"}"#));
        let (interpreter, _db, _dir) = interpreter(model.clone());
        let interpreter = Arc::new(interpreter);

        let handles: Vec<_> = ["u1", "u2"]
            .into_iter()
            .map(|user| {
                let interpreter = interpreter.clone();
                tokio::spawn(async move { interpreter.handle(user, "привет").await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(model.active(), 2);

        model.open(16);
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
