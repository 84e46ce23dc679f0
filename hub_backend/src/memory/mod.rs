//! Bounded per-user conversation memory: a rolling log with a hard cap, a
//! context window for the model, and lossy compaction of the oldest turns
//! into one synthetic summary turn.

use std::sync::Arc;

use crate::config::MemoryLimits;
use crate::error::MemoryError;
use crate::llm_client::{ChatModel, ChatOptions, Message};
use crate::store::{ChatHistoryStore, ChatRole, ChatTurn};

pub const SUMMARY_PREFIX: &str = "📌 Резюме предыдущего диалога: ";

const SUMMARY_MAX_TOKENS: u32 = 300;

const SUMMARY_PROMPT: &str = "Ты сжимаешь историю диалога личного ассистента. \
Перескажи её кратко на русском (3-5 предложений): договорённости, планы, \
факты о пользователе и открытые вопросы. Не выдумывай и не добавляй советов.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    BelowThreshold,
    /// `replaced` oldest turns were folded into the turn `summary_id`.
    Compacted { replaced: usize, summary_id: i64 },
    /// No model to summarize with.
    Skipped,
}

pub struct ConversationMemory {
    store: Arc<dyn ChatHistoryStore>,
    limits: MemoryLimits,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn ChatHistoryStore>, limits: MemoryLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &MemoryLimits {
        &self.limits
    }

    /// Store one turn, then enforce the hard cap (0 disables it).
    pub fn append(&self, user_id: &str, role: ChatRole, content: &str) -> Result<i64, MemoryError> {
        let id = self.store.append(user_id, role, content)?;
        if self.limits.history_limit > 0 {
            let trimmed = self.store.trim_to(user_id, self.limits.history_limit)?;
            if trimmed > 0 {
                tracing::debug!("Trimmed {} old turns for {}", trimmed, user_id);
            }
        }
        Ok(id)
    }

    pub fn append_turn(
        &self,
        user_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<(), MemoryError> {
        self.append(user_id, ChatRole::User, user_text)?;
        self.append(user_id, ChatRole::Assistant, assistant_text)?;
        Ok(())
    }

    /// The most recent turns sent to the model, oldest first.
    pub fn context_window(&self, user_id: &str) -> Result<Vec<ChatTurn>, MemoryError> {
        self.store.recent(user_id, self.limits.context_window)
    }

    pub fn history(&self, user_id: &str, limit: usize) -> Result<Vec<ChatTurn>, MemoryError> {
        self.store.recent(user_id, limit)
    }

    pub fn count(&self, user_id: &str) -> Result<usize, MemoryError> {
        self.store.count(user_id)
    }

    /// Fold the oldest `summary_chunk` turns into one system turn once the
    /// stored count reaches `summary_threshold`.
    pub async fn maybe_summarize(
        &self,
        user_id: &str,
        model: &dyn ChatModel,
    ) -> Result<SummaryOutcome, MemoryError> {
        let threshold = self.limits.summary_threshold;
        let chunk = self.limits.summary_chunk;
        if threshold == 0 || chunk < 2 {
            return Ok(SummaryOutcome::BelowThreshold);
        }

        let count = self.store.count(user_id)?;
        if count < threshold {
            return Ok(SummaryOutcome::BelowThreshold);
        }
        if !model.is_configured() {
            return Ok(SummaryOutcome::Skipped);
        }

        let oldest = self.store.oldest(user_id, chunk)?;
        if oldest.len() < 2 {
            return Ok(SummaryOutcome::BelowThreshold);
        }

        let messages = [
            Message::system(SUMMARY_PROMPT),
            Message::user(transcript(&oldest)),
        ];
        let summary = model
            .chat(&messages, ChatOptions::summary(SUMMARY_MAX_TOKENS))
            .await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(MemoryError::EmptySummary);
        }

        let ids: Vec<i64> = oldest.iter().map(|turn| turn.id).collect();
        let summary_id = self.store.replace_with_summary(
            user_id,
            &ids,
            &format!("{}{}", SUMMARY_PREFIX, summary),
        )?;
        tracing::info!(
            "Compacted {} turns into summary {} for {}",
            ids.len(),
            summary_id,
            user_id
        );
        Ok(SummaryOutcome::Compacted {
            replaced: ids.len(),
            summary_id,
        })
    }

    /// Delete assistant turns mentioning `topic`, ignoring case. User turns stay.
    pub fn forget(&self, user_id: &str, topic: &str) -> Result<usize, MemoryError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Ok(0);
        }
        let ids = self.store.assistant_turns_containing(user_id, topic)?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.delete_by_ids(user_id, &ids)
    }

    pub fn reset(&self, user_id: &str) -> Result<usize, MemoryError> {
        self.store.delete_all(user_id)
    }
}

fn transcript(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                ChatRole::User => "Пользователь",
                ChatRole::Assistant => "Ассистент",
                ChatRole::System => "Заметка",
            };
            format!("{}: {}", speaker, turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Chat turns as model messages. Summaries go in as system messages.
pub fn turns_to_messages(turns: &[ChatTurn]) -> Vec<Message> {
    turns
        .iter()
        .map(|turn| match turn.role {
            ChatRole::User => Message::user(turn.content.clone()),
            ChatRole::Assistant => Message::assistant(turn.content.clone()),
            ChatRole::System => Message::system(turn.content.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::HubDatabase;
    use crate::error::LlmError;
    use crate::llm_client::testing::ScriptedModel;

    fn memory_with(limits: MemoryLimits) -> (ConversationMemory, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(HubDatabase::new(dir.path().join("memory.db")).unwrap());
        (ConversationMemory::new(db, limits), dir)
    }

    fn limits(history_limit: usize, summary_threshold: usize, summary_chunk: usize) -> MemoryLimits {
        MemoryLimits {
            history_limit,
            context_window: 24,
            summary_threshold,
            summary_chunk,
        }
    }

    fn fill(memory: &ConversationMemory, user: &str, pairs: usize) {
        for i in 0..pairs {
            memory
                .append_turn(user, &format!("вопрос {}", i), &format!("ответ {}", i))
                .unwrap();
        }
    }

    #[test]
    fn hard_cap_keeps_newest_turns() {
        let (memory, _dir) = memory_with(limits(5, 0, 40));
        fill(&memory, "u1", 4);
        assert_eq!(memory.count("u1").unwrap(), 5);
        let history = memory.history("u1", 10).unwrap();
        assert_eq!(history.first().unwrap().content, "ответ 1");
        assert_eq!(history.last().unwrap().content, "ответ 3");
    }

    #[test]
    fn context_window_is_bounded_and_chronological() {
        let (memory, _dir) = memory_with(MemoryLimits {
            context_window: 3,
            ..limits(0, 0, 40)
        });
        fill(&memory, "u1", 3);
        let window = memory.context_window("u1").unwrap();
        let contents: Vec<&str> = window.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["ответ 1", "вопрос 2", "ответ 2"]);
    }

    #[tokio::test]
    async fn no_summary_below_threshold() {
        let (memory, _dir) = memory_with(limits(0, 10, 4));
        fill(&memory, "u1", 4);
        let model = ScriptedModel::replying(&["не должно понадобиться"]);
        let outcome = memory.maybe_summarize("u1", &model).await.unwrap();
        assert_eq!(outcome, SummaryOutcome::BelowThreshold);
        assert_eq!(model.call_count(), 0);
        assert_eq!(memory.count("u1").unwrap(), 8);
    }

    #[tokio::test]
    async fn compaction_replaces_oldest_chunk() {
        let (memory, _dir) = memory_with(limits(0, 10, 4));
        fill(&memory, "u1", 5);
        let model = ScriptedModel::replying(&["Пользователь задавал вопросы 0 и 1."]);

        let outcome = memory.maybe_summarize("u1", &model).await.unwrap();
        assert!(matches!(outcome, SummaryOutcome::Compacted { replaced: 4, .. }));
        assert_eq!(memory.count("u1").unwrap(), 10 - 4 + 1);

        let history = memory.history("u1", 100).unwrap();
        assert_eq!(history[0].role, ChatRole::System);
        assert_eq!(
            history[0].content,
            format!("{}Пользователь задавал вопросы 0 и 1.", SUMMARY_PREFIX)
        );
        assert_eq!(history[1].content, "вопрос 2");

        let (messages, options) = model.calls().remove(0);
        assert_eq!(options.max_tokens, SUMMARY_MAX_TOKENS);
        assert!(messages[1].content.contains("Пользователь: вопрос 0"));
        assert!(messages[1].content.contains("Ассистент: ответ 1"));
        assert!(!messages[1].content.contains("вопрос 2"));
    }

    #[tokio::test]
    async fn failed_summary_leaves_history_untouched() {
        let (memory, _dir) = memory_with(limits(0, 4, 4));
        fill(&memory, "u1", 2);

        let failing = ScriptedModel::new(vec![Err(LlmError::Timeout)]);
        assert!(memory.maybe_summarize("u1", &failing).await.is_err());
        let blank = ScriptedModel::replying(&["   "]);
        assert!(matches!(
            memory.maybe_summarize("u1", &blank).await,
            Err(MemoryError::EmptySummary)
        ));
        let unconfigured = ScriptedModel::unconfigured();
        assert_eq!(
            memory.maybe_summarize("u1", &unconfigured).await.unwrap(),
            SummaryOutcome::Skipped
        );
        assert_eq!(memory.count("u1").unwrap(), 4);
    }

    #[test]
    fn forget_only_touches_assistant_turns() {
        let (memory, _dir) = memory_with(limits(0, 0, 40));
        memory.append_turn("u1", "Расскажи про Турцию", "Турция прекрасна осенью").unwrap();
        memory.append_turn("u1", "А про Грецию?", "В Греции тепло").unwrap();

        assert_eq!(memory.forget("u1", "турци").unwrap(), 1);
        let contents: Vec<String> = memory
            .history("u1", 10)
            .unwrap()
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(
            contents,
            vec!["Расскажи про Турцию", "А про Грецию?", "В Греции тепло"]
        );
        assert_eq!(memory.forget("u1", "Египет").unwrap(), 0);
    }

    #[test]
    fn reset_is_per_user() {
        let (memory, _dir) = memory_with(limits(0, 0, 40));
        fill(&memory, "u1", 2);
        fill(&memory, "u2", 1);
        assert_eq!(memory.reset("u1").unwrap(), 4);
        assert_eq!(memory.count("u1").unwrap(), 0);
        assert_eq!(memory.count("u2").unwrap(), 2);
    }

    #[test]
    fn summaries_become_system_messages() {
        let (memory, _dir) = memory_with(limits(0, 0, 40));
        memory
            .append("u1", ChatRole::System, &format!("{}старое", SUMMARY_PREFIX))
            .unwrap();
        memory.append_turn("u1", "привет", "здравствуй").unwrap();
        let messages = turns_to_messages(&memory.context_window("u1").unwrap());
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
    }
}
