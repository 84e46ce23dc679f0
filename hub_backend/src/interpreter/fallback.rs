//! LLM-backed intent extraction for messages the rules did not recognise.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::action::{Action, PersonFields, Priority, TransactionKind};
use super::dates::parse_date_expression;
use super::guards::{guard_task_body, mentions_urgency};
use super::normalize::NormalizedText;
use super::rules::{find_amount, task_title};
use super::text::{capitalize_first, title_case, truncate_chars, Phrase};
use crate::llm_client::{extract_json, ChatModel, ChatOptions, Message};

const DEFAULT_CATEGORY: &str = "Прочее";
const NOTE_TITLE_CHARS: usize = 150;

const EXTRACTION_PROMPT: &str = r#"Ты — модуль разбора команд личного ассистента.
Определи, просит ли пользователь что-то сохранить, и верни ОДНУ строку JSON без пояснений.

Допустимые intent: task, expense, income, goal, contact, note, none.
Поля: intent, title, date (YYYY-MM-DD или слово вроде "завтра"), priority (high|medium),
amount (число), category, name, relation, workplace, strengths, weaknesses, content.
Если это вопрос, просьба о совете или просто разговор, верни {"intent":"none"}.

Примеры:
"не забудь, что в четверг стоматолог" -> {"intent":"task","title":"Стоматолог","date":"четверг"}
"ушло 700 на бензин" -> {"intent":"expense","amount":700,"category":"Бензин"}
"перевели аванс 40000" -> {"intent":"income","amount":40000,"category":"Аванс"}
"хочу собрать 300 тысяч на ремонт" -> {"intent":"goal","title":"Ремонт","amount":300000}
"у меня новый коллега Павел Орлов" -> {"intent":"contact","name":"Павел Орлов","relation":"коллега"}
"запомни: код от домофона 1234" -> {"intent":"note","content":"Код от домофона 1234"}
"как дела?" -> {"intent":"none"}"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractedIntent {
    intent: String,
    title: Option<String>,
    date: Option<String>,
    priority: Option<String>,
    amount: Option<Value>,
    category: Option<String>,
    name: Option<String>,
    relation: Option<String>,
    workplace: Option<String>,
    strengths: Option<String>,
    weaknesses: Option<String>,
    content: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Amounts come back as numbers or as strings like "1 500 руб".
fn positive_amount(value: Option<&Value>) -> Option<f64> {
    let amount = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => find_amount(&s.to_lowercase())?.value,
        _ => return None,
    };
    (amount.is_finite() && amount > 0.0).then_some(amount)
}

pub struct IntentFallback {
    model: Arc<dyn ChatModel>,
}

impl IntentFallback {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_configured()
    }

    /// Ask the model for a structured intent. Every failure maps to `None`.
    pub async fn extract(&self, text: &NormalizedText, today: NaiveDate) -> Option<Action> {
        if !self.is_available() || text.is_empty() {
            return None;
        }

        let messages = [
            Message::system(format!(
                "{}\n\nСегодня {}.",
                EXTRACTION_PROMPT,
                today.format("%Y-%m-%d")
            )),
            Message::user(text.original.clone()),
        ];

        let reply = match self.model.chat(&messages, ChatOptions::extract()).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Intent extraction failed: {}", e);
                return None;
            }
        };

        let parsed: ExtractedIntent = match extract_json(&reply) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!("Unparseable intent reply: {}", e);
                return None;
            }
        };

        let action = to_action(parsed, text, today);
        if let Some(action) = &action {
            tracing::debug!("LLM fallback produced {}", action.kind());
        }
        action
    }
}

fn to_action(parsed: ExtractedIntent, text: &NormalizedText, today: NaiveDate) -> Option<Action> {
    let date = parsed
        .date
        .as_deref()
        .and_then(|d| parse_date_expression(d, today));

    match parsed.intent.trim().to_lowercase().as_str() {
        "task" => {
            let title = task_title(&Phrase::new(&non_empty(parsed.title)?), today);
            if title.is_empty() {
                return None;
            }
            if let Some(question) = guard_task_body(&text.lowered, &title) {
                return Some(question);
            }
            let urgent = parsed.priority.as_deref() == Some("high") || mentions_urgency(&text.lowered);
            Some(Action::CreateTask {
                title,
                deadline: Some(date.unwrap_or(today)),
                priority: if urgent { Priority::High } else { Priority::Medium },
            })
        }
        kind @ ("expense" | "income") => {
            let amount = positive_amount(parsed.amount.as_ref())?;
            Some(Action::AddTransaction {
                kind: if kind == "income" {
                    TransactionKind::Income
                } else {
                    TransactionKind::Expense
                },
                amount,
                category: non_empty(parsed.category)
                    .map(|c| capitalize_first(&c))
                    .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
                date: date.unwrap_or(today),
            })
        }
        "goal" => {
            let title = non_empty(parsed.title)?;
            let target_amount = positive_amount(parsed.amount.as_ref())?;
            Some(Action::AddGoal {
                title: capitalize_first(&title),
                target_amount,
            })
        }
        "contact" => {
            let full_name = title_case(&non_empty(parsed.name)?);
            Some(Action::CreatePerson {
                full_name,
                fields: PersonFields {
                    relation: non_empty(parsed.relation),
                    birth_date: date,
                    strengths: non_empty(parsed.strengths),
                    weaknesses: non_empty(parsed.weaknesses),
                    workplace: non_empty(parsed.workplace),
                },
            })
        }
        "note" => {
            let content = capitalize_first(&non_empty(parsed.content)?);
            let title = non_empty(parsed.title)
                .unwrap_or_else(|| truncate_chars(&content, NOTE_TITLE_CHARS));
            Some(Action::CreateKnowledge { title, content })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::interpreter::normalize::normalize;
    use crate::llm_client::testing::ScriptedModel;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 14).expect("valid date")
    }

    async fn extract_with(reply: &str, text: &str) -> Option<Action> {
        let model = Arc::new(ScriptedModel::replying(&[reply]));
        IntentFallback::new(model).extract(&normalize(text), today()).await
    }

    #[tokio::test]
    async fn task_intent_reuses_relative_dates() {
        let action = extract_with(
            r#"{"intent":"task","title":"стоматолог","date":"пятница"}"#,
            "не забудь, что в пятницу стоматолог",
        )
        .await;
        assert_eq!(
            action,
            Some(Action::CreateTask {
                title: "Стоматолог".to_string(),
                deadline: NaiveDate::from_ymd_opt(2026, 10, 16),
                priority: Priority::Medium,
            })
        );
    }

    #[tokio::test]
    async fn fenced_reply_with_string_amount() {
        let action = extract_with(
            "```json\n{\"intent\":\"expense\",\"amount\":\"1 500 руб\",\"category\":\"бензин\"}\n```",
            "ушло полторы тысячи на бензин",
        )
        .await;
        assert_eq!(
            action,
            Some(Action::AddTransaction {
                kind: TransactionKind::Expense,
                amount: 1500.0,
                category: "Бензин".to_string(),
                date: today(),
            })
        );
    }

    #[tokio::test]
    async fn invalid_payloads_become_none() {
        assert_eq!(extract_with(r#"{"intent":"expense","amount":-5}"#, "минус пять").await, None);
        assert_eq!(extract_with(r#"{"intent":"goal","title":"Дом","amount":0}"#, "дом").await, None);
        assert_eq!(extract_with(r#"{"intent":"task","title":"  "}"#, "что-то").await, None);
        assert_eq!(extract_with(r#"{"intent":"none"}"#, "как дела").await, None);
        assert_eq!(extract_with("не понимаю", "как дела").await, None);
    }

    #[tokio::test]
    async fn provider_errors_and_missing_config_are_silent() {
        let failing = Arc::new(ScriptedModel::new(vec![Err(LlmError::Provider {
            status: 500,
            body: "boom".to_string(),
        })]));
        let fallback = IntentFallback::new(failing.clone());
        assert_eq!(fallback.extract(&normalize("ушло 700 на бензин"), today()).await, None);
        assert_eq!(failing.call_count(), 1);

        let unconfigured = Arc::new(ScriptedModel::unconfigured());
        let fallback = IntentFallback::new(unconfigured.clone());
        assert_eq!(fallback.extract(&normalize("ушло 700 на бензин"), today()).await, None);
        assert_eq!(unconfigured.call_count(), 0);
    }

    #[tokio::test]
    async fn contact_names_are_title_cased() {
        match extract_with(
            r#"{"intent":"contact","name":"павел орлов","relation":"коллега"}"#,
            "у меня новый коллега павел орлов",
        )
        .await
        {
            Some(Action::CreatePerson { full_name, fields }) => {
                assert_eq!(full_name, "Павел Орлов");
                assert_eq!(fields.relation.as_deref(), Some("коллега"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
