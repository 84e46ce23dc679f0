use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{LlmConfig, LlmProvider};
use crate::error::LlmError;

pub use crate::config::ModelHint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub hint: ModelHint,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatOptions {
    pub fn chat() -> Self {
        Self {
            hint: ModelHint::Chat,
            max_tokens: 400,
            temperature: 0.4,
        }
    }

    pub fn extract() -> Self {
        Self {
            hint: ModelHint::Extract,
            max_tokens: 200,
            temperature: 0.0,
        }
    }

    pub fn summary(max_tokens: u32) -> Self {
        Self {
            hint: ModelHint::Summary,
            max_tokens,
            temperature: 0.2,
        }
    }
}

/// The language-model seam. The interpreter, memory manager and agent core
/// only see this trait, so tests can script replies.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn chat(&self, messages: &[Message], options: ChatOptions) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: String,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct YandexRequest {
    model_uri: String,
    completion_options: YandexCompletionOptions,
    messages: Vec<YandexMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct YandexCompletionOptions {
    stream: bool,
    temperature: f32,
    max_tokens: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct YandexMessage {
    role: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct YandexResponse {
    result: YandexResult,
}

#[derive(Debug, Deserialize)]
struct YandexResult {
    #[serde(default)]
    alternatives: Vec<YandexAlternative>,
}

#[derive(Debug, Deserialize)]
struct YandexAlternative {
    message: YandexMessage,
}

const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self { config, client })
    }

    async fn send_once(&self, messages: &[Message], options: ChatOptions) -> Result<String, LlmError> {
        match self.config.provider {
            LlmProvider::Disabled => Err(LlmError::NotConfigured),
            LlmProvider::Yandex => self.send_yandex(messages, options).await,
            _ => self.send_openai(messages, options).await,
        }
    }

    async fn send_openai(&self, messages: &[Message], options: ChatOptions) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let request = ChatCompletionRequest {
            model: self.config.model_for(options.hint),
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let mut req = self.client.post(&url).json(&request);

        // Local OpenAI-compatible servers usually run without a key
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        for (name, value) in &self.config.default_headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            return Err(LlmError::Provider { status, body });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    async fn send_yandex(&self, messages: &[Message], options: ChatOptions) -> Result<String, LlmError> {
        let api_key = self.config.api_key.as_deref().ok_or(LlmError::NotConfigured)?;
        let folder_id = self.config.folder_id.as_deref().ok_or(LlmError::NotConfigured)?;

        let request = YandexRequest {
            model_uri: format!("gpt://{}/{}", folder_id, self.config.model_for(options.hint)),
            completion_options: YandexCompletionOptions {
                stream: false,
                temperature: options.temperature,
                max_tokens: options.max_tokens.to_string(),
            },
            messages: messages.iter().map(yandex_message).collect(),
        };

        let response = self
            .client
            .post(&self.config.base_url)
            .header("Authorization", format!("Api-Key {}", api_key))
            .header("x-folder-id", folder_id)
            .header("x-data-logging-enabled", "false")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            return Err(LlmError::Provider { status, body });
        }

        let completion: YandexResponse = response.json().await?;
        completion
            .result
            .alternatives
            .into_iter()
            .next()
            .map(|alt| alt.message.text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Yandex knows only system/user/assistant roles.
fn yandex_message(message: &Message) -> YandexMessage {
    let role = match message.role.as_str() {
        "system" | "user" | "assistant" => message.role.clone(),
        _ => "assistant".to_string(),
    };
    YandexMessage {
        role,
        text: message.content.clone(),
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn chat(&self, messages: &[Message], options: ChatOptions) -> Result<String, LlmError> {
        if !self.is_configured() {
            return Err(LlmError::NotConfigured);
        }

        match self.send_once(messages, options).await {
            Err(err) if err.is_transient() => {
                tracing::warn!("LLM request failed ({}), retrying once", err);
                tokio::time::sleep(RETRY_DELAY).await;
                self.send_once(messages, options).await
            }
            other => other,
        }
    }
}

/// Parse a JSON object out of a model reply that may carry `<think>` blocks,
/// markdown fences or chatter around the object.
pub fn extract_json<T>(response: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    if let Ok(parsed) = serde_json::from_str::<T>(response.trim()) {
        return Ok(parsed);
    }

    let cleaned = if let Some(think_end) = response.rfind("</think>") {
        &response[think_end + 8..]
    } else {
        response
    };

    if let Ok(parsed) = serde_json::from_str::<T>(cleaned.trim()) {
        return Ok(parsed);
    }

    let fenced = cleaned
        .find("```json")
        .map(|start| start + 7)
        .or_else(|| cleaned.find("```").map(|start| start + 3));

    let json_content = if let Some(start) = fenced {
        let after_start = &cleaned[start..];
        match after_start.find("```") {
            Some(end) => after_start[..end].trim(),
            None => after_start.trim(),
        }
    } else if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            &cleaned[start..=end]
        } else {
            cleaned
        }
    } else {
        cleaned
    };

    serde_json::from_str::<T>(json_content.trim()).with_context(|| {
        format!(
            "Failed to parse JSON. Extracted: {} | Original: {}",
            json_content,
            response.chars().take(500).collect::<String>()
        )
    })
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted model double: pops queued replies and records every call.
    pub struct ScriptedModel {
        configured: bool,
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: Mutex<Vec<(Vec<Message>, ChatOptions)>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                configured: true,
                replies: Mutex::new(replies.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn unconfigured() -> Self {
            Self {
                configured: false,
                replies: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(texts: &[&str]) -> Self {
            Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
        }

        pub fn calls(&self) -> Vec<(Vec<Message>, ChatOptions)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn chat(&self, messages: &[Message], options: ChatOptions) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push((messages.to_vec(), options));
            if !self.configured {
                return Err(LlmError::NotConfigured);
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }
    }

    /// Model double that parks every call until permits are released.
    /// Tracks how many calls are parked at once.
    pub struct GatedModel {
        reply: String,
        gate: tokio::sync::Semaphore,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GatedModel {
        pub fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                gate: tokio::sync::Semaphore::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        pub fn open(&self, calls: usize) {
            self.gate.add_permits(calls);
        }

        pub fn active(&self) -> usize {
            self.active.load(Ordering::SeqCst)
        }

        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatModel for GatedModel {
        fn is_configured(&self) -> bool {
            true
        }

        async fn chat(&self, _messages: &[Message], _options: ChatOptions) -> Result<String, LlmError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let permit = self.gate.acquire().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            match permit {
                Ok(permit) => {
                    permit.forget();
                    Ok(self.reply.clone())
                }
                Err(_) => Err(LlmError::EmptyResponse),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Probe {
        action: String,
    }

    #[test]
    fn extract_json_handles_plain_object() {
        let probe: Probe = extract_json(r#"{"action": "create_task"}"#).expect("plain json");
        assert_eq!(probe.action, "create_task");
    }

    #[test]
    fn extract_json_strips_think_block_and_fence() {
        let raw = "<think>\nhmm, задача?\n</think>\n```json\n{\"action\": \"none\"}\n```";
        let probe: Probe = extract_json(raw).expect("fenced json");
        assert_eq!(probe.action, "none");
    }

    #[test]
    fn extract_json_finds_object_inside_chatter() {
        let raw = "Вот результат: {\"action\": \"add_goal\"} — готово";
        let probe: Probe = extract_json(raw).expect("embedded json");
        assert_eq!(probe.action, "add_goal");
    }

    #[test]
    fn extract_json_rejects_prose() {
        assert!(extract_json::<Probe>("Не знаю, что ответить").is_err());
    }

    #[test]
    fn yandex_maps_unknown_roles_to_assistant() {
        let tool = Message {
            role: "tool".to_string(),
            content: "result".to_string(),
        };
        assert_eq!(yandex_message(&tool).role, "assistant");
        assert_eq!(yandex_message(&Message::user("hi")).role, "user");
    }

    #[tokio::test]
    async fn disabled_client_reports_not_configured() {
        let client = LlmClient::new(LlmConfig::default()).expect("client");
        assert!(!client.is_configured());
        let err = client
            .chat(&[Message::user("привет")], ChatOptions::chat())
            .await
            .expect_err("disabled provider");
        assert!(matches!(err, LlmError::NotConfigured));
    }

    #[tokio::test]
    async fn scripted_model_records_calls() {
        let model = testing::ScriptedModel::replying(&["ок"]);
        let reply = model
            .chat(&[Message::user("привет")], ChatOptions::summary(80))
            .await
            .expect("scripted reply");
        assert_eq!(reply, "ок");
        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.hint, ModelHint::Summary);
    }
}
