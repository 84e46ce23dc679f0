use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::agent::DEFAULT_PERSONA;

/// Which LLM backend the interpreter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// No provider: rule-only mode.
    #[default]
    Disabled,
    OpenRouter,
    VseLlm,
    Google,
    /// Native Yandex Foundation Models API (Api-Key + folder id).
    Yandex,
    /// Any other OpenAI-compatible endpoint (Ollama, LM Studio, vLLM, OpenAI).
    OpenAiCompatible,
}

/// Purpose of a model call; each purpose can use a different model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelHint {
    Chat,
    Extract,
    Summary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTable {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub chat: Option<String>,
    #[serde(default)]
    pub extract: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub models: ModelTable,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const VSELM_BASE_URL: &str = "https://api.vsellm.ru/v1";
pub const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const YANDEX_COMPLETION_URL: &str =
    "https://llm.api.cloud.yandex.net/foundationModels/v1/completion";

fn default_llm_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Disabled,
            base_url: String::new(),
            api_key: None,
            folder_id: None,
            default_headers: BTreeMap::new(),
            models: ModelTable::default(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_configured(&self) -> bool {
        match self.provider {
            LlmProvider::Disabled => false,
            LlmProvider::Yandex => {
                has_value(self.api_key.as_deref()) && has_value(self.folder_id.as_deref())
            }
            LlmProvider::OpenAiCompatible => !self.base_url.trim().is_empty(),
            _ => has_value(self.api_key.as_deref()) && !self.base_url.trim().is_empty(),
        }
    }

    /// Resolve the model for a purpose: purpose override, then the shared
    /// default, then the provider's stock model.
    pub fn model_for(&self, hint: ModelHint) -> String {
        let specific = match hint {
            ModelHint::Chat => self.models.chat.as_deref(),
            ModelHint::Extract => self.models.extract.as_deref(),
            ModelHint::Summary => self.models.summary.as_deref(),
        };
        if let Some(model) = specific.filter(|m| !m.trim().is_empty()) {
            return model.to_string();
        }
        if let Some(model) = self.models.default.as_deref().filter(|m| !m.trim().is_empty()) {
            return model.to_string();
        }
        match self.provider {
            LlmProvider::OpenRouter => "google/gemma-3-4b-it:free",
            LlmProvider::VseLlm => "gpt-3.5-turbo",
            LlmProvider::Google => "gemini-pro",
            LlmProvider::Yandex => "yandexgpt-lite/latest",
            LlmProvider::OpenAiCompatible | LlmProvider::Disabled => "gpt-3.5-turbo",
        }
        .to_string()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Provider selection in priority order: OpenRouter, VseLLM, Google,
    /// Yandex, then a generic OpenAI-compatible `LLM_API_URL`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Self::default();

        if let Some(key) = get("OPENROUTER_API_KEY") {
            config.provider = LlmProvider::OpenRouter;
            config.base_url = OPENROUTER_BASE_URL.to_string();
            config.api_key = Some(key);
            config.default_headers.insert(
                "HTTP-Referer".to_string(),
                get("OPENROUTER_REFERER").unwrap_or_else(|| "https://tghub.duckdns.org".to_string()),
            );
            config.default_headers.insert(
                "X-Title".to_string(),
                get("OPENROUTER_TITLE").unwrap_or_else(|| "YouHub".to_string()),
            );
        } else if let Some(key) = get("VSELM_API_KEY") {
            config.provider = LlmProvider::VseLlm;
            config.base_url = get("VSELM_BASE_URL").unwrap_or_else(|| VSELM_BASE_URL.to_string());
            config.api_key = Some(key);
        } else if let Some(key) = get("GOOGLE_API_KEY") {
            config.provider = LlmProvider::Google;
            config.base_url = GOOGLE_BASE_URL.to_string();
            config.api_key = Some(key);
        } else if let (Some(key), Some(folder)) = (get("YANDEX_API_KEY"), get("YANDEX_FOLDER_ID")) {
            config.provider = LlmProvider::Yandex;
            config.base_url = YANDEX_COMPLETION_URL.to_string();
            config.api_key = Some(key);
            config.folder_id = Some(folder);
        } else if let Some(url) = get("LLM_API_URL") {
            config.provider = LlmProvider::OpenAiCompatible;
            config.base_url = url;
            config.api_key = get("LLM_API_KEY");
        }

        config.models = ModelTable {
            default: get("AI_MODEL"),
            chat: get("AI_MODEL_CHAT"),
            extract: get("AI_MODEL_EXTRACT"),
            summary: get("AI_MODEL_SUMMARY"),
        };

        if let Some(timeout) = get("AI_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.timeout_secs = timeout;
        }

        config
    }
}

fn has_value(value: Option<&str>) -> bool {
    value.map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// Bounds of the per-user conversational memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimits {
    /// Hard cap on stored turns per user, applied after every append. 0 disables the cap.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Number of most recent turns sent to the LLM as context.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Stored-turn count at which the oldest chunk is compacted.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: usize,
    /// Number of oldest turns folded into one summary turn.
    #[serde(default = "default_summary_chunk")]
    pub summary_chunk: usize,
}

fn default_history_limit() -> usize {
    240
}

fn default_context_window() -> usize {
    24
}

fn default_summary_threshold() -> usize {
    200
}

fn default_summary_chunk() -> usize {
    40
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            context_window: default_context_window(),
            summary_threshold: default_summary_threshold(),
            summary_chunk: default_summary_chunk(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_persona")]
    pub default_persona: String,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryLimits,
}

fn default_database_path() -> String {
    "data/hub.db".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_persona() -> String {
    DEFAULT_PERSONA.to_string()
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_addr: default_bind_addr(),
            default_persona: default_persona(),
            llm: LlmConfig::default(),
            memory: MemoryLimits::default(),
        }
    }
}

impl HubConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("hub_config.toml")
    }

    /// Load hub_config.toml (next to the executable), falling back to defaults + env vars.
    ///
    /// A file without a usable LLM section still picks the provider up from the environment,
    /// so API keys can stay out of the file.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<HubConfig>(&contents) {
                Ok(mut config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    if !config.llm.is_configured() {
                        config.llm = LlmConfig::from_env();
                    }
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            llm: LlmConfig::from_lookup(&lookup),
            ..Self::default()
        };

        if let Some(path) = lookup("HUB_DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = path;
        }

        if let Some(bind) = lookup("HUB_BACKEND_BIND").filter(|b| !b.trim().is_empty()) {
            config.bind_addr = bind;
        }

        if let Some(persona) = lookup("HUB_DEFAULT_PERSONA").filter(|p| !p.trim().is_empty()) {
            config.default_persona = persona;
        }

        if let Some(limit) = parse_usize(&lookup, "HUB_HISTORY_LIMIT") {
            config.memory.history_limit = limit;
        }

        if let Some(window) = parse_usize(&lookup, "HUB_CONTEXT_WINDOW") {
            config.memory.context_window = window;
        }

        if let Some(threshold) = parse_usize(&lookup, "HUB_SUMMARY_THRESHOLD") {
            config.memory.summary_threshold = threshold;
        }

        if let Some(chunk) = parse_usize(&lookup, "HUB_SUMMARY_CHUNK") {
            config.memory.summary_chunk = chunk;
        }

        config
    }
}

fn parse_usize<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
