use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::HubConfig;
use crate::database::HubDatabase;
use crate::interpreter::Interpreter;
use crate::llm_client::LlmClient;

/// Everything a service surface needs: the config it was built from, the
/// shared database and the interpreter on top of it.
pub struct HubRuntime {
    pub config: HubConfig,
    pub database: Arc<HubDatabase>,
    pub interpreter: Arc<Interpreter>,
}

impl HubRuntime {
    pub fn bootstrap(config: HubConfig) -> Result<Self> {
        let database = Arc::new(
            HubDatabase::new(&config.database_path)
                .with_context(|| format!("Failed to open hub database {}", config.database_path))?,
        );

        let llm = LlmClient::new(config.llm.clone()).context("Failed to build LLM client")?;
        if config.llm.is_configured() {
            tracing::info!("LLM provider: {:?}", config.llm.provider);
        } else {
            tracing::warn!("No LLM provider configured; running on deterministic rules only");
        }

        let interpreter = Interpreter::new(
            database.clone(),
            database.clone(),
            database.clone(),
            Arc::new(llm),
            config.memory,
            &config.default_persona,
        );

        tracing::info!(
            "Memory limits: cap {}, window {}, summary at {} (chunk {})",
            config.memory.history_limit,
            config.memory.context_window,
            config.memory.summary_threshold,
            config.memory.summary_chunk
        );

        Ok(Self {
            config,
            database,
            interpreter: Arc::new(interpreter),
        })
    }

    /// Start the Telegram adapter when a bot token is present.
    pub fn spawn_telegram_bot(&self) {
        crate::telegram::spawn_telegram_bot(self.interpreter.clone());
    }
}
