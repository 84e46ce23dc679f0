pub mod agent;
pub mod config;
pub mod database;
pub mod error;
pub mod interpreter;
pub mod llm_client;
pub mod memory;
pub mod runtime;
pub mod server;
pub mod store;
pub mod telegram;
