//! Error types shared by the interpreter, memory manager and stores.

use thiserror::Error;

/// Failures of the language-model collaborator.
///
/// `NotConfigured` is kept separate from the provider/transport variants so
/// callers can degrade to rule-only behaviour instead of apologising.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM client is not configured")]
    NotConfigured,

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("LLM provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("Failed to decode LLM response: {0}")]
    Decode(String),
}

impl LlmError {
    /// Transport-level failures are retried once; provider answers are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Timeout | LlmError::Transport(_))
    }

    /// Quota or billing rejections (HTTP 402/429).
    pub fn is_quota(&self) -> bool {
        matches!(self, LlmError::Provider { status, .. } if *status == 402 || *status == 429)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            LlmError::Timeout
        } else if error.is_decode() {
            LlmError::Decode(error.to_string())
        } else {
            LlmError::Transport(error.to_string())
        }
    }
}

/// Failures of the chat-history and agent-state stores.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Summarization failed: {0}")]
    Summarization(#[from] LlmError),

    #[error("Summarizer returned an empty summary")]
    EmptySummary,
}

/// Failures of the entity store (tasks, people, knowledge, finance).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_transient() {
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::Transport("reset by peer".to_string()).is_transient());
        assert!(!LlmError::NotConfigured.is_transient());
        assert!(!LlmError::Provider {
            status: 429,
            body: "quota".to_string()
        }
        .is_transient());
    }

    #[test]
    fn quota_statuses_are_recognized() {
        let quota = LlmError::Provider {
            status: 429,
            body: "Rate limit exceeded".to_string(),
        };
        let auth = LlmError::Provider {
            status: 401,
            body: "bad key".to_string(),
        };
        assert!(quota.is_quota());
        assert!(!auth.is_quota());
    }
}
