//! Error variants for the LLM abstraction, call store, and composite LLM
//! (§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("transient error, retryable: {0}")]
    Retryable(String),

    #[error("max tokens exceeded, response truncated")]
    MaxTokensExceeded { partial_text: String },

    #[error("all configured providers failed")]
    AllProvidersFailed(Vec<String>),

    #[error("a single message ({size} bytes) exceeds the chunk envelope ({limit} bytes)")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("llm call not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Retryable(_))
    }
}

impl From<rusqlite::Error> for LlmError {
    fn from(e: rusqlite::Error) -> Self {
        LlmError::Storage(e.to_string())
    }
}
