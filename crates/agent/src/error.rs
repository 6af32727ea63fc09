//! Error variants surfaced by the agent state machine and its store (§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent context not found: {0}")]
    NotFound(String),

    #[error("cannot save child {child}: parent {parent} does not exist")]
    ParentMissing { parent: String, child: String },

    #[error("user {user} is not authorized to delete agent {agent}")]
    Unauthorized { user: String, agent: String },

    #[error("llm error: {0}")]
    Llm(#[from] agentkit_llm::LlmError),

    #[error("ambient context error: {0}")]
    Core(#[from] agentkit_core::CoreError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid llm response shape: {0}")]
    InvalidLlmResponse(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Storage(e.to_string())
    }
}
