//! Error variants for the review fingerprint cache and review engine (§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("source control error: {0}")]
    SourceControl(String),

    #[error("llm error: {0}")]
    Llm(#[from] agentkit_llm::LlmError),

    #[error("unparseable diff hunk header: {0}")]
    UnparseableHunkHeader(String),
}

impl From<rusqlite::Error> for ReviewError {
    fn from(e: rusqlite::Error) -> Self {
        ReviewError::Storage(e.to_string())
    }
}
