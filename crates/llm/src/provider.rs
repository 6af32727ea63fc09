//! LLM abstraction (C3) and external provider contract (§6.3).

use crate::error::LlmError;
use crate::message::{LlmMessage, MessageRole};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub id: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop_sequences: Vec<String>,
    pub max_retries: Option<u32>,
    pub max_tokens: Option<u32>,
    pub thinking: Option<ThinkingLevel>,
}

impl GenerateOptions {
    /// `topK` is clamped to <= 40 per §6.3.
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k.min(40));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Option<f64>,
    pub time_to_first_token_ms: Option<i64>,
    pub total_time_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub message: LlmMessage,
    pub usage: Usage,
}

/// Uniform request surface across providers (§6.3).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn get_id(&self) -> &str;

    fn is_configured(&self) -> bool;

    fn get_max_input_tokens(&self) -> u64;

    async fn generate(
        &self,
        messages: &[LlmMessage],
        opts: &GenerateOptions,
    ) -> Result<GenerateResult, LlmError>;
}

/// Convenience used by callers that just want a single assistant reply to a
/// one-shot prompt, going through the same `generate` contract.
pub async fn generate_once(
    provider: &dyn LlmProvider,
    system: Option<&str>,
    prompt: &str,
    opts: &GenerateOptions,
) -> Result<GenerateResult, LlmError> {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(LlmMessage::text(MessageRole::System, system));
    }
    messages.push(LlmMessage::user(prompt));
    provider.generate(&messages, opts).await
}
