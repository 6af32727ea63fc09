//! `LlmCall` entity (§3.3) and the `LlmCallStore` trait (C4/§6.1).

use crate::message::LlmMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One durable record of an LLM interaction. When `chunk_count == 0` the
/// call was never split and `messages` holds the full conversation. When
/// `chunk_count > 0`, `messages` on the *head* record is empty and the
/// conversation lives across `chunk_count` chunk records sharing
/// `llm_call_id` (§3.3, §4.4). Callers always go through `LlmCallStore`,
/// which hides this distinction — `LlmCall` as constructed by `get_call`
/// always carries the full `messages` sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCall {
    pub id: String,
    pub llm_call_id: String,
    pub llm_id: String,
    pub request_time: i64,
    pub time_to_first_token: Option<i64>,
    pub total_time: Option<i64>,
    pub cost: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub messages: Vec<LlmMessage>,
    pub description: Option<String>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub call_stack: Option<Vec<String>>,
    pub chunk_count: u32,
}

impl LlmCall {
    /// Constructs a new, unsaved call record with a freshly minted id.
    pub fn new(llm_id: impl Into<String>, messages: Vec<LlmMessage>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            llm_call_id: id.clone(),
            id,
            llm_id: llm_id.into(),
            request_time: now_ms(),
            time_to_first_token: None,
            total_time: None,
            cost: None,
            input_tokens: None,
            output_tokens: None,
            messages,
            description: None,
            agent_id: None,
            user_id: None,
            call_stack: None,
            chunk_count: 0,
        }
    }
}

pub fn now_ms() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp_nanos() as i64 / 1_000_000
}

/// Summary used by `getLlmCallsForAgent`/`getLlmCallsByDescription` (§4.4) —
/// these reconstruct full calls, so in practice the summary and the full
/// type are the same shape; kept as a distinct alias for call-site clarity.
pub type LlmCallSummary = LlmCall;

#[async_trait]
pub trait LlmCallStore: Send + Sync {
    /// Persists the request half of a call (before the provider has
    /// responded). Transparently chunks per §4.4.
    async fn save_request(&self, call: &LlmCall) -> Result<(), crate::error::LlmError>;

    /// Persists the response half, merging onto the head document and
    /// overwriting chunks (§4.4 step 4).
    async fn save_response(&self, call: &LlmCall) -> Result<(), crate::error::LlmError>;

    /// Reads a call back, reassembling chunks if needed (§4.4 read path).
    async fn get_call(&self, id: &str) -> Result<Option<LlmCall>, crate::error::LlmError>;

    async fn get_calls_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Vec<LlmCallSummary>, crate::error::LlmError>;

    async fn get_calls_by_description(
        &self,
        description: &str,
    ) -> Result<Vec<LlmCallSummary>, crate::error::LlmError>;

    async fn delete(&self, llm_call_id: &str) -> Result<(), crate::error::LlmError>;
}
