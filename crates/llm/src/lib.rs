//! LLM abstraction, durable chunked call store, and provider-fallback
//! composite LLM (C3, C4, C5).

pub mod call;
pub mod chunking;
pub mod error;
pub mod fallback;
pub mod message;
pub mod provider;
pub mod store;

pub use call::{LlmCall, LlmCallStore, LlmCallSummary};
pub use error::LlmError;
pub use fallback::CompositeLlm;
pub use message::{CacheMarker, LlmMessage, MessageContent, MessagePart, MessageRole, MessageStats};
pub use provider::{generate_once, GenerateOptions, GenerateResult, LlmProvider, ThinkingLevel, Usage};
pub use store::{InMemoryLlmCallStore, SqliteLlmCallStore};
