//! Agent state machine (C7), durable `AgentContext` (C6), and the iteration
//! driver loop (§4.2). Depends on `agentkit-core` for ambient context, the
//! function registry, and the tokenizer, and on `agentkit-llm` for the LLM
//! abstraction and durable call store.

pub mod context;
pub mod error;
pub mod runner;
pub mod state;
pub mod store;

pub use context::{AgentContext, AgentSummary, AgentType};
pub use error::AgentError;
pub use runner::{AgentRunner, CompletedHandler, CompletedHandlerRegistry, RetryPolicy, RunnerDeps};
pub use state::{AgentState, RunOutcome};
pub use store::{AgentStateStore, InMemoryAgentStateStore, SqliteAgentStateStore};
