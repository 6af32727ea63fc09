//! `AgentStateStore` (C6, §4.3): persistence and querying of agent contexts,
//! with parent/child linkage. An in-memory adapter for tests and ephemeral
//! runs, a SQLite-backed one standing in for the spec's document-store
//! adapter (see DESIGN.md).

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryAgentStateStore;
pub use sqlite::SqliteAgentStateStore;

use crate::context::{AgentContext, AgentSummary};
use crate::error::AgentError;
use crate::state::AgentState;
use agentkit_core::FunctionRegistry;
use async_trait::async_trait;

#[async_trait]
pub trait AgentStateStore: Send + Sync {
    /// Saves `ctx`. If `ctx.parent_agent_id` is set, this is a transactional
    /// two-write: the parent is read first (failing with `ParentMissing` if
    /// absent), `ctx.agent_id` is added to the parent's `child_agents`, and
    /// both records are written together.
    async fn save(&self, ctx: &AgentContext) -> Result<(), AgentError>;

    /// Partial write of `state` and `last_update` only.
    async fn update_state(&self, ctx: &mut AgentContext, new_state: AgentState) -> Result<(), AgentError>;

    async fn load(&self, agent_id: &str) -> Result<Option<AgentContext>, AgentError>;

    /// Summary projection for `user_id`, ordered by `last_update` descending.
    async fn list(&self, user_id: &str) -> Result<Vec<AgentSummary>, AgentError>;

    /// Same projection restricted to non-terminal states, ordered by
    /// `(state asc, last_update desc)` per §5.
    async fn list_running(&self, user_id: &str) -> Result<Vec<AgentSummary>, AgentError>;

    /// Deletes `ids` owned by `user_id`, non-executing, with no parent;
    /// cascades to each deleted context's children.
    async fn delete(&self, user_id: &str, ids: &[String]) -> Result<(), AgentError>;

    /// Replaces the agent's capability set, skipping names the registry
    /// doesn't recognize (logged as a warning, not an error).
    async fn update_functions(
        &self,
        agent_id: &str,
        names: &[String],
        registry: &FunctionRegistry,
    ) -> Result<(), AgentError>;
}
