use super::AgentStateStore;
use crate::context::{AgentContext, AgentSummary};
use crate::error::AgentError;
use crate::state::AgentState;
use agentkit_core::FunctionRegistry;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryAgentStateStore {
    contexts: Mutex<HashMap<String, AgentContext>>,
}

impl InMemoryAgentStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStateStore for InMemoryAgentStateStore {
    async fn save(&self, ctx: &AgentContext) -> Result<(), AgentError> {
        let mut guard = self.contexts.lock().await;

        if let Some(parent_id) = &ctx.parent_agent_id {
            let parent = guard
                .get_mut(parent_id)
                .ok_or_else(|| AgentError::ParentMissing {
                    parent: parent_id.clone(),
                    child: ctx.agent_id.clone(),
                })?;
            parent.child_agents.insert(ctx.agent_id.clone());
        }

        guard.insert(ctx.agent_id.clone(), ctx.clone());
        Ok(())
    }

    async fn update_state(&self, ctx: &mut AgentContext, new_state: AgentState) -> Result<(), AgentError> {
        let mut guard = self.contexts.lock().await;
        let stored = guard
            .get_mut(&ctx.agent_id)
            .ok_or_else(|| AgentError::NotFound(ctx.agent_id.clone()))?;
        stored.state = new_state;
        stored.last_update = agentkit_llm::call::now_ms();
        ctx.state = new_state;
        ctx.last_update = stored.last_update;
        Ok(())
    }

    async fn load(&self, agent_id: &str) -> Result<Option<AgentContext>, AgentError> {
        Ok(self.contexts.lock().await.get(agent_id).cloned())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<AgentSummary>, AgentError> {
        let guard = self.contexts.lock().await;
        let mut summaries: Vec<AgentSummary> = guard
            .values()
            .filter(|ctx| ctx.user_id == user_id)
            .map(AgentContext::summary)
            .collect();
        summaries.sort_by(|a, b| b.last_update.cmp(&a.last_update));
        Ok(summaries)
    }

    async fn list_running(&self, user_id: &str) -> Result<Vec<AgentSummary>, AgentError> {
        let guard = self.contexts.lock().await;
        let mut running: Vec<(AgentState, AgentSummary)> = guard
            .values()
            .filter(|ctx| ctx.user_id == user_id && ctx.is_executing())
            .map(|ctx| (ctx.state, ctx.summary()))
            .collect();
        running.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.last_update.cmp(&a.1.last_update)));
        Ok(running.into_iter().map(|(_, s)| s).collect())
    }

    async fn delete(&self, user_id: &str, ids: &[String]) -> Result<(), AgentError> {
        let mut guard = self.contexts.lock().await;

        let mut to_delete = Vec::new();
        for id in ids {
            let Some(ctx) = guard.get(id) else { continue };
            if ctx.user_id != user_id {
                return Err(AgentError::Unauthorized {
                    user: user_id.to_string(),
                    agent: id.clone(),
                });
            }
            if ctx.is_executing() || ctx.parent_agent_id.is_some() {
                continue;
            }
            to_delete.push(id.clone());
            to_delete.extend(ctx.child_agents.iter().cloned());
        }

        for id in to_delete {
            guard.remove(&id);
        }
        Ok(())
    }

    async fn update_functions(
        &self,
        agent_id: &str,
        names: &[String],
        registry: &FunctionRegistry,
    ) -> Result<(), AgentError> {
        let resolved = registry.resolve(names);
        let mut guard = self.contexts.lock().await;
        let ctx = guard
            .get_mut(agent_id)
            .ok_or_else(|| AgentError::NotFound(agent_id.to_string()))?;
        ctx.functions = resolved.into_iter().map(|(name, _)| name).collect();
        Ok(())
    }
}
