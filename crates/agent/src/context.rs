//! `AgentContext` (§3.1): the durable entity the Runner advances.

use crate::state::AgentState;
use agentkit_core::FunctionCallResult;
use agentkit_llm::LlmMessage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Codegen,
    Workflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: String,
    pub execution_id: String,
    pub parent_agent_id: Option<String>,
    pub child_agents: BTreeSet<String>,
    pub user_id: String,
    pub agent_type: AgentType,
    pub state: AgentState,
    pub name: String,
    pub user_prompt: String,
    pub input_prompt: String,
    pub messages: Vec<LlmMessage>,
    pub function_call_history: Vec<FunctionCallResult>,
    pub call_stack: Vec<String>,
    pub memory: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
    pub functions: BTreeSet<String>,
    pub pending_messages: Vec<String>,
    pub hil_budget: f64,
    pub hil_count: u32,
    pub cost: f64,
    pub cost_since_last_gate: f64,
    pub iterations: u32,
    pub last_update: i64,
    pub completed_handler: Option<String>,
    pub file_system: Option<String>,
    pub live_files: BTreeSet<String>,
    pub error: Option<String>,
    /// The state a HIL gate (`hil`/`hitl_threshold`/`hitl_tool`) should
    /// resume to once acknowledged. Not part of the distilled data model
    /// (§3.1 doesn't name it); bookkeeping the Runner needs since a gate can
    /// be entered from more than one prior state (§4.2).
    #[serde(default)]
    pub pre_gate_state: Option<AgentState>,
}

impl AgentContext {
    pub fn new(
        user_id: impl Into<String>,
        agent_type: AgentType,
        name: impl Into<String>,
        user_prompt: impl Into<String>,
        input_prompt: impl Into<String>,
    ) -> Self {
        let now = agentkit_llm::call::now_ms();
        Self {
            agent_id: uuid::Uuid::new_v4().to_string(),
            execution_id: uuid::Uuid::new_v4().to_string(),
            parent_agent_id: None,
            child_agents: BTreeSet::new(),
            user_id: user_id.into(),
            agent_type,
            state: AgentState::Agent,
            name: name.into(),
            user_prompt: user_prompt.into(),
            input_prompt: input_prompt.into(),
            messages: Vec::new(),
            function_call_history: Vec::new(),
            call_stack: Vec::new(),
            memory: HashMap::new(),
            metadata: HashMap::new(),
            functions: BTreeSet::new(),
            pending_messages: Vec::new(),
            hil_budget: 0.0,
            hil_count: 0,
            cost: 0.0,
            cost_since_last_gate: 0.0,
            iterations: 0,
            last_update: now,
            completed_handler: None,
            file_system: None,
            live_files: BTreeSet::new(),
            error: None,
            pre_gate_state: None,
        }
    }

    /// True for every state except the three terminal sinks (§4.2).
    pub fn is_executing(&self) -> bool {
        !matches!(
            self.state,
            AgentState::Completed | AgentState::Shutdown | AgentState::Timeout
        )
    }

    /// `hilBudget − costSinceLastGate`, the derived field from §3.1.
    pub fn budget_remaining(&self) -> f64 {
        self.hil_budget - self.cost_since_last_gate
    }

    pub fn regenerate_execution_id(&mut self) {
        self.execution_id = uuid::Uuid::new_v4().to_string();
    }

    /// Summary projection used by `list`/`listRunning` (§4.3).
    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            agent_id: self.agent_id.clone(),
            name: self.name.clone(),
            state: self.state,
            cost: self.cost,
            error: self.error.clone(),
            last_update: self.last_update,
            user_prompt: self.user_prompt.clone(),
            input_prompt: self.input_prompt.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub name: String,
    pub state: AgentState,
    pub cost: f64,
    pub error: Option<String>,
    pub last_update: i64,
    pub user_prompt: String,
    pub input_prompt: String,
    pub user_id: String,
}
