//! The Runner's state machine (§4.2): the `AgentState` tag stored on every
//! `AgentContext`, plus the `RunOutcome` the driving loop returns to its
//! caller at each gate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Agent,
    Functions,
    Workflow,
    ChildAgents,
    HitlTool,
    HitlFeedback,
    HitlThreshold,
    Hil,
    Error,
    Completed,
    Shutdown,
    Timeout,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Completed | AgentState::Shutdown | AgentState::Timeout)
    }

    pub fn is_hitl_gate(self) -> bool {
        matches!(
            self,
            AgentState::HitlTool | AgentState::HitlFeedback | AgentState::HitlThreshold | AgentState::Hil
        )
    }
}

/// What the driving loop found when it stopped advancing an agent
/// (SPEC_FULL §4.2 "Driving loop" supplement).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Reached a terminal state (`completed`, `shutdown`, `timeout`).
    Terminal(AgentState),
    /// Stopped at a human-in-the-loop gate awaiting acknowledgement.
    AwaitingHil(AgentState),
    /// Stopped waiting on children or an external event.
    Waiting,
    /// Ran out of iterations this call without reaching a gate; caller may
    /// call `run_to_next_gate` again to keep driving.
    Yielded,
}
