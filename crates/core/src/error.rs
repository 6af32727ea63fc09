//! Error variants shared by every component in the runtime (§7 of the design).
//!
//! Crate-specific errors (session storage, LLM transport, review parsing) get
//! their own `thiserror` enums closer to where they're produced; this one only
//! carries the handful of conditions that cut across component boundaries.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// `currentUser()`/`currentAgent()` called with no ambient binding and not
    /// in single-user mode.
    #[error("no ambient binding is active and single-user mode is disabled")]
    NotBound,

    /// A function-class name has no entry in the registry.
    #[error("unknown function class: {0}")]
    UnknownFunctionClass(String),
}
