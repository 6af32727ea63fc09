//! Shared ambient primitives for the agent runtime: ambient context (C1),
//! the function registry (C2), a tracing shim (C10), and the tokenizer
//! (C11). Every other crate in the workspace depends on this one; it
//! depends on nothing in the workspace itself.

pub mod ambient;
pub mod error;
pub mod layout;
pub mod registry;
pub mod tokenizer;
pub mod tracing_shim;

pub use ambient::{current_agent, current_user, enable_single_user_mode, run_with_agent, run_with_user, AgentRef, UserRef};
pub use error::CoreError;
pub use layout::{agent_working_dir, scm_project_dir, system_dir};
pub use registry::{AgentFunction, FunctionCallResult, FunctionRegistry, FunctionSchema, ParamSchema};
