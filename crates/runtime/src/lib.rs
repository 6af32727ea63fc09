//! Boundary glue (C12): config boot, DI selection, scoped resource
//! acquisition, and the logging bootstrap that ties the ambient stack
//! (`agentkit-core`) and the domain crates (`agentkit-llm`,
//! `agentkit-agent`, `agentkit-review`) into one running process.
//!
//! Real vendor LLM backends are out of scope here (see SPEC_FULL.md §1):
//! this crate wires storage and source-control adapters, and leaves
//! `Vec<Box<dyn LlmProvider>>` construction to the embedder, matching the
//! `LlmProvider` trait boundary defined in `agentkit-llm`.

pub mod config;
pub mod di;
pub mod error;
pub mod fs_scope;
pub mod logging;

pub use config::{AuthMode, DatabaseKind, ProviderKeys, RuntimeConfig};
pub use di::{build_repositories, build_source_control, Repositories};
pub use error::RuntimeError;
pub use fs_scope::WorkingDirScope;
pub use logging::init_logging;
