//! Errors surfaced by config boot, DI wiring, and scoped resource
//! acquisition (§4.11). Distinct from the crate-local errors produced by
//! the stores/providers themselves, which are wrapped here rather than
//! re-derived.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unrecognized DATABASE value: {0} (expected \"memory\" or \"sqlite\")")]
    UnknownDatabaseKind(String),

    #[error("{0} must be set when DATABASE=sqlite")]
    MissingSqlitePath(&'static str),

    #[error("failed to open sqlite store at {path}: {source}")]
    StoreOpen {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to enter working directory {path}: {source}")]
    WorkingDirScope {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid RUST_LOG filter: {0}")]
    LogFilter(String),
}
