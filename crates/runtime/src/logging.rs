//! Logging/tracing bootstrap (§4.9, §4.12): installs a `tracing_subscriber`
//! `fmt` layer with an `EnvFilter` read from `RUST_LOG`, so every
//! `with_span`/`log::info!` call site across the workspace has somewhere
//! to go once a binary (or a test harness) opts in.

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. Safe to call at most once per
/// process; a second call is a logic error in the caller, not something
/// this function guards against, matching the teacher's own
/// `setup_logging` (a one-shot boot step, not a runtime toggle).
pub fn init_logging(config: &RuntimeConfig) -> Result<(), RuntimeError> {
    let directives = config.rust_log.clone().unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_new(&directives).map_err(|e| RuntimeError::LogFilter(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| RuntimeError::LogFilter(e.to_string()))?;

    Ok(())
}
