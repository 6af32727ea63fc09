//! Tracing shim (C10): a thin, uniformly-named wrapper around `tracing`
//! spans, so call sites across the crate read `with_span("agent.iterate", ..)`
//! instead of a mix of ad-hoc `#[instrument]` attributes and bare calls.
//!
//! `tracing`'s span machinery is already a no-op when no subscriber is
//! installed, so this shim adds no overhead of its own — it exists purely to
//! give every suspension point in §5 (store I/O, LLM calls, tool calls, HIL
//! gates) a single, searchable call-site convention.

use std::future::Future;
use tracing::Instrument;

/// Runs `fut` inside a span named `name`. Safe to call unconditionally: when
/// no subscriber is installed this degrades to a plain `await` of `fut`.
pub async fn with_span<F>(name: &'static str, fut: F) -> F::Output
where
    F: Future,
{
    let span = tracing::info_span!("agentkit", op = name);
    fut.instrument(span).await
}

/// Variant that also records a single key/value field, for the common case
/// of tagging a span with e.g. the session/agent id it operates on.
pub async fn with_span_field<F>(name: &'static str, field: &str, value: &str, fut: F) -> F::Output
where
    F: Future,
{
    let span = tracing::info_span!("agentkit", op = name, field = field, value = value);
    fut.instrument(span).await
}
