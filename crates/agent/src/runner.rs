//! The Agent Runner (C7, §4.2): the state machine that drives an
//! `AgentContext` through its iteration loop — plan, call functions,
//! checkpoint — applying HIL gates before each planning call and
//! transitioning to terminal states on completion, shutdown, or timeout.

use crate::context::AgentContext;
use crate::error::AgentError;
use crate::state::{AgentState, RunOutcome};
use crate::store::AgentStateStore;
use agentkit_core::ambient::{run_with_agent, AgentRef, UserRef};
use agentkit_core::registry::{FunctionCallResult, FunctionRegistry};
use agentkit_core::tracing_shim::with_span;
use agentkit_llm::{GenerateOptions, LlmCall, LlmCallStore, LlmMessage, LlmProvider};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// A terminal-notification sink, resolved by the handler-id carried on
/// `AgentContext::completed_handler` (§3.1). The CLI/HTTP boundary glue
/// registers concrete handlers (e.g. "log to stdout", "post to Slack").
#[async_trait]
pub trait CompletedHandler: Send + Sync {
    async fn notify(&self, ctx: &AgentContext, note: &str);
}

/// Process-wide mapping from handler-id to a registered `CompletedHandler`,
/// mirroring `FunctionRegistry`'s shape (§4.8) — missing ids are logged and
/// skipped rather than failing the iteration that triggered them.
#[derive(Clone, Default)]
pub struct CompletedHandlerRegistry {
    inner: Arc<std::sync::RwLock<HashMap<String, Arc<dyn CompletedHandler>>>>,
}

impl CompletedHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<String>, handler: Arc<dyn CompletedHandler>) {
        self.inner.write().unwrap().insert(id.into(), handler);
    }

    async fn notify(&self, id: &str, ctx: &AgentContext, note: &str) {
        let handler = self.inner.read().unwrap().get(id).cloned();
        match handler {
            Some(h) => h.notify(ctx, note).await,
            None => log::warn!("completed handler '{id}' not registered, skipping notification"),
        }
    }
}

/// Bounded exponential backoff for transient LLM errors (§4.2 "Failure
/// semantics"). Mirrors the teacher's rate-limit retry shape: a capped
/// attempt count, a base wait that doubles each attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Shared dependencies the Runner consults on every iteration: the state
/// store for checkpointing, the LLM call store for durable request/response
/// records, a planning LLM, and the function registry to resolve call
/// intents against.
pub struct RunnerDeps {
    pub store: Arc<dyn AgentStateStore>,
    pub llm_calls: Arc<dyn LlmCallStore>,
    pub llm: Arc<dyn LlmProvider>,
    pub functions: FunctionRegistry,
    pub completed_handlers: CompletedHandlerRegistry,
}

/// One function-call intent emitted by the planning LLM.
#[derive(Debug, Clone, Deserialize)]
struct FunctionCallIntent {
    name: String,
    #[serde(default)]
    args: Vec<serde_json::Value>,
}

/// One sub-agent spawn request emitted by the planning LLM (§4.2 "agent →
/// child_agents when spawning sub-agents").
#[derive(Debug, Clone, Deserialize)]
struct ChildAgentSpec {
    name: String,
    user_prompt: String,
    #[serde(default)]
    input_prompt: String,
}

/// The planning LLM's structured action for one iteration. Parsed
/// defensively (§4.2, mirroring the review engine's §4.6 step 7
/// "invalid shape → skip, don't fail the run"): an assistant message that
/// doesn't parse as this shape is treated as "no functions, no terminal
/// action" rather than aborting the iteration.
#[derive(Debug, Clone, Default, Deserialize)]
struct PlanningAction {
    #[serde(default)]
    functions: Vec<FunctionCallIntent>,
    #[serde(default)]
    completed: Option<String>,
    #[serde(default)]
    request_feedback: Option<String>,
    #[serde(default)]
    spawn_children: Vec<ChildAgentSpec>,
}

impl PlanningAction {
    fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|e| {
            log::warn!("planning response did not match the expected action shape: {e}");
            PlanningAction::default()
        })
    }
}

/// Per-agent writer locks, enforcing "single-writer-per-agent" (§5): at
/// most one execution loop mutates a given `agent_id` at a time. Unrelated
/// agents never contend on the same lock, matching the spec's
/// `DashMap`-style registry note, built here from a `std::sync::Mutex`
/// guarding per-agent `tokio::sync::Mutex` handles (an `Arc<DashMap<..>>`
/// would add a dependency the teacher's stack doesn't otherwise need).
#[derive(Default)]
struct WriterLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WriterLocks {
    fn handle_for(&self, agent_id: &str) -> Arc<AsyncMutex<()>> {
        let mut guard = self.locks.lock().unwrap();
        guard
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

pub struct AgentRunner {
    deps: RunnerDeps,
    retry: RetryPolicy,
    locks: WriterLocks,
}

impl AgentRunner {
    pub fn new(deps: RunnerDeps) -> Self {
        Self::with_retry_policy(deps, RetryPolicy::default())
    }

    pub fn with_retry_policy(deps: RunnerDeps, retry: RetryPolicy) -> Self {
        Self {
            deps,
            retry,
            locks: WriterLocks::default(),
        }
    }

    /// Drives `agent_id` forward until it reaches a terminal state, a HIL
    /// gate, or is waiting on children/an external event — matching the
    /// "resume and come back when you need me" pattern the CLI/HTTP
    /// surfaces use (§4.2 "Driving loop", supplemented).
    pub async fn run_to_next_gate(&self, agent_id: &str) -> Result<RunOutcome, AgentError> {
        self.run_to_next_gate_with_deadline(agent_id, None).await
    }

    /// As `run_to_next_gate`, but also transitions to `timeout` once
    /// `deadline` has passed (§4.2, §5 "Cancellation and timeouts").
    pub async fn run_to_next_gate_with_deadline(
        &self,
        agent_id: &str,
        deadline: Option<std::time::Instant>,
    ) -> Result<RunOutcome, AgentError> {
        let lock_handle = self.locks.handle_for(agent_id);
        let _guard = lock_handle.lock().await;

        let mut ctx = self
            .deps
            .store
            .load(agent_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(agent_id.to_string()))?;

        loop {
            if let Some(deadline) = deadline {
                if std::time::Instant::now() >= deadline {
                    self.deps.store.update_state(&mut ctx, AgentState::Timeout).await?;
                    return Ok(RunOutcome::Terminal(AgentState::Timeout));
                }
            }

            if ctx.state.is_terminal() {
                return Ok(RunOutcome::Terminal(ctx.state));
            }
            if ctx.state.is_hitl_gate() {
                return Ok(RunOutcome::AwaitingHil(ctx.state));
            }
            if ctx.state == AgentState::ChildAgents {
                let mut all_terminal = true;
                for child_id in &ctx.child_agents {
                    match self.deps.store.load(child_id).await? {
                        Some(child) if child.state.is_terminal() => {}
                        _ => {
                            all_terminal = false;
                            break;
                        }
                    }
                }
                if !all_terminal {
                    return Ok(RunOutcome::Waiting);
                }
                self.deps.store.update_state(&mut ctx, AgentState::Agent).await?;
                log::info!("agent {} resuming, all child agents reached a terminal state", ctx.agent_id);
                continue;
            }

            let outcome = self.iterate_once(&mut ctx).await?;
            match outcome {
                RunOutcome::Yielded => continue,
                other => return Ok(other),
            }
        }
    }

    /// One pass of the loop in §4.2: checkpoint, HIL gates, drain pending
    /// messages, plan, execute functions, checkpoint again.
    async fn iterate_once(&self, ctx: &mut AgentContext) -> Result<RunOutcome, AgentError> {
        let user = UserRef {
            id: ctx.user_id.clone(),
            name: ctx.user_id.clone(),
            email: None,
        };
        let agent_ref = AgentRef {
            agent_id: ctx.agent_id.clone(),
            user,
        };

        run_with_agent(agent_ref, self.iterate_once_bound(ctx)).await
    }

    async fn iterate_once_bound(&self, ctx: &mut AgentContext) -> Result<RunOutcome, AgentError> {
        // 1. Checkpoint current state before doing anything else.
        self.deps.store.save(ctx).await?;

        // 2. HIL gates, applied before consulting the LLM.
        if ctx.hil_count > 0 && ctx.iterations >= ctx.hil_count {
            ctx.pre_gate_state = Some(ctx.state);
            self.deps.store.update_state(ctx, AgentState::HitlThreshold).await?;
            log::info!("agent {} reached its HIL iteration threshold", ctx.agent_id);
            return Ok(RunOutcome::AwaitingHil(AgentState::HitlThreshold));
        }
        if ctx.cost_since_last_gate > ctx.hil_budget {
            ctx.pre_gate_state = Some(ctx.state);
            self.deps.store.update_state(ctx, AgentState::Hil).await?;
            log::info!("agent {} exceeded its HIL cost budget", ctx.agent_id);
            return Ok(RunOutcome::AwaitingHil(AgentState::Hil));
        }

        // 3. Drain pending_messages into messages.
        for pending in std::mem::take(&mut ctx.pending_messages) {
            ctx.messages.push(LlmMessage::user(pending));
        }

        // 4. Invoke the planning LLM.
        let assistant_text = match self.plan(ctx).await {
            Ok(text) => text,
            Err(AgentError::Llm(err)) => {
                ctx.error = Some(err.to_string());
                self.deps.store.update_state(ctx, AgentState::Error).await?;
                log::error!("agent {} planning failed after retries: {err}", ctx.agent_id);
                return Ok(RunOutcome::Terminal(AgentState::Error));
            }
            Err(other) => return Err(other),
        };
        ctx.messages.push(LlmMessage::assistant(assistant_text.clone()));

        let action = PlanningAction::parse(&assistant_text);

        // 5. Execute called functions, if any.
        if !action.functions.is_empty() {
            self.deps.store.update_state(ctx, AgentState::Functions).await?;

            for intent in &action.functions {
                let Some(function) = self.deps.functions.get(&intent.name) else {
                    log::warn!("agent {} called unknown function '{}'", ctx.agent_id, intent.name);
                    ctx.function_call_history
                        .push(FunctionCallResult::err(&intent.name, "unknown function class", false));
                    continue;
                };

                if function.requires_confirmation() {
                    ctx.pre_gate_state = Some(AgentState::Functions);
                    self.deps.store.update_state(ctx, AgentState::HitlTool).await?;
                    log::info!(
                        "agent {} function '{}' requires human confirmation",
                        ctx.agent_id,
                        intent.name
                    );
                    return Ok(RunOutcome::AwaitingHil(AgentState::HitlTool));
                }

                let result = with_span("function.call", function.call(intent.args.clone())).await;
                match result {
                    Ok(stdout) => {
                        ctx.memory.insert(format!("last_result:{}", intent.name), stdout.clone());
                        ctx.function_call_history.push(FunctionCallResult::ok(&intent.name, stdout));
                    }
                    Err(stderr) => {
                        log::warn!("agent {} function '{}' failed: {stderr}", ctx.agent_id, intent.name);
                        let fatal = false;
                        ctx.function_call_history
                            .push(FunctionCallResult::err(&intent.name, stderr.clone(), fatal));
                        if fatal {
                            ctx.error = Some(stderr);
                            self.deps.store.update_state(ctx, AgentState::Error).await?;
                            return Ok(RunOutcome::Terminal(AgentState::Error));
                        }
                    }
                }
            }

            self.deps.store.update_state(ctx, AgentState::Agent).await?;
        }

        // 6. Spawn sub-agents, if requested; the parent waits in
        // `child_agents` until every spawned child reaches a terminal state
        // (§4.2). Children inherit the parent's user and capability set,
        // matching the teacher's "child job inherits submitter" convention.
        if !action.spawn_children.is_empty() {
            for spec in &action.spawn_children {
                let mut child = AgentContext::new(
                    ctx.user_id.clone(),
                    crate::context::AgentType::Codegen,
                    spec.name.clone(),
                    spec.user_prompt.clone(),
                    spec.input_prompt.clone(),
                );
                child.parent_agent_id = Some(ctx.agent_id.clone());
                child.functions = ctx.functions.clone();
                child.hil_budget = ctx.hil_budget;
                child.completed_handler = ctx.completed_handler.clone();
                self.deps.store.save(&child).await?;
                ctx.child_agents.insert(child.agent_id);
            }
            self.deps.store.update_state(ctx, AgentState::ChildAgents).await?;
            log::info!(
                "agent {} spawned {} child agent(s), waiting for them to complete",
                ctx.agent_id,
                action.spawn_children.len()
            );
            return Ok(RunOutcome::Waiting);
        }

        // 7. Terminal actions.
        if let Some(note) = &action.completed {
            self.deps.store.update_state(ctx, AgentState::Completed).await?;
            if let Some(handler_id) = &ctx.completed_handler {
                self.deps.completed_handlers.notify(handler_id, ctx, note).await;
            }
            return Ok(RunOutcome::Terminal(AgentState::Completed));
        }
        if let Some(feedback_prompt) = &action.request_feedback {
            ctx.pre_gate_state = Some(AgentState::Agent);
            ctx.memory.insert("pending_feedback_prompt".to_string(), feedback_prompt.clone());
            self.deps.store.update_state(ctx, AgentState::HitlFeedback).await?;
            return Ok(RunOutcome::AwaitingHil(AgentState::HitlFeedback));
        }

        // 8. Bookkeeping, then let the driving loop decide whether to continue.
        ctx.iterations += 1;
        ctx.last_update = agentkit_llm::call::now_ms();
        self.deps.store.save(ctx).await?;

        Ok(RunOutcome::Yielded)
    }

    /// Calls the planning LLM with bounded retry on transient errors,
    /// recording the request/response through the durable call store
    /// (§4.2 step 4, §4.4).
    async fn plan(&self, ctx: &mut AgentContext) -> Result<String, AgentError> {
        let mut call = LlmCall::new(self.deps.llm.get_id(), ctx.messages.clone());
        call.agent_id = Some(ctx.agent_id.clone());
        call.user_id = Some(ctx.user_id.clone());
        call.call_stack = Some(ctx.call_stack.clone());
        call.description = Some(format!("agent:{}:plan", ctx.agent_id));

        with_span("llm_call_store.save_request", self.deps.llm_calls.save_request(&call))
            .await
            .map_err(AgentError::from)?;

        let mut attempt = 0u32;
        let result = loop {
            attempt += 1;
            let outcome = with_span(
                "llm.generate",
                self.deps.llm.generate(&ctx.messages, &GenerateOptions::default()),
            )
            .await;

            match outcome {
                Ok(result) => break result,
                Err(err) if err.is_retryable() && attempt <= self.retry.max_retries => {
                    let wait = self.retry.backoff_for(attempt);
                    log::warn!(
                        "agent {} planning call attempt {attempt} failed transiently, retrying in {wait:?}: {err}",
                        ctx.agent_id
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Err(err) => return Err(AgentError::Llm(err)),
            }
        };

        call.messages.push(result.message.clone());
        call.cost = result.usage.cost;
        call.input_tokens = Some(result.usage.input_tokens);
        call.output_tokens = Some(result.usage.output_tokens);
        call.time_to_first_token = result.usage.time_to_first_token_ms;
        call.total_time = result.usage.total_time_ms;

        with_span("llm_call_store.save_response", self.deps.llm_calls.save_response(&call))
            .await
            .map_err(AgentError::from)?;

        if let Some(cost) = result.usage.cost {
            ctx.cost += cost;
            ctx.cost_since_last_gate += cost;
        }

        Ok(result.message.content.as_text())
    }

    /// Acknowledges a HIL gate and resumes the agent into its pre-gate
    /// state. `hitl_threshold` additionally resets the iteration counter
    /// (§4.2); `hil` clears the cost-since-last-gate accumulator.
    pub async fn acknowledge_hil(&self, agent_id: &str) -> Result<(), AgentError> {
        let lock_handle = self.locks.handle_for(agent_id);
        let _guard = lock_handle.lock().await;

        let mut ctx = self
            .deps
            .store
            .load(agent_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(agent_id.to_string()))?;

        if !ctx.state.is_hitl_gate() {
            return Err(AgentError::InvalidLlmResponse(format!(
                "agent {agent_id} is not awaiting a HIL gate (state: {:?})",
                ctx.state
            )));
        }

        match ctx.state {
            AgentState::HitlThreshold => ctx.iterations = 0,
            AgentState::Hil => ctx.cost_since_last_gate = 0.0,
            AgentState::HitlFeedback => {
                if let Some(feedback) = ctx.memory.remove("pending_feedback_prompt") {
                    ctx.messages.push(LlmMessage::user(feedback));
                }
            }
            _ => {}
        }

        let resume_state = ctx.pre_gate_state.take().unwrap_or(AgentState::Agent);
        self.deps.store.update_state(&mut ctx, resume_state).await?;
        Ok(())
    }

    /// Marks `agent_id` as `shutdown`. In-flight LLM calls are allowed to
    /// complete; their results are simply discarded by the caller losing
    /// interest in the outcome (§5 "Cancellation and timeouts").
    pub async fn shutdown(&self, agent_id: &str) -> Result<(), AgentError> {
        let lock_handle = self.locks.handle_for(agent_id);
        let _guard = lock_handle.lock().await;

        let mut ctx = self
            .deps
            .store
            .load(agent_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(agent_id.to_string()))?;
        self.deps.store.update_state(&mut ctx, AgentState::Shutdown).await?;
        Ok(())
    }

    /// Spawns `run_to_next_gate` on a dedicated task, matching the
    /// `startAgent`/`resumeAgent` usage pattern in the boundary glue
    /// (§4.2, §4.11).
    pub fn spawn_driver(self: &Arc<Self>, agent_id: impl Into<String>) -> tokio::task::JoinHandle<Result<RunOutcome, AgentError>> {
        let runner = self.clone();
        let agent_id = agent_id.into();
        tokio::spawn(async move { runner.run_to_next_gate(&agent_id).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AgentType;
    use crate::store::InMemoryAgentStateStore;
    use agentkit_core::registry::{AgentFunction, FunctionSchema, ParamSchema};
    use agentkit_llm::store::InMemoryLlmCallStore;
    use agentkit_llm::{GenerateResult, LlmError, Usage};

    struct ScriptedLlm {
        id: &'static str,
        responses: AsyncMutex<Vec<Result<&'static str, LlmError>>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<&'static str, LlmError>>) -> Self {
            Self {
                id: "scripted",
                responses: AsyncMutex::new(responses.into_iter().rev().collect()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn get_id(&self) -> &str {
            self.id
        }
        fn is_configured(&self) -> bool {
            true
        }
        fn get_max_input_tokens(&self) -> u64 {
            1_000_000
        }
        async fn generate(
            &self,
            _messages: &[LlmMessage],
            _opts: &GenerateOptions,
        ) -> Result<GenerateResult, LlmError> {
            let mut guard = self.responses.lock().await;
            match guard.pop().expect("scripted response exhausted") {
                Ok(text) => Ok(GenerateResult {
                    message: LlmMessage::assistant(text),
                    usage: Usage { cost: Some(0.01), ..Default::default() },
                }),
                Err(e) => Err(e),
            }
        }
    }

    struct Echo;

    #[async_trait]
    impl AgentFunction for Echo {
        fn schema(&self) -> FunctionSchema {
            FunctionSchema {
                name: "echo".into(),
                description: "echo".into(),
                params: vec![ParamSchema {
                    name: "text".into(),
                    ty: "string".into(),
                    description: "text".into(),
                    required: true,
                }],
            }
        }
        async fn call(&self, args: Vec<serde_json::Value>) -> Result<String, String> {
            Ok(args.first().cloned().unwrap_or_default().to_string())
        }
    }

    fn deps(llm: ScriptedLlm) -> (Arc<dyn AgentStateStore>, RunnerDeps) {
        let store: Arc<dyn AgentStateStore> = Arc::new(InMemoryAgentStateStore::new());
        let functions = FunctionRegistry::new();
        functions.register("echo", Arc::new(Echo));
        let deps = RunnerDeps {
            store: store.clone(),
            llm_calls: Arc::new(InMemoryLlmCallStore::new()),
            llm: Arc::new(llm),
            functions,
            completed_handlers: CompletedHandlerRegistry::new(),
        };
        (store, deps)
    }

    #[tokio::test]
    async fn completes_when_the_planning_llm_emits_completed() {
        let llm = ScriptedLlm::new(vec![Ok(r#"{"completed": "done"}"#)]);
        let (store, deps) = deps(llm);
        let runner = AgentRunner::new(deps);

        let ctx = AgentContext::new("user-1", AgentType::Codegen, "n", "up", "ip");
        store.save(&ctx).await.unwrap();

        let outcome = runner.run_to_next_gate(&ctx.agent_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Terminal(AgentState::Completed));
    }

    #[tokio::test]
    async fn runs_a_function_call_then_continues_iterating() {
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"functions": [{"name": "echo", "args": ["hi"]}]}"#),
            Ok(r#"{"completed": "done"}"#),
        ]);
        let (store, deps) = deps(llm);
        let runner = AgentRunner::new(deps);

        let mut ctx = AgentContext::new("user-1", AgentType::Codegen, "n", "up", "ip");
        ctx.hil_budget = 10.0;
        store.save(&ctx).await.unwrap();

        let outcome = runner.run_to_next_gate(&ctx.agent_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Terminal(AgentState::Completed));

        let loaded = store.load(&ctx.agent_id).await.unwrap().unwrap();
        assert_eq!(loaded.function_call_history.len(), 1);
        assert!(loaded.function_call_history[0].stdout.as_deref() == Some("\"hi\""));
    }

    #[tokio::test]
    async fn stops_at_hitl_threshold_without_notifying_the_completed_handler() {
        let llm = ScriptedLlm::new(vec![Ok("{}"), Ok("{}"), Ok("{}")]);
        let (store, deps) = deps(llm);
        let runner = AgentRunner::new(deps);

        let mut ctx = AgentContext::new("user-1", AgentType::Codegen, "n", "up", "ip");
        ctx.hil_count = 3;
        ctx.hil_budget = 10.0;
        store.save(&ctx).await.unwrap();

        let outcome = runner.run_to_next_gate(&ctx.agent_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::AwaitingHil(AgentState::HitlThreshold));

        let loaded = store.load(&ctx.agent_id).await.unwrap().unwrap();
        assert_eq!(loaded.iterations, 3);
        assert_eq!(loaded.state, AgentState::HitlThreshold);
    }

    #[tokio::test]
    async fn acknowledging_hitl_threshold_resets_iterations_and_resumes() {
        let llm = ScriptedLlm::new(vec![Ok("{}")]);
        let (store, deps) = deps(llm);
        let runner = AgentRunner::new(deps);

        let mut ctx = AgentContext::new("user-1", AgentType::Codegen, "n", "up", "ip");
        ctx.hil_count = 1;
        store.save(&ctx).await.unwrap();

        runner.run_to_next_gate(&ctx.agent_id).await.unwrap();
        runner.acknowledge_hil(&ctx.agent_id).await.unwrap();

        let loaded = store.load(&ctx.agent_id).await.unwrap().unwrap();
        assert_eq!(loaded.iterations, 0);
        assert_eq!(loaded.state, AgentState::Agent);
    }

    #[tokio::test]
    async fn stops_at_hil_budget_gate_when_cost_exceeds_budget() {
        let llm = ScriptedLlm::new(vec![Ok("{}"), Ok("{}")]);
        let (store, deps) = deps(llm);
        let runner = AgentRunner::new(deps);

        let mut ctx = AgentContext::new("user-1", AgentType::Codegen, "n", "up", "ip");
        ctx.hil_budget = 0.005; // first $0.01 response already exceeds this
        store.save(&ctx).await.unwrap();

        let outcome = runner.run_to_next_gate(&ctx.agent_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::AwaitingHil(AgentState::Hil));
    }

    #[tokio::test]
    async fn transitions_to_error_after_retries_are_exhausted() {
        let llm = ScriptedLlm::new(vec![
            Err(LlmError::Retryable("rate limited".into())),
            Err(LlmError::Retryable("rate limited".into())),
            Err(LlmError::Retryable("rate limited".into())),
            Err(LlmError::Retryable("rate limited".into())),
        ]);
        let (store, deps) = deps(llm);
        let runner = AgentRunner::with_retry_policy(
            deps,
            RetryPolicy { max_retries: 2, base_backoff: Duration::from_millis(1) },
        );

        let ctx = AgentContext::new("user-1", AgentType::Codegen, "n", "up", "ip");
        store.save(&ctx).await.unwrap();

        let outcome = runner.run_to_next_gate(&ctx.agent_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Terminal(AgentState::Error));

        let loaded = store.load(&ctx.agent_id).await.unwrap().unwrap();
        assert!(loaded.error.is_some());
    }

    #[tokio::test]
    async fn unknown_function_names_are_recorded_as_errors_and_do_not_abort() {
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"functions": [{"name": "ghost", "args": []}]}"#),
            Ok(r#"{"completed": "done"}"#),
        ]);
        let (store, deps) = deps(llm);
        let runner = AgentRunner::new(deps);

        let mut ctx = AgentContext::new("user-1", AgentType::Codegen, "n", "up", "ip");
        ctx.hil_budget = 10.0;
        store.save(&ctx).await.unwrap();

        let outcome = runner.run_to_next_gate(&ctx.agent_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Terminal(AgentState::Completed));

        let loaded = store.load(&ctx.agent_id).await.unwrap().unwrap();
        assert!(loaded.function_call_history[0].is_error());
    }

    #[tokio::test]
    async fn spawning_children_waits_until_they_are_all_terminal_then_resumes() {
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"spawn_children": [{"name": "c1", "user_prompt": "do a thing"}]}"#),
            Ok(r#"{"completed": "done"}"#),
        ]);
        let (store, deps) = deps(llm);
        let runner = AgentRunner::new(deps);

        let mut ctx = AgentContext::new("user-1", AgentType::Codegen, "n", "up", "ip");
        ctx.hil_budget = 10.0;
        store.save(&ctx).await.unwrap();

        let outcome = runner.run_to_next_gate(&ctx.agent_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Waiting);

        let parent = store.load(&ctx.agent_id).await.unwrap().unwrap();
        assert_eq!(parent.state, AgentState::ChildAgents);
        assert_eq!(parent.child_agents.len(), 1);
        let child_id = parent.child_agents.iter().next().unwrap().clone();
        let child = store.load(&child_id).await.unwrap().unwrap();
        assert_eq!(child.parent_agent_id.as_deref(), Some(ctx.agent_id.as_str()));

        // still waiting while the child is non-terminal
        let outcome = runner.run_to_next_gate(&ctx.agent_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Waiting);

        let mut child = store.load(&child_id).await.unwrap().unwrap();
        store.update_state(&mut child, AgentState::Completed).await.unwrap();

        let outcome = runner.run_to_next_gate(&ctx.agent_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Terminal(AgentState::Completed));
    }
}
