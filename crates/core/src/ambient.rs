//! Ambient "current user" / "current agent" propagation (C1).
//!
//! Mirrors the shape of `tokio::task_local!` scoped values: a binding is
//! established for the lifetime of a future with `run_with_user`/
//! `run_with_agent`, and is visible to everything that future awaits,
//! without being threaded through every function signature. Unlike a
//! process-global `OnceCell`, this is per-task, so concurrent agents never
//! observe each other's bindings.

use crate::error::CoreError;
use std::sync::atomic::{AtomicBool, Ordering};

/// The minimal shape of a user needed by ambient-context consumers:
/// ownership checks, ownership-scoped listing, and display in review
/// comments (§3.6, supplemented).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

/// The ambient "current agent" binding: just enough to resolve
/// `currentUser()` through an agent and to tag log lines/spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRef {
    pub agent_id: String,
    pub user: UserRef,
}

tokio::task_local! {
    static CURRENT_USER: UserRef;
    static CURRENT_AGENT: AgentRef;
}

/// Process-wide single-user mode switch, set once at boot from `AUTH=single_user`.
/// Never flips back off at runtime, so a plain `AtomicBool` is sufficient.
static SINGLE_USER_MODE: AtomicBool = AtomicBool::new(false);

/// The sole user when running in single-user mode. Populated once at boot
/// alongside `SINGLE_USER_MODE`.
static SINGLE_USER: std::sync::OnceLock<UserRef> = std::sync::OnceLock::new();

/// Enables single-user mode with the given sole user. Idempotent: later
/// calls are ignored once a user has been set, matching the "read once at
/// boot" nature of `AUTH`/`TYPEDAI_SYS_DIR`-style environment configuration.
pub fn enable_single_user_mode(user: UserRef) {
    SINGLE_USER_MODE.store(true, Ordering::SeqCst);
    let _ = SINGLE_USER.set(user);
}

/// Runs `fut` with `user` bound as the ambient current user.
pub async fn run_with_user<F: std::future::Future>(user: UserRef, fut: F) -> F::Output {
    CURRENT_USER.scope(user, fut).await
}

/// Runs `fut` with `agent` bound as the ambient current agent. The Runner
/// calls this once per iteration (§4.2 step 2 onward).
pub async fn run_with_agent<F: std::future::Future>(agent: AgentRef, fut: F) -> F::Output {
    CURRENT_AGENT.scope(agent, fut).await
}

/// Resolves the ambient current user: agent binding's user, else the plain
/// user binding, else — only in single-user mode — the sole user.
pub fn current_user() -> Result<UserRef, CoreError> {
    if let Ok(agent) = CURRENT_AGENT.try_with(|a| a.user.clone()) {
        return Ok(agent);
    }
    if let Ok(user) = CURRENT_USER.try_with(|u| u.clone()) {
        return Ok(user);
    }
    if SINGLE_USER_MODE.load(Ordering::SeqCst) {
        if let Some(user) = SINGLE_USER.get() {
            return Ok(user.clone());
        }
    }
    Err(CoreError::NotBound)
}

/// Resolves the ambient current agent, if one is bound.
pub fn current_agent() -> Option<AgentRef> {
    CURRENT_AGENT.try_with(|a| a.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserRef {
        UserRef {
            id: id.to_string(),
            name: id.to_string(),
            email: None,
        }
    }

    #[tokio::test]
    async fn not_bound_without_single_user_mode() {
        let err = tokio::spawn(async { current_user() }).await.unwrap();
        assert_eq!(err, Err(CoreError::NotBound));
    }

    #[tokio::test]
    async fn user_binding_is_visible_to_nested_calls() {
        let out = run_with_user(user("u1"), async { current_user() }).await;
        assert_eq!(out.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn agent_binding_takes_precedence_over_user_binding() {
        let agent = AgentRef {
            agent_id: "a1".into(),
            user: user("agent-user"),
        };
        let out = run_with_user(
            user("outer-user"),
            run_with_agent(agent, async { current_user() }),
        )
        .await;
        assert_eq!(out.unwrap().id, "agent-user");
    }

    #[tokio::test]
    async fn concurrent_tasks_do_not_see_each_others_bindings() {
        let a = tokio::spawn(run_with_user(user("a"), async {
            tokio::task::yield_now().await;
            current_user()
        }));
        let b = tokio::spawn(run_with_user(user("b"), async {
            tokio::task::yield_now().await;
            current_user()
        }));
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a.unwrap().id, "a");
        assert_eq!(b.unwrap().id, "b");
    }
}
