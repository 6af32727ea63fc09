//! Function registry (C2): maps a function-class name to its schema and a
//! constructor for a callable instance.
//!
//! The registry is process-wide and populated at boot. It is consulted at
//! agent deserialization time to rebuild an agent's bound capability set
//! (`AgentContext::functions`) from the list of names it was persisted with.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A single parameter in a function's schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// The schema the runtime trusts when performing positional-argument calls
/// into a function instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSchema>,
}

/// Result of invoking a bound function, mirroring `FunctionCallResult` in §3.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallResult {
    pub call_name: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub is_fatal: bool,
}

impl FunctionCallResult {
    pub fn ok(call_name: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            call_name: call_name.into(),
            stdout: Some(stdout.into()),
            stderr: None,
            is_fatal: false,
        }
    }

    pub fn err(call_name: impl Into<String>, stderr: impl Into<String>, is_fatal: bool) -> Self {
        Self {
            call_name: call_name.into(),
            stdout: None,
            stderr: Some(stderr.into()),
            is_fatal,
        }
    }

    pub fn is_error(&self) -> bool {
        self.stderr.is_some()
    }
}

/// A callable function class. Implementors are resolved by name out of the
/// `FunctionRegistry` and invoked with the positional arguments the planning
/// LLM supplied for a function call intent.
#[async_trait::async_trait]
pub trait AgentFunction: Send + Sync {
    fn schema(&self) -> FunctionSchema;

    async fn call(&self, args: Vec<serde_json::Value>) -> Result<String, String>;

    /// Whether invoking this function requires human confirmation before it
    /// runs (Runner §4.2: `functions` → `hitl_tool`). Defaults to `false` so
    /// existing function classes don't need to opt in explicitly.
    fn requires_confirmation(&self) -> bool {
        false
    }
}

/// Process-wide mapping from function-class name to constructor. Missing
/// names log a warning and are skipped rather than failing outright (§4.8),
/// because a persisted agent may reference a function class that a later
/// deployment removed.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn AgentFunction>>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, function: Arc<dyn AgentFunction>) {
        self.inner.write().unwrap().insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentFunction>> {
        self.inner.read().unwrap().get(name).cloned()
    }

    pub fn schema_for(&self, name: &str) -> Option<FunctionSchema> {
        self.get(name).map(|f| f.schema())
    }

    /// Resolves a list of function-class names into bound instances,
    /// skipping (and logging a warning for) any name absent from the
    /// registry, per §4.3 `updateFunctions` / §4.8.
    pub fn resolve(&self, names: &[String]) -> Vec<(String, Arc<dyn AgentFunction>)> {
        let inner = self.inner.read().unwrap();
        names
            .iter()
            .filter_map(|name| match inner.get(name) {
                Some(f) => Some((name.clone(), f.clone())),
                None => {
                    log::warn!("function class '{name}' not found in registry, skipping");
                    None
                }
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().unwrap().keys().cloned().collect()
    }
}
