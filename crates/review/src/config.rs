//! `CodeReviewConfig` (§3.5): the per-rule applicability filter (file
//! extensions, required literal text, project-path globs) plus a handful
//! of few-shot examples embedded into the review prompt.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewExample {
    pub code: String,
    pub review_comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileExtensions {
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiresText {
    pub text: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeReviewConfig {
    pub id: String,
    pub title: String,
    pub enabled: bool,
    pub description: String,
    pub file_extensions: FileExtensions,
    pub requires: RequiresText,
    pub project_paths: Vec<String>,
    #[serde(default)]
    pub examples: Vec<ReviewExample>,
    /// Versioning for a rule's applicability/prompt content. Not named
    /// explicitly in §3.5 but required by the fingerprint formula in §4.6
    /// step 5 (`ruleVer`), which must change whenever a rule's prompt
    /// content changes so stale cache hits don't mask a rewritten rule.
    #[serde(default = "default_rule_version")]
    pub rule_version: u32,
}

fn default_rule_version() -> u32 {
    1
}

impl CodeReviewConfig {
    /// Whether `rule.enabled` and the file's extension is in
    /// `file_extensions.include` (§4.6 step 3).
    pub fn matches_extension(&self, path: &str) -> bool {
        let ext = std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        self.file_extensions.include.iter().any(|inc| inc.trim_start_matches('.') == ext)
    }

    /// Whether any `projectPaths` glob matches `project_path` (§4.6 step 3).
    /// An empty glob list matches every project (no restriction configured).
    pub fn matches_project_path(&self, project_path: &str) -> bool {
        if self.project_paths.is_empty() {
            return true;
        }
        self.project_paths.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches(project_path))
                .unwrap_or(false)
        })
    }

    /// Whether at least one `requires.text` literal appears in `diff_text`
    /// (§4.6 step 3). An empty list imposes no requirement.
    pub fn matches_required_text(&self, diff_text: &str) -> bool {
        if self.requires.text.is_empty() {
            return true;
        }
        self.requires.text.iter().any(|literal| diff_text.contains(literal.as_str()))
    }

    pub fn is_applicable(&self, project_path: &str, new_path: &str, diff_text: &str) -> bool {
        self.enabled
            && self.matches_project_path(project_path)
            && self.matches_extension(new_path)
            && self.matches_required_text(diff_text)
    }
}

#[async_trait]
pub trait CodeReviewConfigStore: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<CodeReviewConfig>, crate::error::ReviewError>;
    async fn get(&self, id: &str) -> Result<Option<CodeReviewConfig>, crate::error::ReviewError>;
    async fn upsert(&self, config: CodeReviewConfig) -> Result<(), crate::error::ReviewError>;
}

#[derive(Default)]
pub struct InMemoryCodeReviewConfigStore {
    configs: RwLock<HashMap<String, CodeReviewConfig>>,
}

impl InMemoryCodeReviewConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CodeReviewConfigStore for InMemoryCodeReviewConfigStore {
    async fn list_enabled(&self) -> Result<Vec<CodeReviewConfig>, crate::error::ReviewError> {
        Ok(self.configs.read().await.values().filter(|c| c.enabled).cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<CodeReviewConfig>, crate::error::ReviewError> {
        Ok(self.configs.read().await.get(id).cloned())
    }

    async fn upsert(&self, config: CodeReviewConfig) -> Result<(), crate::error::ReviewError> {
        self.configs.write().await.insert(config.id.clone(), config);
        Ok(())
    }
}

/// SQLite-backed `CodeReviewConfigStore`, standing in for the spec's
/// document-store adapter the same way `SqliteReviewCacheStore` does for
/// the fingerprint cache (see DESIGN.md).
pub struct SqliteCodeReviewConfigStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCodeReviewConfigStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, crate::error::ReviewError> {
        let conn = Connection::open(path)?;
        Self::bootstrap(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, crate::error::ReviewError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn bootstrap(conn: &Connection) -> Result<(), crate::error::ReviewError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS code_review_configs (
                id       TEXT PRIMARY KEY,
                enabled  INTEGER NOT NULL,
                document TEXT NOT NULL
             );",
        )?;
        Ok(())
    }
}

#[async_trait]
impl CodeReviewConfigStore for SqliteCodeReviewConfigStore {
    async fn list_enabled(&self) -> Result<Vec<CodeReviewConfig>, crate::error::ReviewError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT document FROM code_review_configs WHERE enabled = 1")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut configs = Vec::new();
            for raw in rows {
                let raw = raw?;
                match serde_json::from_str::<CodeReviewConfig>(&raw) {
                    Ok(config) => configs.push(config),
                    Err(e) => log::warn!("code review config document has an invalid shape, skipping: {e}"),
                }
            }
            Ok::<_, crate::error::ReviewError>(configs)
        })
        .await
        .map_err(|e| crate::error::ReviewError::Storage(e.to_string()))?
    }

    async fn get(&self, id: &str) -> Result<Option<CodeReviewConfig>, crate::error::ReviewError> {
        let id = id.to_string();
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let raw: Option<String> = conn
                .query_row("SELECT document FROM code_review_configs WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;
            let config = match raw {
                None => None,
                Some(raw) => serde_json::from_str(&raw)?,
            };
            Ok::<_, crate::error::ReviewError>(config)
        })
        .await
        .map_err(|e| crate::error::ReviewError::Storage(e.to_string()))?
    }

    async fn upsert(&self, config: CodeReviewConfig) -> Result<(), crate::error::ReviewError> {
        let raw = serde_json::to_string(&config)?;
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO code_review_configs (id, enabled, document) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET enabled = excluded.enabled, document = excluded.document",
                params![config.id, config.enabled as i64, raw],
            )?;
            Ok::<_, crate::error::ReviewError>(())
        })
        .await
        .map_err(|e| crate::error::ReviewError::Storage(e.to_string()))?
    }
}
