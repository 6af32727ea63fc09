//! SQLite-backed `AgentStateStore`. The full `AgentContext` is stored as a
//! JSON blob (it is read/written as a whole, never queried field-by-field by
//! anything but the indexed columns below), matching the teacher's
//! `execute_batch` + `CREATE TABLE IF NOT EXISTS` schema convention — no
//! migration runner, schema changes just alter the table shape directly.

use super::AgentStateStore;
use crate::context::{AgentContext, AgentSummary};
use crate::error::AgentError;
use crate::state::AgentState;
use agentkit_core::FunctionRegistry;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct SqliteAgentStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAgentStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;
        Self::bootstrap(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, AgentError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn bootstrap(conn: &Connection) -> Result<(), AgentError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agent_contexts (
                row_id          INTEGER PRIMARY KEY,
                agent_id        TEXT NOT NULL UNIQUE,
                user_id         TEXT NOT NULL,
                parent_agent_id TEXT,
                state           TEXT NOT NULL,
                last_update     INTEGER NOT NULL,
                document        TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_agent_contexts_user_id
                ON agent_contexts (user_id);
             CREATE INDEX IF NOT EXISTS idx_agent_contexts_state
                ON agent_contexts (state);",
        )?;
        Ok(())
    }

    fn state_sort_key(state: AgentState) -> i64 {
        // Mirrors the declaration order of `AgentState`, which is also its
        // `Ord` impl, so in-memory and SQLite `listRunning` agree.
        state as i64
    }

    async fn write(&self, ctx: AgentContext) -> Result<(), AgentError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let document = serde_json::to_string(&ctx)?;
            let conn = conn.lock().unwrap();

            if let Some(parent_id) = &ctx.parent_agent_id {
                let mut parent: AgentContext = conn
                    .query_row(
                        "SELECT document FROM agent_contexts WHERE agent_id = ?1",
                        params![parent_id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?
                    .map(|doc| serde_json::from_str(&doc))
                    .transpose()?
                    .ok_or_else(|| AgentError::ParentMissing {
                        parent: parent_id.clone(),
                        child: ctx.agent_id.clone(),
                    })?;

                parent.child_agents.insert(ctx.agent_id.clone());
                let parent_document = serde_json::to_string(&parent)?;
                conn.execute(
                    "UPDATE agent_contexts SET document = ?1, last_update = ?2 WHERE agent_id = ?3",
                    params![parent_document, parent.last_update, parent.agent_id],
                )?;
            }

            conn.execute(
                "INSERT INTO agent_contexts (agent_id, user_id, parent_agent_id, state, last_update, document)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(agent_id) DO UPDATE SET
                    user_id = excluded.user_id,
                    parent_agent_id = excluded.parent_agent_id,
                    state = excluded.state,
                    last_update = excluded.last_update,
                    document = excluded.document",
                params![
                    ctx.agent_id,
                    ctx.user_id,
                    ctx.parent_agent_id,
                    serde_json::to_string(&ctx.state)?,
                    ctx.last_update,
                    document,
                ],
            )?;
            Ok::<_, AgentError>(())
        })
        .await
        .map_err(|e| AgentError::Storage(e.to_string()))??;
        Ok(())
    }

    fn row_to_context(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentContext> {
        let document: String = row.get(0)?;
        serde_json::from_str(&document).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    }
}

#[async_trait]
impl AgentStateStore for SqliteAgentStateStore {
    async fn save(&self, ctx: &AgentContext) -> Result<(), AgentError> {
        self.write(ctx.clone()).await
    }

    async fn update_state(&self, ctx: &mut AgentContext, new_state: AgentState) -> Result<(), AgentError> {
        let conn = self.conn.clone();
        let agent_id = ctx.agent_id.clone();
        let now = agentkit_llm::call::now_ms();
        let state_json = serde_json::to_string(&new_state)?;

        let updated = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let n = conn.execute(
                "UPDATE agent_contexts SET state = ?1, last_update = ?2 WHERE agent_id = ?3",
                params![state_json, now, agent_id],
            )?;
            Ok::<_, AgentError>(n)
        })
        .await
        .map_err(|e| AgentError::Storage(e.to_string()))??;

        if updated == 0 {
            return Err(AgentError::NotFound(ctx.agent_id.clone()));
        }
        ctx.state = new_state;
        ctx.last_update = now;
        Ok(())
    }

    async fn load(&self, agent_id: &str) -> Result<Option<AgentContext>, AgentError> {
        let conn = self.conn.clone();
        let agent_id = agent_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let ctx = conn
                .query_row(
                    "SELECT document FROM agent_contexts WHERE agent_id = ?1",
                    params![agent_id],
                    Self::row_to_context,
                )
                .optional()?;
            Ok(ctx)
        })
        .await
        .map_err(|e| AgentError::Storage(e.to_string()))?
    }

    async fn list(&self, user_id: &str) -> Result<Vec<AgentSummary>, AgentError> {
        let conn = self.conn.clone();
        let user_id = user_id.to_string();
        let summaries = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT document FROM agent_contexts
                 WHERE user_id = ?1 ORDER BY last_update DESC",
            )?;
            let rows = stmt.query_map(params![user_id], Self::row_to_context)?;
            rows.map(|r| r.map(|ctx: AgentContext| ctx.summary()))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
        .map_err(|e| AgentError::Storage(e.to_string()))??;
        Ok(summaries)
    }

    async fn list_running(&self, user_id: &str) -> Result<Vec<AgentSummary>, AgentError> {
        let conn = self.conn.clone();
        let user_id = user_id.to_string();
        let mut summaries = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT document FROM agent_contexts WHERE user_id = ?1")?;
            let rows = stmt.query_map(params![user_id], Self::row_to_context)?;
            rows.collect::<rusqlite::Result<Vec<AgentContext>>>()
        })
        .await
        .map_err(|e| AgentError::Storage(e.to_string()))??;

        summaries.retain(|ctx| ctx.is_executing());
        summaries.sort_by(|a, b| {
            Self::state_sort_key(a.state)
                .cmp(&Self::state_sort_key(b.state))
                .then_with(|| b.last_update.cmp(&a.last_update))
        });
        Ok(summaries.into_iter().map(|ctx| ctx.summary()).collect())
    }

    async fn delete(&self, user_id: &str, ids: &[String]) -> Result<(), AgentError> {
        for id in ids {
            let ctx = self.load(id).await?;
            let Some(ctx) = ctx else { continue };
            if ctx.user_id != user_id {
                return Err(AgentError::Unauthorized {
                    user: user_id.to_string(),
                    agent: id.clone(),
                });
            }
            if ctx.is_executing() || ctx.parent_agent_id.is_some() {
                continue;
            }

            let mut to_delete: Vec<String> = ctx.child_agents.iter().cloned().collect();
            to_delete.push(ctx.agent_id.clone());

            let conn = self.conn.clone();
            tokio::task::spawn_blocking(move || {
                let conn = conn.lock().unwrap();
                for id in &to_delete {
                    conn.execute("DELETE FROM agent_contexts WHERE agent_id = ?1", params![id])?;
                }
                Ok::<_, AgentError>(())
            })
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))??;
        }
        Ok(())
    }

    async fn update_functions(
        &self,
        agent_id: &str,
        names: &[String],
        registry: &FunctionRegistry,
    ) -> Result<(), AgentError> {
        let resolved: Vec<String> = registry.resolve(names).into_iter().map(|(n, _)| n).collect();
        let mut ctx = self
            .load(agent_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(agent_id.to_string()))?;
        ctx.functions = resolved.into_iter().collect();
        self.save(&ctx).await
    }
}
