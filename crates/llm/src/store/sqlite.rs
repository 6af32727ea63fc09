//! SQLite-backed `LlmCallStore`, standing in for the spec's document-store
//! adapter (see DESIGN.md). Schema is bootstrapped with `execute_batch` and
//! `CREATE TABLE IF NOT EXISTS` — no migration runner, breaking schema
//! changes just bump the table shape directly, matching the teacher's
//! `schema.rs` convention. Connection access goes through `spawn_blocking`
//! since `rusqlite::Connection` is not `Send`-safe to share across `.await`.

use crate::call::{LlmCall, LlmCallStore};
use crate::chunking::{estimate_call_size, plan_chunks, ChunkPlan};
use crate::error::LlmError;
use crate::message::LlmMessage;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct SqliteLlmCallStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLlmCallStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LlmError> {
        let conn = Connection::open(path)?;
        Self::bootstrap(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, LlmError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn bootstrap(conn: &Connection) -> Result<(), LlmError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS llm_call_heads (
                row_id          INTEGER PRIMARY KEY,
                llm_call_id     TEXT NOT NULL UNIQUE,
                llm_id          TEXT NOT NULL,
                request_time    INTEGER NOT NULL,
                time_to_first_token INTEGER,
                total_time      INTEGER,
                cost            REAL,
                input_tokens    INTEGER,
                output_tokens   INTEGER,
                description     TEXT,
                agent_id        TEXT,
                user_id         TEXT,
                call_stack      TEXT,
                chunk_count     INTEGER NOT NULL DEFAULT 0,
                messages        TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_llm_call_heads_agent_id
                ON llm_call_heads (agent_id);
             CREATE INDEX IF NOT EXISTS idx_llm_call_heads_description
                ON llm_call_heads (description);
             CREATE TABLE IF NOT EXISTS llm_call_chunks (
                row_id          INTEGER PRIMARY KEY,
                llm_call_id     TEXT NOT NULL,
                chunk_index     INTEGER NOT NULL,
                messages        TEXT NOT NULL,
                UNIQUE(llm_call_id, chunk_index)
             );",
        )?;
        Ok(())
    }

    async fn write(&self, call: LlmCall) -> Result<(), LlmError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let total_size = estimate_call_size(&call)?;
            let plan = plan_chunks(total_size, &call.messages)?;

            let (head_messages, chunk_count, chunks) = match plan {
                ChunkPlan::Single => (call.messages.clone(), 0u32, Vec::new()),
                ChunkPlan::Chunked(chunks) => (Vec::new(), chunks.len() as u32, chunks),
            };

            let messages_json = serde_json::to_string(&head_messages)?;
            let call_stack_json = call
                .call_stack
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO llm_call_heads
                    (llm_call_id, llm_id, request_time, time_to_first_token, total_time,
                     cost, input_tokens, output_tokens, description, agent_id, user_id,
                     call_stack, chunk_count, messages)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(llm_call_id) DO UPDATE SET
                    llm_id = excluded.llm_id,
                    request_time = excluded.request_time,
                    time_to_first_token = excluded.time_to_first_token,
                    total_time = excluded.total_time,
                    cost = excluded.cost,
                    input_tokens = excluded.input_tokens,
                    output_tokens = excluded.output_tokens,
                    description = excluded.description,
                    agent_id = excluded.agent_id,
                    user_id = excluded.user_id,
                    call_stack = excluded.call_stack,
                    chunk_count = excluded.chunk_count,
                    messages = excluded.messages",
                params![
                    call.llm_call_id,
                    call.llm_id,
                    call.request_time,
                    call.time_to_first_token,
                    call.total_time,
                    call.cost,
                    call.input_tokens.map(|v| v as i64),
                    call.output_tokens.map(|v| v as i64),
                    call.description,
                    call.agent_id,
                    call.user_id,
                    call_stack_json,
                    chunk_count,
                    messages_json,
                ],
            )?;

            conn.execute(
                "DELETE FROM llm_call_chunks WHERE llm_call_id = ?1",
                params![call.llm_call_id],
            )?;
            for (index, chunk) in chunks.iter().enumerate() {
                let chunk_json = serde_json::to_string(chunk)?;
                conn.execute(
                    "INSERT INTO llm_call_chunks (llm_call_id, chunk_index, messages)
                     VALUES (?1, ?2, ?3)",
                    params![call.llm_call_id, index as i64 + 1, chunk_json],
                )?;
            }

            Ok::<_, LlmError>(())
        })
        .await
        .map_err(|e| LlmError::Storage(e.to_string()))??;
        Ok(())
    }

    fn row_to_head(row: &rusqlite::Row<'_>) -> rusqlite::Result<LlmCall> {
        let call_stack_json: Option<String> = row.get("call_stack")?;
        let messages_json: String = row.get("messages")?;
        let call_stack = call_stack_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?;
        let messages: Vec<LlmMessage> = serde_json::from_str(&messages_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let llm_call_id: String = row.get("llm_call_id")?;
        Ok(LlmCall {
            id: llm_call_id.clone(),
            llm_call_id,
            llm_id: row.get("llm_id")?,
            request_time: row.get("request_time")?,
            time_to_first_token: row.get("time_to_first_token")?,
            total_time: row.get("total_time")?,
            cost: row.get("cost")?,
            input_tokens: row.get::<_, Option<i64>>("input_tokens")?.map(|v| v as u64),
            output_tokens: row.get::<_, Option<i64>>("output_tokens")?.map(|v| v as u64),
            messages,
            description: row.get("description")?,
            agent_id: row.get("agent_id")?,
            user_id: row.get("user_id")?,
            call_stack,
            chunk_count: row.get::<_, i64>("chunk_count")? as u32,
        })
    }
}

#[async_trait]
impl LlmCallStore for SqliteLlmCallStore {
    async fn save_request(&self, call: &LlmCall) -> Result<(), LlmError> {
        self.write(call.clone()).await
    }

    async fn save_response(&self, call: &LlmCall) -> Result<(), LlmError> {
        self.write(call.clone()).await
    }

    async fn get_call(&self, id: &str) -> Result<Option<LlmCall>, LlmError> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let head = conn
                .query_row(
                    "SELECT * FROM llm_call_heads WHERE llm_call_id = ?1",
                    params![id],
                    Self::row_to_head,
                )
                .optional()?;

            let Some(mut head) = head else {
                return Ok(None);
            };

            if head.chunk_count == 0 {
                return Ok(Some(head));
            }

            let mut stmt = conn.prepare(
                "SELECT messages FROM llm_call_chunks
                 WHERE llm_call_id = ?1 ORDER BY chunk_index ASC",
            )?;
            let chunk_rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;

            let mut found = 0u32;
            let mut messages = Vec::new();
            for row in chunk_rows {
                let json = row?;
                let mut chunk: Vec<LlmMessage> = serde_json::from_str(&json)?;
                messages.append(&mut chunk);
                found += 1;
            }
            if found != head.chunk_count {
                log::warn!(
                    "llm_call_id={id}: expected {} chunks, found {found}; reconstructing lossily",
                    head.chunk_count
                );
            }
            head.messages = messages;
            Ok(Some(head))
        })
        .await
        .map_err(|e| LlmError::Storage(e.to_string()))?
    }

    async fn get_calls_for_agent(&self, agent_id: &str) -> Result<Vec<LlmCall>, LlmError> {
        let conn = self.conn.clone();
        let agent_id = agent_id.to_string();
        let ids: Vec<String> = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT llm_call_id FROM llm_call_heads
                 WHERE agent_id = ?1 ORDER BY request_time DESC",
            )?;
            let rows = stmt.query_map(params![agent_id], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
        .map_err(|e| LlmError::Storage(e.to_string()))??;

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(call) = self.get_call(&id).await? {
                out.push(call);
            }
        }
        Ok(out)
    }

    async fn get_calls_by_description(&self, description: &str) -> Result<Vec<LlmCall>, LlmError> {
        let conn = self.conn.clone();
        let description = description.to_string();
        let ids: Vec<String> = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT llm_call_id FROM llm_call_heads
                 WHERE description = ?1 ORDER BY request_time DESC",
            )?;
            let rows = stmt.query_map(params![description], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
        .map_err(|e| LlmError::Storage(e.to_string()))??;

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(call) = self.get_call(&id).await? {
                out.push(call);
            }
        }
        Ok(out)
    }

    async fn delete(&self, llm_call_id: &str) -> Result<(), LlmError> {
        let conn = self.conn.clone();
        let llm_call_id = llm_call_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "DELETE FROM llm_call_heads WHERE llm_call_id = ?1",
                params![llm_call_id],
            )?;
            conn.execute(
                "DELETE FROM llm_call_chunks WHERE llm_call_id = ?1",
                params![llm_call_id],
            )?;
            Ok::<_, LlmError>(())
        })
        .await
        .map_err(|e| LlmError::Storage(e.to_string()))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::LlmMessage;

    fn big_message(target_len: usize) -> LlmMessage {
        LlmMessage::user("x".repeat(target_len))
    }

    #[tokio::test]
    async fn small_call_round_trips_without_chunking() {
        let store = SqliteLlmCallStore::open_in_memory().unwrap();
        let call = LlmCall::new("gpt", vec![LlmMessage::user("hi")]);
        store.save_response(&call).await.unwrap();

        let loaded = store.get_call(&call.id).await.unwrap().unwrap();
        assert_eq!(loaded.chunk_count, 0);
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].content.as_text(), "hi");
    }

    #[tokio::test]
    async fn chunked_call_round_trips_across_chunk_rows() {
        let store = SqliteLlmCallStore::open_in_memory().unwrap();
        let messages = vec![
            big_message(700_000),
            big_message(700_000),
            big_message(700_000),
        ];
        let call = LlmCall::new("gpt", messages.clone());
        store.save_response(&call).await.unwrap();

        let loaded = store.get_call(&call.id).await.unwrap().unwrap();
        assert!(loaded.chunk_count >= 2);
        let texts: Vec<String> = loaded.messages.iter().map(|m| m.content.as_text()).collect();
        let expected: Vec<String> = messages.iter().map(|m| m.content.as_text()).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test]
    async fn saving_response_twice_overwrites_rather_than_duplicates() {
        let store = SqliteLlmCallStore::open_in_memory().unwrap();
        let mut call = LlmCall::new("gpt", vec![LlmMessage::user("first")]);
        store.save_request(&call).await.unwrap();

        call.messages = vec![LlmMessage::user("first"), LlmMessage::assistant("second")];
        store.save_response(&call).await.unwrap();

        let loaded = store.get_call(&call.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
    }

    #[tokio::test]
    async fn opening_a_file_backed_store_persists_the_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.sqlite3");
        let store = SqliteLlmCallStore::open(&path).unwrap();
        let call = LlmCall::new("gpt", vec![LlmMessage::user("hi")]);
        store.save_response(&call).await.unwrap();
        drop(store);

        let reopened = SqliteLlmCallStore::open(&path).unwrap();
        let loaded = reopened.get_call(&call.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages[0].content.as_text(), "hi");
    }

    #[tokio::test]
    async fn delete_removes_heads_and_chunks() {
        let store = SqliteLlmCallStore::open_in_memory().unwrap();
        let call = LlmCall::new("gpt", vec![big_message(700_000), big_message(700_000)]);
        store.save_response(&call).await.unwrap();
        store.delete(&call.llm_call_id).await.unwrap();
        assert!(store.get_call(&call.id).await.unwrap().is_none());
    }
}
