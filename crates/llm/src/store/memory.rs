use crate::call::{LlmCall, LlmCallStore};
use crate::chunking::{estimate_call_size, plan_chunks, ChunkPlan};
use crate::error::LlmError;
use crate::message::LlmMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

struct StoredCall {
    head: LlmCall, // `messages` is empty when chunk_count > 0
    chunks: Vec<Vec<LlmMessage>>,
}

/// In-memory `LlmCallStore`, used by tests and by `DATABASE=memory` boot.
#[derive(Default)]
pub struct InMemoryLlmCallStore {
    calls: Mutex<HashMap<String, StoredCall>>,
}

impl InMemoryLlmCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn write(&self, call: &LlmCall) -> Result<(), LlmError> {
        let total_size = estimate_call_size(call)?;
        let plan = plan_chunks(total_size, &call.messages)?;

        let (head_messages, chunk_count, chunks) = match plan {
            ChunkPlan::Single => (call.messages.clone(), 0, Vec::new()),
            ChunkPlan::Chunked(chunks) => {
                let n = chunks.len() as u32;
                (Vec::new(), n, chunks)
            }
        };

        let mut head = call.clone();
        head.messages = head_messages;
        head.chunk_count = chunk_count;

        let mut guard = self.calls.lock().await;
        guard.insert(call.llm_call_id.clone(), StoredCall { head, chunks });
        Ok(())
    }
}

#[async_trait]
impl LlmCallStore for InMemoryLlmCallStore {
    async fn save_request(&self, call: &LlmCall) -> Result<(), LlmError> {
        self.write(call).await
    }

    async fn save_response(&self, call: &LlmCall) -> Result<(), LlmError> {
        self.write(call).await
    }

    async fn get_call(&self, id: &str) -> Result<Option<LlmCall>, LlmError> {
        let guard = self.calls.lock().await;
        let Some(stored) = guard.get(id) else {
            return Ok(None);
        };

        if stored.head.chunk_count == 0 {
            return Ok(Some(stored.head.clone()));
        }

        let found = stored.chunks.len() as u32;
        if found != stored.head.chunk_count {
            log::warn!(
                "llm_call_id={id}: expected {} chunks, found {found}; reconstructing lossily",
                stored.head.chunk_count
            );
        }

        let mut call = stored.head.clone();
        call.messages = stored.chunks.iter().flatten().cloned().collect();
        Ok(Some(call))
    }

    async fn get_calls_for_agent(&self, agent_id: &str) -> Result<Vec<LlmCall>, LlmError> {
        let ids: Vec<String> = {
            let guard = self.calls.lock().await;
            guard
                .values()
                .filter(|s| s.head.agent_id.as_deref() == Some(agent_id))
                .map(|s| s.head.id.clone())
                .collect()
        };
        let mut out = Vec::new();
        for id in ids {
            if let Some(call) = self.get_call(&id).await? {
                out.push(call);
            }
        }
        out.sort_by(|a, b| b.request_time.cmp(&a.request_time));
        Ok(out)
    }

    async fn get_calls_by_description(&self, description: &str) -> Result<Vec<LlmCall>, LlmError> {
        let ids: Vec<String> = {
            let guard = self.calls.lock().await;
            guard
                .values()
                .filter(|s| s.head.description.as_deref() == Some(description))
                .map(|s| s.head.id.clone())
                .collect()
        };
        let mut out = Vec::new();
        for id in ids {
            if let Some(call) = self.get_call(&id).await? {
                out.push(call);
            }
        }
        out.sort_by(|a, b| b.request_time.cmp(&a.request_time));
        Ok(out)
    }

    async fn delete(&self, llm_call_id: &str) -> Result<(), LlmError> {
        self.calls.lock().await.remove(llm_call_id);
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
        let store = InMemoryLlmCallStore::new();
        let call = LlmCall::new("gpt", vec![LlmMessage::user("hi")]);
        store.save_response(&call).await.unwrap();

        let loaded = store.get_call(&call.id).await.unwrap().unwrap();
        assert_eq!(loaded.chunk_count, 0);
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].content.as_text(), "hi");
    }

    #[tokio::test]
    async fn chunked_call_round_trips_with_identical_messages() {
        let store = InMemoryLlmCallStore::new();
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
    async fn get_calls_for_agent_filters_and_sorts_by_request_time_desc() {
        let store = InMemoryLlmCallStore::new();
        let mut earlier = LlmCall::new("gpt", vec![LlmMessage::user("a")]);
        earlier.agent_id = Some("agent-1".into());
        earlier.request_time = 100;

        let mut later = LlmCall::new("gpt", vec![LlmMessage::user("b")]);
        later.agent_id = Some("agent-1".into());
        later.request_time = 200;

        let mut other = LlmCall::new("gpt", vec![LlmMessage::user("c")]);
        other.agent_id = Some("agent-2".into());

        store.save_response(&earlier).await.unwrap();
        store.save_response(&later).await.unwrap();
        store.save_response(&other).await.unwrap();

        let calls = store.get_calls_for_agent("agent-1").await.unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, later.id);
        assert_eq!(calls[1].id, earlier.id);
    }

    #[tokio::test]
    async fn delete_removes_all_records_for_the_id() {
        let store = InMemoryLlmCallStore::new();
        let call = LlmCall::new("gpt", vec![big_message(700_000), big_message(700_000)]);
        store.save_response(&call).await.unwrap();
        store.delete(&call.llm_call_id).await.unwrap();
        assert!(store.get_call(&call.id).await.unwrap().is_none());
    }
}
