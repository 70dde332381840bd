//! DynamoDB-shaped backend on top of [`KvBackend`].
//!
//! Key scheme mirrors `original_source::apis.app_api.storage.dynamodb_storage`:
//! one table, `pk = SESSION#{session_id}`, messages and metadata
//! distinguished by sort-key prefix (`MSG#` / `META#`) so `query_begins_with`
//! doubles as the GSI access pattern for "all messages in a session".
//! Sequence numbers are zero-padded in the sort key so lexicographic and
//! numeric order agree.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::instrument;

use agentcore_core::model::{Message, MessageMetadata, SessionStatus};
use agentcore_core::{AgentId, SessionId, UserId};

use crate::error::{Result, StoreError};
use crate::kv::KvBackend;
use crate::types::{PendingMessage, SessionHandle, SessionMetadataPatch};
use crate::Store;

const DEFAULT_BATCH_SIZE: usize = 5;
const SESSION_META_SK: &str = "METADATA";
const MSG_SK_PREFIX: &str = "MSG#";
const META_SK_PREFIX: &str = "META#";

fn session_pk(session_id: &str) -> String {
    format!("SESSION#{session_id}")
}

fn msg_sk(sequence: u64) -> String {
    format!("{MSG_SK_PREFIX}{sequence:010}")
}

fn meta_sk(message_id: &str) -> String {
    format!("{META_SK_PREFIX}{message_id}")
}

pub struct CloudKvStore<B: KvBackend> {
    backend: Arc<B>,
    batch_size: usize,
    buffers: dashmap::DashMap<String, Arc<Mutex<Vec<PendingMessage>>>>,
    cancelled: dashmap::DashSet<String>,
}

impl<B: KvBackend> CloudKvStore<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            batch_size: DEFAULT_BATCH_SIZE,
            buffers: dashmap::DashMap::new(),
            cancelled: dashmap::DashSet::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn buffer_for(&self, session_id: &str) -> Arc<Mutex<Vec<PendingMessage>>> {
        self.buffers
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    async fn highest_sequence(&self, session_id: &str) -> Result<Option<u64>> {
        let items = self
            .backend
            .query_begins_with(&session_pk(session_id), MSG_SK_PREFIX)
            .await?;
        Ok(items
            .last()
            .and_then(|v| v.get("sequence"))
            .and_then(|v| v.as_u64()))
    }

    async fn flush_pending(&self, session_id: &str, pending: &mut Vec<PendingMessage>) -> Result<Option<u64>> {
        if !pending.is_empty() {
            let mut next_seq = self.highest_sequence(session_id).await?.map(|s| s + 1).unwrap_or(0);
            for msg in pending.drain(..) {
                let record = serde_json::json!({
                    "sequence": next_seq,
                    "created_at": chrono::Utc::now(),
                    "role": msg.role,
                    "content": msg.content,
                });
                self.backend
                    .delete_then_put(&session_pk(session_id), &msg_sk(next_seq), record)
                    .await?;
                next_seq += 1;
            }

            if let Some(mut record) = self.read_session(session_id).await? {
                let added = self.highest_sequence(session_id).await?.map(|s| s + 1).unwrap_or(0);
                record["message_count"] = serde_json::json!(added);
                record["last_message_at"] = serde_json::json!(chrono::Utc::now());
                self.backend
                    .delete_then_put(&session_pk(session_id), SESSION_META_SK, record)
                    .await?;
            }
        }
        self.highest_sequence(session_id).await
    }

    async fn read_session(&self, session_id: &str) -> Result<Option<serde_json::Value>> {
        self.backend.get_item(&session_pk(session_id), SESSION_META_SK).await
    }
}

#[async_trait]
impl<B: KvBackend> Store for CloudKvStore<B> {
    #[instrument(skip(self), fields(session_id, user_id))]
    async fn open_session(&self, session_id: &str, user_id: &str) -> Result<SessionHandle> {
        if self.read_session(session_id).await?.is_none() {
            let now = chrono::Utc::now();
            let record = serde_json::json!({
                "session_id": session_id,
                "user_id": user_id,
                "agent_id": AgentId::main(),
                "title": null,
                "status": SessionStatus::Active,
                "created_at": now,
                "last_message_at": now,
                "message_count": 0,
                "preferences": null,
                "compaction_state": null,
            });
            self.backend
                .put_item_if_absent(&session_pk(session_id), SESSION_META_SK, record, None)
                .await?;
        }

        Ok(SessionHandle {
            session_id: SessionId::from(session_id),
            user_id: UserId::from(user_id),
        })
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<agentcore_core::model::Session>> {
        match self.read_session(session_id).await? {
            Some(record) => Ok(Some(serde_json::from_value(record)?)),
            None => Ok(None),
        }
    }

    async fn append(&self, handle: &SessionHandle, msg: PendingMessage) -> Result<()> {
        if self.cancelled.contains(handle.session_id.as_str()) {
            return Ok(());
        }
        let buffer = self.buffer_for(handle.session_id.as_str());
        let mut guard = buffer.lock().await;
        guard.push(msg);
        if guard.len() >= self.batch_size {
            self.flush_pending(handle.session_id.as_str(), &mut guard).await?;
        }
        Ok(())
    }

    async fn flush(&self, handle: &SessionHandle) -> Result<Option<u64>> {
        let buffer = self.buffer_for(handle.session_id.as_str());
        let mut guard = buffer.lock().await;
        self.flush_pending(handle.session_id.as_str(), &mut guard).await
    }

    async fn cancel(&self, handle: &SessionHandle) -> Result<()> {
        self.cancelled.insert(handle.session_id.as_str().to_string());
        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<(Vec<Message>, Option<String>)> {
        let items = self
            .backend
            .query_begins_with(&session_pk(session_id), MSG_SK_PREFIX)
            .await?;

        let start_after: u64 = cursor.and_then(|c| crate::cursor::decode(&c)).unwrap_or(0);
        let sid = SessionId::from(session_id);
        let page_size = limit.unwrap_or(usize::MAX);

        let mut messages = Vec::new();
        let mut next_cursor = None;
        let mut taken = 0;
        for item in items {
            let sequence = item["sequence"].as_u64().unwrap_or(0);
            if sequence < start_after {
                continue;
            }
            if taken >= page_size {
                next_cursor = Some(crate::cursor::encode(sequence));
                break;
            }
            let role = serde_json::from_value(item["role"].clone())?;
            let content = serde_json::from_value(item["content"].clone())?;
            let created_at = serde_json::from_value(item["created_at"].clone())?;
            messages.push(Message {
                session_id: sid.clone(),
                sequence,
                role,
                content,
                created_at,
            });
            taken += 1;
        }

        Ok((messages, next_cursor))
    }

    async fn write_message_metadata(
        &self,
        session_id: &str,
        message_id: &str,
        meta: MessageMetadata,
    ) -> Result<()> {
        let item = serde_json::to_value(&meta)?;
        self.backend
            .delete_then_put(&session_pk(session_id), &meta_sk(message_id), item)
            .await
    }

    async fn update_session_metadata(&self, session_id: &str, patch: SessionMetadataPatch) -> Result<()> {
        let mut record = self
            .read_session(session_id)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        if let Some(title) = patch.title {
            record["title"] = serde_json::json!(title);
        }
        if let Some(status) = patch.status {
            record["status"] = serde_json::json!(status);
        }
        if let Some(preferences) = patch.preferences {
            record["preferences"] = serde_json::json!(preferences);
        }
        if let Some(compaction_state) = patch.compaction_state {
            record["compaction_state"] = serde_json::json!(compaction_state);
        }

        self.backend
            .delete_then_put(&session_pk(session_id), SESSION_META_SK, record)
            .await
    }

    async fn update_after_turn(&self, session_id: &str, total_input_tokens: u64) -> Result<()> {
        let mut record = self
            .read_session(session_id)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        let mut state: agentcore_core::model::CompactionState = record
            .get("compaction_state")
            .cloned()
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        state.last_input_tokens = total_input_tokens;
        record["compaction_state"] = serde_json::to_value(&state)?;

        self.backend
            .delete_then_put(&session_pk(session_id), SESSION_META_SK, record)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvBackend;
    use agentcore_core::model::{ContentBlock, Role};

    fn store() -> CloudKvStore<InMemoryKvBackend> {
        CloudKvStore::new(Arc::new(InMemoryKvBackend::new())).with_batch_size(1)
    }

    #[tokio::test]
    async fn messages_are_listed_in_sequence_order() {
        let store = store();
        let handle = store.open_session("s1", "u1").await.unwrap();
        for i in 0..3 {
            store
                .append(
                    &handle,
                    PendingMessage {
                        role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                        content: vec![ContentBlock::text(format!("msg {i}"))],
                    },
                )
                .await
                .unwrap();
        }
        let (messages, _) = store.list_messages("s1", None, None).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].sequence, 0);
        assert_eq!(messages[2].sequence, 2);
    }

    #[tokio::test]
    async fn cancel_silently_drops_further_messages() {
        let store = store();
        let handle = store.open_session("s1", "u1").await.unwrap();
        store.cancel(&handle).await.unwrap();
        store
            .append(&handle, PendingMessage { role: Role::User, content: vec![ContentBlock::text("hi")] })
            .await
            .unwrap();
        let (messages, _) = store.list_messages("s1", None, None).await.unwrap();
        assert!(messages.is_empty());
    }
}
