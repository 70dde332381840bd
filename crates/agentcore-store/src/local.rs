//! JSON-file backend for local development.
//!
//! Grounded on `original_source::apis.app_api.storage.paths`/
//! `local_file_storage.py` for the on-disk layout, and on
//! `original_source::agents.main_agent.session.local_session_buffer`
//! (cancellation flag, buffered append, flush-returns-last-sequence) for
//! the in-memory buffering discipline. The guarded-handle-per-session
//! shape follows `skynet_memory::manager::MemoryManager`'s
//! `Mutex`-wrapped-state pattern, swapped from a SQLite connection to a
//! plain `Vec<PendingMessage>` buffer since the spec calls for JSON files
//! here, not a database.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use agentcore_core::model::{
    ContentBlock, Message, MessageMetadata, Session, SessionPreferences, SessionStatus,
};
use agentcore_core::{AgentId, SessionId, UserId};

use crate::error::{Result, StoreError};
use crate::path;
use crate::types::{PendingMessage, SessionHandle, SessionMetadataPatch};
use crate::Store;

const DEFAULT_BATCH_SIZE: usize = 5;

struct SessionBuffer {
    cancelled: bool,
    pending: Vec<PendingMessage>,
}

impl SessionBuffer {
    fn new() -> Self {
        Self {
            cancelled: false,
            pending: Vec::new(),
        }
    }
}

/// On-disk record for `session-metadata.json`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SessionRecord {
    session_id: SessionId,
    user_id: UserId,
    agent_id: AgentId,
    title: Option<String>,
    status: SessionStatus,
    created_at: chrono::DateTime<chrono::Utc>,
    last_message_at: chrono::DateTime<chrono::Utc>,
    message_count: u64,
    #[serde(default)]
    preferences: Option<SessionPreferences>,
    #[serde(default)]
    compaction_state: Option<agentcore_core::model::CompactionState>,
}

impl From<SessionRecord> for Session {
    fn from(r: SessionRecord) -> Self {
        Session {
            session_id: r.session_id,
            user_id: r.user_id,
            agent_id: r.agent_id,
            title: r.title,
            status: r.status,
            created_at: r.created_at,
            last_message_at: r.last_message_at,
            message_count: r.message_count,
            preferences: r.preferences,
            compaction_state: r.compaction_state,
        }
    }
}

/// On-disk record for one `message_{n}.json` file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct MessageRecord {
    sequence: u64,
    created_at: chrono::DateTime<chrono::Utc>,
    role: agentcore_core::model::Role,
    content: Vec<ContentBlock>,
}

pub struct LocalFileStore {
    root: PathBuf,
    batch_size: usize,
    buffers: DashMap<String, Arc<Mutex<SessionBuffer>>>,
}

impl LocalFileStore {
    pub fn new(sessions_dir: Option<&str>) -> Self {
        Self {
            root: path::sessions_root(sessions_dir),
            batch_size: DEFAULT_BATCH_SIZE,
            buffers: DashMap::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn buffer_for(&self, session_id: &str) -> Arc<Mutex<SessionBuffer>> {
        self.buffers
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionBuffer::new())))
            .clone()
    }

    async fn read_session_record(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let path = path::session_metadata_path(&self.root, &SessionId::from(session_id));
        if !path.exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn write_session_record(&self, record: &SessionRecord) -> Result<()> {
        let session_path = path::session_dir(&self.root, &record.session_id);
        tokio::fs::create_dir_all(&session_path).await?;
        let path = path::session_metadata_path(&self.root, &record.session_id);
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    /// Highest message sequence already on disk, or `None` if the session
    /// has no persisted messages yet.
    async fn latest_sequence(&self, session_id: &SessionId) -> Result<Option<u64>> {
        let dir = path::messages_dir(&self.root, session_id);
        if !dir.exists() {
            return Ok(None);
        }
        let mut highest: Option<u64> = None;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_prefix("message_").and_then(|s| s.strip_suffix(".json")) {
                if let Ok(seq) = stem.parse::<u64>() {
                    highest = Some(highest.map_or(seq, |h: u64| h.max(seq)));
                }
            }
        }
        Ok(highest)
    }

    #[instrument(skip(self, buffer), fields(session_id))]
    async fn flush_locked(&self, session_id: &str, buffer: &mut SessionBuffer) -> Result<Option<u64>> {
        let sid = SessionId::from(session_id);
        if !buffer.pending.is_empty() {
            let mut next_seq = self.latest_sequence(&sid).await?.map(|s| s + 1).unwrap_or(0);
            let dir = path::messages_dir(&self.root, &sid);
            tokio::fs::create_dir_all(&dir).await?;

            let count = buffer.pending.len() as u64;
            for pending in buffer.pending.drain(..) {
                let record = MessageRecord {
                    sequence: next_seq,
                    created_at: chrono::Utc::now(),
                    role: pending.role,
                    content: pending.content,
                };
                let file_path = path::message_path(&self.root, &sid, next_seq);
                let bytes = serde_json::to_vec_pretty(&record)?;
                tokio::fs::write(&file_path, bytes).await?;
                debug!(sequence = next_seq, "wrote message to disk");
                next_seq += 1;
            }

            if let Some(mut record) = self.read_session_record(session_id).await? {
                record.message_count += count;
                record.last_message_at = chrono::Utc::now();
                self.write_session_record(&record).await?;
            }
        }

        Ok(self.latest_sequence(&sid).await?)
    }
}

#[async_trait]
impl Store for LocalFileStore {
    #[instrument(skip(self), fields(session_id, user_id))]
    async fn open_session(&self, session_id: &str, user_id: &str) -> Result<SessionHandle> {
        if self.read_session_record(session_id).await?.is_none() {
            let now = chrono::Utc::now();
            let record = SessionRecord {
                session_id: SessionId::from(session_id),
                user_id: UserId::from(user_id),
                agent_id: AgentId::main(),
                title: None,
                status: SessionStatus::Active,
                created_at: now,
                last_message_at: now,
                message_count: 0,
                preferences: None,
                compaction_state: None,
            };
            self.write_session_record(&record).await?;
            info!("created new local session");
        }

        Ok(SessionHandle {
            session_id: SessionId::from(session_id),
            user_id: UserId::from(user_id),
        })
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.read_session_record(session_id).await?.map(Session::from))
    }

    async fn append(&self, handle: &SessionHandle, msg: PendingMessage) -> Result<()> {
        let buffer = self.buffer_for(handle.session_id.as_str());
        let mut guard = buffer.lock().await;
        if guard.cancelled {
            debug!(session_id = %handle.session_id, "session cancelled, dropping message");
            return Ok(());
        }
        guard.pending.push(msg);
        if guard.pending.len() >= self.batch_size {
            self.flush_locked(handle.session_id.as_str(), &mut guard).await?;
        }
        Ok(())
    }

    async fn flush(&self, handle: &SessionHandle) -> Result<Option<u64>> {
        let buffer = self.buffer_for(handle.session_id.as_str());
        let mut guard = buffer.lock().await;
        self.flush_locked(handle.session_id.as_str(), &mut guard).await
    }

    async fn cancel(&self, handle: &SessionHandle) -> Result<()> {
        let buffer = self.buffer_for(handle.session_id.as_str());
        let mut guard = buffer.lock().await;
        guard.cancelled = true;
        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<(Vec<Message>, Option<String>)> {
        let sid = SessionId::from(session_id);
        let dir = path::messages_dir(&self.root, &sid);
        if !dir.exists() {
            return Ok((Vec::new(), None));
        }

        let start_after: u64 = cursor.and_then(|c| crate::cursor::decode(&c)).unwrap_or(0);
        let mut sequences = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_prefix("message_").and_then(|s| s.strip_suffix(".json")) {
                if let Ok(seq) = stem.parse::<u64>() {
                    if seq >= start_after {
                        sequences.push(seq);
                    }
                }
            }
        }
        sequences.sort_unstable();

        let page_size = limit.unwrap_or(usize::MAX);
        let mut messages = Vec::new();
        let mut next_cursor = None;
        for (idx, seq) in sequences.iter().enumerate() {
            if idx >= page_size {
                next_cursor = Some(crate::cursor::encode(*seq));
                break;
            }
            let file_path = path::message_path(&self.root, &sid, *seq);
            let bytes = tokio::fs::read(&file_path).await?;
            let record: MessageRecord = serde_json::from_slice(&bytes)?;
            messages.push(Message {
                session_id: sid.clone(),
                sequence: record.sequence,
                role: record.role,
                content: record.content,
                created_at: record.created_at,
            });
        }

        Ok((messages, next_cursor))
    }

    async fn write_message_metadata(
        &self,
        session_id: &str,
        message_id: &str,
        meta: MessageMetadata,
    ) -> Result<()> {
        let sid = SessionId::from(session_id);
        let path = path::message_metadata_path(&self.root, &sid);
        tokio::fs::create_dir_all(path::session_dir(&self.root, &sid)).await?;

        let mut all: HashMap<String, MessageMetadata> = if path.exists() {
            let bytes = tokio::fs::read(&path).await?;
            if bytes.is_empty() {
                HashMap::new()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            HashMap::new()
        };

        let cost = meta.cost;
        all.insert(message_id.to_string(), meta);
        let bytes = serde_json::to_vec_pretty(&all)?;
        tokio::fs::write(&path, bytes).await?;

        self.accumulate_session_cost_summary(&sid, cost).await?;
        Ok(())
    }

    async fn update_session_metadata(&self, session_id: &str, patch: SessionMetadataPatch) -> Result<()> {
        let mut record = self
            .read_session_record(session_id)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        if let Some(title) = patch.title {
            record.title = Some(title);
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(preferences) = patch.preferences {
            record.preferences = Some(preferences);
        }
        if let Some(compaction_state) = patch.compaction_state {
            record.compaction_state = Some(compaction_state);
        }

        self.write_session_record(&record).await
    }

    async fn update_after_turn(&self, session_id: &str, total_input_tokens: u64) -> Result<()> {
        let mut record = self
            .read_session_record(session_id)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        let mut state = record.compaction_state.unwrap_or_default();
        state.last_input_tokens = total_input_tokens;
        record.compaction_state = Some(state);
        self.write_session_record(&record).await
    }
}

impl LocalFileStore {
    /// Local mirror of the cloud aggregator: no global user index exists
    /// for the file backend, so per-session running totals are kept in
    /// `cost-summary.json` instead (development-only convenience, not
    /// used for quota decisions).
    async fn accumulate_session_cost_summary(&self, session_id: &SessionId, cost_delta: f64) -> Result<()> {
        let path = path::cost_summary_path(&self.root, session_id);
        tokio::fs::create_dir_all(path::session_dir(&self.root, session_id)).await?;

        let mut totals: serde_json::Map<String, serde_json::Value> = if path.exists() {
            let bytes = tokio::fs::read(&path).await?;
            if bytes.is_empty() {
                serde_json::Map::new()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            serde_json::Map::new()
        };

        let total_cost = totals.get("total_cost").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let total_requests = totals.get("total_requests").and_then(|v| v.as_u64()).unwrap_or(0);
        totals.insert("total_cost".into(), serde_json::json!(total_cost + cost_delta));
        totals.insert("total_requests".into(), serde_json::json!(total_requests + 1));
        totals.insert("last_updated".into(), serde_json::json!(chrono::Utc::now()));

        let bytes = serde_json::to_vec_pretty(&totals)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore_core::model::Role as MsgRole;

    async fn store_in_tempdir() -> (tempfile::TempDir, LocalFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(Some(dir.path().to_str().unwrap())).with_batch_size(2);
        (dir, store)
    }

    #[tokio::test]
    async fn append_buffers_until_batch_size_then_flushes() {
        let (_dir, store) = store_in_tempdir().await;
        let handle = store.open_session("s1", "u1").await.unwrap();

        store
            .append(&handle, PendingMessage { role: MsgRole::User, content: vec![ContentBlock::text("hi")] })
            .await
            .unwrap();
        let (messages, _) = store.list_messages("s1", None, None).await.unwrap();
        assert!(messages.is_empty(), "should not flush before batch size reached");

        store
            .append(&handle, PendingMessage { role: MsgRole::Assistant, content: vec![ContentBlock::text("hello")] })
            .await
            .unwrap();
        let (messages, _) = store.list_messages("s1", None, None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sequence, 0);
        assert_eq!(messages[1].sequence, 1);
    }

    #[tokio::test]
    async fn flush_returns_last_sequence_and_is_idempotent_when_empty() {
        let (_dir, store) = store_in_tempdir().await;
        let handle = store.open_session("s1", "u1").await.unwrap();
        assert_eq!(store.flush(&handle).await.unwrap(), None);

        store
            .append(&handle, PendingMessage { role: MsgRole::User, content: vec![ContentBlock::text("hi")] })
            .await
            .unwrap();
        assert_eq!(store.flush(&handle).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn cancelled_session_drops_further_appends() {
        let (_dir, store) = store_in_tempdir().await;
        let handle = store.open_session("s1", "u1").await.unwrap();
        store.cancel(&handle).await.unwrap();
        store
            .append(&handle, PendingMessage { role: MsgRole::User, content: vec![ContentBlock::text("hi")] })
            .await
            .unwrap();
        assert_eq!(store.flush(&handle).await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_message_metadata_accumulates_session_cost_summary() {
        let (_dir, store) = store_in_tempdir().await;
        let handle = store.open_session("s1", "u1").await.unwrap();
        let meta = sample_metadata(0.05);
        store.write_message_metadata("s1", "msg-s1-0", meta).await.unwrap();
        let meta2 = sample_metadata(0.03);
        store.write_message_metadata("s1", "msg-s1-1", meta2).await.unwrap();

        let path = path::cost_summary_path(&store.root, &handle.session_id);
        let bytes = tokio::fs::read(path).await.unwrap();
        let totals: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(totals["total_requests"], 2);
        assert!((totals["total_cost"].as_f64().unwrap() - 0.08).abs() < 1e-9);
    }

    #[tokio::test]
    async fn get_session_reflects_metadata_patches() {
        let (_dir, store) = store_in_tempdir().await;
        store.open_session("s1", "u1").await.unwrap();
        store
            .update_session_metadata(
                "s1",
                SessionMetadataPatch { title: Some("My Session".into()), ..Default::default() },
            )
            .await
            .unwrap();
        let session = store.get_session("s1").await.unwrap().expect("session exists");
        assert_eq!(session.title.as_deref(), Some("My Session"));
        assert!(store.get_session("missing").await.unwrap().is_none());
    }

    fn sample_metadata(cost: f64) -> MessageMetadata {
        use agentcore_core::model::*;
        MessageMetadata {
            message_id: agentcore_core::MessageId::for_sequence(&SessionId::from("s1"), 0),
            token_usage: TokenUsage::default(),
            latency: Latency::default(),
            model_info: ModelInfo {
                model_id: agentcore_core::ModelId::from("anthropic.claude-3-5-sonnet:v2"),
                model_name: "Claude 3.5 Sonnet".into(),
                provider: "bedrock".into(),
                pricing_snapshot: PricingSnapshot {
                    input_price_per_mtok: 3.0,
                    output_price_per_mtok: 15.0,
                    cache_read_price_per_mtok: Some(0.3),
                    cache_write_price_per_mtok: Some(3.75),
                    currency: "USD".into(),
                    snapshot_at: chrono::Utc::now(),
                },
            },
            attribution: Attribution {
                user_id: UserId::from("u1"),
                session_id: SessionId::from("s1"),
                timestamp: chrono::Utc::now(),
            },
            cost,
        }
    }
}
