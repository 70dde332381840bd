//! The per-session façade the coordinator and gateway are wired against.
//!
//! Grounded on `skynet_sessions::manager::SessionManager` (one manager
//! wrapping the chosen backend, injected once at startup) — generalized
//! from "always SQLite" to "either `LocalFileStore` or `CloudKvStore`,
//! chosen by `AgentCoreConfig::memory_type`".

use std::sync::Arc;

use async_trait::async_trait;

use agentcore_core::config::{AgentCoreConfig, MemoryType};
use agentcore_core::model::{Message, MessageMetadata, Session};

use crate::cloud::CloudKvStore;
use crate::error::Result;
use crate::kv::InMemoryKvBackend;
use crate::local::LocalFileStore;
use crate::types::{PendingMessage, SessionHandle, SessionMetadataPatch};
use crate::Store;

/// Wraps whichever backend `AgentCoreConfig::memory_type` selects behind
/// one [`Store`] implementation, so callers never match on backend kind.
pub enum SessionStore {
    Local(LocalFileStore),
    Cloud(CloudKvStore<InMemoryKvBackend>),
}

impl SessionStore {
    /// Build the backend named by `config.memory_type`. The cloud variant
    /// uses the in-memory reference `KvBackend` here — a deployment with
    /// real AWS credentials would construct `CloudKvStore` directly with
    /// a DynamoDB-backed `KvBackend` implementation instead of going
    /// through this constructor.
    pub fn from_config(config: &AgentCoreConfig) -> Self {
        match config.memory_type {
            MemoryType::File => SessionStore::Local(LocalFileStore::new(Some(&config.sessions_dir))),
            MemoryType::Dynamodb => {
                SessionStore::Cloud(CloudKvStore::new(Arc::new(InMemoryKvBackend::new())))
            }
        }
    }

    pub fn local(sessions_dir: Option<&str>) -> Self {
        SessionStore::Local(LocalFileStore::new(sessions_dir))
    }

    pub fn cloud_in_memory() -> Self {
        SessionStore::Cloud(CloudKvStore::new(Arc::new(InMemoryKvBackend::new())))
    }
}

#[async_trait]
impl Store for SessionStore {
    async fn open_session(&self, session_id: &str, user_id: &str) -> Result<SessionHandle> {
        match self {
            SessionStore::Local(s) => s.open_session(session_id, user_id).await,
            SessionStore::Cloud(s) => s.open_session(session_id, user_id).await,
        }
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        match self {
            SessionStore::Local(s) => s.get_session(session_id).await,
            SessionStore::Cloud(s) => s.get_session(session_id).await,
        }
    }

    async fn append(&self, handle: &SessionHandle, msg: PendingMessage) -> Result<()> {
        match self {
            SessionStore::Local(s) => s.append(handle, msg).await,
            SessionStore::Cloud(s) => s.append(handle, msg).await,
        }
    }

    async fn flush(&self, handle: &SessionHandle) -> Result<Option<u64>> {
        match self {
            SessionStore::Local(s) => s.flush(handle).await,
            SessionStore::Cloud(s) => s.flush(handle).await,
        }
    }

    async fn cancel(&self, handle: &SessionHandle) -> Result<()> {
        match self {
            SessionStore::Local(s) => s.cancel(handle).await,
            SessionStore::Cloud(s) => s.cancel(handle).await,
        }
    }

    async fn list_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<(Vec<Message>, Option<String>)> {
        match self {
            SessionStore::Local(s) => s.list_messages(session_id, limit, cursor).await,
            SessionStore::Cloud(s) => s.list_messages(session_id, limit, cursor).await,
        }
    }

    async fn write_message_metadata(
        &self,
        session_id: &str,
        message_id: &str,
        meta: MessageMetadata,
    ) -> Result<()> {
        match self {
            SessionStore::Local(s) => s.write_message_metadata(session_id, message_id, meta).await,
            SessionStore::Cloud(s) => s.write_message_metadata(session_id, message_id, meta).await,
        }
    }

    async fn update_session_metadata(&self, session_id: &str, patch: SessionMetadataPatch) -> Result<()> {
        match self {
            SessionStore::Local(s) => s.update_session_metadata(session_id, patch).await,
            SessionStore::Cloud(s) => s.update_session_metadata(session_id, patch).await,
        }
    }

    async fn update_after_turn(&self, session_id: &str, total_input_tokens: u64) -> Result<()> {
        match self {
            SessionStore::Local(s) => s.update_after_turn(session_id, total_input_tokens).await,
            SessionStore::Cloud(s) => s.update_after_turn(session_id, total_input_tokens).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_config_selects_local_backend_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentCoreConfig::default();
        config.sessions_dir = dir.path().to_str().unwrap().to_string();
        let store = SessionStore::from_config(&config);
        assert!(matches!(store, SessionStore::Local(_)));
    }

    #[tokio::test]
    async fn from_config_selects_cloud_backend_when_configured() {
        let mut config = AgentCoreConfig::default();
        config.memory_type = MemoryType::Dynamodb;
        let store = SessionStore::from_config(&config);
        assert!(matches!(store, SessionStore::Cloud(_)));
    }
}
