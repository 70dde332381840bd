pub mod cloud;
pub mod compaction;
pub mod cursor;
pub mod error;
pub mod kv;
pub mod local;
pub mod path;
pub mod session;
pub mod types;

pub use error::{Result, StoreError};
pub use kv::{InMemoryKvBackend, KvBackend};
pub use session::SessionStore;
pub use types::{PendingMessage, SessionHandle, SessionMetadataPatch};

use agentcore_core::model::{Message, MessageMetadata, Session};
use async_trait::async_trait;

/// Storage seam both backends implement. The coordinator, compaction
/// engine, and cost aggregator all talk to this trait — never to
/// `LocalFileStore`/`CloudKvStore` directly — so either one is a drop-in
/// choice of `AGENTCORE_MEMORY_TYPE`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Return the session's handle, creating a new session record if one
    /// doesn't exist yet.
    async fn open_session(&self, session_id: &str, user_id: &str) -> Result<SessionHandle>;

    /// Read the full session document — title, status, preferences, and
    /// compaction state — or `None` if it has never been opened.
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Buffer a message for later persistence. Implementations may flush
    /// eagerly once a batch threshold is reached.
    async fn append(&self, handle: &SessionHandle, msg: PendingMessage) -> Result<()>;

    /// Force any buffered messages to disk/storage. Returns the sequence
    /// number of the last message written, or `None` if nothing was
    /// pending and nothing was already on disk.
    async fn flush(&self, handle: &SessionHandle) -> Result<Option<u64>>;

    /// Mark the session cancelled: further `append` calls are silently
    /// dropped rather than erroring, matching in-flight-turn semantics
    /// where the client has already disconnected.
    async fn cancel(&self, handle: &SessionHandle) -> Result<()>;

    /// Page through a session's persisted messages, oldest first.
    async fn list_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
        cursor: Option<String>,
    ) -> Result<(Vec<Message>, Option<String>)>;

    /// Write a message's metadata sidecar. Must be idempotent-safe to
    /// call at most once per message; callers never overwrite.
    async fn write_message_metadata(
        &self,
        session_id: &str,
        message_id: &str,
        meta: MessageMetadata,
    ) -> Result<()>;

    /// Apply a partial update to the session's metadata document.
    async fn update_session_metadata(&self, session_id: &str, patch: SessionMetadataPatch) -> Result<()>;

    /// Record the input-token count for the turn just completed. Used by
    /// the compaction engine to decide whether to advance the checkpoint.
    async fn update_after_turn(&self, session_id: &str, total_input_tokens: u64) -> Result<()>;
}
