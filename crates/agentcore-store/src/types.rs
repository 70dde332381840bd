use agentcore_core::model::{ContentBlock, Role};
use agentcore_core::{SessionId, UserId};

/// Opaque handle returned by [`crate::Store::open_session`]. Carries just
/// enough to address subsequent calls — backends are free to stash
/// whatever extra bookkeeping they need behind it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub user_id: UserId,
}

/// A message awaiting persistence. Sequence is assigned by the backend at
/// flush time, not by the caller — this mirrors the buffer-then-flush
/// design of the reference session buffer this is grounded on.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

/// Partial update applied to a session's metadata document. `None` means
/// "leave unchanged" for every field except `compaction_state`, which
/// uses a nested `Option<Option<_>>` would be unwieldy — callers instead
/// set it only when they mean to change it.
#[derive(Debug, Clone, Default)]
pub struct SessionMetadataPatch {
    pub title: Option<String>,
    pub status: Option<agentcore_core::model::SessionStatus>,
    pub preferences: Option<agentcore_core::model::SessionPreferences>,
    pub compaction_state: Option<agentcore_core::model::CompactionState>,
}
