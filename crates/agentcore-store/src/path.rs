//! Deterministic filesystem layout for [`crate::local::LocalFileStore`].
//!
//! Single source of truth for every path the local backend touches, so
//! layout changes happen in one place instead of being scattered across
//! read/write call sites.

use agentcore_core::SessionId;
use std::path::{Path, PathBuf};

/// Root directory for all local sessions. `None` falls back to
/// `./sessions` relative to the process's current directory.
pub fn sessions_root(override_dir: Option<&str>) -> PathBuf {
    match override_dir {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from("./sessions"),
    }
}

pub fn session_dir(root: &Path, session_id: &SessionId) -> PathBuf {
    root.join(format!("session_{}", session_id))
}

pub fn messages_dir(root: &Path, session_id: &SessionId) -> PathBuf {
    session_dir(root, session_id)
        .join("agents")
        .join("agent_default")
        .join("messages")
}

pub fn message_path(root: &Path, session_id: &SessionId, sequence: u64) -> PathBuf {
    messages_dir(root, session_id).join(format!("message_{}.json", sequence))
}

pub fn session_metadata_path(root: &Path, session_id: &SessionId) -> PathBuf {
    session_dir(root, session_id).join("session-metadata.json")
}

pub fn message_metadata_path(root: &Path, session_id: &SessionId) -> PathBuf {
    session_dir(root, session_id).join("message-metadata.json")
}

pub fn cost_summary_path(root: &Path, session_id: &SessionId) -> PathBuf {
    session_dir(root, session_id).join("cost-summary.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_documented_example() {
        let root = sessions_root(Some("sessions"));
        let session_id = SessionId::from("abc123");
        assert_eq!(
            message_path(&root, &session_id, 1),
            PathBuf::from("sessions/session_abc123/agents/agent_default/messages/message_1.json")
        );
        assert_eq!(
            session_metadata_path(&root, &session_id),
            PathBuf::from("sessions/session_abc123/session-metadata.json")
        );
    }
}
