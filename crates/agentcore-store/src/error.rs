use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {id}")]
    SessionNotFound { id: String },

    #[error("conditional write failed: item already exists for key {0}")]
    ConditionalCheckFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for agentcore_core::AgentCoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SessionNotFound { id } => agentcore_core::AgentCoreError::SessionNotFound { id },
            StoreError::Io(e) => agentcore_core::AgentCoreError::Io(e),
            StoreError::Serialization(e) => agentcore_core::AgentCoreError::Serialization(e),
            other => agentcore_core::AgentCoreError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
