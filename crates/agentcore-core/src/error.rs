use thiserror::Error;

/// Error taxonomy shared across the storage, streaming, cost and gateway
/// crates. Every variant maps to a stable `code()` string so a client can
/// branch on the wire error without parsing the message text.
#[derive(Debug, Error)]
pub enum AgentCoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Provider error ({provider}): {reason}")]
    Provider { provider: String, reason: String },

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentCoreError {
    /// Stable error code surfaced on SSE `error` events and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AgentCoreError::Config(_) => "CONFIG_ERROR",
            AgentCoreError::Storage(_) => "STORAGE_ERROR",
            AgentCoreError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            AgentCoreError::Stream(_) => "STREAM_ERROR",
            AgentCoreError::Agent(_) => "AGENT_ERROR",
            AgentCoreError::Provider { .. } => "AGENT_ERROR",
            AgentCoreError::Timeout { .. } => "TIMEOUT",
            AgentCoreError::Validation(_) => "VALIDATION_ERROR",
            AgentCoreError::Serialization(_) => "SERIALIZATION_ERROR",
            AgentCoreError::Io(_) => "IO_ERROR",
            AgentCoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentCoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_surface_as_agent_error() {
        let err = AgentCoreError::Provider {
            provider: "anthropic".into(),
            reason: "rate limited".into(),
        };
        assert_eq!(err.code(), "AGENT_ERROR");
    }

    #[test]
    fn session_not_found_carries_the_id_in_the_message() {
        let err = AgentCoreError::SessionNotFound {
            id: "sess-1".into(),
        };
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
        assert!(err.to_string().contains("sess-1"));
    }
}
