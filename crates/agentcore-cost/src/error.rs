use thiserror::Error;

#[derive(Debug, Error)]
pub enum CostError {
    #[error("pricing snapshot is missing required field(s)")]
    InvalidPricing,

    #[error("usage is missing required field(s)")]
    InvalidUsage,

    #[error(transparent)]
    Store(#[from] agentcore_store::error::StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CostError> for agentcore_core::AgentCoreError {
    fn from(err: CostError) -> Self {
        match err {
            CostError::Store(e) => e.into(),
            CostError::Serialization(e) => agentcore_core::AgentCoreError::Serialization(e),
            other => agentcore_core::AgentCoreError::Validation(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CostError>;
