use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("unsupported attachment: {filename} ({content_type})")]
    UnsupportedAttachment { filename: String, content_type: String },

    #[error("vector store error: {0}")]
    VectorStore(String),
}

impl From<PromptError> for agentcore_core::AgentCoreError {
    fn from(err: PromptError) -> Self {
        agentcore_core::AgentCoreError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PromptError>;
