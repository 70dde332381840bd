pub mod error;
pub mod multimodal;
pub mod rag;

pub use error::{PromptError, Result};
pub use multimodal::{build_prompt, sanitize_filename, Attachment};
pub use rag::{augment, EmptyVectorStore, RagContextService, RetrievedChunk, VectorStore, VectorStoreError};
