//! Retrieval-augmented prompt context, grounded on
//! `original_source::apis.app_api.assistants.services.rag_service`
//! (`search_assistant_knowledgebase_with_formatting` /
//! `augment_prompt_with_context`), behind a [`VectorStore`] seam so no
//! concrete embeddings backend is fabricated here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

const DEFAULT_TOP_K: usize = 5;
const DEFAULT_MAX_CONTEXT_CHARS: usize = 2000;

/// One chunk retrieved from an assistant's knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub distance: f64,
    pub key: String,
    pub metadata: serde_json::Value,
    pub s3_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("vector store backend error: {0}")]
    Backend(String),
}

/// The seam a concrete embeddings/vector backend implements. Errors are
/// never fatal to the turn — [`RagContextService`] degrades to the
/// original user message on any `Err`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(&self, assistant_id: &str, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>, VectorStoreError>;
}

/// Reference implementation with no backing index — always returns zero
/// chunks. Useful for wiring tests and for assistants with no knowledge
/// base configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyVectorStore;

#[async_trait]
impl VectorStore for EmptyVectorStore {
    async fn search(&self, _assistant_id: &str, _query: &str, _top_k: usize) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
        Ok(Vec::new())
    }
}

pub struct RagContextService {
    store: Arc<dyn VectorStore>,
}

impl RagContextService {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// `search(assistant_id, query, top_k=5)` (spec §4.7). Graceful
    /// degradation: a backend error is logged and surfaced as zero
    /// chunks rather than propagated.
    #[instrument(skip(self, query))]
    pub async fn search(&self, assistant_id: &str, query: &str, top_k: Option<usize>) -> Vec<RetrievedChunk> {
        match self.store.search(assistant_id, query, top_k.unwrap_or(DEFAULT_TOP_K)).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(error = %err, assistant_id, "knowledge base search failed, continuing without context");
                Vec::new()
            }
        }
    }

    /// Search the assistant's knowledge base and augment `user_msg` with
    /// whatever context was found. Zero chunks (no knowledge base hit,
    /// or a backend error) leaves the message unchanged.
    pub async fn search_and_augment(&self, assistant_id: &str, user_msg: &str, top_k: Option<usize>) -> String {
        let chunks = self.search(assistant_id, user_msg, top_k).await;
        augment(user_msg, &chunks, DEFAULT_MAX_CONTEXT_CHARS)
    }
}

/// `augment(user_msg, chunks, max_context_chars=2000)` (spec §4.7).
/// Prepends numbered context blocks ahead of the user's question,
/// truncating the last chunk that would overflow the budget instead of
/// dropping it outright. Zero chunks returns `user_msg` unchanged.
pub fn augment(user_msg: &str, chunks: &[RetrievedChunk], max_context_chars: usize) -> String {
    if chunks.is_empty() {
        return user_msg.to_string();
    }

    let mut parts = Vec::new();
    let mut total_len = 0usize;

    for (i, chunk) in chunks.iter().enumerate() {
        let text = chunk.text.trim();
        if text.is_empty() {
            continue;
        }
        let idx = i + 1;
        let header_len = format!("[Context {idx}]\n\n").chars().count();
        let with_header = format!("[Context {idx}]\n{text}\n");

        if total_len + with_header.chars().count() > max_context_chars {
            let remaining = max_context_chars.saturating_sub(total_len + header_len);
            if remaining > 0 {
                let truncated: String = text.chars().take(remaining).collect();
                parts.push(format!("[Context {idx}]\n{truncated}...\n"));
            }
            break;
        }

        total_len += with_header.chars().count();
        parts.push(with_header);
    }

    if parts.is_empty() {
        return user_msg.to_string();
    }

    let context_section = parts.join("\n");
    format!(
        "The following context is retrieved from the assistant's knowledge base. Use this information to answer the user's question accurately and comprehensively.\n\n{context_section}\n---\nUser Question: {user_msg}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> RetrievedChunk {
        RetrievedChunk {
            text: text.to_string(),
            distance: 0.1,
            key: "k".to_string(),
            metadata: serde_json::json!({}),
            s3_url: None,
        }
    }

    #[test]
    fn zero_chunks_returns_message_unchanged() {
        assert_eq!(augment("what's the policy?", &[], 2000), "what's the policy?");
    }

    #[test]
    fn augmented_message_includes_numbered_context_and_question() {
        let out = augment("what's the policy?", &[chunk("PTO is 20 days."), chunk("Sick leave is separate.")], 2000);
        assert!(out.contains("[Context 1]\nPTO is 20 days."));
        assert!(out.contains("[Context 2]\nSick leave is separate."));
        assert!(out.ends_with("User Question: what's the policy?"));
    }

    #[test]
    fn augmentation_never_exceeds_budget() {
        let big = chunk(&"x".repeat(5000));
        let out = augment("q", &[big], 200);
        assert!(out.len() < 500);
        assert!(out.contains("..."));
    }

    #[tokio::test]
    async fn empty_store_degrades_to_unmodified_message() {
        let service = RagContextService::new(Arc::new(EmptyVectorStore));
        let out = service.search_and_augment("asst-1", "hello", None).await;
        assert_eq!(out, "hello");
    }
}
