//! The narrow seam a concrete provider adapter (Bedrock, OpenAI-compatible,
//! Gemini, …) emits into.
//!
//! Grounded on `skynet_agent::provider::LlmProvider` for the async-trait
//! shape, generalized from "one method per provider SDK" down to a single
//! raw-event stream: the processor (see [`crate::processor`]) does all the
//! normalization, so an adapter only has to forward whatever its wire
//! format calls each event as, plus the event's JSON body.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Coarse classification of a raw provider event, used by the processor to
/// decide which extraction path applies before it looks at `data` at all.
/// Providers that don't distinguish some of these (most don't emit
/// `complete`/`force_stop` as separate frames) just never produce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawEventKind {
    InitEventLoop,
    StartEventLoop,
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta,
    ContentBlockStop,
    MessageStop,
    ToolUse,
    ToolResult,
    ToolError,
    Reasoning,
    CitationStart,
    CitationEnd,
    /// Usage/latency snapshot, wherever in the wire format it was found.
    Metadata,
    /// A terminal `result` frame distinct from `complete`/`force_stop`.
    Result,
    /// A completion signal that may race with `Result` (see
    /// [`crate::processor`]'s completion-ordering rule).
    Complete,
    ForceStop,
    Error,
    /// Anything the processor doesn't special-case; still passed through
    /// `data` for metadata extraction's four-locations scan.
    Other,
}

/// One event off a provider-native stream, before canonicalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub kind: RawEventKind,
    pub data: serde_json::Value,
}

impl ProviderEvent {
    pub fn new(kind: RawEventKind, data: serde_json::Value) -> Self {
        Self { kind, data }
    }
}

pub type RawEventStream = BoxStream<'static, Result<ProviderEvent, ProviderError>>;

/// Common interface every concrete provider adapter implements. The
/// coordinator never depends on a specific provider — only on this trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error attribution.
    fn name(&self) -> &str;

    /// Open a raw event stream for one turn. The returned stream's item
    /// type is exactly what [`crate::processor::StreamProcessor`] consumes.
    async fn stream(&self, prompt: &crate::ProviderPrompt) -> Result<RawEventStream, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider {provider} returned an error: {message}")]
    Api { provider: String, message: String },

    #[error("failed to parse provider event: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider stream timed out after {0}ms")]
    Timeout(u64),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<ProviderError> for agentcore_core::AgentCoreError {
    fn from(err: ProviderError) -> Self {
        agentcore_core::AgentCoreError::Provider {
            provider: match &err {
                ProviderError::Api { provider, .. } => provider.clone(),
                _ => "unknown".to_string(),
            },
            reason: err.to_string(),
        }
    }
}
