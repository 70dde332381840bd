pub mod coordinator;
pub mod processor;
pub mod provider;

pub use coordinator::StreamCoordinator;
pub use processor::{CanonicalEvent, StreamProcessor};
pub use provider::{LlmProvider, ProviderError, ProviderEvent, RawEventKind, RawEventStream};

use agentcore_core::model::{ModelInfo, TokenUsage};

/// What the coordinator sends a provider to start one turn. Deliberately
/// thin — content-block assembly (attachments, RAG context) happens in
/// `agentcore-prompt` before a `ProviderPrompt` is built.
#[derive(Debug, Clone)]
pub struct ProviderPrompt {
    pub model: String,
    pub system: String,
    pub messages: Vec<agentcore_core::model::Message>,
    pub max_tokens: u32,
}

/// Best-effort cost estimation, injected by the caller so this crate never
/// has to depend on `agentcore-cost` directly. `agentcore-gateway` wires
/// the real pricing-table-backed implementation in; tests use a stub.
pub trait CostEstimator: Send + Sync {
    fn estimate(&self, usage: &TokenUsage, model: &ModelInfo) -> f64;
}

/// Estimator that always reports zero cost — used where no pricing table
/// is available (e.g. local development without billing wired up).
pub struct NoCostEstimator;

impl CostEstimator for NoCostEstimator {
    fn estimate(&self, _usage: &TokenUsage, _model: &ModelInfo) -> f64 {
        0.0
    }
}
