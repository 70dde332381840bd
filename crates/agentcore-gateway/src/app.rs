use std::sync::Arc;

use axum::{routing::get, Router};

use agentcore_core::config::AgentCoreConfig;
use agentcore_cost::CostAggregator;
use agentcore_store::{compaction::CompactionEngine, InMemoryKvBackend, SessionStore};
use agentcore_stream::StreamCoordinator;
use agentcore_prompt::RagContextService;

use crate::provider::AnthropicProvider;

/// Central shared state, handed to every Axum handler as `Arc<AppState>`.
/// One of each long-lived subsystem the gateway wires together: a store,
/// a turn coordinator, a cost aggregator, a RAG context service, the
/// default LLM provider, the compaction engine, and the config that
/// built them.
pub struct AppState {
    pub config: AgentCoreConfig,
    pub coordinator: Arc<StreamCoordinator>,
    pub cost_aggregator: Arc<CostAggregator<InMemoryKvBackend>>,
    pub rag: Arc<RagContextService>,
    pub provider: Arc<AnthropicProvider>,
    pub store: Arc<SessionStore>,
    pub compaction: Arc<CompactionEngine>,
}

impl AppState {
    pub fn new(
        config: AgentCoreConfig,
        store: Arc<SessionStore>,
        coordinator: Arc<StreamCoordinator>,
        cost_aggregator: Arc<CostAggregator<InMemoryKvBackend>>,
        rag: Arc<RagContextService>,
        provider: Arc<AnthropicProvider>,
        compaction: Arc<CompactionEngine>,
    ) -> Self {
        Self { config, coordinator, cost_aggregator, rag, provider, store, compaction }
    }
}

/// Assemble the four-endpoint surface (spec §6): turns, health, session
/// history, and the cost fast-path read.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/v1/turns", axum::routing::post(crate::http::turns::turns_handler))
        .route("/v1/sessions/{id}/messages", get(crate::http::sessions::list_messages_handler))
        .route("/v1/users/{id}/cost", get(crate::http::cost::user_cost_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
