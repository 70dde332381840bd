use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use agentcore_core::config::AgentCoreConfig;
use agentcore_cost::{CostAggregator, PricingCostEstimator};
use agentcore_prompt::{EmptyVectorStore, RagContextService};
use agentcore_store::compaction::CompactionEngine;
use agentcore_store::{InMemoryKvBackend, SessionStore};
use agentcore_stream::StreamCoordinator;

mod app;
mod error;
mod http;
mod pricing;
mod provider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentcore_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > AGENTCORE_CONFIG env > ~/.agentcore/agentcore.toml
    let config_path = std::env::var("AGENTCORE_CONFIG").ok();
    let config = AgentCoreConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({}), using defaults", e);
        AgentCoreConfig::default()
    });

    let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_else(|_| {
        warn!("ANTHROPIC_API_KEY is not set; turns will fail until one is configured");
        String::new()
    });
    let llm_provider = Arc::new(provider::AnthropicProvider::new(
        api_key,
        config.gateway.provider.anthropic_base_url.clone(),
    ));

    let store = Arc::new(SessionStore::from_config(&config));
    let compaction = Arc::new(CompactionEngine::new(config.compaction.clone()));
    let cost_estimator = Arc::new(PricingCostEstimator);
    let coordinator = Arc::new(StreamCoordinator::new(store.clone(), compaction.clone(), cost_estimator));

    let cost_aggregator = Arc::new(CostAggregator::new(Arc::new(InMemoryKvBackend::new())));
    let rag = Arc::new(RagContextService::new(Arc::new(EmptyVectorStore)));

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, store, coordinator, cost_aggregator, rag, llm_provider, compaction));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("agentcore gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
