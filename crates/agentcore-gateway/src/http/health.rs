use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// `GET /health` — liveness probe; no dependency pings, just process and
/// config identity, as `skynet_gateway::http::health::health_handler` does.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "memory_type": state.config.memory_type,
        "provider": state.provider.name(),
        "default_model": state.config.gateway.provider.default_model,
    }))
}
