//! Maps the workspace's shared [`AgentCoreError`] onto HTTP responses.
//! Grounded on `skynet_gateway::http::chat::ChatError`'s status-code
//! dispatch, retargeted at the stable `code()` strings `agentcore-core`
//! already defines instead of re-deriving its own taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use agentcore_core::AgentCoreError;

pub struct GatewayError(pub AgentCoreError);

impl From<AgentCoreError> for GatewayError {
    fn from(err: AgentCoreError) -> Self {
        GatewayError(err)
    }
}

impl From<agentcore_store::StoreError> for GatewayError {
    fn from(err: agentcore_store::StoreError) -> Self {
        GatewayError(err.into())
    }
}

impl From<agentcore_cost::CostError> for GatewayError {
    fn from(err: agentcore_cost::CostError) -> Self {
        GatewayError(err.into())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AgentCoreError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            AgentCoreError::Validation(_) => StatusCode::BAD_REQUEST,
            AgentCoreError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AgentCoreError::Provider { .. } | AgentCoreError::Agent(_) | AgentCoreError::Stream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        }));

        (status, body).into_response()
    }
}
