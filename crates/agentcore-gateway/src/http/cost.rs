//! `GET /v1/users/{id}/cost?period=YYYY-MM` — fast-path cost summary read,
//! grounded on `original_source::apis.app_api.costs.routes`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use agentcore_cost::UserCostSummary;

use crate::app::AppState;
use crate::error::GatewayError;

#[derive(Debug, Deserialize)]
pub struct CostQuery {
    pub period: Option<String>,
}

pub async fn user_cost_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<CostQuery>,
) -> Result<Json<UserCostSummary>, GatewayError> {
    let period = query.period.unwrap_or_else(|| agentcore_core::types::Period::from_timestamp(chrono::Utc::now()).to_string());
    let summary = state.cost_aggregator.get_user_cost_summary(&user_id, &period).await?;
    Ok(Json(summary))
}
