//! Wire-shaped cost reporting types, grounded on
//! `original_source::apis.app_api.costs.models` (the `CostBreakdown`,
//! `ModelCostSummary`, `UserCostSummary` pydantic models), carried over
//! field-for-field with serde's `rename_all` standing in for the
//! original's per-field camelCase aliases.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    #[serde(default)]
    pub cache_write_cost: f64,
    #[serde(default)]
    pub cache_read_cost: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCostSummary {
    pub model_id: String,
    pub model_name: String,
    pub provider: String,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    #[serde(default)]
    pub total_cache_read_tokens: u64,
    #[serde(default)]
    pub total_cache_write_tokens: u64,
    pub cost_breakdown: CostBreakdown,
    pub request_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCostSummary {
    pub user_id: String,
    pub period_start: String,
    pub period_end: String,
    pub total_cost: f64,
    #[serde(default)]
    pub models: Vec<ModelCostSummary>,
    pub total_requests: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    #[serde(default)]
    pub total_cache_savings: f64,
}

impl UserCostSummary {
    pub fn empty(user_id: &str, period_start: String, period_end: String) -> Self {
        Self {
            user_id: user_id.to_string(),
            period_start,
            period_end,
            total_cost: 0.0,
            models: Vec::new(),
            total_requests: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cache_savings: 0.0,
        }
    }
}
