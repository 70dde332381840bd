pub mod aggregator;
pub mod calculator;
pub mod error;
pub mod models;

pub use aggregator::CostAggregator;
pub use calculator::{calculate_cache_savings, calculate_message_cost, total_input_tokens, PricingCostEstimator};
pub use error::{CostError, Result};
pub use models::{CostBreakdown, ModelCostSummary, UserCostSummary};
