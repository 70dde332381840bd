//! Pure cost math, ported field-for-field from
//! `original_source::apis.app_api.costs.calculator.CostCalculator`.

use agentcore_core::model::{ModelInfo, PricingSnapshot, TokenUsage};
use agentcore_stream::CostEstimator;

use crate::models::CostBreakdown;

/// `inputTokens`/`cacheReadInputTokens`/etc are *not* overlapping buckets:
/// cached tokens are never also counted in `inputTokens`. Total prompt
/// size for a message is therefore their sum.
pub fn total_input_tokens(usage: &TokenUsage) -> u64 {
    usage.input + usage.cache_read + usage.cache_write
}

/// Cost of one message's token usage against a pricing snapshot.
pub fn calculate_message_cost(usage: &TokenUsage, pricing: &PricingSnapshot) -> (f64, CostBreakdown) {
    let per_mtok = |tokens: u64, price: f64| (tokens as f64 / 1_000_000.0) * price;

    let input_cost = per_mtok(usage.input, pricing.input_price_per_mtok);
    let output_cost = per_mtok(usage.output, pricing.output_price_per_mtok);
    let cache_read_cost = per_mtok(usage.cache_read, pricing.cache_read_price_per_mtok.unwrap_or(0.0));
    let cache_write_cost = per_mtok(usage.cache_write, pricing.cache_write_price_per_mtok.unwrap_or(0.0));

    let total_cost = input_cost + output_cost + cache_read_cost + cache_write_cost;

    (
        total_cost,
        CostBreakdown {
            input_cost,
            output_cost,
            cache_read_cost,
            cache_write_cost,
            total_cost,
        },
    )
}

/// Savings from reading `cache_read_tokens` at the cache price instead of
/// the standard input price. Zero (never negative) when cache pricing is
/// absent or there were no cache reads.
pub fn calculate_cache_savings(cache_read_tokens: u64, pricing: &PricingSnapshot) -> f64 {
    if cache_read_tokens == 0 {
        return 0.0;
    }
    let Some(cache_read_price) = pricing.cache_read_price_per_mtok else {
        return 0.0;
    };
    let tokens_mtok = cache_read_tokens as f64 / 1_000_000.0;
    let standard_cost = tokens_mtok * pricing.input_price_per_mtok;
    let cache_cost = tokens_mtok * cache_read_price;
    (standard_cost - cache_cost).max(0.0)
}

/// [`CostEstimator`] backed by the pricing snapshot carried on each
/// message's [`ModelInfo`] — the "best-effort from pricing snapshot +
/// accumulated usage" estimator the stream coordinator is constructed
/// with in non-test wiring.
#[derive(Debug, Default, Clone, Copy)]
pub struct PricingCostEstimator;

impl CostEstimator for PricingCostEstimator {
    fn estimate(&self, usage: &TokenUsage, model: &ModelInfo) -> f64 {
        calculate_message_cost(usage, &model.pricing_snapshot).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing() -> PricingSnapshot {
        PricingSnapshot {
            input_price_per_mtok: 3.0,
            output_price_per_mtok: 15.0,
            cache_read_price_per_mtok: Some(0.30),
            cache_write_price_per_mtok: Some(3.75),
            currency: "USD".into(),
            snapshot_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn message_cost_matches_reference_example() {
        let usage = TokenUsage {
            input: 1000,
            output: 500,
            cache_read: 200,
            cache_write: 100,
        };
        let (total, breakdown) = calculate_message_cost(&usage, &pricing());
        assert!((total - 0.010035).abs() < 1e-9);
        assert!((breakdown.input_cost - 0.0021).abs() < 1e-9);
        assert!((breakdown.output_cost - 0.0075).abs() < 1e-9);
        assert!((breakdown.cache_read_cost - 0.00006).abs() < 1e-9);
        assert!((breakdown.cache_write_cost - 0.000375).abs() < 1e-9);
    }

    #[test]
    fn cache_savings_matches_reference_example() {
        let savings = calculate_cache_savings(200, &pricing());
        assert!((savings - 0.00054).abs() < 1e-9);
    }

    #[test]
    fn zero_cache_reads_yield_zero_savings() {
        assert_eq!(calculate_cache_savings(0, &pricing()), 0.0);
    }

    #[test]
    fn missing_cache_pricing_yields_zero_savings_not_a_loss() {
        let mut p = pricing();
        p.cache_read_price_per_mtok = None;
        assert_eq!(calculate_cache_savings(500, &p), 0.0);
    }
}
