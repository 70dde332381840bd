//! Static pricing snapshots for the handful of models this gateway talks
//! to directly. A real deployment would read this from a managed-models
//! admin surface (`original_source::apis.app_api.costs.pricing_config`),
//! but admin CRUD is out of scope here, so the snapshot is a small
//! hardcoded table instead — numbers match the Sonnet pricing used in
//! `agentcore-cost`'s own test fixtures.

use agentcore_core::model::{ModelInfo, PricingSnapshot};
use agentcore_core::types::ModelId;

pub fn snapshot_for(model: &str) -> ModelInfo {
    let (model_name, provider, input, output, cache_read, cache_write) = if model.contains("haiku") {
        ("Claude Haiku", "anthropic", 0.80, 4.0, Some(0.08), Some(1.0))
    } else if model.contains("opus") {
        ("Claude Opus", "anthropic", 15.0, 75.0, Some(1.50), Some(18.75))
    } else {
        ("Claude Sonnet", "anthropic", 3.0, 15.0, Some(0.30), Some(3.75))
    };

    ModelInfo {
        model_id: ModelId::from(model),
        model_name: model_name.to_string(),
        provider: provider.to_string(),
        pricing_snapshot: PricingSnapshot {
            input_price_per_mtok: input,
            output_price_per_mtok: output,
            cache_read_price_per_mtok: cache_read,
            cache_write_price_per_mtok: cache_write,
            currency: "USD".to_string(),
            snapshot_at: chrono::Utc::now(),
        },
    }
}
