//! Atomic cost rollups, grounded on
//! `original_source::apis.app_api.costs.aggregator.CostAggregator` plus
//! spec §4.5's write-path steps, reimplemented against [`KvBackend`]
//! instead of a direct DynamoDB client so it shares one storage seam with
//! `agentcore-store`.
//!
//! Every mutation here is an atomic ADD or a conditional "insert if
//! absent" — there is no read-modify-write on shared rollup state, per
//! the concurrency model's shared-resource policy.

use std::sync::Arc;

use agentcore_core::model::{Attribution, ModelInfo, TokenUsage};
use agentcore_store::kv::KvBackend;
use chrono::{DateTime, Datelike, Utc};
use serde_json::{json, Map, Value};
use tracing::{instrument, warn};

use crate::calculator::{calculate_cache_savings, calculate_message_cost};
use crate::error::Result;
use crate::models::{CostBreakdown, ModelCostSummary, UserCostSummary};

const USERMSG_PK_PREFIX: &str = "USERMSG#";
const DETAILED_REPORT_MAX_DAYS: i64 = 90;

fn period_of(ts: &DateTime<Utc>) -> String {
    format!("{:04}-{:02}", ts.year(), ts.month())
}

fn date_of(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

fn cents(total_cost: f64) -> i64 {
    (total_cost * 100.0).round() as i64
}

fn add_f64(obj: &mut Map<String, Value>, field: &str, delta: f64) {
    let current = obj.get(field).and_then(|v| v.as_f64()).unwrap_or(0.0);
    obj.insert(field.to_string(), json!(current + delta));
}

fn add_u64(obj: &mut Map<String, Value>, field: &str, delta: u64) {
    let current = obj.get(field).and_then(|v| v.as_u64()).unwrap_or(0);
    obj.insert(field.to_string(), json!(current + delta));
}

/// Atomically folds every message's cost into per-user, per-model, and
/// system-wide rollups, and tracks unique active users.
pub struct CostAggregator<B: KvBackend> {
    backend: Arc<B>,
}

impl<B: KvBackend> CostAggregator<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Non-blocking per-message write path (spec §4.5 steps 1-7).
    /// Failures are logged, never propagated — cost aggregation must
    /// never be the reason a turn fails.
    #[instrument(skip(self, usage, model), fields(user_id = %attribution.user_id, model_id = %model.model_id))]
    pub async fn record(&self, attribution: &Attribution, model: &ModelInfo, usage: &TokenUsage, cost: f64) {
        if let Err(err) = self.record_inner(attribution, model, usage, cost).await {
            warn!(error = %err, "cost aggregation write failed, turn is unaffected");
        }
    }

    async fn record_inner(&self, attribution: &Attribution, model: &ModelInfo, usage: &TokenUsage, cost: f64) -> Result<()> {
        let ts = attribution.timestamp;
        let period = period_of(&ts);
        let date = date_of(&ts);
        let user_id = attribution.user_id.as_str().to_string();
        let cache_savings = calculate_cache_savings(usage.cache_read, &model.pricing_snapshot);
        let model_safe = model.model_id.sanitized();

        self.update_user_summary(&user_id, &period, model, usage, cost, cache_savings)
            .await?;
        self.index_for_detailed_report(&user_id, &ts, model, usage, cost)
            .await?;

        let daily_marker_created = self
            .backend
            .put_item_if_absent(
                &format!("ACTIVEMARKER#DAILY#{date}"),
                &format!("USER#{user_id}"),
                json!({}),
                None,
            )
            .await?;
        self.update_rollup("ROLLUP#DAILY", &date, usage, cost, cache_savings, daily_marker_created)
            .await?;

        let monthly_marker_created = self
            .backend
            .put_item_if_absent(
                &format!("ACTIVEMARKER#MONTHLY#{period}"),
                &format!("USER#{user_id}"),
                json!({}),
                None,
            )
            .await?;
        self.update_rollup("ROLLUP#MONTHLY", &period, usage, cost, cache_savings, monthly_marker_created)
            .await?;

        let model_marker_created = self
            .backend
            .put_item_if_absent(
                &format!("ACTIVEMARKER#MODEL#{period}#{model_safe}"),
                &format!("USER#{user_id}"),
                json!({}),
                None,
            )
            .await?;
        self.update_model_rollup(&period, &model_safe, usage, cost, model_marker_created)
            .await?;

        Ok(())
    }

    /// Step 3: per-user monthly summary, plus the nested per-model
    /// breakdown (step 4's three-step update, folded into one atomic
    /// mutation since our backend's `atomic_add` already runs under a
    /// per-key lock — there is no DynamoDB path-overlap hazard here).
    async fn update_user_summary(
        &self,
        user_id: &str,
        period: &str,
        model: &ModelInfo,
        usage: &TokenUsage,
        cost: f64,
        cache_savings: f64,
    ) -> Result<()> {
        let pk = format!("USER#{user_id}");
        let sk = format!("PERIOD#{period}");
        let model_safe = model.model_id.sanitized();
        let model_id = model.model_id.as_str().to_string();
        let model_name = model.model_name.clone();
        let provider = model.provider.clone();
        let usage = *usage;

        let updated = self
            .backend
            .atomic_add(
                &pk,
                &sk,
                json!({
                    "totalCost": 0.0,
                    "totalRequests": 0,
                    "totalInputTokens": 0,
                    "totalOutputTokens": 0,
                    "cacheSavings": 0.0,
                    "modelBreakdown": {},
                    "GSI2PK": format!("PERIOD#{period}"),
                }),
                Box::new(move |obj| {
                    add_f64(obj, "totalCost", cost);
                    add_u64(obj, "totalRequests", 1);
                    add_u64(obj, "totalInputTokens", usage.input);
                    add_u64(obj, "totalOutputTokens", usage.output);
                    add_f64(obj, "cacheSavings", cache_savings);
                    obj.entry("modelBreakdown".to_string())
                        .or_insert_with(|| json!({}));
                    let breakdown = obj
                        .get_mut("modelBreakdown")
                        .and_then(Value::as_object_mut)
                        .expect("modelBreakdown initialized above");
                    let entry = breakdown.entry(model_safe.clone()).or_insert_with(|| {
                        json!({
                            "modelId": model_id,
                            "modelName": model_name,
                            "provider": provider,
                            "cost": 0.0,
                            "requests": 0,
                            "inputTokens": 0,
                            "outputTokens": 0,
                            "cacheReadTokens": 0,
                            "cacheWriteTokens": 0,
                        })
                    });
                    if let Some(model_entry) = entry.as_object_mut() {
                        add_f64(model_entry, "cost", cost);
                        add_u64(model_entry, "requests", 1);
                        add_u64(model_entry, "inputTokens", usage.input);
                        add_u64(model_entry, "outputTokens", usage.output);
                        add_u64(model_entry, "cacheReadTokens", usage.cache_read);
                        add_u64(model_entry, "cacheWriteTokens", usage.cache_write);
                    }
                }),
            )
            .await?;

        let new_total = updated.get("totalCost").and_then(Value::as_f64).unwrap_or(0.0);
        self.backend
            .atomic_add(
                &pk,
                &sk,
                json!({}),
                Box::new(move |obj| {
                    obj.insert("GSI2SK".to_string(), json!(format!("COST#{:015}", cents(new_total))));
                }),
            )
            .await?;

        Ok(())
    }

    /// Daily/monthly rollup (spec steps 5-6): same shape, only the
    /// `activeUsers` bump differs on whether the caller's marker for
    /// this scope was just created.
    async fn update_rollup(
        &self,
        pk: &str,
        sk: &str,
        usage: &TokenUsage,
        cost: f64,
        cache_savings: f64,
        bump_active_users: bool,
    ) -> Result<()> {
        let usage = *usage;
        self.backend
            .atomic_add(
                pk,
                sk,
                json!({"cost": 0.0, "requests": 0, "inputTokens": 0, "outputTokens": 0, "activeUsers": 0, "cacheSavings": 0.0}),
                Box::new(move |obj| {
                    add_f64(obj, "cost", cost);
                    add_u64(obj, "requests", 1);
                    add_u64(obj, "inputTokens", usage.input);
                    add_u64(obj, "outputTokens", usage.output);
                    add_f64(obj, "cacheSavings", cache_savings);
                    if bump_active_users {
                        add_u64(obj, "activeUsers", 1);
                    }
                }),
            )
            .await?;
        Ok(())
    }

    /// Per-model rollup (spec step 7): `uniqueUsers` bumps only on the
    /// per-(user, period, model) marker's creation.
    async fn update_model_rollup(
        &self,
        period: &str,
        model_safe: &str,
        usage: &TokenUsage,
        cost: f64,
        bump_unique_users: bool,
    ) -> Result<()> {
        let usage = *usage;
        self.backend
            .atomic_add(
                "ROLLUP#MODEL",
                &format!("{period}#{model_safe}"),
                json!({"cost": 0.0, "requests": 0, "inputTokens": 0, "outputTokens": 0, "uniqueUsers": 0}),
                Box::new(move |obj| {
                    add_f64(obj, "cost", cost);
                    add_u64(obj, "requests", 1);
                    add_u64(obj, "inputTokens", usage.input);
                    add_u64(obj, "outputTokens", usage.output);
                    if bump_unique_users {
                        add_u64(obj, "uniqueUsers", 1);
                    }
                }),
            )
            .await?;
        Ok(())
    }

    /// Maintains the aggregator's own `UserTimestampIndex`-equivalent so
    /// the detailed read path can reconstruct a date-range report without
    /// scanning every session a user ever opened.
    async fn index_for_detailed_report(
        &self,
        user_id: &str,
        ts: &DateTime<Utc>,
        model: &ModelInfo,
        usage: &TokenUsage,
        cost: f64,
    ) -> Result<()> {
        let (_, breakdown) = calculate_message_cost(usage, &model.pricing_snapshot);
        let cache_savings = calculate_cache_savings(usage.cache_read, &model.pricing_snapshot);
        let sk = format!("{}#{}", ts.to_rfc3339(), uuid::Uuid::new_v4());
        let record = json!({
            "timestamp": ts,
            "cost": cost,
            "inputTokens": usage.input,
            "outputTokens": usage.output,
            "cacheReadTokens": usage.cache_read,
            "cacheWriteTokens": usage.cache_write,
            "cacheSavings": cache_savings,
            "modelId": model.model_id.as_str(),
            "modelName": model.model_name,
            "provider": model.provider,
            "costBreakdown": breakdown,
        });
        self.backend
            .delete_then_put(&format!("{USERMSG_PK_PREFIX}{user_id}"), &sk, record)
            .await?;
        Ok(())
    }

    /// Fast path: read the pre-aggregated summary for `user_id`/`period`.
    /// O(1), target latency under 10ms against a real backend.
    #[instrument(skip(self))]
    pub async fn get_user_cost_summary(&self, user_id: &str, period: &str) -> Result<UserCostSummary> {
        let record = self
            .backend
            .get_item(&format!("USER#{user_id}"), &format!("PERIOD#{period}"))
            .await?;

        let Some(record) = record else {
            return Ok(UserCostSummary::empty(user_id, period_start(period), period_end(period)));
        };

        let models = record
            .get("modelBreakdown")
            .and_then(Value::as_object)
            .map(|breakdown| {
                breakdown
                    .iter()
                    .map(|(_, stats)| model_summary_from_breakdown(stats))
                    .collect()
            })
            .unwrap_or_default();

        Ok(UserCostSummary {
            user_id: user_id.to_string(),
            period_start: period_start(period),
            period_end: period_end(period),
            total_cost: record.get("totalCost").and_then(Value::as_f64).unwrap_or(0.0),
            models,
            total_requests: record.get("totalRequests").and_then(Value::as_u64).unwrap_or(0),
            total_input_tokens: record.get("totalInputTokens").and_then(Value::as_u64).unwrap_or(0),
            total_output_tokens: record.get("totalOutputTokens").and_then(Value::as_u64).unwrap_or(0),
            total_cache_savings: record.get("cacheSavings").and_then(Value::as_f64).unwrap_or(0.0),
        })
    }

    /// Detailed path: rebuild a report message-by-message over an
    /// arbitrary date range, capped at 90 days.
    #[instrument(skip(self))]
    pub async fn get_detailed_cost_report(
        &self,
        user_id: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<UserCostSummary> {
        let start_date = start_date.max(end_date - chrono::Duration::days(DETAILED_REPORT_MAX_DAYS));

        let items = self
            .backend
            .query_begins_with(&format!("{USERMSG_PK_PREFIX}{user_id}"), "")
            .await?;

        let mut total_cost = 0.0;
        let mut total_requests = 0u64;
        let mut total_input_tokens = 0u64;
        let mut total_output_tokens = 0u64;
        let mut total_cache_savings = 0.0;
        let mut model_stats: std::collections::HashMap<String, ModelCostSummary> = std::collections::HashMap::new();

        for item in items {
            let Some(ts) = item.get("timestamp").and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok()) else {
                continue;
            };
            if ts < start_date || ts > end_date {
                continue;
            }

            let cost = item.get("cost").and_then(Value::as_f64).unwrap_or(0.0);
            let input_tokens = item.get("inputTokens").and_then(Value::as_u64).unwrap_or(0);
            let output_tokens = item.get("outputTokens").and_then(Value::as_u64).unwrap_or(0);
            let cache_read_tokens = item.get("cacheReadTokens").and_then(Value::as_u64).unwrap_or(0);
            let cache_write_tokens = item.get("cacheWriteTokens").and_then(Value::as_u64).unwrap_or(0);

            total_cost += cost;
            total_requests += 1;
            total_input_tokens += input_tokens;
            total_output_tokens += output_tokens;

            total_cache_savings += item.get("cacheSavings").and_then(Value::as_f64).unwrap_or(0.0);

            let model_id = item.get("modelId").and_then(Value::as_str).unwrap_or("unknown").to_string();
            let entry = model_stats.entry(model_id.clone()).or_insert_with(|| ModelCostSummary {
                model_id: model_id.clone(),
                model_name: item.get("modelName").and_then(Value::as_str).unwrap_or("Unknown").to_string(),
                provider: item.get("provider").and_then(Value::as_str).unwrap_or("unknown").to_string(),
                total_input_tokens: 0,
                total_output_tokens: 0,
                total_cache_read_tokens: 0,
                total_cache_write_tokens: 0,
                cost_breakdown: CostBreakdown { total_cost: 0.0, ..Default::default() },
                request_count: 0,
            });
            entry.total_input_tokens += input_tokens;
            entry.total_output_tokens += output_tokens;
            entry.total_cache_read_tokens += cache_read_tokens;
            entry.total_cache_write_tokens += cache_write_tokens;
            entry.cost_breakdown.total_cost += cost;
            entry.request_count += 1;
        }

        Ok(UserCostSummary {
            user_id: user_id.to_string(),
            period_start: start_date.to_rfc3339(),
            period_end: end_date.to_rfc3339(),
            total_cost,
            models: model_stats.into_values().collect(),
            total_requests,
            total_input_tokens,
            total_output_tokens,
            total_cache_savings,
        })
    }
}

fn model_summary_from_breakdown(stats: &Value) -> ModelCostSummary {
    ModelCostSummary {
        model_id: stats.get("modelId").and_then(Value::as_str).unwrap_or("unknown").to_string(),
        model_name: stats.get("modelName").and_then(Value::as_str).unwrap_or("Unknown").to_string(),
        provider: stats.get("provider").and_then(Value::as_str).unwrap_or("unknown").to_string(),
        total_input_tokens: stats.get("inputTokens").and_then(Value::as_u64).unwrap_or(0),
        total_output_tokens: stats.get("outputTokens").and_then(Value::as_u64).unwrap_or(0),
        total_cache_read_tokens: stats.get("cacheReadTokens").and_then(Value::as_u64).unwrap_or(0),
        total_cache_write_tokens: stats.get("cacheWriteTokens").and_then(Value::as_u64).unwrap_or(0),
        cost_breakdown: CostBreakdown {
            total_cost: stats.get("cost").and_then(Value::as_f64).unwrap_or(0.0),
            ..Default::default()
        },
        request_count: stats.get("requests").and_then(Value::as_u64).unwrap_or(0),
    }
}

fn period_start(period: &str) -> String {
    format!("{period}-01T00:00:00Z")
}

fn period_end(period: &str) -> String {
    let Some((year, month)) = period.split_once('-') else {
        return format!("{period}-31T23:59:59Z");
    };
    let (y, m): (i32, u32) = match (year.parse(), month.parse()) {
        (Ok(y), Ok(m)) => (y, m),
        _ => return format!("{period}-31T23:59:59Z"),
    };
    let last_day = days_in_month(y, m);
    format!("{period}-{last_day:02}T23:59:59Z")
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1).expect("valid calendar date");
    let first_of_this = chrono::NaiveDate::from_ymd_opt(year, month, 1).expect("valid calendar date");
    (first_of_next - first_of_this).num_days() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore_core::model::PricingSnapshot;
    use agentcore_core::{ModelId, SessionId, UserId};
    use agentcore_store::kv::InMemoryKvBackend;

    fn model() -> ModelInfo {
        ModelInfo {
            model_id: ModelId("us.anthropic.claude-sonnet-4-5-20250929-v1:0".into()),
            model_name: "Claude Sonnet 4.5".into(),
            provider: "bedrock".into(),
            pricing_snapshot: PricingSnapshot {
                input_price_per_mtok: 3.0,
                output_price_per_mtok: 15.0,
                cache_read_price_per_mtok: Some(0.30),
                cache_write_price_per_mtok: Some(3.75),
                currency: "USD".into(),
                snapshot_at: Utc::now(),
            },
        }
    }

    fn attribution(user_id: &str) -> Attribution {
        Attribution {
            user_id: UserId(user_id.to_string()),
            session_id: SessionId::new(),
            timestamp: Utc::now(),
        }
    }

    fn usage() -> TokenUsage {
        TokenUsage { input: 1000, output: 500, cache_read: 200, cache_write: 0 }
    }

    #[tokio::test]
    async fn user_summary_accumulates_across_messages() {
        let agg = CostAggregator::new(Arc::new(InMemoryKvBackend::new()));
        let attrib = attribution("alice");
        let period = period_of(&attrib.timestamp);

        for _ in 0..3 {
            let (cost, _) = calculate_message_cost(&usage(), &model().pricing_snapshot);
            agg.record(&attrib, &model(), &usage(), cost).await;
        }

        let summary = agg.get_user_cost_summary("alice", &period).await.unwrap();
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.total_input_tokens, 3000);
        assert_eq!(summary.models.len(), 1);
        assert_eq!(summary.models[0].request_count, 3);
    }

    #[tokio::test]
    async fn second_message_same_day_does_not_double_count_active_users() {
        let agg = CostAggregator::new(Arc::new(InMemoryKvBackend::new()));
        let attrib = attribution("bob");
        let date = date_of(&attrib.timestamp);

        let (cost, _) = calculate_message_cost(&usage(), &model().pricing_snapshot);
        agg.record(&attrib, &model(), &usage(), cost).await;
        agg.record(&attrib, &model(), &usage(), cost).await;

        let rollup = agg.backend.get_item("ROLLUP#DAILY", &date).await.unwrap().unwrap();
        assert_eq!(rollup["activeUsers"].as_u64().unwrap(), 1);
        assert_eq!(rollup["requests"].as_u64().unwrap(), 2);
    }

    #[tokio::test]
    async fn unseen_period_returns_empty_summary_not_an_error() {
        let agg = CostAggregator::new(Arc::new(InMemoryKvBackend::new()));
        let summary = agg.get_user_cost_summary("nobody", "2099-01").await.unwrap();
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.total_cost, 0.0);
        assert_eq!(summary.period_start, "2099-01-01T00:00:00Z");
        assert_eq!(summary.period_end, "2099-01-31T23:59:59Z");
    }

    #[tokio::test]
    async fn detailed_report_excludes_messages_outside_the_range() {
        let agg = CostAggregator::new(Arc::new(InMemoryKvBackend::new()));
        let mut attrib = attribution("carol");
        attrib.timestamp = Utc::now() - chrono::Duration::days(200);
        let (cost, _) = calculate_message_cost(&usage(), &model().pricing_snapshot);
        agg.record(&attrib, &model(), &usage(), cost).await;

        let report = agg
            .get_detailed_cost_report("carol", Utc::now() - chrono::Duration::days(30), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.total_requests, 0);
    }
}
