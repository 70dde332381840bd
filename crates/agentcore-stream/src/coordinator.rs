//! Runs one turn from prompt to persisted, aggregated, acknowledged SSE
//! stream. The integrator: every other module in this workspace is a pure
//! function or a narrow trait; this is where the reasoning about ordering,
//! failure, and concurrency lives.
//!
//! Grounded on
//! `original_source::strands_agent.streaming.stream_coordinator` for the
//! lifecycle (TTFT estimation, metadata enrichment, post-stream parallel
//! metadata writes) and on `skynet_gateway::http::openai_compat::handle_streaming`
//! for the SSE-plumbing idiom — generalized to hand the generator an
//! `Arc<dyn Store>` clone instead of that handler's raw-pointer workaround,
//! so no `unsafe` is needed to keep state alive across `yield` points.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tracing::{error, instrument, warn};

use agentcore_core::model::{Attribution, ContentBlock, Latency, MessageMetadata, ModelInfo, Role, TokenUsage};
use agentcore_core::{SessionId, UserId};
use agentcore_store::compaction::CompactionEngine;
use agentcore_store::types::{PendingMessage, SessionMetadataPatch};
use agentcore_store::Store;

use crate::processor::{CanonicalEvent, StreamProcessor};
use crate::provider::LlmProvider;
use crate::{CostEstimator, ProviderPrompt};

/// Per-assistant-message bookkeeping accumulated while the turn streams.
/// One entry per `message_start(role=assistant)`.
struct PerMessageState {
    start_time: f64,
    first_token_time: Option<f64>,
    end_time: Option<f64>,
    usage: Value,
    metrics: Value,
    blocks: HashMap<u32, BlockBuilder>,
    block_order: Vec<u32>,
}

enum BlockBuilder {
    Text(String),
    ToolUse { id: String, name: String, input_buf: String },
}

impl PerMessageState {
    fn new(start_time: f64) -> Self {
        Self {
            start_time,
            first_token_time: None,
            end_time: None,
            usage: Value::Null,
            metrics: Value::Null,
            blocks: HashMap::new(),
            block_order: Vec::new(),
        }
    }

    fn finalize_blocks(&mut self) -> Vec<ContentBlock> {
        self.block_order
            .iter()
            .filter_map(|idx| self.blocks.remove(idx))
            .map(|builder| match builder {
                BlockBuilder::Text(text) => ContentBlock::text(text),
                BlockBuilder::ToolUse { id, name, input_buf } => ContentBlock::ToolUse {
                    tool_use_id: id,
                    name,
                    input: serde_json::from_str(&input_buf).unwrap_or(Value::Null),
                },
            })
            .collect()
    }
}

fn wall_clock_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Compute time-to-first-token for one assistant message, falling back to
/// a fraction of provider latency when the direct measurement is
/// implausibly small (a clock artifact, not a genuinely instant model).
fn compute_ttft_ms(start_time: f64, first_token_time: Option<f64>, provider_latency_ms: Option<f64>) -> Option<u64> {
    let direct = first_token_time.map(|t| (t - start_time).max(0.0));
    match (direct, provider_latency_ms) {
        (Some(d), Some(latency)) if d < 10.0 && latency > 100.0 => Some((latency * 0.3).round() as u64),
        (Some(d), _) => Some(d.round() as u64),
        (None, Some(latency)) if latency > 0.0 => Some(latency.round() as u64),
        (None, _) => None,
    }
}

fn usage_from_json(v: &Value) -> TokenUsage {
    TokenUsage {
        input: v.get("inputTokens").and_then(|x| x.as_u64()).unwrap_or(0),
        output: v.get("outputTokens").and_then(|x| x.as_u64()).unwrap_or(0),
        cache_read: v.get("cacheReadInputTokens").and_then(|x| x.as_u64()).unwrap_or(0),
        cache_write: v.get("cacheWriteInputTokens").and_then(|x| x.as_u64()).unwrap_or(0),
    }
}

pub struct StreamCoordinator {
    store: Arc<dyn Store>,
    compaction: Arc<CompactionEngine>,
    cost_estimator: Arc<dyn CostEstimator>,
}

impl StreamCoordinator {
    pub fn new(store: Arc<dyn Store>, compaction: Arc<CompactionEngine>, cost_estimator: Arc<dyn CostEstimator>) -> Self {
        Self { store, compaction, cost_estimator }
    }

    /// Run one turn. Returns a boxed stream of already-formatted SSE
    /// frames (`event: <type>\ndata: <json>\n\n`); the HTTP layer only has
    /// to write them to the response body.
    #[instrument(skip(self, provider, prompt, model_info), fields(session_id = %session_id, user_id = %user_id))]
    pub fn stream_response(
        self: Arc<Self>,
        provider: Arc<dyn LlmProvider>,
        prompt: ProviderPrompt,
        model_info: ModelInfo,
        session_id: SessionId,
        user_id: UserId,
    ) -> futures_util::stream::BoxStream<'static, String> {
        Box::pin(async_stream::stream! {
            let coordinator = self;
            let store = coordinator.store.clone();

            let handle = match store.open_session(session_id.as_str(), user_id.as_str()).await {
                Ok(h) => h,
                Err(e) => {
                    error!(error = %e, "failed to open session for streaming turn");
                    yield CanonicalEvent::Error {
                        error: "could not start session".into(),
                        code: "STREAM_ERROR".into(),
                        detail: Some(e.to_string()),
                        recoverable: false,
                    }.to_sse();
                    yield CanonicalEvent::Done.to_sse();
                    return;
                }
            };

            // Step 1: eager message count, before the user's prompt is appended.
            let initial_message_count = store.flush(&handle).await.ok().flatten().map(|s| s + 1).unwrap_or(0);

            if let Err(e) = store.append(&handle, PendingMessage {
                role: Role::User,
                content: vec![ContentBlock::text(prompt_text(&prompt))],
            }).await {
                warn!(error = %e, "failed to buffer user message");
            }

            let mut raw_stream = match provider.stream(&prompt).await {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "provider stream failed to open");
                    for frame in coordinator.emit_conversational_error(&handle, &e.to_string()).await {
                        yield frame;
                    }
                    return;
                }
            };

            let mut processor = StreamProcessor::new();
            let mut messages: Vec<PerMessageState> = Vec::new();
            let mut current: Option<usize> = None;
            let mut assistant_messages: Vec<Vec<ContentBlock>> = Vec::new();

            loop {
                let next = raw_stream.next().await;
                let raw_event = match next {
                    Some(Ok(ev)) => ev,
                    Some(Err(e)) => {
                        error!(error = %e, "provider stream raised mid-turn");
                        for frame in coordinator.emit_conversational_error(&handle, &e.to_string()).await {
                            yield frame;
                        }
                        return;
                    }
                    None => break,
                };

                for canonical in processor.process(&raw_event) {
                    match &canonical {
                        CanonicalEvent::MessageStart { role } if role == "assistant" => {
                            messages.push(PerMessageState::new(wall_clock_ms()));
                            current = Some(messages.len() - 1);
                        }
                        CanonicalEvent::ContentBlockStart { index, block_type, tool_use } => {
                            if let Some(i) = current {
                                let msg = &mut messages[i];
                                msg.block_order.push(*index);
                                let builder = if block_type == "tool_use" {
                                    let id = tool_use.as_ref().and_then(|t| t.get("toolUseId")).and_then(|v| v.as_str()).unwrap_or_default().to_string();
                                    let name = tool_use.as_ref().and_then(|t| t.get("name")).and_then(|v| v.as_str()).unwrap_or_default().to_string();
                                    BlockBuilder::ToolUse { id, name, input_buf: String::new() }
                                } else {
                                    BlockBuilder::Text(String::new())
                                };
                                msg.blocks.insert(*index, builder);
                            }
                        }
                        CanonicalEvent::ContentBlockDelta { index, text, input, .. } => {
                            if let Some(i) = current {
                                let msg = &mut messages[i];
                                if msg.first_token_time.is_none() {
                                    msg.first_token_time = Some(wall_clock_ms());
                                }
                                if let Some(builder) = msg.blocks.get_mut(index) {
                                    match builder {
                                        BlockBuilder::Text(buf) => {
                                            if let Some(t) = text { buf.push_str(t); }
                                        }
                                        BlockBuilder::ToolUse { input_buf, .. } => {
                                            if let Some(partial) = input {
                                                match partial.as_str() {
                                                    Some(fragment) => input_buf.push_str(fragment),
                                                    None => input_buf.push_str(&partial.to_string()),
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                        CanonicalEvent::MessageStop { .. } => {
                            if let Some(i) = current.take() {
                                messages[i].end_time = Some(wall_clock_ms());
                                let blocks = messages[i].finalize_blocks();
                                assistant_messages.push(blocks);
                            }
                        }
                        CanonicalEvent::Metadata { usage, metrics } => {
                            if let Some(i) = current.or_else(|| if messages.is_empty() { None } else { Some(messages.len() - 1) }) {
                                let msg = &mut messages[i];
                                merge(&mut msg.usage, usage);
                                merge(&mut msg.metrics, metrics);

                                let provider_latency = msg.metrics.get("latencyMs").and_then(|v| v.as_f64());
                                let ttft = compute_ttft_ms(msg.start_time, msg.first_token_time, provider_latency);
                                let mut enriched = canonical.data();
                                if let (Some(ms), Value::Object(obj)) = (ttft, &mut enriched) {
                                    if let Some(Value::Object(metrics_obj)) = obj.get_mut("metrics") {
                                        metrics_obj.insert("timeToFirstByteMs".into(), Value::from(ms));
                                    }
                                }
                                yield format!("event: metadata\ndata: {enriched}\n\n");
                                continue;
                            }
                        }
                        CanonicalEvent::Error { error: err_text, code, detail, .. } => {
                            warn!(error = %err_text, code = %code, "processor surfaced an error event");
                            for frame in coordinator.emit_conversational_error(
                                &handle,
                                detail.as_deref().unwrap_or(err_text),
                            ).await {
                                yield frame;
                            }
                            return;
                        }
                        _ => {}
                    }

                    yield canonical.to_sse();
                }

                if processor.should_stop() {
                    break;
                }
            }

            for canonical in processor.finish() {
                yield canonical.to_sse();
            }

            coordinator.finish_turn(&handle, &session_id, assistant_messages, messages, initial_message_count, &model_info).await;
        })
    }

    async fn emit_conversational_error(&self, handle: &agentcore_store::types::SessionHandle, detail: &str) -> Vec<String> {
        let text = format!("Something went wrong while generating a response: {detail}");
        if let Err(e) = self.store.append(handle, PendingMessage {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text.clone())],
        }).await {
            warn!(error = %e, "failed to persist synthetic assistant error message");
        }
        if let Err(e) = self.store.flush(handle).await {
            warn!(error = %e, "emergency flush failed after conversational error");
        }

        vec![
            CanonicalEvent::Error {
                error: text,
                code: "STREAM_ERROR".into(),
                detail: Some(detail.to_string()),
                recoverable: false,
            }
            .to_sse(),
            CanonicalEvent::Done.to_sse(),
        ]
    }

    /// Post-stream bookkeeping: flush, update session metadata, persist
    /// per-message metadata in parallel (gather-all, no cancel-on-failure),
    /// record the turn's input tokens for compaction, and run compaction
    /// as a best-effort background step.
    async fn finish_turn(
        &self,
        handle: &agentcore_store::types::SessionHandle,
        session_id: &SessionId,
        assistant_messages: Vec<Vec<ContentBlock>>,
        per_message: Vec<PerMessageState>,
        initial_message_count: u64,
        model_info: &ModelInfo,
    ) {
        for blocks in &assistant_messages {
            if let Err(e) = self.store.append(handle, PendingMessage { role: Role::Assistant, content: blocks.clone() }).await {
                warn!(error = %e, "failed to buffer assistant message for persistence");
            }
        }

        let final_count = match self.store.flush(handle).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "post-stream flush failed");
                None
            }
        };

        let k = assistant_messages.len() as u64;
        let expected_final = initial_message_count + 2 * k;
        if let Some(observed) = final_count {
            if observed + 1 != expected_final {
                warn!(observed = observed + 1, expected_final, "final message count does not match turn-structure rule");
            }
        }

        if let Err(e) = self.store.update_session_metadata(session_id.as_str(), SessionMetadataPatch::default()).await {
            warn!(error = %e, "failed to update session metadata after turn");
        }

        let writes = per_message.iter().enumerate().map(|(idx, state)| {
            let message_id = agentcore_core::MessageId::for_sequence(session_id, initial_message_count + 1 + 2 * idx as u64);
            let usage = usage_from_json(&state.usage);
            let ttft = compute_ttft_ms(state.start_time, state.first_token_time, state.metrics.get("latencyMs").and_then(|v| v.as_f64()));
            let end_to_end = state.end_time.map(|e| (e - state.start_time).max(0.0) as u64).unwrap_or(0);
            let cost = self.cost_estimator.estimate(&usage, model_info);
            let meta = MessageMetadata {
                message_id,
                token_usage: usage,
                latency: Latency { time_to_first_token_ms: ttft, end_to_end_ms: end_to_end },
                model_info: model_info.clone(),
                attribution: Attribution {
                    user_id: handle.user_id.clone(),
                    session_id: session_id.clone(),
                    timestamp: chrono::Utc::now(),
                },
                cost,
            };
            let store = self.store.clone();
            let session_id = session_id.clone();
            async move {
                if let Err(e) = store.write_message_metadata(session_id.as_str(), meta.message_id.as_str(), meta).await {
                    warn!(error = %e, "failed to persist message metadata");
                }
            }
        });
        futures::future::join_all(writes).await;

        let total_input_tokens: u64 = per_message.iter().map(|s| usage_from_json(&s.usage).input
            + usage_from_json(&s.usage).cache_read
            + usage_from_json(&s.usage).cache_write).sum();
        if let Err(e) = self.store.update_after_turn(session_id.as_str(), total_input_tokens).await {
            warn!(error = %e, "failed to record turn input tokens for compaction");
        }

        self.run_compaction(session_id, total_input_tokens).await;
    }

    async fn run_compaction(&self, session_id: &SessionId, total_input_tokens: u64) {
        let session = match self.store.get_session(session_id.as_str()).await {
            Ok(Some(s)) => s,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "could not load session for compaction");
                return;
            }
        };
        let (messages, _) = match self.store.list_messages(session_id.as_str(), None, None).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "could not load messages for compaction");
                return;
            }
        };
        let current_state = session.compaction_state.unwrap_or_default();
        if let Some(new_state) = self.compaction.compact(&messages, &current_state, total_input_tokens) {
            let patch = SessionMetadataPatch { compaction_state: Some(new_state), ..Default::default() };
            if let Err(e) = self.store.update_session_metadata(session_id.as_str(), patch).await {
                warn!(error = %e, "failed to persist advanced compaction checkpoint");
            }
        }
    }
}

fn merge(dst: &mut Value, src: &Value) {
    if dst.is_null() {
        *dst = src.clone();
        return;
    }
    if let (Value::Object(d), Value::Object(s)) = (dst, src) {
        for (k, v) in s {
            d.insert(k.clone(), v.clone());
        }
    }
}

fn prompt_text(prompt: &ProviderPrompt) -> String {
    prompt
        .messages
        .last()
        .map(|m| m.content.iter().filter_map(|b| b.as_text()).collect::<Vec<_>>().join(""))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttft_uses_direct_measurement_when_plausible() {
        assert_eq!(compute_ttft_ms(0.0, Some(250.0), Some(300.0)), Some(250));
    }

    #[test]
    fn ttft_falls_back_to_provider_latency_fraction_when_implausibly_fast() {
        assert_eq!(compute_ttft_ms(0.0, Some(5.0), Some(500.0)), Some(150));
    }

    #[test]
    fn ttft_is_none_without_any_signal() {
        assert_eq!(compute_ttft_ms(0.0, None, None), None);
    }
}
