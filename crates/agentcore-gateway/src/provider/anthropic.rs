//! Anthropic Messages API adapter — the one concrete [`LlmProvider`] this
//! binary ships. Grounded on `skynet_agent::anthropic::AnthropicProvider`
//! for the request/auth shape and `skynet_agent::anthropic_stream::process_stream`
//! for the SSE line-buffering discipline, retargeted from that crate's
//! provider-specific `StreamEvent` onto the canonical `ProviderEvent`/
//! `RawEventKind` taxonomy so the coordinator never has to know which
//! provider produced a turn.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use agentcore_stream::provider::{LlmProvider, ProviderError, ProviderEvent, RawEventKind, RawEventStream};
use agentcore_stream::ProviderPrompt;

const API_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";
const OAUTH_TOKEN_PREFIX: &str = "sk-ant-oat01-";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    is_oauth: bool,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let is_oauth = api_key.starts_with(OAUTH_TOKEN_PREFIX);
        Self {
            client: reqwest::Client::new(),
            is_oauth,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.is_oauth {
            builder
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("anthropic-beta", OAUTH_BETA)
        } else {
            builder.header("x-api-key", &self.api_key)
        }
    }

    fn build_body(&self, prompt: &ProviderPrompt) -> Value {
        let messages: Vec<Value> = prompt
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        agentcore_core::model::Role::User => "user",
                        agentcore_core::model::Role::Assistant => "assistant",
                    },
                    "content": content_blocks_to_anthropic(&m.content),
                })
            })
            .collect();

        json!({
            "model": prompt.model,
            "max_tokens": if prompt.max_tokens == 0 { DEFAULT_MAX_TOKENS } else { prompt.max_tokens },
            "system": prompt.system,
            "messages": messages,
            "stream": true,
        })
    }
}

fn content_blocks_to_anthropic(blocks: &[agentcore_core::model::ContentBlock]) -> Vec<Value> {
    use agentcore_core::model::ContentBlock;

    blocks
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
            ContentBlock::ToolUse { tool_use_id, name, input } => {
                json!({ "type": "tool_use", "id": tool_use_id, "name": name, "input": input })
            }
            ContentBlock::ToolResult { tool_use_id, content } => {
                json!({ "type": "tool_result", "tool_use_id": tool_use_id, "content": content_blocks_to_anthropic(content) })
            }
            ContentBlock::Image { format, bytes } => json!({
                "type": "image",
                "source": { "type": "base64", "media_type": format!("image/{format}"), "data": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes) },
            }),
            ContentBlock::Document { format, name, bytes } => json!({
                "type": "document",
                "source": { "type": "base64", "media_type": format!("application/{format}"), "data": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes) },
                "title": name,
            }),
            ContentBlock::Unknown(v) => v.clone(),
        })
        .collect()
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream(&self, prompt: &ProviderPrompt) -> Result<RawEventStream, ProviderError> {
        let body = self.build_body(prompt);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %prompt.model, "opening Anthropic stream");

        let builder = self
            .client
            .post(&url)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let resp = self
            .apply_auth(builder)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok().map(|s| s * 1000))
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api { provider: "anthropic".into(), message: text });
        }

        Ok(Box::pin(parse_sse(resp)))
    }
}

/// Turns the Anthropic SSE response body into a [`RawEventStream`].
/// State carried across chunks mirrors `anthropic_stream::process_stream`:
/// a line buffer for chunk boundaries, the current block's declared type,
/// and the stop reason held until `message_stop` actually arrives.
fn parse_sse(resp: reqwest::Response) -> impl futures_util::Stream<Item = Result<ProviderEvent, ProviderError>> {
    async_stream::stream! {
        let mut byte_stream = resp.bytes_stream();
        let mut line_buf = String::new();
        let mut current_event = String::new();
        let mut current_block_type = String::new();
        let mut stop_reason = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(ProviderError::Unavailable(e.to_string()));
                    return;
                }
            };
            let Ok(text) = std::str::from_utf8(&chunk) else { continue };
            line_buf.push_str(text);

            let lines: Vec<String> = line_buf.split('\n').map(String::from).collect();
            let (complete, remainder) = lines.split_at(lines.len() - 1);
            let remainder = remainder.first().cloned().unwrap_or_default();

            for line in complete {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(event) = line.strip_prefix("event:") {
                    current_event = event.trim().to_string();
                    continue;
                }
                let Some(data) = line.strip_prefix("data:") else { continue };
                let data = data.trim();
                let parsed: Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };

                match current_event.as_str() {
                    "message_start" => {
                        let input_tokens = parsed
                            .pointer("/message/usage/input_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        yield Ok(ProviderEvent::new(
                            RawEventKind::MessageStart,
                            json!({ "role": "assistant", "usage": { "inputTokens": input_tokens } }),
                        ));
                    }
                    "content_block_start" => {
                        let block_type = parsed.pointer("/content_block/type").and_then(Value::as_str).unwrap_or("text").to_string();
                        current_block_type = block_type.clone();
                        let index = parsed.get("index").and_then(Value::as_u64).unwrap_or(0);
                        let tool_use = if block_type == "tool_use" {
                            Some(json!({
                                "toolUseId": parsed.pointer("/content_block/id").and_then(Value::as_str).unwrap_or_default(),
                                "name": parsed.pointer("/content_block/name").and_then(Value::as_str).unwrap_or_default(),
                            }))
                        } else {
                            None
                        };
                        yield Ok(ProviderEvent::new(
                            RawEventKind::ContentBlockStart,
                            json!({ "contentBlockIndex": index, "type": block_type, "toolUse": tool_use }),
                        ));
                    }
                    "content_block_delta" => {
                        let index = parsed.get("index").and_then(Value::as_u64).unwrap_or(0);
                        let delta_type = parsed.pointer("/delta/type").and_then(Value::as_str).unwrap_or("");
                        match delta_type {
                            "text_delta" => {
                                let text = parsed.pointer("/delta/text").and_then(Value::as_str).unwrap_or_default();
                                yield Ok(ProviderEvent::new(
                                    RawEventKind::ContentBlockDelta,
                                    json!({ "contentBlockIndex": index, "type": "text", "text": text }),
                                ));
                            }
                            "thinking_delta" => {
                                let text = parsed.pointer("/delta/thinking").and_then(Value::as_str).unwrap_or_default();
                                yield Ok(ProviderEvent::new(
                                    RawEventKind::Reasoning,
                                    json!({ "reasoningText": text }),
                                ));
                            }
                            "input_json_delta" => {
                                let partial = parsed.pointer("/delta/partial_json").and_then(Value::as_str).unwrap_or_default();
                                yield Ok(ProviderEvent::new(
                                    RawEventKind::ContentBlockDelta,
                                    json!({ "contentBlockIndex": index, "type": "tool_use", "input": partial }),
                                ));
                            }
                            other => debug!(delta_type = other, "unhandled Anthropic delta type"),
                        }
                    }
                    "content_block_stop" => {
                        let index = parsed.get("index").and_then(Value::as_u64).unwrap_or(0);
                        current_block_type.clear();
                        yield Ok(ProviderEvent::new(RawEventKind::ContentBlockStop, json!({ "contentBlockIndex": index })));
                    }
                    "message_delta" => {
                        if let Some(reason) = parsed.pointer("/delta/stop_reason").and_then(Value::as_str) {
                            stop_reason = reason.to_string();
                        }
                        let output_tokens = parsed.pointer("/usage/output_tokens").and_then(Value::as_u64).unwrap_or(0);
                        yield Ok(ProviderEvent::new(
                            RawEventKind::Metadata,
                            json!({ "usage": { "outputTokens": output_tokens } }),
                        ));
                    }
                    "message_stop" => {
                        yield Ok(ProviderEvent::new(
                            RawEventKind::MessageStop,
                            json!({ "stopReason": if stop_reason.is_empty() { "end_turn" } else { &stop_reason } }),
                        ));
                    }
                    "error" => {
                        warn!(?parsed, "Anthropic stream error event");
                        let message = parsed.pointer("/error/message").and_then(Value::as_str).unwrap_or("stream error").to_string();
                        yield Ok(ProviderEvent::new(
                            RawEventKind::Error,
                            json!({ "error": message, "code": "PROVIDER_ERROR", "recoverable": false }),
                        ));
                    }
                    // "ping" and unrecognized event types carry nothing actionable.
                    _ => {}
                }
            }

            line_buf = remainder;
        }
    }
}
