//! Converts a provider-native raw event stream into the canonical event
//! taxonomy the coordinator and client depend on.
//!
//! State machine grounded on
//! `skynet_agent::anthropic_stream::process_stream` (content-block index
//! tracking, tool-use accumulation) generalized from one fixed wire format
//! to the four-locations usage-extraction rule and completion-ordering
//! discipline of `original_source::strands_agent.streaming.stream_processor`.

use serde_json::{json, Value};

use crate::provider::{ProviderEvent, RawEventKind};

/// The normalized event taxonomy every downstream component depends on,
/// regardless of which provider produced the underlying raw event.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    InitEventLoop,
    StartEventLoop,
    MessageStart { role: String },
    ContentBlockStart { index: u32, block_type: String, tool_use: Option<Value> },
    ContentBlockDelta { index: u32, block_type: String, text: Option<String>, input: Option<Value> },
    ContentBlockStop { index: u32 },
    MessageStop { stop_reason: String },
    ToolUse { data: Value },
    ToolResult { data: Value },
    ToolError { data: Value },
    Reasoning { reasoning_text: Option<String>, reasoning_signature: Option<String>, redacted_content: Option<String> },
    CitationStart { citation_uuid: String, data: Value },
    CitationEnd { citation_uuid: String },
    Metadata { usage: Value, metrics: Value },
    /// Emitted once near the end, carrying accumulated totals.
    MetadataSummary { usage: Value, metrics: Value, first_token_time: Option<f64> },
    Done,
    Error { error: String, code: String, detail: Option<String>, recoverable: bool },
}

impl CanonicalEvent {
    /// The SSE `event:` tag for this event, per the wire taxonomy.
    pub fn tag(&self) -> &'static str {
        match self {
            CanonicalEvent::InitEventLoop => "init_event_loop",
            CanonicalEvent::StartEventLoop => "start_event_loop",
            CanonicalEvent::MessageStart { .. } => "message_start",
            CanonicalEvent::ContentBlockStart { .. } => "content_block_start",
            CanonicalEvent::ContentBlockDelta { .. } => "content_block_delta",
            CanonicalEvent::ContentBlockStop { .. } => "content_block_stop",
            CanonicalEvent::MessageStop { .. } => "message_stop",
            CanonicalEvent::ToolUse { .. } => "tool_use",
            CanonicalEvent::ToolResult { .. } => "tool_result",
            CanonicalEvent::ToolError { .. } => "tool_error",
            CanonicalEvent::Reasoning { .. } => "reasoning",
            CanonicalEvent::CitationStart { .. } => "citation_start",
            CanonicalEvent::CitationEnd { .. } => "citation_end",
            CanonicalEvent::Metadata { .. } => "metadata",
            CanonicalEvent::MetadataSummary { .. } => "metadata_summary",
            CanonicalEvent::Done => "done",
            CanonicalEvent::Error { .. } => "error",
        }
    }

    /// JSON body for the `data:` line of the SSE frame.
    pub fn data(&self) -> Value {
        match self {
            CanonicalEvent::InitEventLoop | CanonicalEvent::StartEventLoop | CanonicalEvent::Done => json!({}),
            CanonicalEvent::MessageStart { role } => json!({ "role": role }),
            CanonicalEvent::ContentBlockStart { index, block_type, tool_use } => {
                json!({ "contentBlockIndex": index, "type": block_type, "toolUse": tool_use })
            }
            CanonicalEvent::ContentBlockDelta { index, block_type, text, input } => {
                json!({ "contentBlockIndex": index, "type": block_type, "text": text, "input": input })
            }
            CanonicalEvent::ContentBlockStop { index } => json!({ "contentBlockIndex": index }),
            CanonicalEvent::MessageStop { stop_reason } => json!({ "stopReason": stop_reason }),
            CanonicalEvent::ToolUse { data } | CanonicalEvent::ToolResult { data } | CanonicalEvent::ToolError { data } => {
                data.clone()
            }
            CanonicalEvent::Reasoning { reasoning_text, reasoning_signature, redacted_content } => json!({
                "reasoningText": reasoning_text,
                "reasoning_signature": reasoning_signature,
                "redactedContent": redacted_content,
            }),
            CanonicalEvent::CitationStart { citation_uuid, data } => {
                let mut body = data.clone();
                if let Value::Object(map) = &mut body {
                    map.insert("citation_uuid".to_string(), json!(citation_uuid));
                }
                body
            }
            CanonicalEvent::CitationEnd { citation_uuid } => json!({ "citation_uuid": citation_uuid }),
            CanonicalEvent::Metadata { usage, metrics } => json!({ "usage": usage, "metrics": metrics }),
            CanonicalEvent::MetadataSummary { usage, metrics, first_token_time } => {
                json!({ "usage": usage, "metrics": metrics, "first_token_time": first_token_time })
            }
            CanonicalEvent::Error { error, code, detail, recoverable } => {
                json!({ "error": error, "code": code, "detail": detail, "recoverable": recoverable })
            }
        }
    }

    /// Render as an SSE frame: `event: <type>\ndata: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.tag(), self.data())
    }
}

fn merge_json(dst: &mut Value, src: &Value) {
    if let (Value::Object(dst_map), Value::Object(src_map)) = (dst, src) {
        for (k, v) in src_map {
            dst_map.insert(k.clone(), v.clone());
        }
    }
}

/// Stateful translator from one provider's raw events into canonical ones.
/// One instance per turn — the state it tracks (block index, accumulated
/// metadata, first-token detection, completion ordering) does not survive
/// across turns.
pub struct StreamProcessor {
    current_block_index: u32,
    accumulated_usage: Value,
    accumulated_metrics: Value,
    first_token_time: Option<f64>,
    result_seen: bool,
    complete_seen: bool,
    clock: fn() -> f64,
}

impl StreamProcessor {
    pub fn new() -> Self {
        Self::with_clock(default_clock)
    }

    /// Test seam: inject a deterministic clock instead of wall time.
    pub fn with_clock(clock: fn() -> f64) -> Self {
        Self {
            current_block_index: 0,
            accumulated_usage: json!({}),
            accumulated_metrics: json!({}),
            first_token_time: None,
            result_seen: false,
            complete_seen: false,
            clock,
        }
    }

    /// Whether the stream has reached a point where no more canonical
    /// events (besides the final `metadata_summary`/`done`) will be
    /// produced. Mirrors the "don't break after `complete` until `result`
    /// has been seen" rule: callers should keep polling the raw stream
    /// until this returns true, even after observing a `Complete`/`ForceStop`
    /// event, unless the raw stream itself has ended.
    pub fn should_stop(&self) -> bool {
        self.complete_seen && self.result_seen
    }

    /// Process one raw provider event, returning zero or more canonical
    /// events in emission order. Metadata is always extracted before
    /// completion is evaluated, so a provider that bundles `result` and
    /// `complete` into the same frame never loses usage data.
    pub fn process(&mut self, event: &ProviderEvent) -> Vec<CanonicalEvent> {
        let mut out = Vec::new();

        if let Some(metadata) = self.extract_metadata(&event.data) {
            out.push(metadata);
        }

        match event.kind {
            RawEventKind::Result => self.result_seen = true,
            RawEventKind::Complete | RawEventKind::ForceStop => self.complete_seen = true,
            _ => {}
        }

        match event.kind {
            RawEventKind::InitEventLoop => out.push(CanonicalEvent::InitEventLoop),
            RawEventKind::StartEventLoop => out.push(CanonicalEvent::StartEventLoop),
            RawEventKind::MessageStart => {
                self.current_block_index = 0;
                let role = event.data.get("role").and_then(|v| v.as_str()).unwrap_or("assistant").to_string();
                out.push(CanonicalEvent::MessageStart { role });
            }
            RawEventKind::ContentBlockStart => {
                let index = self.block_index(&event.data);
                let block_type = event.data.get("type").and_then(|v| v.as_str()).unwrap_or("text").to_string();
                let tool_use = event.data.get("toolUse").cloned();
                if self.is_delta_first_token(&block_type) {
                    self.mark_first_token();
                }
                out.push(CanonicalEvent::ContentBlockStart { index, block_type, tool_use });
            }
            RawEventKind::ContentBlockDelta => {
                let index = self.block_index(&event.data);
                let block_type = event.data.get("type").and_then(|v| v.as_str()).unwrap_or("text").to_string();
                let text = event.data.get("text").and_then(|v| v.as_str()).map(String::from);
                let input = event.data.get("input").cloned();
                if self.is_delta_first_token(&block_type) {
                    self.mark_first_token();
                }
                out.push(CanonicalEvent::ContentBlockDelta { index, block_type, text, input });
            }
            RawEventKind::ContentBlockStop => {
                let index = self.block_index(&event.data);
                self.current_block_index = self.current_block_index.max(index + 1);
                out.push(CanonicalEvent::ContentBlockStop { index });
            }
            RawEventKind::MessageStop => {
                let stop_reason = event.data.get("stopReason").and_then(|v| v.as_str()).unwrap_or("end_turn").to_string();
                out.push(CanonicalEvent::MessageStop { stop_reason });
            }
            RawEventKind::ToolUse => out.push(CanonicalEvent::ToolUse { data: event.data.clone() }),
            RawEventKind::ToolResult => out.push(CanonicalEvent::ToolResult { data: event.data.clone() }),
            RawEventKind::ToolError => out.push(CanonicalEvent::ToolError { data: event.data.clone() }),
            RawEventKind::Reasoning => {
                let reasoning_text = event.data.get("reasoningText").and_then(|v| v.as_str()).map(String::from);
                if reasoning_text.is_some() && self.first_token_time.is_none() {
                    self.mark_first_token();
                }
                out.push(CanonicalEvent::Reasoning {
                    reasoning_text,
                    reasoning_signature: event.data.get("reasoning_signature").and_then(|v| v.as_str()).map(String::from),
                    redacted_content: event.data.get("redactedContent").and_then(|v| v.as_str()).map(String::from),
                });
            }
            RawEventKind::CitationStart => {
                let citation_uuid = event.data.get("citation_uuid").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                out.push(CanonicalEvent::CitationStart { citation_uuid, data: event.data.clone() });
            }
            RawEventKind::CitationEnd => {
                let citation_uuid = event.data.get("citation_uuid").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                out.push(CanonicalEvent::CitationEnd { citation_uuid });
            }
            RawEventKind::Error => {
                let error = event.data.get("error").and_then(|v| v.as_str()).unwrap_or("stream error").to_string();
                let code = event.data.get("code").and_then(|v| v.as_str()).unwrap_or("STREAM_ERROR").to_string();
                let detail = event.data.get("detail").and_then(|v| v.as_str()).map(String::from);
                let recoverable = event.data.get("recoverable").and_then(|v| v.as_bool()).unwrap_or(false);
                out.push(CanonicalEvent::Error { error, code, detail, recoverable });
            }
            RawEventKind::Metadata | RawEventKind::Result | RawEventKind::Complete | RawEventKind::ForceStop | RawEventKind::Other => {}
        }

        out
    }

    /// Final `metadata_summary` + `done` pair, emitted once the raw stream
    /// has naturally ended or `should_stop` returned true.
    pub fn finish(&self) -> Vec<CanonicalEvent> {
        let mut out = Vec::new();
        let has_usage = self.accumulated_usage.as_object().map(|m| !m.is_empty()).unwrap_or(false);
        let has_metrics = self.accumulated_metrics.as_object().map(|m| !m.is_empty()).unwrap_or(false);
        if has_usage || has_metrics {
            out.push(CanonicalEvent::MetadataSummary {
                usage: self.accumulated_usage.clone(),
                metrics: self.accumulated_metrics.clone(),
                first_token_time: self.first_token_time,
            });
        }
        out.push(CanonicalEvent::Done);
        out
    }

    fn block_index(&mut self, data: &Value) -> u32 {
        match data.get("contentBlockIndex").and_then(|v| v.as_u64()) {
            Some(i) => i as u32,
            None => self.current_block_index,
        }
    }

    fn is_delta_first_token(&self, block_type: &str) -> bool {
        self.first_token_time.is_none() && matches!(block_type, "text" | "tool_use")
    }

    fn mark_first_token(&mut self) {
        self.first_token_time = Some((self.clock)());
    }

    /// Four-locations usage/metrics extraction: a combined top-level
    /// `metadata` object, bare top-level `usage`/`metrics`, a nested
    /// `result` object, or a nested inner event
    /// (`event.modelMetadataEvent` or similar). Cache fields are read with
    /// "is present" semantics (`Value::get` returning `Some`), not
    /// truthiness, so an explicit `0` is preserved rather than dropped.
    fn extract_metadata(&mut self, data: &Value) -> Option<CanonicalEvent> {
        let mut usage = json!({});
        let mut metrics = json!({});
        let mut found = false;

        if let Some(combined) = data.get("metadata") {
            if let Some(u) = combined.get("usage") {
                merge_json(&mut usage, &normalize_usage(u));
                found = true;
            }
            if let Some(m) = combined.get("metrics") {
                merge_json(&mut metrics, &normalize_metrics(m));
                found = true;
            }
        }

        if data.get("metadata").is_none() {
            if let Some(u) = data.get("usage") {
                merge_json(&mut usage, &normalize_usage(u));
                found = true;
            }
            if let Some(m) = data.get("metrics") {
                merge_json(&mut metrics, &normalize_metrics(m));
                found = true;
            }
        }

        if let Some(result) = data.get("result") {
            if let Some(u) = result.get("usage") {
                merge_json(&mut usage, &normalize_usage(u));
                found = true;
            }
            if let Some(m) = result.get("metrics") {
                merge_json(&mut metrics, &normalize_metrics(m));
                found = true;
            }
        }

        for nested_key in ["modelMetadataEvent", "model_metadata_event"] {
            if let Some(nested) = data.get(nested_key) {
                if let Some(u) = nested.get("usage") {
                    merge_json(&mut usage, &normalize_usage(u));
                    found = true;
                }
                if let Some(m) = nested.get("metrics") {
                    merge_json(&mut metrics, &normalize_metrics(m));
                    found = true;
                }
            }
        }

        if !found {
            return None;
        }

        merge_json(&mut self.accumulated_usage, &usage);
        merge_json(&mut self.accumulated_metrics, &metrics);

        Some(CanonicalEvent::Metadata { usage, metrics })
    }
}

impl Default for StreamProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn default_clock() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Copy through known usage fields, preserving explicit zeros on the cache
/// counters (`"is present"`, not `"is truthy"`).
fn normalize_usage(usage: &Value) -> Value {
    let mut out = serde_json::Map::new();
    for key in ["inputTokens", "outputTokens", "totalTokens"] {
        if let Some(v) = usage.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    for (wire_key, camel_key) in [
        ("cacheReadInputTokens", "cacheReadInputTokens"),
        ("cache_read_input_tokens", "cacheReadInputTokens"),
        ("cacheWriteInputTokens", "cacheWriteInputTokens"),
        ("cache_write_input_tokens", "cacheWriteInputTokens"),
    ] {
        if let Some(v) = usage.get(wire_key) {
            if !v.is_null() {
                out.insert(camel_key.to_string(), v.clone());
            }
        }
    }
    Value::Object(out)
}

fn normalize_metrics(metrics: &Value) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(v) = metrics.get("latencyMs") {
        out.insert("latencyMs".to_string(), v.clone());
    }
    let ttfb = metrics.get("timeToFirstByteMs").or_else(|| metrics.get("time_to_first_byte_ms"));
    if let Some(v) = ttfb {
        out.insert("timeToFirstByteMs".to_string(), v.clone());
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: RawEventKind, data: Value) -> ProviderEvent {
        ProviderEvent::new(kind, data)
    }

    #[test]
    fn message_start_resets_block_index() {
        let mut processor = StreamProcessor::with_clock(|| 1.0);
        processor.process(&event(RawEventKind::MessageStart, json!({ "role": "assistant" })));
        let events = processor.process(&event(RawEventKind::ContentBlockStart, json!({ "type": "text" })));
        assert_eq!(events, vec![CanonicalEvent::ContentBlockStart { index: 0, block_type: "text".into(), tool_use: None }]);
    }

    #[test]
    fn missing_content_block_index_falls_back_to_tracked_counter() {
        let mut processor = StreamProcessor::with_clock(|| 1.0);
        processor.process(&event(RawEventKind::ContentBlockStart, json!({ "type": "text" })));
        processor.process(&event(RawEventKind::ContentBlockStop, json!({})));
        let events = processor.process(&event(RawEventKind::ContentBlockStart, json!({ "type": "text" })));
        assert_eq!(events, vec![CanonicalEvent::ContentBlockStart { index: 1, block_type: "text".into(), tool_use: None }]);
    }

    #[test]
    fn first_text_delta_marks_first_token_time_once() {
        let mut processor = StreamProcessor::with_clock(|| 42.0);
        processor.process(&event(RawEventKind::ContentBlockDelta, json!({ "type": "text", "text": "hi" })));
        assert_eq!(processor.first_token_time, Some(42.0));
        let mut processor2 = StreamProcessor::with_clock(|| 99.0);
        processor2.first_token_time = Some(1.0);
        processor2.process(&event(RawEventKind::ContentBlockDelta, json!({ "type": "text", "text": "hi" })));
        assert_eq!(processor2.first_token_time, Some(1.0));
    }

    #[test]
    fn cache_zero_is_preserved_not_dropped() {
        let mut processor = StreamProcessor::with_clock(|| 1.0);
        let events = processor.process(&event(
            RawEventKind::Metadata,
            json!({ "usage": { "inputTokens": 10, "cacheReadInputTokens": 0 } }),
        ));
        let CanonicalEvent::Metadata { usage, .. } = &events[0] else { panic!("expected metadata") };
        assert_eq!(usage["cacheReadInputTokens"], json!(0));
    }

    #[test]
    fn metadata_is_extracted_from_all_four_locations() {
        let mut processor = StreamProcessor::with_clock(|| 1.0);
        assert!(processor.process(&event(RawEventKind::Metadata, json!({ "usage": { "inputTokens": 1 } }))).len() == 1);
        assert!(processor
            .process(&event(RawEventKind::Metadata, json!({ "metadata": { "usage": { "inputTokens": 2 } } })))
            .len()
            == 1);
        assert!(processor
            .process(&event(RawEventKind::Result, json!({ "result": { "usage": { "inputTokens": 3 } } })))
            .len()
            == 1);
        assert!(processor
            .process(&event(RawEventKind::Other, json!({ "modelMetadataEvent": { "usage": { "inputTokens": 4 } } })))
            .len()
            == 1);
        assert_eq!(processor.accumulated_usage["inputTokens"], json!(4));
    }

    #[test]
    fn completion_does_not_stop_until_result_seen() {
        let mut processor = StreamProcessor::with_clock(|| 1.0);
        processor.process(&event(RawEventKind::Complete, json!({})));
        assert!(!processor.should_stop());
        processor.process(&event(RawEventKind::Result, json!({ "result": { "usage": { "inputTokens": 5 } } })));
        assert!(processor.should_stop());
    }

    #[test]
    fn finish_emits_summary_only_when_metadata_was_observed() {
        let processor = StreamProcessor::with_clock(|| 1.0);
        assert_eq!(processor.finish(), vec![CanonicalEvent::Done]);
    }

    #[test]
    fn sse_frame_matches_wire_format() {
        let frame = CanonicalEvent::Done.to_sse();
        assert_eq!(frame, "event: done\ndata: {}\n\n");
    }
}
