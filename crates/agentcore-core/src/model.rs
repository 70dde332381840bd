use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{AgentId, MessageId, ModelId, SessionId, UserId};

/// Lifecycle state of a [`Session`]. Deletion is a status flip, not a row
/// removal — cost records keyed off the session must survive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Active,
    Deleted,
}

/// Per-session settings carried across turns: last model used, sampling
/// temperature, which tools are enabled, a hash of the active system
/// prompt (cheap invalidation check), and an optional assistant binding
/// for RAG context lookups.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionPreferences {
    pub last_model: Option<ModelId>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    pub system_prompt_hash: Option<String>,
    pub assistant_id: Option<String>,
}

/// A conversation. Owns an ordered, dense sequence of [`Message`]s —
/// `message_count` must always equal the number of messages persisted
/// under it (spec invariant: no gaps, no silent drops).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub agent_id: AgentId,
    pub title: Option<String>,
    pub status: SessionStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_message_at: chrono::DateTime<chrono::Utc>,
    pub message_count: u64,
    #[serde(default)]
    pub preferences: Option<SessionPreferences>,
    #[serde(default)]
    pub compaction_state: Option<CompactionState>,
}

impl Session {
    pub fn new(session_id: SessionId, user_id: UserId, agent_id: AgentId) -> Self {
        let now = chrono::Utc::now();
        Self {
            session_id,
            user_id,
            agent_id,
            title: None,
            status: SessionStatus::Active,
            created_at: now,
            last_message_at: now,
            message_count: 0,
            preferences: None,
            compaction_state: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// A message author's role. Tool results are carried as `User` messages
/// whose content list is all `tool_result` blocks — there is no separate
/// `tool` role, matching the alternating user/assistant invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One immutable turn entry. `sequence` is 0-based and dense within a
/// session; [`MessageId::for_sequence`] derives the public id from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub session_id: SessionId,
    pub sequence: u64,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Message {
    pub fn id(&self) -> MessageId {
        MessageId::for_sequence(&self.session_id, self.sequence)
    }
}

/// One block of message content. Tagged by `type` in the wire form, with
/// an `Unknown` catch-all so a provider that introduces a new block kind
/// doesn't fail deserialization of an entire stored message — it round
/// trips opaquely instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { tool_use_id: String, name: String, input: serde_json::Value },
    ToolResult { tool_use_id: String, content: Vec<ContentBlock> },
    Image { format: String, bytes: Vec<u8> },
    Document { format: String, name: String, bytes: Vec<u8> },
    #[serde(untagged)]
    Unknown(serde_json::Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Truncation replaces an image with a small text placeholder so a
    /// compacted transcript keeps shape without keeping payload bytes.
    pub fn image_placeholder(format: &str, original_size: usize) -> Self {
        ContentBlock::Text {
            text: format!("[Image placeholder: format={format}, original_size={original_size} bytes]"),
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { .. })
    }

    /// The block's text, if it is (or degrades to) a plain text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Token accounting for one message, split by cache behavior so the cost
/// calculator can price each bucket independently.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

/// Wall-clock timing for one assistant message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Latency {
    pub time_to_first_token_ms: Option<u64>,
    pub end_to_end_ms: u64,
}

/// Pricing in effect when a message's cost was computed. Embedded
/// read-only in [`MessageMetadata`] so historical costs never drift
/// when the current price list changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub input_price_per_mtok: f64,
    pub output_price_per_mtok: f64,
    pub cache_read_price_per_mtok: Option<f64>,
    pub cache_write_price_per_mtok: Option<f64>,
    pub currency: String,
    pub snapshot_at: chrono::DateTime<chrono::Utc>,
}

/// Model + provider identity paired with the pricing that applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_id: ModelId,
    pub model_name: String,
    pub provider: String,
    pub pricing_snapshot: PricingSnapshot,
}

/// Who/what/when a message is attributed to, for audit and billing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Sidecar record keyed by `{session_id, message_id}`, written at most
/// once per message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub message_id: MessageId,
    pub token_usage: TokenUsage,
    pub latency: Latency,
    pub model_info: ModelInfo,
    pub attribution: Attribution,
    pub cost: f64,
}

/// Embedded in [`Session`]; advances only when the last turn's input
/// tokens exceed the configured threshold and enough protected turns
/// have accumulated.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompactionState {
    pub checkpoint: u64,
    pub summary: String,
    pub last_input_tokens: u64,
}

/// Running cost+usage totals for one `{model_id}` bucket inside a
/// [`UserCostSummary`] or per-model [`SystemRollup`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelCostBreakdown {
    pub cost: f64,
    pub requests: u64,
    pub tokens: u64,
}

/// Keyed by `{user_id, period}`; updated only through atomic ADD —
/// never read-modify-written as a whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCostSummary {
    pub user_id: UserId,
    pub period: crate::types::Period,
    pub total_cost: f64,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub cache_savings: f64,
    #[serde(default)]
    pub per_model: HashMap<String, ModelCostBreakdown>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl UserCostSummary {
    pub fn empty(user_id: UserId, period: crate::types::Period) -> Self {
        Self {
            user_id,
            period,
            total_cost: 0.0,
            total_requests: 0,
            total_tokens: 0,
            cache_savings: 0.0,
            per_model: HashMap::new(),
            last_updated: chrono::Utc::now(),
        }
    }
}

/// Daily aggregate: `{date} → {cost, requests, tokens, active_users}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DailyRollup {
    pub date: crate::types::Date,
    pub cost: f64,
    pub requests: u64,
    pub tokens: u64,
    pub active_users: u64,
}

/// Monthly aggregate: `{period} → {cost, requests, tokens, active_users, cache_savings}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MonthlyRollup {
    pub period: crate::types::Period,
    pub cost: f64,
    pub requests: u64,
    pub tokens: u64,
    pub active_users: u64,
    pub cache_savings: f64,
}

/// Per-model aggregate: `{period, model_id} → {cost, requests, tokens, unique_users, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerModelRollup {
    pub period: crate::types::Period,
    pub model_id: ModelId,
    pub model_name: String,
    pub provider: String,
    pub cost: f64,
    pub requests: u64,
    pub tokens: u64,
    pub unique_users: u64,
}

/// The three rollup families share one table in the cloud backend; this
/// enum is what a `SystemRollup` query returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope")]
pub enum SystemRollup {
    Daily(DailyRollup),
    Monthly(MonthlyRollup),
    PerModel(PerModelRollup),
}

/// Scope a marker guards: the first-request-in-scope signal is a
/// conditional put keyed by `{scope, user_id}` that fails if the item
/// already exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerScope {
    Daily(crate::types::Date),
    Monthly(crate::types::Period),
    Model(crate::types::Period, ModelId),
}

impl MarkerScope {
    pub fn key(&self) -> String {
        match self {
            MarkerScope::Daily(d) => format!("DAILY#{}", d),
            MarkerScope::Monthly(p) => format!("MONTHLY#{}", p),
            MarkerScope::Model(p, m) => format!("MODEL#{}#{}", p, m.sanitized()),
        }
    }

    /// Item TTL in seconds: 90 days for daily markers, ~400 days for
    /// monthly/model markers (long enough to span a fiscal year's
    /// trailing close).
    pub fn ttl_seconds(&self) -> i64 {
        match self {
            MarkerScope::Daily(_) => 90 * 24 * 3600,
            MarkerScope::Monthly(_) | MarkerScope::Model(_, _) => 400 * 24 * 3600,
        }
    }
}

/// Conditional-put marker recording that `user_id` has already been
/// counted as active within `scope`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveUserMarker {
    pub scope: String,
    pub user_id: UserId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl ActiveUserMarker {
    pub fn new(scope: &MarkerScope, user_id: UserId) -> Self {
        let now = chrono::Utc::now();
        Self {
            scope: scope.key(),
            user_id,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(scope.ttl_seconds()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_starts_active_with_zero_messages() {
        let session = Session::new(SessionId::from("s1"), UserId::from("u1"), AgentId::main());
        assert!(session.is_active());
        assert_eq!(session.message_count, 0);
    }

    #[test]
    fn message_id_tracks_session_and_sequence() {
        let msg = Message {
            session_id: SessionId::from("s1"),
            sequence: 4,
            role: Role::Assistant,
            content: vec![ContentBlock::text("hi")],
            created_at: chrono::Utc::now(),
        };
        assert_eq!(msg.id().as_str(), "msg-s1-4");
    }

    #[test]
    fn unknown_content_block_round_trips_opaquely() {
        let raw = serde_json::json!({"type": "citation_span", "start": 1, "end": 4});
        let block: ContentBlock = serde_json::from_value(raw.clone()).unwrap();
        assert!(matches!(block, ContentBlock::Unknown(_)));
        let back = serde_json::to_value(&block).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn marker_scope_keys_match_documented_format() {
        let daily = MarkerScope::Daily(crate::types::Date("2026-03-05".to_string()));
        assert_eq!(daily.key(), "DAILY#2026-03-05");
        let monthly = MarkerScope::Monthly(crate::types::Period("2026-03".to_string()));
        assert_eq!(monthly.key(), "MONTHLY#2026-03");
        let model = MarkerScope::Model(
            crate::types::Period("2026-03".to_string()),
            ModelId::from("anthropic.claude-3-5-sonnet:v2"),
        );
        assert_eq!(model.key(), "MODEL#2026-03#anthropic_claude_3_5_sonnet_v2");
    }
}
