//! Two-stage context-window compaction.
//!
//! Stage one (per-turn truncation) shortens oversized tool inputs/results
//! and replaces images with a text placeholder in the *live* message list
//! fed to the model, leaving protected turns untouched; stage two
//! (checkpoint advancement) runs when the last turn's input tokens crossed
//! the configured threshold and enough protected turns have accumulated,
//! and produces a fallback summary of everything before the new
//! checkpoint. Both stages, the protected-turn window, and the
//! valid-cutoff rule are ported field-for-field from
//! `original_source::agents.main_agent.session.turn_based_session_manager.TurnBasedSessionManager`
//! (`_truncate_tool_contents`, `_find_protected_indices`,
//! `_find_valid_cutoff_indices`, `_generate_fallback_summary`,
//! `_prepend_summary_to_first_message`). The coordinator invokes stage two
//! as a best-effort, fire-and-forget step after a turn completes,
//! mirroring `skynet_agent::pipeline::compact::compact_session_if_needed`'s
//! "log and return on failure, never fail the turn" style — though the
//! decision here is deterministic (token threshold + turn count), not an
//! LLM call.

use std::collections::HashSet;

use agentcore_core::config::CompactionConfig;
use agentcore_core::model::{CompactionState, ContentBlock, Message, Role};
use tracing::{debug, info};

const SUMMARY_OPEN: &str = "<conversation_summary>\nThe following is a summary of our previous conversation:\n\n";
const SUMMARY_CLOSE: &str = "\n\nPlease continue the conversation with this context in mind.\n</conversation_summary>\n\n";

/// A message is a valid turn-starting cutoff only if it's a user message
/// that is not itself a tool-result submission.
fn is_valid_cutoff(message: &Message) -> bool {
    message.role == Role::User && !message.content.iter().any(ContentBlock::is_tool_result)
}

pub struct CompactionEngine {
    config: CompactionConfig,
}

impl CompactionEngine {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    /// Whether the checkpoint should advance, given the prior state and
    /// the input-token count from the turn that just completed.
    pub fn should_advance(&self, last_input_tokens: u64, user_turn_count: usize) -> bool {
        self.config.enabled
            && last_input_tokens > self.config.token_threshold
            && user_turn_count >= self.config.protected_turns + 1
    }

    /// Compute the new checkpoint and summary text for `messages`, given
    /// the session's current compaction state. Returns `None` if
    /// compaction should not run this turn (the prior state is returned
    /// unchanged by the caller in that case).
    #[tracing::instrument(skip(self, messages, current), fields(message_count = messages.len()))]
    pub fn compact(
        &self,
        messages: &[Message],
        current: &CompactionState,
        last_input_tokens: u64,
    ) -> Option<CompactionState> {
        let user_turns = messages.iter().filter(|m| m.role == Role::User).count();
        if !self.should_advance(last_input_tokens, user_turns) {
            debug!(last_input_tokens, user_turns, "compaction threshold not met");
            return None;
        }

        let new_checkpoint = self.compute_checkpoint(messages, current.checkpoint);
        if new_checkpoint <= current.checkpoint {
            debug!(checkpoint = current.checkpoint, "no valid cutoff beyond current checkpoint");
            return None;
        }

        let summary = self.build_fallback_summary(&messages[..new_checkpoint as usize]);

        info!(
            old_checkpoint = current.checkpoint,
            new_checkpoint,
            "advancing compaction checkpoint"
        );

        Some(CompactionState {
            checkpoint: new_checkpoint,
            summary,
            last_input_tokens,
        })
    }

    /// Keep the most recent `protected_turns` user/assistant pairs
    /// uncompacted, then snap backward to the nearest valid cutoff — a
    /// user message that is not a tool-result submission — so the
    /// checkpoint never lands mid-turn or on a tool result. Never moves
    /// the checkpoint backwards; returns `current_checkpoint` unchanged if
    /// no valid cutoff exists beyond it.
    fn compute_checkpoint(&self, messages: &[Message], current_checkpoint: u64) -> u64 {
        let protect = (self.config.protected_turns as u64) * 2;
        let candidate = (messages.len() as u64).saturating_sub(protect).max(current_checkpoint);

        let mut idx = candidate.min(messages.len() as u64);
        while idx > current_checkpoint {
            if let Some(message) = messages.get(idx as usize) {
                if is_valid_cutoff(message) {
                    return idx;
                }
            }
            idx -= 1;
        }
        current_checkpoint
    }

    /// Fallback summary of the messages being dropped from live context:
    /// the first non-markup line of each user message's first text block,
    /// capped at 100 chars, keeping only the most recent 10 entries.
    /// Matches `_generate_fallback_summary` exactly — no LTM summary
    /// retrieval exists in this system, so the fallback is the only path.
    fn build_fallback_summary(&self, messages: &[Message]) -> String {
        let mut key_points = Vec::new();
        for message in messages {
            if message.role != Role::User {
                continue;
            }
            for block in &message.content {
                if block.is_tool_result() {
                    continue;
                }
                if let Some(text) = block.as_text() {
                    let first_line: String = text.split('\n').next().unwrap_or("").chars().take(100).collect();
                    if !first_line.is_empty() && !first_line.starts_with('<') {
                        key_points.push(format!("- User asked about: {first_line}"));
                    }
                    break;
                }
            }
        }

        if key_points.is_empty() {
            return String::new();
        }

        let start = key_points.len().saturating_sub(10);
        format!("Previous conversation topics:\n{}", key_points[start..].join("\n"))
    }

    /// Message indices that should survive stage-1 truncation untouched:
    /// everything from the start of the oldest protected turn onward.
    fn protected_indices(&self, messages: &[Message]) -> HashSet<usize> {
        if self.config.protected_turns == 0 {
            return HashSet::new();
        }
        let turn_starts: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| is_valid_cutoff(m))
            .map(|(i, _)| i)
            .collect();
        if turn_starts.is_empty() {
            return HashSet::new();
        }
        let protect = self.config.protected_turns.min(turn_starts.len());
        let start = turn_starts[turn_starts.len() - protect];
        (start..messages.len()).collect()
    }

    /// Stage 1: truncate oversized tool inputs/results and replace images
    /// with a text placeholder in every non-protected message. Leaves
    /// protected messages byte-for-byte unchanged.
    pub fn truncate_tool_contents(&self, messages: &[Message]) -> Vec<Message> {
        let protected = self.protected_indices(messages);
        messages
            .iter()
            .enumerate()
            .map(|(idx, message)| {
                if protected.contains(&idx) {
                    message.clone()
                } else {
                    let mut truncated = message.clone();
                    truncated.content = truncated.content.iter().map(|b| self.truncate_block(b)).collect();
                    truncated
                }
            })
            .collect()
    }

    fn truncate_block(&self, block: &ContentBlock) -> ContentBlock {
        match block {
            ContentBlock::Image { format, bytes } => ContentBlock::image_placeholder(format, bytes.len()),
            ContentBlock::ToolUse { tool_use_id, name, input } => {
                let input_str = input.to_string();
                if input_str.len() > self.config.max_tool_content_length {
                    ContentBlock::ToolUse {
                        tool_use_id: tool_use_id.clone(),
                        name: name.clone(),
                        input: serde_json::json!({ "_truncated": self.truncate_text(&input_str) }),
                    }
                } else {
                    block.clone()
                }
            }
            ContentBlock::ToolResult { tool_use_id, content } => ContentBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: content.iter().map(|b| self.truncate_result_block(b)).collect(),
            },
            _ => block.clone(),
        }
    }

    fn truncate_result_block(&self, block: &ContentBlock) -> ContentBlock {
        match block {
            ContentBlock::Image { format, bytes } => ContentBlock::image_placeholder(format, bytes.len()),
            ContentBlock::Text { text } if text.len() > self.config.max_tool_content_length => {
                ContentBlock::text(self.truncate_text(text))
            }
            other => other.clone(),
        }
    }

    fn truncate_text(&self, text: &str) -> String {
        let max_len = self.config.max_tool_content_length;
        if text.len() <= max_len {
            text.to_string()
        } else {
            let truncated: String = text.chars().take(max_len).collect();
            let removed = text.len() - truncated.len();
            format!("{truncated}\n... [truncated, {removed} chars removed]")
        }
    }

    /// The Initialization path (spec §4.2): slice stored history at the
    /// checkpoint, prepend the delimited summary to the first surviving
    /// user message, then run stage-1 truncation over what remains. This
    /// is what a session's history is put through before it's handed to
    /// the model for a new turn — stored messages themselves are never
    /// rewritten.
    pub fn prepare_context(&self, messages: &[Message], state: &CompactionState) -> Vec<Message> {
        let checkpoint = state.checkpoint as usize;
        let sliced: Vec<Message> = if checkpoint > 0 && checkpoint < messages.len() {
            messages[checkpoint..].to_vec()
        } else {
            messages.to_vec()
        };

        let with_summary = if checkpoint > 0 && !state.summary.is_empty() {
            prepend_summary(sliced, &state.summary)
        } else {
            sliced
        };

        self.truncate_tool_contents(&with_summary)
    }
}

/// Prepend the summary, wrapped in the spec's delimiter, to the first
/// surviving message's first text block — inserting one if none exists.
/// A no-op if the first message isn't a user message.
fn prepend_summary(mut messages: Vec<Message>, summary: &str) -> Vec<Message> {
    let Some(first) = messages.first_mut() else { return messages };
    if first.role != Role::User {
        return messages;
    }

    let prefix = format!("{SUMMARY_OPEN}{summary}{SUMMARY_CLOSE}");
    if let Some(ContentBlock::Text { text }) = first.content.iter_mut().find(|b| matches!(b, ContentBlock::Text { .. })) {
        *text = format!("{prefix}{text}");
    } else {
        first.content.insert(0, ContentBlock::text(prefix.trim_end().to_string()));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcore_core::SessionId;

    fn config() -> CompactionConfig {
        CompactionConfig {
            enabled: true,
            token_threshold: 100,
            protected_turns: 1,
            max_tool_content_length: 10,
        }
    }

    fn message(session: &SessionId, seq: u64, role: Role, text: &str) -> Message {
        Message {
            session_id: session.clone(),
            sequence: seq,
            role,
            content: vec![ContentBlock::text(text)],
            created_at: chrono::Utc::now(),
        }
    }

    fn tool_result_message(session: &SessionId, seq: u64) -> Message {
        Message {
            session_id: session.clone(),
            sequence: seq,
            role: Role::User,
            content: vec![ContentBlock::ToolResult { tool_use_id: "t1".into(), content: vec![ContentBlock::text("ok")] }],
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn does_not_advance_below_token_threshold() {
        let engine = CompactionEngine::new(config());
        let state = CompactionState::default();
        assert!(engine.compact(&[], &state, 50).is_none());
    }

    #[test]
    fn does_not_advance_without_enough_protected_turns() {
        let engine = CompactionEngine::new(config());
        let session = SessionId::from("s1");
        let messages = vec![message(&session, 0, Role::User, "hi")];
        let state = CompactionState::default();
        assert!(engine.compact(&messages, &state, 500).is_none());
    }

    #[test]
    fn advances_checkpoint_to_valid_cutoff() {
        let engine = CompactionEngine::new(config());
        let session = SessionId::from("s1");
        let messages = vec![
            message(&session, 0, Role::User, "this is a long opening message"),
            message(&session, 1, Role::Assistant, "this is a long reply"),
            message(&session, 2, Role::User, "second turn"),
            message(&session, 3, Role::Assistant, "second reply"),
        ];
        let state = CompactionState::default();
        let new_state = engine.compact(&messages, &state, 500).expect("should advance");
        assert_eq!(new_state.checkpoint, 2);
        assert_eq!(new_state.last_input_tokens, 500);
    }

    #[test]
    fn checkpoint_never_moves_backwards() {
        let engine = CompactionEngine::new(config());
        let session = SessionId::from("s1");
        let messages = vec![message(&session, 0, Role::User, "a"), message(&session, 1, Role::Assistant, "b")];
        let state = CompactionState { checkpoint: 5, summary: String::new(), last_input_tokens: 0 };
        let new_state = engine.compact(&messages, &state, 500).unwrap();
        assert_eq!(new_state.checkpoint, 5);
    }

    #[test]
    fn checkpoint_never_lands_on_a_tool_result_message() {
        let engine = CompactionEngine::new(config());
        let session = SessionId::from("s1");
        // Candidate index (len - protect = 4 - 2 = 2) lands on a tool-result
        // message; the valid cutoff must snap back to index 0.
        let messages = vec![
            message(&session, 0, Role::User, "opening message"),
            message(&session, 1, Role::Assistant, "calls a tool"),
            tool_result_message(&session, 2),
            message(&session, 3, Role::Assistant, "replies using the tool result"),
        ];
        let state = CompactionState::default();
        let new_state = engine.compact(&messages, &state, 500).expect("should advance");
        assert_eq!(new_state.checkpoint, 0);
    }

    #[test]
    fn fallback_summary_matches_spec_shape() {
        let engine = CompactionEngine::new(config());
        let session = SessionId::from("s1");
        let messages = vec![
            message(&session, 0, Role::User, "How do I deploy this service?\nmore detail here"),
            message(&session, 1, Role::Assistant, "You deploy it like this"),
            tool_result_message(&session, 2),
            message(&session, 3, Role::User, "<system>ignored markup line</system>"),
        ];
        let summary = engine.build_fallback_summary(&messages);
        assert!(summary.starts_with("Previous conversation topics:\n"));
        assert!(summary.contains("- User asked about: How do I deploy this service?"));
        assert!(!summary.contains("ignored markup line"));
    }

    #[test]
    fn fallback_summary_keeps_only_last_ten_entries() {
        let engine = CompactionEngine::new(config());
        let session = SessionId::from("s1");
        let messages: Vec<Message> = (0..15)
            .map(|i| message(&session, i, Role::User, &format!("question number {i}")))
            .collect();
        let summary = engine.build_fallback_summary(&messages);
        let entry_count = summary.lines().filter(|l| l.starts_with("- User asked about:")).count();
        assert_eq!(entry_count, 10);
        assert!(summary.contains("question number 14"));
        assert!(!summary.contains("question number 4\n"));
    }

    #[test]
    fn stage_one_replaces_oversized_tool_results_and_images_outside_protected_window() {
        let engine = CompactionEngine::new(config());
        let session = SessionId::from("s1");
        let messages = vec![
            message(&session, 0, Role::User, "first turn"),
            Message {
                session_id: session.clone(),
                sequence: 1,
                role: Role::Assistant,
                content: vec![
                    ContentBlock::Image { format: "png".into(), bytes: vec![0u8; 40] },
                    ContentBlock::ToolResult {
                        tool_use_id: "t1".into(),
                        content: vec![ContentBlock::text("a very long tool result that exceeds the cap")],
                    },
                ],
                created_at: chrono::Utc::now(),
            },
            message(&session, 2, Role::User, "second turn, protected"),
        ];

        let truncated = engine.truncate_tool_contents(&messages);

        let ContentBlock::Text { text } = &truncated[1].content[0] else { panic!("expected image placeholder text block") };
        assert!(text.contains("[Image placeholder: format=png, original_size=40 bytes]"));

        let ContentBlock::ToolResult { content, .. } = &truncated[1].content[1] else { panic!("expected tool result") };
        let ContentBlock::Text { text } = &content[0] else { panic!("expected truncated text block") };
        assert!(text.contains("[truncated,"));

        // protected (last turn) is untouched
        assert_eq!(truncated[2].content.len(), messages[2].content.len());
    }

    #[test]
    fn prepare_context_slices_at_checkpoint_and_prepends_summary() {
        let engine = CompactionEngine::new(config());
        let session = SessionId::from("s1");
        let messages = vec![
            message(&session, 0, Role::User, "dropped turn"),
            message(&session, 1, Role::Assistant, "dropped reply"),
            message(&session, 2, Role::User, "kept turn"),
        ];
        let state = CompactionState { checkpoint: 2, summary: "Previous conversation topics:\n- User asked about: dropped turn".into(), last_input_tokens: 0 };

        let context = engine.prepare_context(&messages, &state);

        assert_eq!(context.len(), 1);
        let ContentBlock::Text { text } = &context[0].content[0] else { panic!("expected text block") };
        assert!(text.starts_with("<conversation_summary>"));
        assert!(text.contains("kept turn"));
    }
}
