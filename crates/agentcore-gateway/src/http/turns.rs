//! `POST /v1/turns` — the one streaming entrypoint this gateway exposes.
//! Grounded on `skynet_gateway::http::chat::chat_handler`'s request shape
//! and `http::openai_compat::handle_streaming`'s SSE response plumbing,
//! minus everything that shape carried for auth/tool dispatch (out of
//! scope here).

use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use futures_util::stream::StreamExt;
use serde::Deserialize;

use agentcore_core::model::{Message, Role};
use agentcore_core::types::{SessionId, UserId, UserRole};
use agentcore_prompt::{build_prompt, Attachment};
use agentcore_store::Store;
use agentcore_stream::ProviderPrompt;

use crate::app::AppState;
use crate::error::GatewayError;

#[derive(Debug, Deserialize)]
pub struct AttachmentDto {
    pub filename: String,
    pub content_type: String,
    /// Base64-encoded file bytes — decoding belongs at this HTTP boundary,
    /// not inside `agentcore-prompt` (see that crate's `Attachment` doc).
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<UserRole>,
    pub prompt: String,
    #[serde(default)]
    pub attachments: Option<Vec<AttachmentDto>>,
    /// Per-request model override; defaults to `gateway.provider.default_model`.
    pub model: Option<String>,
    /// Optional assistant binding for RAG context lookup. Without one,
    /// the prompt streams unaugmented.
    pub assistant_id: Option<String>,
}

pub async fn turns_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TurnRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let session_id = SessionId::from(req.session_id);
    let user_id = UserId::from(req.user_id);
    let model = req.model.unwrap_or_else(|| state.config.gateway.provider.default_model.clone());

    let mut user_text = req.prompt;
    if let Some(assistant_id) = &req.assistant_id {
        user_text = state.rag.search_and_augment(assistant_id, &user_text, None).await;
    }

    let attachments: Vec<Attachment> = req
        .attachments
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| {
            match base64::engine::general_purpose::STANDARD.decode(&a.data) {
                Ok(bytes) => Some(Attachment { filename: a.filename, content_type: a.content_type, bytes }),
                Err(err) => {
                    tracing::warn!(error = %err, filename = %a.filename, "dropping attachment with invalid base64");
                    None
                }
            }
        })
        .collect();

    let content = build_prompt(&user_text, &attachments);

    let message = Message {
        session_id: session_id.clone(),
        sequence: 0,
        role: Role::User,
        content,
        created_at: chrono::Utc::now(),
    };

    let history = load_compacted_history(&state, session_id.as_str()).await?;

    let mut messages = history;
    messages.push(message);

    let prompt = ProviderPrompt {
        model: model.clone(),
        system: String::new(),
        messages,
        max_tokens: 4096,
    };

    let model_info = crate::pricing::snapshot_for(&model);

    let frames = state
        .coordinator
        .clone()
        .stream_response(state.provider.clone(), prompt, model_info, session_id, user_id)
        .map(|frame| Ok::<_, std::convert::Infallible>(to_axum_event(&frame)));

    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

/// Load a session's stored history and run it through the compaction
/// engine's Initialization path (spec §4.2): slice at the checkpoint,
/// prepend the delimited summary, and apply stage-1 truncation. A
/// session that doesn't exist yet (first turn) simply has no history.
async fn load_compacted_history(state: &AppState, session_id: &str) -> Result<Vec<Message>, GatewayError> {
    let Some(session) = state.store.get_session(session_id).await? else {
        return Ok(Vec::new());
    };
    let compaction_state = session.compaction_state.unwrap_or_default();
    let (messages, _) = state.store.list_messages(session_id, None, None).await?;
    Ok(state.compaction.prepare_context(&messages, &compaction_state))
}

/// [`agentcore_stream::StreamCoordinator::stream_response`] already yields
/// fully-formatted `event: <tag>\ndata: <json>\n\n` frames. Axum's `Sse`
/// type wants to own framing itself, so this splits a coordinator frame
/// back into the `event:`/`data:` pair `Event` expects.
fn to_axum_event(frame: &str) -> Event {
    let mut event = Event::default();
    let mut data = "";
    for line in frame.lines() {
        if let Some(tag) = line.strip_prefix("event: ") {
            event = event.event(tag.to_string());
        } else if let Some(d) = line.strip_prefix("data: ") {
            data = d;
        }
    }
    event.data(data)
}
