//! `GET /v1/sessions/{id}/messages` — paginated history, a thin wrapper
//! over `Store::list_messages`'s cursor contract (spec §4.1).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use agentcore_core::model::Message;
use agentcore_store::Store;

use crate::app::AppState;
use crate::error::GatewayError;

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<ListMessagesResponse>, GatewayError> {
    let (messages, next_cursor) = state.store.list_messages(&session_id, query.limit, query.cursor).await?;
    Ok(Json(ListMessagesResponse { messages, next_cursor }))
}
