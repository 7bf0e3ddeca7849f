use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
struct ChatSummaryView {
    id: String,
    title: String,
    created_at: String,
    online: bool,
}

/// GET /api/chats
pub async fn list_chats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let chats = state.registry.list_chats()?;
    let views: Vec<ChatSummaryView> = chats
        .into_iter()
        .map(|c| ChatSummaryView {
            online: state.registry.is_online(&c.id),
            id: c.id,
            title: c.title,
            created_at: c.created_at,
        })
        .collect();
    Ok(Json(json!({ "chats": views })))
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateChatBody {
    title: Option<String>,
}

/// POST /api/chats
pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateChatBody>>,
) -> Result<Json<Value>, ApiError> {
    let title = body.and_then(|Json(b)| b.title);
    let chat = state.registry.create_chat(title)?;
    // Start the session eagerly so the first /messages call doesn't pay the
    // lazy-spawn cost and so `online` is true immediately after creation.
    state.registry.get_or_start(&chat.id).await?;
    Ok(Json(json!({ "id": chat.id, "title": chat.title })))
}

/// GET /api/chats/:id
pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state.registry.chat_snapshot(&id)?;
    Ok(Json(json!({
        "id": snapshot.id,
        "title": snapshot.title,
        "messages": snapshot.messages,
        "online": state.registry.is_online(&id),
    })))
}

/// DELETE /api/chats/:id
pub async fn delete_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.delete_chat(&id)?;
    Ok(Json(json!({ "ok": true })))
}
