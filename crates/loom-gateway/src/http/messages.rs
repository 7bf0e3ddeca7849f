use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::Stream;
use loom_session::Event;
use serde::Deserialize;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub content: String,
}

/// POST /api/chats/:id/messages — streams this turn's events, terminated by
/// the literal `[DONE]` sentinel frame.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let handle = state.registry.get_or_start(&id).await?;
    let mut rx = handle
        .send_message_streamed(body.content)
        .await
        .ok_or(ApiError::SessionGone)?;

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            if matches!(event, Event::Done) {
                yield Ok(SseEvent::default().data("[DONE]"));
                break;
            }
            if let Ok(json) = serde_json::to_string(&event) {
                yield Ok(SseEvent::default().data(json));
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
