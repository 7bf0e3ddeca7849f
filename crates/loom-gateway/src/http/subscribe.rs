use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::stream::Stream;
use loom_session::Event;
use tokio::sync::mpsc;

use crate::app::AppState;
use crate::error::ApiError;

/// GET /api/chats/:id/subscribe — long-lived stream of every subsequent
/// turn's events until the client disconnects. A dropped receiver is pruned
/// the next time the session actor broadcasts, so no explicit unsubscribe is
/// needed here.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let handle = state.registry.get_or_start(&id).await?;
    let (tx, mut rx) = mpsc::channel::<Event>(256);
    handle.subscribe(tx).await.ok_or(ApiError::SessionGone)?;

    let heartbeat_interval = Duration::from_secs(state.config.session.heartbeat_secs);

    let stream = async_stream::stream! {
        yield Ok(SseEvent::default().data(
            serde_json::to_string(&Event::Connected).unwrap_or_else(|_| "{\"type\":\"connected\"}".to_string()),
        ));

        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(Event::Done) => yield Ok(SseEvent::default().data("[DONE]")),
                        Some(other) => {
                            if let Ok(json) = serde_json::to_string(&other) {
                                yield Ok(SseEvent::default().data(json));
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok(SseEvent::default().comment("heartbeat"));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
