use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /healthz — liveness probe, see SPEC §9A.
pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions_live": state.registry.live_count(),
        "uptime_secs": state.uptime_secs(),
    }))
}
