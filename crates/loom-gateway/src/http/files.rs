use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;

/// POST /api/chats/:id/files — saves an uploaded file into the session's
/// work_dir and injects a file-context message (does not start a turn).
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let handle = state.registry.get_or_start(&id).await?;
    let work_dir = handle.get_work_dir().await.ok_or(ApiError::SessionGone)?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .ok_or_else(|| ApiError::BadRequest("no file field in multipart body".to_string()))?;

    let filename = field
        .file_name()
        .map(sanitize_filename)
        .ok_or_else(|| ApiError::BadRequest("missing filename".to_string()))?;

    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let path = work_dir.join(&filename);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

    handle.add_file_context(filename.clone()).await;

    Ok(Json(json!({
        "success": true,
        "filename": filename,
        "path": path.to_string_lossy(),
    })))
}

/// Strip any path components from an uploaded filename so it can't escape
/// the session's work_dir.
fn sanitize_filename(name: &str) -> String {
    std::path::Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}
