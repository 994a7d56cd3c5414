use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;

use crate::core::error::HubError;
use crate::core::results::{SessionResult, parse_artifact};

use super::super::AppState;

/// Push ingestion: an external caller posts a finished result to the
/// per-session webhook. Tagged payloads are stored as-is; untagged ones
/// go through the same lenient normalization as pulled artifacts, so the
/// caller gets their fields back unchanged either way.
pub async fn push_result(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, HubError> {
    let session = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("session {}", id)))?;

    let result: SessionResult = match serde_json::from_value(payload.clone()) {
        Ok(r) => r,
        Err(_) => parse_artifact(&payload.to_string()),
    };
    state
        .dispatcher
        .collector()
        .store_pushed(&session, &result)
        .await?;
    Ok(Json(serde_json::json!({ "success": true, "id": id })))
}

/// Fallback fetch path for pushed results; same precedence rules as
/// `GET /api/sessions/{id}/result`.
pub async fn get_pushed_result(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, HubError> {
    state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("session {}", id)))?;
    let result = state
        .dispatcher
        .collector()
        .get(&id)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("result for session {}", id)))?;
    Ok(Json(serde_json::to_value(&result)?))
}
