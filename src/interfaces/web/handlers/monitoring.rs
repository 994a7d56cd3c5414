use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};

use crate::core::error::HubError;

use super::super::AppState;

#[derive(serde::Deserialize)]
pub struct HeartbeatPush {
    pub cluster_name: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    /// Spoke-side stamp; defaults to the hub's clock when omitted.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

pub async fn get_clusters(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.heartbeat.snapshot(Utc::now()))
}

pub async fn push_heartbeat(
    State(state): State<AppState>,
    Json(payload): Json<HeartbeatPush>,
) -> Result<impl IntoResponse, HubError> {
    let timestamp = payload.timestamp.unwrap_or_else(Utc::now);
    state.heartbeat.ingest(
        &payload.cluster_name,
        payload.cpu_usage,
        payload.memory_usage,
        timestamp,
    )?;
    Ok(Json(
        serde_json::json!({ "success": true, "cluster": payload.cluster_name }),
    ))
}
