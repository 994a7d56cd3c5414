use axum::Json;
use axum::extract::State;

use crate::core::probe::{ProbeSpec, clamp_timeout, probe_server};

use super::super::AppState;

#[derive(serde::Deserialize)]
pub struct McpTestRequest {
    /// Per-server deadline in seconds; clamped server-side.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub servers: Vec<ProbeSpec>,
}

/// Reachability check for a batch of MCP servers. Never fails: every
/// requested server yields exactly one result entry, in request order.
pub async fn test_mcp_servers(
    State(_state): State<AppState>,
    Json(payload): Json<McpTestRequest>,
) -> Json<serde_json::Value> {
    let timeout = clamp_timeout(payload.timeout);
    let mut results = Vec::with_capacity(payload.servers.len());
    for server in &payload.servers {
        results.push(probe_server(server, timeout).await);
    }
    Json(serde_json::json!(results))
}
