use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::core::error::HubError;
use crate::core::session::SessionMode;

use super::super::AppState;
use super::sessions::{create_and_submit, new_session};

#[derive(serde::Deserialize)]
pub struct CreateSessionV2Request {
    pub name: String,
    pub prompt: String,
    /// Single agent type, used when `agent_types` is absent.
    #[serde(default)]
    pub agent_type: Option<String>,
    /// One agent type per step, in step order.
    #[serde(default)]
    pub agent_types: Option<Vec<String>>,
    /// single | parallel | sequential. Defaults to single for one step,
    /// parallel for several.
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub credential_ref: Option<String>,
    #[serde(default)]
    pub mcp_agent_overrides: Vec<String>,
}

fn resolve_agent_types(payload: &CreateSessionV2Request) -> Result<Vec<String>, HubError> {
    let mut types: Vec<String> = payload
        .agent_types
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if types.is_empty() {
        let single = payload
            .agent_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("default");
        types.push(single.to_string());
    }
    Ok(types)
}

fn resolve_mode(
    requested: Option<&str>,
    step_count: usize,
) -> Result<SessionMode, HubError> {
    match requested {
        Some(raw) => SessionMode::from_mode(raw)
            .ok_or_else(|| HubError::Invalid(format!("unsupported mode '{}'", raw))),
        None if step_count <= 1 => Ok(SessionMode::Single),
        None => Ok(SessionMode::Parallel),
    }
}

pub async fn create_session_v2(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionV2Request>,
) -> Result<impl IntoResponse, HubError> {
    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        return Err(HubError::Invalid("prompt is required".to_string()));
    }

    let agent_types = resolve_agent_types(&payload)?;
    let mode = resolve_mode(payload.mode.as_deref(), agent_types.len())?;
    if mode == SessionMode::Single && agent_types.len() > 1 {
        return Err(HubError::Invalid(
            "single mode takes exactly one agent type".to_string(),
        ));
    }

    let name = if payload.name.trim().is_empty() {
        "session".to_string()
    } else {
        payload.name.trim().to_string()
    };
    let session = new_session(
        &name,
        prompt,
        mode,
        agent_types,
        payload.credential_ref.clone(),
        payload.model.clone(),
        payload.mcp_agent_overrides.clone(),
    );
    let stored = create_and_submit(&state, session).await?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(&stored)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(agent_types: Option<Vec<&str>>, mode: Option<&str>) -> CreateSessionV2Request {
        CreateSessionV2Request {
            name: "t".to_string(),
            prompt: "p".to_string(),
            agent_type: None,
            agent_types: agent_types.map(|v| v.into_iter().map(String::from).collect()),
            mode: mode.map(String::from),
            model: None,
            credential_ref: None,
            mcp_agent_overrides: vec![],
        }
    }

    #[test]
    fn agent_types_fall_back_to_default() {
        let types = resolve_agent_types(&payload(None, None)).unwrap();
        assert_eq!(types, vec!["default"]);

        let types =
            resolve_agent_types(&payload(Some(vec!["recon", " exploit ", ""]), None)).unwrap();
        assert_eq!(types, vec!["recon", "exploit"]);
    }

    #[test]
    fn mode_defaults_follow_step_count() {
        assert_eq!(resolve_mode(None, 1).unwrap(), SessionMode::Single);
        assert_eq!(resolve_mode(None, 3).unwrap(), SessionMode::Parallel);
        assert_eq!(
            resolve_mode(Some("sequential"), 3).unwrap(),
            SessionMode::Sequential
        );
        assert!(matches!(
            resolve_mode(Some("round-robin"), 2),
            Err(HubError::Invalid(_))
        ));
    }
}
