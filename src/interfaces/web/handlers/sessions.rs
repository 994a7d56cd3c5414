use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use chrono::Utc;
use uuid::Uuid;

use crate::core::error::HubError;
use crate::core::session::{Session, SessionMode, SessionStatus};

use super::super::AppState;

#[derive(serde::Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub credential_ref: Option<String>,
}

#[derive(serde::Deserialize)]
pub struct FileQuery {
    pub format: Option<String>,
}

pub(crate) fn summary(session: &Session) -> serde_json::Value {
    serde_json::json!({
        "id": session.id,
        "name": session.name,
        "status": session.status,
        "mode": session.mode,
        "total_steps": session.total_steps,
        "completed_steps": session.completed_steps,
        "created_at": session.created_at,
    })
}

pub(crate) fn new_session(
    name: &str,
    prompt: &str,
    mode: SessionMode,
    agent_types: Vec<String>,
    credential_ref: Option<String>,
    model: Option<String>,
    mcp_agent_overrides: Vec<String>,
) -> Session {
    let id = Uuid::new_v4().to_string();
    let total_steps = agent_types.len();
    let job_names = (0..total_steps)
        .map(|i| Session::job_name_for_step(&id, i))
        .collect();
    Session {
        id,
        name: name.to_string(),
        prompt: prompt.to_string(),
        status: SessionStatus::Pending,
        mode,
        agent_types,
        job_names,
        jobs: vec![],
        total_steps,
        completed_steps: 0,
        credential_ref,
        model,
        mcp_agent_overrides,
        created_at: Utc::now(),
        finished_at: None,
        error: None,
    }
}

/// Shared create path: store the session, then hand it to the dispatcher.
/// A submit failure is recorded on the session before it surfaces, so the
/// caller sees both the error and a consistent registry.
pub(crate) async fn create_and_submit(
    state: &AppState,
    session: Session,
) -> Result<Session, HubError> {
    state.store.create(&session).await?;
    if let Err(e) = state.dispatcher.submit(&session).await {
        let reason = e.to_string();
        state
            .store
            .update_with(&session.id, |s| {
                s.status = SessionStatus::Failed;
                s.finished_at = Some(Utc::now());
                s.error = Some(format!("job submission failed: {}", reason));
            })
            .await?;
        return Err(e);
    }
    state
        .store
        .get(&session.id)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("session {}", session.id)))
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, HubError> {
    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        return Err(HubError::Invalid("prompt is required".to_string()));
    }
    let name = if payload.name.trim().is_empty() {
        "session".to_string()
    } else {
        payload.name.trim().to_string()
    };

    let session = new_session(
        &name,
        prompt,
        SessionMode::Single,
        vec!["default".to_string()],
        payload.credential_ref,
        None,
        vec![],
    );
    let stored = create_and_submit(&state, session).await?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(&stored)?)))
}

pub async fn list_sessions(State(state): State<AppState>) -> Result<impl IntoResponse, HubError> {
    let sessions = state.store.list().await?;
    let summaries: Vec<serde_json::Value> = sessions.iter().map(summary).collect();
    Ok(Json(serde_json::Value::Array(summaries)))
}

pub async fn get_session(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, HubError> {
    let session = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("session {}", id)))?;
    Ok(Json(serde_json::to_value(&session)?))
}

pub async fn get_session_logs(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, HubError> {
    let session = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("session {}", id)))?;

    let mut chunks = Vec::new();
    for job in &session.jobs {
        match state.runtime.logs(&job.job_name).await {
            Ok(text) if !text.is_empty() => {
                if session.jobs.len() > 1 {
                    chunks.push(format!("=== {} ===\n{}", job.job_name, text));
                } else {
                    chunks.push(text);
                }
            }
            Ok(_) => {}
            // A reclaimed job simply has no logs anymore.
            Err(HubError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Json(serde_json::json!({ "logs": chunks.join("\n") })))
}

pub async fn get_session_result(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<axum::response::Response, HubError> {
    let session = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("session {}", id)))?;

    match state.dispatcher.collector().get(&id).await? {
        Some(result) => Ok(Json(serde_json::to_value(&result)?).into_response()),
        None if !session.status.is_terminal() => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": session.status })),
        )
            .into_response()),
        None => Err(HubError::NotFound(format!("result for session {}", id))),
    }
}

pub async fn get_session_file(
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
    State(state): State<AppState>,
) -> Result<axum::response::Response, HubError> {
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

    match query.format.as_deref().unwrap_or("json") {
        "json" => Ok(Json(serde_json::to_value(&result)?).into_response()),
        "raw" => Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            result.render_raw(),
        )
            .into_response()),
        other => Err(HubError::Invalid(format!(
            "unknown format '{}', expected raw or json",
            other
        ))),
    }
}

/// Idempotent: deleting a missing or already-deleted session succeeds.
pub async fn delete_session(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, HubError> {
    if let Some(session) = state.store.get(&id).await? {
        state.dispatcher.cancel(&session).await;
    }
    state.store.mark_deleted(&id).await?;
    Ok(Json(serde_json::json!({ "success": true, "id": id })))
}
