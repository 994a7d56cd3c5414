use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Error taxonomy for the hub. Client-caused errors map to 4xx with a
/// structured reason; infrastructure errors stay opaque on the wire and
/// keep their detail in the logs.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HubError {
    /// Transient infrastructure failures that background loops retry with
    /// a bounded budget instead of surfacing immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, HubError::Upstream(_) | HubError::Timeout(_))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::Conflict(_) => StatusCode::CONFLICT,
            HubError::Invalid(_) => StatusCode::BAD_REQUEST,
            HubError::Upstream(_) => StatusCode::BAD_GATEWAY,
            HubError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for HubError {
    fn from(e: rusqlite::Error) -> Self {
        HubError::Internal(e.into())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        HubError::Internal(e.into())
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let reason = if status.is_server_error() {
            tracing::error!("request failed: {:#}", self);
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (
            status,
            Json(serde_json::json!({ "success": false, "error": reason })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(HubError::Upstream("runtime down".into()).is_transient());
        assert!(HubError::Timeout("poll".into()).is_transient());
        assert!(!HubError::NotFound("session".into()).is_transient());
        assert!(!HubError::Conflict("dup".into()).is_transient());
    }

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            HubError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HubError::Invalid("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HubError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
    }
}
