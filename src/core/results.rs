use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::HubError;
use super::session::Session;
use super::store::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOrigin {
    Pull,
    Push,
}

impl ResultOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultOrigin::Pull => "pull",
            ResultOrigin::Push => "push",
        }
    }
}

/// Canonical result payload. The variant is chosen by the explicit `kind`
/// tag, never inferred from which keys happen to be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionResult {
    Generic {
        status: String,
        #[serde(default)]
        flags_found: Vec<String>,
        #[serde(default)]
        vulnerabilities: Vec<String>,
        #[serde(default)]
        outputs: BTreeMap<String, String>,
    },
    Scan {
        repository: String,
        scan_summary: String,
        #[serde(default)]
        files: Vec<String>,
        #[serde(default)]
        security_analysis: String,
        #[serde(default)]
        recommendations: Vec<String>,
    },
    /// Parse fallback: the artifact could not be decoded, keep the raw
    /// payload instead of raising.
    Partial { raw: String },
}

impl SessionResult {
    pub fn empty_generic(status: &str) -> Self {
        SessionResult::Generic {
            status: status.to_string(),
            flags_found: Vec::new(),
            vulnerabilities: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Plain-text rendering for the `?format=raw` file download.
    pub fn render_raw(&self) -> String {
        match self {
            SessionResult::Generic {
                status,
                flags_found,
                vulnerabilities,
                outputs,
            } => {
                let mut lines = vec![format!("status: {}", status)];
                for flag in flags_found {
                    lines.push(format!("flag: {}", flag));
                }
                for vuln in vulnerabilities {
                    lines.push(format!("vulnerability: {}", vuln));
                }
                for (agent, text) in outputs {
                    lines.push(format!("--- {} ---", agent));
                    lines.push(text.clone());
                }
                lines.join("\n")
            }
            SessionResult::Scan {
                repository,
                scan_summary,
                files,
                security_analysis,
                recommendations,
            } => {
                let mut lines = vec![
                    format!("repository: {}", repository),
                    format!("summary: {}", scan_summary),
                ];
                for f in files {
                    lines.push(format!("file: {}", f));
                }
                if !security_analysis.is_empty() {
                    lines.push(format!("analysis: {}", security_analysis));
                }
                for r in recommendations {
                    lines.push(format!("recommendation: {}", r));
                }
                lines.join("\n")
            }
            SessionResult::Partial { raw } => raw.clone(),
        }
    }
}

/// Parse a runtime output artifact into the canonical result shape.
///
/// Runtime output is agent-written and messy: try the tagged form first,
/// then a bare object missing the tag (treated as generic), and keep the
/// raw text as a partial result when neither works. Never errors.
pub fn parse_artifact(raw: &str) -> SessionResult {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return SessionResult::empty_generic("succeeded");
    }
    if let Ok(result) = serde_json::from_str::<SessionResult>(trimmed) {
        return result;
    }
    // Untagged object: agents commonly emit the generic fields without
    // the kind discriminator.
    #[derive(Deserialize)]
    struct Untagged {
        status: Option<String>,
        #[serde(default)]
        flags_found: Vec<String>,
        #[serde(default)]
        vulnerabilities: Vec<String>,
        #[serde(default)]
        outputs: BTreeMap<String, String>,
    }
    if let Ok(u) = serde_json::from_str::<Untagged>(trimmed) {
        return SessionResult::Generic {
            status: u.status.unwrap_or_else(|| "succeeded".to_string()),
            flags_found: u.flags_found,
            vulnerabilities: u.vulnerabilities,
            outputs: u.outputs,
        };
    }
    SessionResult::Partial {
        raw: raw.to_string(),
    }
}

/// Normalizes job output into the canonical result, from either ingestion
/// path, and answers result reads with pull-over-push precedence.
#[derive(Clone)]
pub struct ResultCollector {
    store: SessionStore,
}

impl ResultCollector {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Pull path: store the parsed artifact once the session's jobs are
    /// terminal. Pull is authoritative, so it overwrites nothing but its
    /// own slot and wins on reads.
    pub async fn store_pulled(&self, session_id: &str, raw: &str) -> Result<(), HubError> {
        let result = parse_artifact(raw);
        self.store
            .put_result(session_id, ResultOrigin::Pull, &result)
            .await
    }

    /// Push path: an external caller posts a finished result to the
    /// per-session webhook. While the session is still live the push
    /// overwrites the placeholder; once the session is finalized and a
    /// result exists, a second write is a duplicate and rejected.
    pub async fn store_pushed(
        &self,
        session: &Session,
        result: &SessionResult,
    ) -> Result<(), HubError> {
        if session.status.is_terminal() && self.store.has_any_result(&session.id).await? {
            return Err(HubError::Conflict(format!(
                "session {} already has a finalized result",
                session.id
            )));
        }
        self.store
            .put_result(&session.id, ResultOrigin::Push, result)
            .await
    }

    /// Pull-derived result if present, else the pushed one.
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionResult>, HubError> {
        if let Some(result) = self.store.get_result(session_id, ResultOrigin::Pull).await? {
            return Ok(Some(result));
        }
        self.store.get_result(session_id, ResultOrigin::Push).await
    }
}
