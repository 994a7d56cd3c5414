use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Deleted,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Deleted => "deleted",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SessionStatus::Pending),
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "deleted" => Some(SessionStatus::Deleted),
            _ => None,
        }
    }

    /// Terminal states are never left again, except for the reaper's
    /// completed/failed -> deleted transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Deleted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Single,
    Parallel,
    Sequential,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Single => "single",
            SessionMode::Parallel => "parallel",
            SessionMode::Sequential => "sequential",
        }
    }

    pub fn from_mode(value: &str) -> Option<Self> {
        match value {
            "single" => Some(SessionMode::Single),
            "parallel" => Some(SessionMode::Parallel),
            "sequential" => Some(SessionMode::Sequential),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One externally scheduled execution unit backing a session step.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JobHandle {
    pub job_name: String,
    pub step: usize,
    pub agent_type: String,
    pub status: JobStatus,
    /// Consecutive transient poll failures. Reset on any successful poll.
    #[serde(default)]
    pub poll_failures: u32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub status: SessionStatus,
    pub mode: SessionMode,
    /// One agent type per configured step, in step order. For sequential
    /// sessions this keeps the full plan even when fail-fast stops
    /// scheduling early.
    pub agent_types: Vec<String>,
    pub job_names: Vec<String>,
    pub jobs: Vec<JobHandle>,
    pub total_steps: usize,
    pub completed_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_agent_overrides: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Session {
    /// Deterministic per-step job name, unique across the cluster because
    /// the session id is.
    pub fn job_name_for_step(id: &str, step: usize) -> String {
        format!("{}-step-{}", id, step)
    }

    pub fn job_mut(&mut self, job_name: &str) -> Option<&mut JobHandle> {
        self.jobs.iter_mut().find(|j| j.job_name == job_name)
    }
}
