use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::error::HubError;
use super::session::JobStatus;

/// Everything the execution runtime needs to schedule one job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobSpec {
    pub job_name: String,
    pub session_id: String,
    pub prompt: String,
    pub agent_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mcp_agent_overrides: Vec<String>,
}

impl Default for JobSpec {
    fn default() -> Self {
        JobSpec {
            job_name: String::new(),
            session_id: String::new(),
            prompt: String::new(),
            agent_type: "default".to_string(),
            model: None,
            credential_ref: None,
            mcp_agent_overrides: Vec::new(),
        }
    }
}

/// Seam over the external job-execution runtime. The runtime is a black
/// box that accepts a submission, reports one of four states, and serves
/// logs and an output artifact for finished jobs.
#[async_trait]
pub trait JobRuntime: Send + Sync {
    async fn submit(&self, spec: &JobSpec) -> Result<(), HubError>;

    /// NotFound means the job no longer exists (deleted or reclaimed);
    /// callers treat that as a benign signal, not an error.
    async fn status(&self, job_name: &str) -> Result<JobStatus, HubError>;

    async fn logs(&self, job_name: &str) -> Result<String, HubError>;

    /// Output artifact / log tail of a terminal job, raw.
    async fn output(&self, job_name: &str) -> Result<String, HubError>;

    /// Best-effort delete. Missing jobs are success.
    async fn delete(&self, job_name: &str) -> Result<(), HubError>;
}

/// HTTP-backed runtime client. Every call carries its own deadline so a
/// slow runtime can never wedge the poll loop.
pub struct HttpRuntime {
    base_url: String,
    client: reqwest::Client,
    call_timeout: Duration,
}

impl HttpRuntime {
    pub fn new(base_url: &str, call_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            call_timeout,
        }
    }

    async fn bounded<F, T>(&self, what: &str, fut: F) -> Result<T, HubError>
    where
        F: std::future::Future<Output = Result<T, HubError>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(HubError::Timeout(what.to_string())),
        }
    }

    fn upstream(e: reqwest::Error) -> HubError {
        HubError::Upstream(e.to_string())
    }
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
}

#[derive(Deserialize)]
struct TextBody {
    #[serde(alias = "logs", alias = "output")]
    text: String,
}

#[async_trait]
impl JobRuntime for HttpRuntime {
    async fn submit(&self, spec: &JobSpec) -> Result<(), HubError> {
        let url = format!("{}/jobs", self.base_url);
        self.bounded("runtime submit", async {
            let resp = self
                .client
                .post(&url)
                .json(spec)
                .send()
                .await
                .map_err(Self::upstream)?;
            if resp.status() == reqwest::StatusCode::CONFLICT {
                return Err(HubError::Conflict(format!(
                    "job {} already exists",
                    spec.job_name
                )));
            }
            resp.error_for_status().map_err(Self::upstream)?;
            Ok(())
        })
        .await
    }

    async fn status(&self, job_name: &str) -> Result<JobStatus, HubError> {
        let url = format!("{}/jobs/{}/status", self.base_url, job_name);
        self.bounded("runtime status", async {
            let resp = self.client.get(&url).send().await.map_err(Self::upstream)?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(HubError::NotFound(format!("job {}", job_name)));
            }
            let body: StatusBody = resp
                .error_for_status()
                .map_err(Self::upstream)?
                .json()
                .await
                .map_err(Self::upstream)?;
            match body.status.as_str() {
                "pending" => Ok(JobStatus::Pending),
                "running" => Ok(JobStatus::Running),
                "succeeded" => Ok(JobStatus::Succeeded),
                "failed" => Ok(JobStatus::Failed),
                other => Err(HubError::Upstream(format!(
                    "runtime reported unknown status '{}'",
                    other
                ))),
            }
        })
        .await
    }

    async fn logs(&self, job_name: &str) -> Result<String, HubError> {
        let url = format!("{}/jobs/{}/logs", self.base_url, job_name);
        self.bounded("runtime logs", async {
            let resp = self.client.get(&url).send().await.map_err(Self::upstream)?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(HubError::NotFound(format!("job {}", job_name)));
            }
            let body: TextBody = resp
                .error_for_status()
                .map_err(Self::upstream)?
                .json()
                .await
                .map_err(Self::upstream)?;
            Ok(body.text)
        })
        .await
    }

    async fn output(&self, job_name: &str) -> Result<String, HubError> {
        let url = format!("{}/jobs/{}/output", self.base_url, job_name);
        self.bounded("runtime output", async {
            let resp = self.client.get(&url).send().await.map_err(Self::upstream)?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(HubError::NotFound(format!("job {}", job_name)));
            }
            let body: TextBody = resp
                .error_for_status()
                .map_err(Self::upstream)?
                .json()
                .await
                .map_err(Self::upstream)?;
            Ok(body.text)
        })
        .await
    }

    async fn delete(&self, job_name: &str) -> Result<(), HubError> {
        let url = format!("{}/jobs/{}", self.base_url, job_name);
        self.bounded("runtime delete", async {
            let resp = self
                .client
                .delete(&url)
                .send()
                .await
                .map_err(Self::upstream)?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(());
            }
            resp.error_for_status().map_err(Self::upstream)?;
            Ok(())
        })
        .await
    }
}

/// In-process runtime double used by the test suites. Jobs advance only
/// when a test scripts them via [`MockRuntime::set_status`].
pub mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::core::error::HubError;
    use crate::core::session::JobStatus;

    use super::{JobRuntime, JobSpec};

    struct MockJob {
        #[allow(dead_code)]
        spec: JobSpec,
        status: JobStatus,
        logs: String,
        output: String,
    }

    #[derive(Default)]
    pub struct MockRuntime {
        jobs: Mutex<HashMap<String, MockJob>>,
        /// When set, every call fails with this transient error.
        pub fail_with: Mutex<Option<String>>,
    }

    impl MockRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_status(&self, job_name: &str, status: JobStatus) {
            if let Some(job) = self.jobs.lock().unwrap().get_mut(job_name) {
                job.status = status;
            }
        }

        pub fn set_logs(&self, job_name: &str, logs: &str) {
            if let Some(job) = self.jobs.lock().unwrap().get_mut(job_name) {
                job.logs = logs.to_string();
            }
        }

        pub fn set_output(&self, job_name: &str, output: &str) {
            if let Some(job) = self.jobs.lock().unwrap().get_mut(job_name) {
                job.output = output.to_string();
            }
        }

        pub fn submitted_jobs(&self) -> Vec<String> {
            let mut names: Vec<String> = self.jobs.lock().unwrap().keys().cloned().collect();
            names.sort();
            names
        }

        pub fn has_job(&self, job_name: &str) -> bool {
            self.jobs.lock().unwrap().contains_key(job_name)
        }

        fn check_outage(&self) -> Result<(), HubError> {
            if let Some(reason) = self.fail_with.lock().unwrap().clone() {
                return Err(HubError::Upstream(reason));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl JobRuntime for MockRuntime {
        async fn submit(&self, spec: &JobSpec) -> Result<(), HubError> {
            self.check_outage()?;
            self.jobs.lock().unwrap().insert(
                spec.job_name.clone(),
                MockJob {
                    spec: spec.clone(),
                    status: JobStatus::Pending,
                    logs: String::new(),
                    output: String::new(),
                },
            );
            Ok(())
        }

        async fn status(&self, job_name: &str) -> Result<JobStatus, HubError> {
            self.check_outage()?;
            self.jobs
                .lock()
                .unwrap()
                .get(job_name)
                .map(|j| j.status)
                .ok_or_else(|| HubError::NotFound(format!("job {}", job_name)))
        }

        async fn logs(&self, job_name: &str) -> Result<String, HubError> {
            self.check_outage()?;
            self.jobs
                .lock()
                .unwrap()
                .get(job_name)
                .map(|j| j.logs.clone())
                .ok_or_else(|| HubError::NotFound(format!("job {}", job_name)))
        }

        async fn output(&self, job_name: &str) -> Result<String, HubError> {
            self.check_outage()?;
            self.jobs
                .lock()
                .unwrap()
                .get(job_name)
                .map(|j| j.output.clone())
                .ok_or_else(|| HubError::NotFound(format!("job {}", job_name)))
        }

        async fn delete(&self, job_name: &str) -> Result<(), HubError> {
            self.check_outage()?;
            self.jobs.lock().unwrap().remove(job_name);
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn submit_then_script_status() {
            let rt = MockRuntime::new();
            let spec = JobSpec {
                job_name: "s-step-0".to_string(),
                session_id: "s".to_string(),
                prompt: "ping".to_string(),
                agent_type: "default".to_string(),
                ..JobSpec::default()
            };
            rt.submit(&spec).await.unwrap();
            assert_eq!(rt.status("s-step-0").await.unwrap(), JobStatus::Pending);

            rt.set_status("s-step-0", JobStatus::Succeeded);
            assert_eq!(rt.status("s-step-0").await.unwrap(), JobStatus::Succeeded);

            rt.delete("s-step-0").await.unwrap();
            assert!(matches!(
                rt.status("s-step-0").await,
                Err(HubError::NotFound(_))
            ));
            // Double delete stays success.
            rt.delete("s-step-0").await.unwrap();
        }

        #[tokio::test]
        async fn outage_turns_every_call_transient() {
            let rt = MockRuntime::new();
            *rt.fail_with.lock().unwrap() = Some("connection refused".to_string());
            let err = rt.status("any").await.unwrap_err();
            assert!(err.is_transient());
        }
    }
}
