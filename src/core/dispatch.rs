use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use super::error::HubError;
use super::progress::apply_progress;
use super::results::ResultCollector;
use super::runtime::{JobRuntime, JobSpec};
use super::session::{JobHandle, JobStatus, Session, SessionMode, SessionStatus};
use super::store::SessionStore;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    /// Consecutive transient failures tolerated per job (and per result
    /// fetch) before giving up. A single flaky poll never flips status.
    pub retry_budget: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            retry_budget: 5,
        }
    }
}

/// Translates sessions into externally scheduled jobs and observes them
/// through a periodic poll loop.
pub struct JobDispatcher {
    store: SessionStore,
    runtime: Arc<dyn JobRuntime>,
    collector: ResultCollector,
    config: DispatcherConfig,
    /// Transient-failure counts for terminal-session result fetches.
    /// In-memory only: a restart just retries from zero.
    collect_attempts: Mutex<HashMap<String, u32>>,
}

impl JobDispatcher {
    pub fn new(
        store: SessionStore,
        runtime: Arc<dyn JobRuntime>,
        config: DispatcherConfig,
    ) -> Self {
        let collector = ResultCollector::new(store.clone());
        Self {
            store,
            runtime,
            collector,
            config,
            collect_attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn collector(&self) -> &ResultCollector {
        &self.collector
    }

    fn spec_for_step(session: &Session, step: usize) -> JobSpec {
        JobSpec {
            job_name: Session::job_name_for_step(&session.id, step),
            session_id: session.id.clone(),
            prompt: session.prompt.clone(),
            agent_type: session
                .agent_types
                .get(step)
                .cloned()
                .unwrap_or_else(|| "default".to_string()),
            model: session.model.clone(),
            credential_ref: session.credential_ref.clone(),
            mcp_agent_overrides: session.mcp_agent_overrides.clone(),
        }
    }

    /// Create the initial job(s) for a freshly stored session. Single and
    /// parallel modes schedule everything up front; sequential schedules
    /// step 0 and lets the poll loop chain the rest.
    pub async fn submit(&self, session: &Session) -> Result<(), HubError> {
        let steps: Vec<usize> = match session.mode {
            SessionMode::Single => vec![0],
            SessionMode::Parallel => (0..session.total_steps).collect(),
            SessionMode::Sequential => vec![0],
        };
        for step in steps {
            self.submit_step(&session.id, session, step).await?;
        }
        Ok(())
    }

    async fn submit_step(
        &self,
        session_id: &str,
        session: &Session,
        step: usize,
    ) -> Result<(), HubError> {
        let spec = Self::spec_for_step(session, step);
        self.runtime.submit(&spec).await?;
        info!(
            "session {} scheduled job {} (agent {})",
            session_id, spec.job_name, spec.agent_type
        );
        self.store
            .update_with(session_id, |s| {
                s.jobs.push(JobHandle {
                    job_name: spec.job_name.clone(),
                    step,
                    agent_type: spec.agent_type.clone(),
                    status: JobStatus::Pending,
                    poll_failures: 0,
                });
            })
            .await?;
        Ok(())
    }

    /// Best-effort cancel of every owned job. In-flight work may keep
    /// running briefly until the runtime reclaims it; that is accepted.
    pub async fn cancel(&self, session: &Session) {
        for job_name in &session.job_names {
            if let Err(e) = self.runtime.delete(job_name).await {
                debug!("cancel of job {} ignored: {}", job_name, e);
            }
        }
    }

    /// One pass over every live session. Each poll is individually
    /// bounded by the runtime client, so a stuck runtime costs one tick,
    /// never the loop.
    pub async fn poll_once(&self) -> Result<(), HubError> {
        let sessions = self.store.list().await?;
        for session in sessions {
            let live = !session.status.is_terminal()
                || (session.status != SessionStatus::Deleted && session.finished_at.is_none());
            if !live {
                continue;
            }
            if let Err(e) = self.poll_session(&session.id).await {
                warn!("poll of session {} failed: {}", session.id, e);
            }
        }
        Ok(())
    }

    async fn poll_session(&self, session_id: &str) -> Result<(), HubError> {
        // The session may have vanished since listing; that is a no-op.
        let Some(session) = self.store.get(session_id).await? else {
            return Ok(());
        };
        if session.status == SessionStatus::Deleted {
            return Ok(());
        }

        // Observe every non-terminal job outside the store lock.
        let mut observed: HashMap<String, Result<JobStatus, HubError>> = HashMap::new();
        for job in session.jobs.iter().filter(|j| !j.status.is_terminal()) {
            observed.insert(
                job.job_name.clone(),
                self.runtime.status(&job.job_name).await,
            );
        }

        let budget = self.config.retry_budget;
        let updated = self
            .store
            .update_with(session_id, |s| {
                for (job_name, outcome) in &observed {
                    let Some(job) = s.job_mut(job_name) else {
                        continue;
                    };
                    if job.status.is_terminal() {
                        continue;
                    }
                    match outcome {
                        Ok(status) => {
                            job.status = *status;
                            job.poll_failures = 0;
                        }
                        Err(HubError::NotFound(_)) => {
                            // Job reclaimed out from under us, typically a
                            // concurrent delete. Leave the handle as-is.
                        }
                        Err(e) => {
                            job.poll_failures += 1;
                            if job.poll_failures >= budget {
                                job.status = JobStatus::Failed;
                                s.error = Some(format!(
                                    "job {} gave up after {} poll failures: {}",
                                    job_name, budget, e
                                ));
                            }
                        }
                    }
                }
                apply_progress(s);
            })
            .await?;
        let Some(updated) = updated else {
            return Ok(());
        };

        // Sequential chaining: once the newest step succeeds, schedule the
        // next one. A failed step aborts scheduling entirely (fail-fast).
        if updated.mode == SessionMode::Sequential && !updated.status.is_terminal() {
            let scheduled = updated.jobs.len();
            let all_done = updated.jobs.iter().all(|j| j.status == JobStatus::Succeeded);
            if all_done && scheduled < updated.total_steps {
                self.submit_step(session_id, &updated, scheduled).await?;
                return Ok(());
            }
        }

        if updated.status.is_terminal() && updated.finished_at.is_none() {
            self.finalize(&updated).await?;
        }
        Ok(())
    }

    /// Collect the pull-side result and stamp `finished_at`. A transient
    /// fetch failure leaves the stamp unset so the next tick retries,
    /// bounded by the retry budget.
    async fn finalize(&self, session: &Session) -> Result<(), HubError> {
        match self.collect_output(session).await {
            Ok(Some(raw)) => {
                self.collector.store_pulled(&session.id, &raw).await?;
            }
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                let mut attempts = self.collect_attempts.lock().await;
                let n = attempts.entry(session.id.clone()).or_insert(0);
                *n += 1;
                if *n < self.config.retry_budget {
                    debug!(
                        "result fetch for session {} failed (attempt {}): {}",
                        session.id, n, e
                    );
                    return Ok(());
                }
                warn!(
                    "giving up on result fetch for session {} after {} attempts: {}",
                    session.id, n, e
                );
            }
            Err(e) => {
                warn!("result fetch for session {} failed: {}", session.id, e);
            }
        }
        self.collect_attempts.lock().await.remove(&session.id);
        self.store
            .update_with(&session.id, |s| {
                if s.finished_at.is_none() {
                    s.finished_at = Some(Utc::now());
                }
            })
            .await?;
        info!(
            "session {} finalized as {}",
            session.id,
            session.status.as_str()
        );
        Ok(())
    }

    /// Raw output artifact for the session. A single-job session uses its
    /// job's artifact directly; multi-job sessions merge per-agent outputs
    /// into a generic payload keyed by agent type.
    async fn collect_output(&self, session: &Session) -> Result<Option<String>, HubError> {
        let terminal: Vec<&JobHandle> = session
            .jobs
            .iter()
            .filter(|j| j.status.is_terminal())
            .collect();
        if terminal.is_empty() {
            return Ok(None);
        }
        if terminal.len() == 1 && session.total_steps == 1 {
            return match self.runtime.output(&terminal[0].job_name).await {
                Ok(raw) => Ok(Some(raw)),
                Err(HubError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            };
        }

        let mut outputs = serde_json::Map::new();
        for job in terminal {
            match self.runtime.output(&job.job_name).await {
                Ok(raw) => {
                    outputs.insert(job.agent_type.clone(), serde_json::Value::String(raw));
                }
                Err(HubError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if outputs.is_empty() {
            return Ok(None);
        }
        let merged = serde_json::json!({
            "kind": "generic",
            "status": session.status.as_str(),
            "outputs": outputs,
        });
        Ok(Some(merged.to_string()))
    }

    /// Supervised poll loop, bound to process lifetime and stoppable on
    /// shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            "dispatcher poll loop started (every {:?})",
            self.config.poll_interval
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("dispatcher tick failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("dispatcher poll loop stopping");
                    break;
                }
            }
        }
    }
}
