use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::error::HubError;
use super::runtime::JobRuntime;
use super::session::SessionStatus;
use super::store::SessionStore;

/// TTL-based garbage collector for terminal sessions. Owned jobs are
/// deleted from the runtime, then the session is soft-marked deleted and
/// kept for audit.
pub struct RetentionReaper {
    store: SessionStore,
    runtime: Arc<dyn JobRuntime>,
    ttl: Duration,
}

impl RetentionReaper {
    pub fn new(store: SessionStore, runtime: Arc<dyn JobRuntime>, ttl: Duration) -> Self {
        Self {
            store,
            runtime,
            ttl,
        }
    }

    /// One sweep over the registry. Safe against concurrent explicit
    /// deletes: a session that went away or was already marked deleted is
    /// simply skipped.
    pub async fn sweep(&self) -> Result<usize, HubError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.ttl).unwrap_or_default();
        let mut reaped = 0;
        for session in self.store.list().await? {
            let expired = matches!(
                session.status,
                SessionStatus::Completed | SessionStatus::Failed
            ) && session.finished_at.is_some_and(|t| t < cutoff);
            if !expired {
                continue;
            }

            for job_name in &session.job_names {
                if let Err(e) = self.runtime.delete(job_name).await {
                    debug!("reaper delete of job {} ignored: {}", job_name, e);
                }
            }
            self.store.mark_deleted(&session.id).await?;
            info!("reaped session {} ({})", session.id, session.status.as_str());
            reaped += 1;
        }
        Ok(reaped)
    }

    /// Periodic sweep task; the interval tracks the TTL so an expired
    /// session lives at most two TTL windows.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.ttl);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("retention reaper started (ttl {:?})", self.ttl);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(0) => {}
                        Ok(n) => info!("reaper swept {} sessions", n),
                        Err(e) => warn!("reaper sweep failed: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    info!("retention reaper stopping");
                    break;
                }
            }
        }
    }
}
