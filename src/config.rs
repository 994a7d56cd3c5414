use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Hub configuration, loaded from an optional TOML file with environment
/// overrides on top. Every field has a default so a bare `taskhub serve`
/// works out of the box.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// Bind address for the API server.
    pub host: String,
    pub port: u16,
    /// Directory holding the sqlite session registry.
    pub data_dir: PathBuf,
    /// Base URL of the job runtime the dispatcher talks to.
    pub runtime_url: String,
    /// Poll loop cadence in seconds.
    pub poll_interval_secs: u64,
    /// Per-request deadline for runtime calls in seconds.
    pub poll_timeout_secs: u64,
    /// Consecutive transient failures tolerated before a job is failed.
    pub retry_budget: u32,
    /// Retention window for finished sessions in seconds.
    pub retention_ttl_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8420,
            data_dir: PathBuf::from("./data"),
            runtime_url: "http://127.0.0.1:8500".to_string(),
            poll_interval_secs: 5,
            poll_timeout_secs: 10,
            retry_budget: 5,
            retention_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl HubConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", p.display()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// `TASKHUB_*` variables override both defaults and file values.
    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = std::env::var("TASKHUB_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("TASKHUB_PORT") {
            self.port = port.parse().context("TASKHUB_PORT must be a port number")?;
        }
        if let Ok(dir) = std::env::var("TASKHUB_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("TASKHUB_RUNTIME_URL") {
            self.runtime_url = url;
        }
        if let Ok(ttl) = std::env::var("TASKHUB_RETENTION_TTL_SECS") {
            self.retention_ttl_secs = ttl
                .parse()
                .context("TASKHUB_RETENTION_TTL_SECS must be a number of seconds")?;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("taskhub.db")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.max(1))
    }

    pub fn retention_ttl(&self) -> Duration {
        Duration::from_secs(self.retention_ttl_secs.max(60))
    }
}
