use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::error::HubError;

/// A spoke older than this is reported Offline. Spokes are expected to
/// push well under this window.
pub const OFFLINE_AFTER: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClusterMetric {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusterView {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub last_updated: DateTime<Utc>,
    pub status: ClusterStatus,
}

/// Hub-side snapshot. `server_time` lets distributed clients render
/// consistent relative ages despite their own clock skew.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MonitoringSnapshot {
    pub clusters: BTreeMap<String, ClusterView>,
    pub server_time: DateTime<Utc>,
}

/// One-way sink for health telemetry pushed by spoke clusters. High
/// fan-in, single writer per key: the map synchronizes per entry, no
/// global lock across clusters. Memory-resident by design; the next
/// spoke push rebuilds it after a restart.
#[derive(Default)]
pub struct ClusterHeartbeatMonitor {
    clusters: DashMap<String, ClusterMetric>,
}

impl ClusterHeartbeatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the metric for one spoke. A push stamped older than the
    /// stored entry is discarded, keeping `last_updated` monotonic per
    /// key even when spokes retry out of order.
    pub fn ingest(
        &self,
        cluster: &str,
        cpu_usage: f64,
        memory_usage: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), HubError> {
        if cluster.trim().is_empty() {
            return Err(HubError::Invalid("cluster name is required".to_string()));
        }
        if !(0.0..=100.0).contains(&cpu_usage) || !(0.0..=100.0).contains(&memory_usage) {
            return Err(HubError::Invalid(
                "cpu_usage and memory_usage must be within 0-100".to_string(),
            ));
        }

        let mut entry = self
            .clusters
            .entry(cluster.to_string())
            .or_insert_with(|| ClusterMetric {
                cpu_usage,
                memory_usage,
                last_updated: timestamp,
            });
        if timestamp < entry.last_updated {
            debug!(
                "discarding stale heartbeat from {} ({} < {})",
                cluster, timestamp, entry.last_updated
            );
            return Ok(());
        }
        *entry.value_mut() = ClusterMetric {
            cpu_usage,
            memory_usage,
            last_updated: timestamp,
        };
        Ok(())
    }

    pub fn classify(metric: &ClusterMetric, now: DateTime<Utc>) -> ClusterStatus {
        let age = now.signed_duration_since(metric.last_updated);
        if age < chrono::Duration::from_std(OFFLINE_AFTER).unwrap_or(chrono::Duration::zero()) {
            ClusterStatus::Online
        } else {
            ClusterStatus::Offline
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> MonitoringSnapshot {
        let mut clusters = BTreeMap::new();
        for entry in self.clusters.iter() {
            let metric = entry.value();
            clusters.insert(
                entry.key().clone(),
                ClusterView {
                    cpu_usage: metric.cpu_usage,
                    memory_usage: metric.memory_usage,
                    last_updated: metric.last_updated,
                    status: Self::classify(metric, now),
                },
            );
        }
        MonitoringSnapshot {
            clusters,
            server_time: now,
        }
    }
}
