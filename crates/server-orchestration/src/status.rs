//! Orchestrator lifecycle status and service health records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle status of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorStatus {
    /// Nothing is running
    Stopped,
    /// Services are being started
    Starting,
    /// All services started
    Running,
    /// Services are being torn down
    Stopping,
    /// Running, but new session upgrades are refused
    Paused,
    /// Startup failed; sticky until the next explicit start
    Error,
}

/// Health classification of a service or of the whole stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Probe succeeded
    Healthy,
    /// Service is down but the stack remains usable
    Degraded,
    /// An essential service is down
    Critical,
    /// Not yet probed
    Unknown,
}

/// Result of one health probe against one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealthRecord {
    /// Name of the probed service
    pub service_name: String,
    /// Whether the service reported itself running
    pub is_running: bool,
    /// Health classification derived from the probe
    pub status: HealthState,
    /// When the probe ran
    pub last_checked_at: DateTime<Utc>,
    /// How long the probe took, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_latency_ms: Option<u64>,
    /// Service-specific probe metrics (session count, announcement, ...)
    #[serde(default)]
    pub metrics: HashMap<String, Value>,
}

/// Fold per-service records into one stack-wide health state
///
/// Any Critical wins, then any Degraded, then Healthy when every record
/// is Healthy. An empty or mixed-unknown set is Unknown.
pub fn aggregate_health<'a, I>(records: I) -> HealthState
where
    I: IntoIterator<Item = &'a ServiceHealthRecord>,
{
    let mut saw_any = false;
    let mut saw_degraded = false;
    let mut saw_unknown = false;
    for record in records {
        saw_any = true;
        match record.status {
            HealthState::Critical => return HealthState::Critical,
            HealthState::Degraded => saw_degraded = true,
            HealthState::Unknown => saw_unknown = true,
            HealthState::Healthy => {}
        }
    }
    if !saw_any || saw_unknown {
        if saw_degraded {
            return HealthState::Degraded;
        }
        return HealthState::Unknown;
    }
    if saw_degraded {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    }
}
