//! Configuration for the session gateway

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// TCP port the WebSocket listener binds
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interval between heartbeat broadcasts, in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Maximum number of concurrent sessions; unlimited when not set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,

    /// Idle duration after which a session is considered stale, in milliseconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    /// Period of the stale-session sweep, in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

fn default_port() -> u16 {
    45_720
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_idle_timeout() -> u64 {
    300_000
}

fn default_sweep_interval() -> u64 {
    60_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_sessions: None,
            idle_timeout_ms: default_idle_timeout(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl SessionConfig {
    /// Interval between heartbeat broadcasts
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Idle duration after which a session is stale
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Period of the stale-session sweep
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
