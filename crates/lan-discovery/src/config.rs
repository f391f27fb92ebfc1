//! Configuration for the discovery engine

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Discovery engine configuration
///
/// Used by both roles: the server reads `port` and
/// `broadcast_interval_ms`, the client reads `port`,
/// `discovery_timeout_ms` and `max_attempts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP port discovery traffic uses
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interval between announcement broadcasts, in milliseconds
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval_ms: u64,

    /// How long one client discovery round listens for responses, in milliseconds
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_ms: u64,

    /// Maximum number of client discovery rounds
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Subnet mask used to derive per-interface broadcast addresses
    ///
    /// Defaults to `255.255.255.0` (/24) when not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_mask: Option<Ipv4Addr>,
}

fn default_port() -> u16 {
    45_710
}

fn default_broadcast_interval() -> u64 {
    5_000
}

fn default_discovery_timeout() -> u64 {
    3_000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            broadcast_interval_ms: default_broadcast_interval(),
            discovery_timeout_ms: default_discovery_timeout(),
            max_attempts: default_max_attempts(),
            subnet_mask: None,
        }
    }
}

impl DiscoveryConfig {
    /// Interval between announcement broadcasts
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    /// Listening window of one client discovery round
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Effective subnet mask (configured or the /24 default)
    pub fn effective_mask(&self) -> Ipv4Addr {
        self.subnet_mask
            .unwrap_or_else(|| Ipv4Addr::new(255, 255, 255, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.port, 45_710);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.effective_mask(), Ipv4Addr::new(255, 255, 255, 0));
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: DiscoveryConfig = serde_json::from_str(r#"{"port": 9999}"#).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.broadcast_interval_ms, 5_000);
        assert_eq!(config.discovery_timeout_ms, 3_000);
    }

    #[test]
    fn test_custom_mask_roundtrip() {
        let mut config = DiscoveryConfig::default();
        config.subnet_mask = Some(Ipv4Addr::new(255, 255, 0, 0));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: DiscoveryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.effective_mask(), Ipv4Addr::new(255, 255, 0, 0));
    }
}
