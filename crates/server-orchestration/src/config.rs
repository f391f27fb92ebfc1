//! Aggregate configuration for the orchestrated stack

use crate::error::Result;
use lan_discovery::DiscoveryConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use session_gateway::SessionConfig;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Configuration for the orchestrator and both supervised engines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Server name announced over discovery
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Version announced over discovery
    #[serde(default = "default_version")]
    pub version: String,

    /// Capability flags announced over discovery
    #[serde(default)]
    pub capabilities: HashMap<String, Value>,

    /// Port of the supervised HTTP service, announced over discovery
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Discovery engine configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Session gateway configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Period between health probes, in milliseconds
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_ms: u64,

    /// Deadline for each service start during startup, in milliseconds
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,

    /// Deadline for each service stop during shutdown, in milliseconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    /// Whether failed services are restarted automatically
    #[serde(default = "default_auto_recovery")]
    pub auto_recovery: bool,

    /// Consecutive restart attempts allowed per service
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Delay between stopping and restarting a failed service, in milliseconds
    #[serde(default = "default_recovery_backoff")]
    pub recovery_backoff_ms: u64,
}

fn default_server_name() -> String {
    "local-server".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_http_port() -> u16 {
    45_700
}

fn default_health_check_interval() -> u64 {
    30_000
}

fn default_startup_timeout() -> u64 {
    10_000
}

fn default_shutdown_timeout() -> u64 {
    5_000
}

fn default_auto_recovery() -> bool {
    true
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_recovery_backoff() -> u64 {
    1_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            version: default_version(),
            capabilities: HashMap::new(),
            http_port: default_http_port(),
            discovery: DiscoveryConfig::default(),
            session: SessionConfig::default(),
            health_check_interval_ms: default_health_check_interval(),
            startup_timeout_ms: default_startup_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            auto_recovery: default_auto_recovery(),
            max_recovery_attempts: default_max_recovery_attempts(),
            recovery_backoff_ms: default_recovery_backoff(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a YAML (`.yaml`/`.yml`) or JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = async_fs::read_to_string(path).await?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        let config = if is_yaml {
            serde_yaml::from_str(&contents)?
        } else {
            serde_json::from_str(&contents)?
        };
        Ok(config)
    }

    /// Period between health probes
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Deadline for each service start
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Deadline for each service stop
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Delay between stopping and restarting a failed service
    pub fn recovery_backoff(&self) -> Duration {
        Duration::from_millis(self.recovery_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.http_port, 45_700);
        assert_eq!(config.discovery.port, 45_710);
        assert_eq!(config.session.port, 45_720);
        assert_eq!(config.health_check_interval(), Duration::from_secs(30));
        assert!(config.auto_recovery);
        assert_eq!(config.max_recovery_attempts, 3);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "server_name: test-box\nsession:\n  port: 9000\n";
        let config: OrchestratorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server_name, "test-box");
        assert_eq!(config.session.port, 9000);
        assert_eq!(config.discovery.port, 45_710);
        assert_eq!(config.startup_timeout(), Duration::from_secs(10));
    }

    #[smol_potat::test]
    async fn test_from_file_json_and_yaml() {
        let dir = std::env::temp_dir();
        let json_path = dir.join("orchestrator-config-test.json");
        let yaml_path = dir.join("orchestrator-config-test.yaml");

        async_fs::write(&json_path, r#"{"server_name": "json-box"}"#)
            .await
            .unwrap();
        async_fs::write(&yaml_path, "server_name: yaml-box\n")
            .await
            .unwrap();

        let from_json = OrchestratorConfig::from_file(&json_path).await.unwrap();
        assert_eq!(from_json.server_name, "json-box");
        let from_yaml = OrchestratorConfig::from_file(&yaml_path).await.unwrap();
        assert_eq!(from_yaml.server_name, "yaml-box");

        let _ = async_fs::remove_file(&json_path).await;
        let _ = async_fs::remove_file(&yaml_path).await;
    }
}
