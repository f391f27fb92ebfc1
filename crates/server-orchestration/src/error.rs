//! Error types for server orchestration

use crate::status::OrchestratorStatus;
use thiserror::Error;

/// Orchestration error type
#[derive(Error, Debug)]
pub enum Error {
    /// The requested lifecycle transition is not allowed
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        /// Current status
        from: OrchestratorStatus,
        /// Requested status
        to: OrchestratorStatus,
    },

    /// A supervised service did not respond within its deadline
    #[error("Service operation timed out: {service}")]
    ServiceTimeout {
        /// The service that timed out
        service: String,
    },

    /// Startup failed and was rolled back
    #[error("Startup failed: {0}")]
    StartupFailed(String),

    /// Automatic recovery gave up on a service
    #[error("Recovery exhausted for service: {0}")]
    RecoveryExhausted(String),

    /// Discovery engine error
    #[error("Discovery error: {0}")]
    Discovery(#[from] lan_discovery::Error),

    /// Session gateway error
    #[error("Session error: {0}")]
    Session(#[from] session_gateway::Error),

    /// HTTP facade error
    #[error("HTTP error: {0}")]
    Http(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration error
    #[error("YAML configuration error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
