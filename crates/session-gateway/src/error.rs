//! Error types for the session gateway

use thiserror::Error;
use uuid::Uuid;

/// Session gateway error type
#[derive(Error, Debug)]
pub enum Error {
    /// The gateway was started while already running
    #[error("Session gateway is already running")]
    AlreadyRunning,

    /// An operation required a running gateway
    #[error("Session gateway is not running")]
    NotRunning,

    /// The session port could not be bound
    #[error("Failed to bind session listener: {0}")]
    Bind(std::io::Error),

    /// The configured maximum session count is reached
    #[error("Session capacity exceeded")]
    CapacityExceeded,

    /// No session with the given id is connected
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
