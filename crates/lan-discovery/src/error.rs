//! Error types for the discovery engine

use thiserror::Error;

/// Discovery engine error type
#[derive(Error, Debug)]
pub enum Error {
    /// The engine was started while already running
    #[error("Discovery engine is already running")]
    AlreadyRunning,

    /// An operation required a running engine
    #[error("Discovery engine is not running")]
    NotRunning,

    /// The discovery port could not be bound
    #[error("Failed to bind discovery socket: {0}")]
    Bind(std::io::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
