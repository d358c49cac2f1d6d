//! Error types for the coolq learning engine.
//!
//! Nothing in a tick is allowed to abort the host, so these errors surface at
//! the port boundaries (aggregate fetch, actuation, persistence) and are
//! branched on explicitly by the control loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("aggregate source unavailable: {0}")]
    AggregatesUnavailable(String),

    #[error("actuation failed: {0}")]
    ActuationFailed(String),

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("invalid action '{input}': {reason}")]
    InvalidAction { input: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
