//! coolq: safety-gated Q-learning control for zoned cooling
//!
//! This crate hosts the learning engine from `coolq-core`: TOML
//! configuration, JSONL telemetry, and a simulated plant used by the
//! `coolq_sim` binary and the integration tests.

pub mod config_io;
pub mod sim;
pub mod telemetry;

// Re-export key types
pub use config_io::{config_digest, default_config_toml, load_config, load_state_file};
pub use coolq_core::{
    ActionKey, ControlLoop, ControllerConfig, ControllerStatus, FileStore, ForcedActionResult,
    MemoryStore, PersistedState, QTable, StateKey, StateStore, TickOutcome, TickReport,
};
pub use sim::{SimActuator, SimConfig, SimPlant, SimSensors};
pub use telemetry::{TelemetryEntry, TelemetryLogger};

/// Main error type for coolq hosts
#[derive(Debug, thiserror::Error)]
pub enum CoolqError {
    #[error("Core error: {0}")]
    Core(#[from] coolq_core::CoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoolqError>;
