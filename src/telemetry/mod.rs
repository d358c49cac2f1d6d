//! Structured run telemetry (JSON lines).

pub mod contract;
pub mod logger;

pub use contract::{ComponentId, EventData, EventLevel, TelemetryEntry};
pub use logger::TelemetryLogger;
