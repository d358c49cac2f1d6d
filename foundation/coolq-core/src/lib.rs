//! coolq core domain
//!
//! Learning engine for a zoned cooling system: state encoding, reward
//! shaping, safety gating and the Q-table lifecycle.
//! This crate contains ONLY domain logic - no device or file-format
//! dependencies beyond the JSON state store.
//!
//! Architecture: Hexagonal (Ports & Adapters)
//! - The control loop depends on port traits (`ports`, `store::StateStore`)
//! - Hosts implement the ports for their sensors and actuators
//! - Dependency arrows point INWARD to the domain

pub mod comfort;
pub mod errors;
pub mod ports;
pub mod rl;
pub mod store;

pub use comfort::{summarize, weighted_average_deviation, RoomReading};
pub use errors::*;
pub use ports::*;
pub use rl::*;
pub use store::{atomic_write, FileStore, MemoryStore, PersistedState, StateStore};
