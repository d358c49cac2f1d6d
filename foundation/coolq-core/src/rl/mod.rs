//! Safety-gated tabular Q-learning for compressor/fan control.
//!
//! # Overview
//!
//! Each tick the controller picks a `power:fan` pair from a discrete lattice
//! to trade room comfort against energy, under hard coil-protection limits.
//!
//! ```text
//! AggregateSource ─► SafetyGate ─► StateEncoder ─► RewardModel ─► QTable
//!                        │                                         │
//!                        ▼                                         ▼
//!                   0:0 (no learning)     ActionSpace ◄── EpsilonGreedy
//!                                              │
//!                                              ▼
//!                                        ActuationSink
//! ```
//!
//! # Modules
//!
//! - `config`: ControllerConfig and its sections
//! - `action_space`: ActionKey lattice, snapping, rate limiting
//! - `state_encoder`: StateKey buckets and trend hysteresis
//! - `safety`: emergency, learning floor and drop-rate interlock
//! - `reward`: transition reward terms
//! - `qtable`: action-value store
//! - `policy`: epsilon-greedy selection and annealing
//! - `control_loop`: per-tick orchestration
//! - `telemetry`: per-tick reports

pub mod action_space;
pub mod config;
pub mod control_loop;
pub mod policy;
pub mod qtable;
pub mod reward;
pub mod safety;
pub mod state_encoder;
pub mod telemetry;

pub use action_space::{ActionKey, ActionSpace};
pub use config::{
    ActionConfig, ControllerConfig, LearningConfig, PersistenceConfig, RewardConfig,
    SafetyConfig, StateConfig,
};
pub use control_loop::{ControlLoop, ControllerStatus, ForcedActionResult, TransitionRecord};
pub use policy::{EpsilonGreedy, Selection};
pub use qtable::{QRow, QTable};
pub use reward::{compute_reward, energy_cost, RewardBreakdown, RewardInput, TransitionMetrics};
pub use safety::{GateFault, GateInput, GateVerdict, SafetyGate};
pub use state_encoder::{CoilSample, StateEncoder, StateKey, StateVector};
pub use telemetry::{ConfigSnapshot, DecisionTelemetry, QUpdateTelemetry, TickOutcome, TickReport};
