//! Per-tick telemetry.
//!
//! Every tick returns a [`TickReport`] describing what the loop did and why.
//! Hosts serialize it to JSON lines; the engine itself only logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rl::action_space::ActionKey;
use crate::rl::config::ControllerConfig;
use crate::rl::reward::RewardBreakdown;
use crate::rl::safety::GateFault;
use crate::rl::state_encoder::StateKey;

/// What a tick ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    /// Policy chose and applied an action
    Acted,

    /// Externally supplied action applied through the same discipline
    Forced,

    /// No demand, `0:0` applied without learning
    Idle,

    /// Safety gate tripped, `0:0` applied without learning
    Gated,

    /// Aggregates unavailable, last action held
    Degraded,

    /// Another tick held the guard
    Skipped,
}

/// Tick summary returned by the control loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,

    pub outcome: TickOutcome,

    /// Action sent to the actuation sink, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<ActionKey>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionTelemetry>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub q_update: Option<QUpdateTelemetry>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<GateFault>,

    /// Port failure text (aggregate fetch or actuation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Epsilon after the tick; absent when the tick was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<f64>,
}

impl TickReport {
    pub fn new(at: DateTime<Utc>, outcome: TickOutcome) -> Self {
        Self {
            at,
            outcome,
            applied: None,
            decision: None,
            q_update: None,
            fault: None,
            error: None,
            epsilon: None,
        }
    }

    /// True when the tick executed a Q-update
    pub fn learned(&self) -> bool {
        self.q_update.is_some()
    }
}

/// Action decision telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTelemetry {
    pub state: StateKey,

    /// Policy output before rate limiting and snapping
    pub proposed: ActionKey,

    /// Action actually applied
    pub action: ActionKey,

    /// Q-value for the proposed action (before update)
    pub q_value: f64,

    /// Epsilon at decision time
    pub epsilon: f64,

    pub was_exploration: bool,

    /// Number of actions the policy could choose from
    pub allowed_count: usize,
}

/// Q-learning update telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QUpdateTelemetry {
    /// Transition that was credited
    pub state: StateKey,
    pub action: ActionKey,
    pub next_state: StateKey,

    pub reward: RewardBreakdown,

    /// Q-value before update
    pub q_old: f64,

    /// Q-value after update
    pub q_new: f64,

    /// q_new - q_old
    pub q_delta: f64,

    pub step_minutes: f64,
}

impl QUpdateTelemetry {
    pub fn new(
        state: StateKey,
        action: ActionKey,
        next_state: StateKey,
        reward: RewardBreakdown,
        q_old: f64,
        q_new: f64,
        step_minutes: f64,
    ) -> Self {
        Self {
            state,
            action,
            next_state,
            reward,
            q_old,
            q_new,
            q_delta: q_new - q_old,
            step_minutes,
        }
    }
}

/// Hyperparameter snapshot, logged alongside a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub alpha: f64,
    pub gamma: f64,
    pub epsilon_start: f64,
    pub epsilon_min: f64,
    pub epsilon_decay: f64,
    pub initial_q: f64,
    pub reward_min: f64,
    pub reward_max: f64,
    pub min_learning_temp: f64,
    pub max_drop_rate_k_per_min: f64,
    pub action_count: usize,
}

impl ConfigSnapshot {
    pub fn from_config(config: &ControllerConfig, action_count: usize) -> Self {
        Self {
            alpha: config.learning.alpha,
            gamma: config.learning.gamma,
            epsilon_start: config.learning.epsilon_start,
            epsilon_min: config.learning.epsilon_min,
            epsilon_decay: config.learning.epsilon_decay,
            initial_q: config.learning.initial_q,
            reward_min: config.reward.reward_min,
            reward_max: config.reward.reward_max,
            min_learning_temp: config.state.min_learning_temp,
            max_drop_rate_k_per_min: config.safety.max_drop_rate_k_per_min,
            action_count,
        }
    }
}
