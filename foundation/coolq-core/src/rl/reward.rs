//! Transition reward computation.
//!
//! The reward credits the *previous* (state, action) pair using metrics
//! observed *now*, since the consequence of a compressor/fan command is only
//! visible one sensing cycle later.
//!
//! Reward = comfort + energy + window + change + progress + freeze + trend,
//! clamped to `[reward_min, reward_max]`.
//!
//! Per-minute quantities (comfort, energy, window, freeze, trend) are scaled
//! by the elapsed step so slow and fast ticks produce comparable magnitudes.
//! The change penalty and progress term are not: the first penalizes the step
//! itself, the second is already a difference of states.

use serde::{Deserialize, Serialize};

use crate::rl::action_space::{ActionKey, ActionSpace};
use crate::rl::config::RewardConfig;

/// Metrics observed at one sensing cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionMetrics {
    /// Worst room overshoot (°C)
    pub max_delta: f64,

    pub coil_temp: Option<f64>,

    /// Size-weighted average overshoot across demanding rooms (°C)
    pub wad: f64,

    pub window_open: bool,
}

/// Everything the reward needs about one transition
#[derive(Debug, Clone, Copy)]
pub struct RewardInput<'a> {
    /// Action whose consequence is being credited
    pub action: ActionKey,

    /// Action applied before `action`, for the change penalty
    pub preceding_action: Option<ActionKey>,

    pub current: &'a TransitionMetrics,

    /// WAD observed when `action` was chosen
    pub previous_wad: f64,

    pub step_minutes: f64,

    pub min_learning_temp: f64,
}

/// Individual reward terms, kept for telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub comfort: f64,
    pub energy: f64,
    pub window: f64,
    pub change: f64,
    pub progress: f64,
    pub freeze: f64,
    pub trend: f64,

    /// Sum before clamping
    pub raw_total: f64,

    /// Clamped reward fed to the Q-update
    pub total: f64,
}

/// Compute the clamped transition reward and its components.
pub fn compute_reward(
    input: &RewardInput<'_>,
    space: &ActionSpace,
    config: &RewardConfig,
) -> RewardBreakdown {
    let step = if input.step_minutes.is_finite() {
        input.step_minutes.max(0.0)
    } else {
        0.0
    };
    let current = input.current;

    let comfort = -config.w_comfort * current.max_delta.max(0.0) * step;

    let energy = -config.w_energy * energy_cost(input.action, space, config) * step;

    let window = if current.window_open {
        -config.w_window * step
    } else {
        0.0
    };

    let change = match input.preceding_action {
        Some(prev) => {
            let moved = input.action.power.abs_diff(prev.power) as f64
                + input.action.fan.abs_diff(prev.fan) as f64;
            -config.w_change * moved
        }
        None => 0.0,
    };

    let improvement = input.previous_wad - current.wad;
    let progress = config.w_progress * improvement;

    let freeze = match current.coil_temp {
        Some(coil) if coil.is_finite() => {
            -config.w_freeze * (input.min_learning_temp - coil).max(0.0) * step
        }
        _ => 0.0,
    };

    let trend = if step > 0.0 {
        let rate = improvement / step;
        if rate.abs() > config.trend_deadband {
            config.w_trend * rate * step
        } else {
            0.0
        }
    } else {
        0.0
    };

    let raw_total = comfort + energy + window + change + progress + freeze + trend;
    let total = if raw_total.is_finite() {
        raw_total.clamp(config.reward_min, config.reward_max)
    } else {
        log::warn!("non-finite reward {} replaced by reward_min", raw_total);
        config.reward_min
    };

    RewardBreakdown {
        comfort,
        energy,
        window,
        change,
        progress,
        freeze,
        trend,
        raw_total,
        total,
    }
}

/// Per-minute energy cost of an action, before weighting.
///
/// Compressor cost is `(power/100)^comp_alpha`. Fan cost uses the ordinal
/// rank among configured fan levels, since fan draw is not linear in percent.
pub fn energy_cost(action: ActionKey, space: &ActionSpace, config: &RewardConfig) -> f64 {
    let compressor = (action.power as f64 / 100.0).powf(config.comp_alpha);

    let (rank, max_rank) = space.fan_rank(action.fan);
    let fan = if max_rank == 0 {
        0.0
    } else {
        config.fan_weight * (rank as f64 / max_rank as f64).powf(config.fan_beta)
    };

    compressor + fan
}
