//! Controller configuration.
//!
//! One immutable struct, read fresh by the host and passed by reference into
//! every tick. Every field carries a serde default so partial TOML files are
//! accepted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Host scheduler cadence (seconds between ticks)
    #[serde(default = "default_timer_interval_secs")]
    pub timer_interval_secs: u64,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub actions: ActionConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub reward: RewardConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,
}

fn default_timer_interval_secs() -> u64 { 60 }

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            timer_interval_secs: default_timer_interval_secs(),
            learning: LearningConfig::default(),
            actions: ActionConfig::default(),
            state: StateConfig::default(),
            safety: SafetyConfig::default(),
            reward: RewardConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Q-learning hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Learning rate α, in (0, 1)
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Discount factor γ, in [0, 1)
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    #[serde(default = "default_epsilon_start")]
    pub epsilon_start: f64,

    #[serde(default = "default_epsilon_min")]
    pub epsilon_min: f64,

    /// Geometric decay applied once per learning tick
    #[serde(default = "default_epsilon_decay")]
    pub epsilon_decay: f64,

    /// Value of unseen pairs and of the max over an empty row
    #[serde(default)]
    pub initial_q: f64,

    /// Q-values closer than this are treated as tied
    #[serde(default = "default_tie_tolerance")]
    pub tie_tolerance: f64,

    /// Buffered transitions older than this are dropped instead of credited
    #[serde(default = "default_transition_max_age_minutes")]
    pub transition_max_age_minutes: f64,
}

fn default_alpha() -> f64 { 0.1 }
fn default_gamma() -> f64 { 0.9 }
fn default_epsilon_start() -> f64 { 0.3 }
fn default_epsilon_min() -> f64 { 0.02 }
fn default_epsilon_decay() -> f64 { 0.995 }
fn default_tie_tolerance() -> f64 { 1e-6 }
fn default_transition_max_age_minutes() -> f64 { 30.0 }

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            gamma: default_gamma(),
            epsilon_start: default_epsilon_start(),
            epsilon_min: default_epsilon_min(),
            epsilon_decay: default_epsilon_decay(),
            initial_q: 0.0,
            tie_tolerance: default_tie_tolerance(),
            transition_max_age_minutes: default_transition_max_age_minutes(),
        }
    }
}

/// Discrete action lattice and rate limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Explicit compressor power levels (%). Empty means use `power_step`.
    #[serde(default)]
    pub power_levels: Vec<u8>,

    /// Explicit fan levels (%). Empty means use `fan_step`.
    #[serde(default)]
    pub fan_levels: Vec<u8>,

    #[serde(default = "default_power_step")]
    pub power_step: u8,

    #[serde(default = "default_fan_step")]
    pub fan_step: u8,

    /// Largest power change per tick (percentage points)
    #[serde(default = "default_max_power_delta")]
    pub max_power_delta: u8,

    /// Largest fan change per tick (percentage points)
    #[serde(default = "default_max_fan_delta")]
    pub max_fan_delta: u8,
}

fn default_power_step() -> u8 { 10 }
fn default_fan_step() -> u8 { 25 }
fn default_max_power_delta() -> u8 { 30 }
fn default_max_fan_delta() -> u8 { 50 }

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            power_levels: Vec::new(),
            fan_levels: Vec::new(),
            power_step: default_power_step(),
            fan_step: default_fan_step(),
            max_power_delta: default_max_power_delta(),
            max_fan_delta: default_max_fan_delta(),
        }
    }
}

/// State bucketing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Coil temperature below which learning stops (°C)
    #[serde(default = "default_min_learning_temp")]
    pub min_learning_temp: f64,

    /// Minimum coil slope treated as a trend (K/min)
    #[serde(default = "default_trend_deadband")]
    pub trend_deadband_k_per_min: f64,

    /// Threshold floor as a multiple of measured slope noise
    #[serde(default = "default_trend_noise_multiplier")]
    pub trend_noise_multiplier: f64,

    /// Schmitt half-width as a fraction of the threshold
    #[serde(default = "default_trend_hysteresis_fraction")]
    pub trend_hysteresis_fraction: f64,

    /// EWMA weight of the newest noise sample
    #[serde(default = "default_noise_smoothing")]
    pub noise_smoothing: f64,
}

fn default_min_learning_temp() -> f64 { 2.0 }
fn default_trend_deadband() -> f64 { 0.05 }
fn default_trend_noise_multiplier() -> f64 { 3.0 }
fn default_trend_hysteresis_fraction() -> f64 { 0.25 }
fn default_noise_smoothing() -> f64 { 0.2 }

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            min_learning_temp: default_min_learning_temp(),
            trend_deadband_k_per_min: default_trend_deadband(),
            trend_noise_multiplier: default_trend_noise_multiplier(),
            trend_hysteresis_fraction: default_trend_hysteresis_fraction(),
            noise_smoothing: default_noise_smoothing(),
        }
    }
}

/// Hardware protection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Largest tolerated coil temperature fall (K/min)
    #[serde(default = "default_max_drop_rate")]
    pub max_drop_rate_k_per_min: f64,
}

fn default_max_drop_rate() -> f64 { 1.5 }

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_drop_rate_k_per_min: default_max_drop_rate(),
        }
    }
}

/// Reward weights and shaping parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "default_w_comfort")]
    pub w_comfort: f64,

    #[serde(default = "default_w_energy")]
    pub w_energy: f64,

    /// Compressor cost exponent
    #[serde(default = "default_comp_alpha")]
    pub comp_alpha: f64,

    /// Fan cost weight relative to the compressor
    #[serde(default = "default_fan_weight")]
    pub fan_weight: f64,

    /// Fan cost exponent over ordinal rank
    #[serde(default = "default_fan_beta")]
    pub fan_beta: f64,

    #[serde(default = "default_w_window")]
    pub w_window: f64,

    #[serde(default = "default_w_change")]
    pub w_change: f64,

    #[serde(default = "default_w_progress")]
    pub w_progress: f64,

    #[serde(default = "default_w_freeze")]
    pub w_freeze: f64,

    #[serde(default = "default_w_trend")]
    pub w_trend: f64,

    /// Comfort improvement rate below which no trend shaping applies (K/min)
    #[serde(default = "default_reward_trend_deadband")]
    pub trend_deadband: f64,

    #[serde(default = "default_reward_min")]
    pub reward_min: f64,

    #[serde(default = "default_reward_max")]
    pub reward_max: f64,
}

fn default_w_comfort() -> f64 { 0.1 }
fn default_w_energy() -> f64 { 0.05 }
fn default_comp_alpha() -> f64 { 1.5 }
fn default_fan_weight() -> f64 { 0.3 }
fn default_fan_beta() -> f64 { 2.0 }
fn default_w_window() -> f64 { 0.05 }
fn default_w_change() -> f64 { 0.002 }
fn default_w_progress() -> f64 { 0.5 }
fn default_w_freeze() -> f64 { 0.2 }
fn default_w_trend() -> f64 { 0.3 }
fn default_reward_trend_deadband() -> f64 { 0.01 }
fn default_reward_min() -> f64 { -1.5 }
fn default_reward_max() -> f64 { 0.25 }

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            w_comfort: default_w_comfort(),
            w_energy: default_w_energy(),
            comp_alpha: default_comp_alpha(),
            fan_weight: default_fan_weight(),
            fan_beta: default_fan_beta(),
            w_window: default_w_window(),
            w_change: default_w_change(),
            w_progress: default_w_progress(),
            w_freeze: default_w_freeze(),
            w_trend: default_w_trend(),
            trend_deadband: default_reward_trend_deadband(),
            reward_min: default_reward_min(),
            reward_max: default_reward_max(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// JSON state file. `None` keeps state in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,
}

impl ControllerConfig {
    /// Report out-of-range values without modifying anything.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let l = &self.learning;

        if !(l.alpha > 0.0 && l.alpha < 1.0) {
            warnings.push(format!("learning.alpha={} outside (0, 1)", l.alpha));
        }
        if !(l.gamma >= 0.0 && l.gamma < 1.0) {
            warnings.push(format!("learning.gamma={} outside [0, 1)", l.gamma));
        }
        if !(l.epsilon_min >= 0.0 && l.epsilon_min <= l.epsilon_start && l.epsilon_start <= 1.0) {
            warnings.push(format!(
                "learning epsilon bounds invalid: min={} start={}",
                l.epsilon_min, l.epsilon_start
            ));
        }
        if !(l.epsilon_decay > 0.0 && l.epsilon_decay <= 1.0) {
            warnings.push(format!(
                "learning.epsilon_decay={} outside (0, 1]",
                l.epsilon_decay
            ));
        }
        if !l.initial_q.is_finite() {
            warnings.push("learning.initial_q is not finite".to_string());
        }
        if !(l.transition_max_age_minutes > 0.0) {
            warnings.push(format!(
                "learning.transition_max_age_minutes={} must be positive",
                l.transition_max_age_minutes
            ));
        }

        if self.actions.power_levels.is_empty() && self.actions.power_step == 0 {
            warnings.push("actions: no power levels and power_step=0, default ladder used".into());
        }
        if self.actions.fan_levels.is_empty() && self.actions.fan_step == 0 {
            warnings.push("actions: no fan levels and fan_step=0, default ladder used".into());
        }
        if self.actions.max_power_delta == 0 {
            warnings.push("actions.max_power_delta=0 freezes compressor power".into());
        }
        if self.actions.max_fan_delta == 0 {
            warnings.push("actions.max_fan_delta=0 freezes fan speed".into());
        }
        for (name, levels) in [
            ("power_levels", &self.actions.power_levels),
            ("fan_levels", &self.actions.fan_levels),
        ] {
            if levels.iter().any(|&v| v > 100) {
                warnings.push(format!("actions.{} has values above 100, clamped", name));
            }
        }

        if !(self.state.trend_hysteresis_fraction >= 0.0 && self.state.trend_hysteresis_fraction < 1.0) {
            warnings.push(format!(
                "state.trend_hysteresis_fraction={} outside [0, 1)",
                self.state.trend_hysteresis_fraction
            ));
        }
        if !(self.state.noise_smoothing > 0.0 && self.state.noise_smoothing <= 1.0) {
            warnings.push(format!(
                "state.noise_smoothing={} outside (0, 1]",
                self.state.noise_smoothing
            ));
        }
        if !(self.safety.max_drop_rate_k_per_min > 0.0) {
            warnings.push(format!(
                "safety.max_drop_rate_k_per_min={} must be positive",
                self.safety.max_drop_rate_k_per_min
            ));
        }
        if !(self.reward.reward_min < self.reward.reward_max) {
            warnings.push(format!(
                "reward clamp inverted: min={} max={}",
                self.reward.reward_min, self.reward.reward_max
            ));
        }

        warnings
    }

    /// Copy with every value flagged by [`validate`](Self::validate) reset to
    /// its default.
    pub fn sanitized(&self) -> Self {
        let mut cfg = self.clone();
        let l = &mut cfg.learning;

        if !(l.alpha > 0.0 && l.alpha < 1.0) {
            l.alpha = default_alpha();
        }
        if !(l.gamma >= 0.0 && l.gamma < 1.0) {
            l.gamma = default_gamma();
        }
        if !(l.epsilon_min >= 0.0 && l.epsilon_min <= l.epsilon_start && l.epsilon_start <= 1.0) {
            l.epsilon_start = default_epsilon_start();
            l.epsilon_min = default_epsilon_min();
        }
        if !(l.epsilon_decay > 0.0 && l.epsilon_decay <= 1.0) {
            l.epsilon_decay = default_epsilon_decay();
        }
        if !l.initial_q.is_finite() {
            l.initial_q = 0.0;
        }
        if !(l.transition_max_age_minutes > 0.0) {
            l.transition_max_age_minutes = default_transition_max_age_minutes();
        }

        let a = &mut cfg.actions;
        if a.power_step == 0 {
            a.power_step = default_power_step();
        }
        if a.fan_step == 0 {
            a.fan_step = default_fan_step();
        }
        if a.max_power_delta == 0 {
            a.max_power_delta = default_max_power_delta();
        }
        if a.max_fan_delta == 0 {
            a.max_fan_delta = default_max_fan_delta();
        }

        let s = &mut cfg.state;
        if !(s.trend_hysteresis_fraction >= 0.0 && s.trend_hysteresis_fraction < 1.0) {
            s.trend_hysteresis_fraction = default_trend_hysteresis_fraction();
        }
        if !(s.noise_smoothing > 0.0 && s.noise_smoothing <= 1.0) {
            s.noise_smoothing = default_noise_smoothing();
        }
        if !(cfg.safety.max_drop_rate_k_per_min > 0.0) {
            cfg.safety.max_drop_rate_k_per_min = default_max_drop_rate();
        }
        if !(cfg.reward.reward_min < cfg.reward.reward_max) {
            cfg.reward.reward_min = default_reward_min();
            cfg.reward.reward_max = default_reward_max();
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_empty(), "{:?}", config.validate());
        assert_eq!(config.learning.alpha, 0.1);
        assert_eq!(config.reward.reward_min, -1.5);
        assert_eq!(config.reward.reward_max, 0.25);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"learning":{"alpha":0.2},"safety":{}}"#).unwrap();
        assert_eq!(config.learning.alpha, 0.2);
        assert_eq!(config.learning.gamma, 0.9);
        assert_eq!(config.safety.max_drop_rate_k_per_min, 1.5);
        assert_eq!(config.timer_interval_secs, 60);
    }

    #[test]
    fn test_sanitize_replaces_invalid_values() {
        let mut config = ControllerConfig::default();
        config.learning.alpha = 1.5;
        config.learning.gamma = 1.0;
        config.reward.reward_min = 1.0;
        config.reward.reward_max = -1.0;

        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);

        let clean = config.sanitized();
        assert!(clean.validate().is_empty());
        assert_eq!(clean.learning.alpha, 0.1);
        assert_eq!(clean.learning.gamma, 0.9);
        assert!(clean.reward.reward_min < clean.reward.reward_max);
    }

    #[test]
    fn test_zero_rate_deltas_are_replaced() {
        let mut config = ControllerConfig::default();
        config.actions.max_power_delta = 0;
        config.actions.max_fan_delta = 0;
        config.actions.power_levels = vec![40, 70, 100];

        assert_eq!(config.validate().len(), 2);
        let clean = config.sanitized();
        assert!(clean.validate().is_empty());
        assert_eq!(clean.actions.max_power_delta, 30);
        assert_eq!(clean.actions.max_fan_delta, 50);
        assert_eq!(clean.actions.power_levels, vec![40, 70, 100]);
    }
}
