//! Discrete (power, fan) action lattice.
//!
//! The action space is the cross-product of two independently configured
//! level sets: explicit lists when given, otherwise a fixed-step ladder from
//! 0 to 100. `0:0` (full stop) is always a member.
//!
//! # Pipeline
//!
//! ```text
//! Policy target ──► limit_rate (vs last applied) ──► validate (snap to lattice)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::CoreError;
use crate::rl::config::ActionConfig;

/// Ladder step used when a configured step is zero.
const FALLBACK_STEP: u8 = 25;

/// A `"power:fan"` command, both components in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionKey {
    pub power: u8,
    pub fan: u8,
}

impl ActionKey {
    /// Full stop
    pub const OFF: ActionKey = ActionKey { power: 0, fan: 0 };

    /// Build a key, clamping both components to [0, 100].
    pub fn new(power: i32, fan: i32) -> Self {
        Self {
            power: power.clamp(0, 100) as u8,
            fan: fan.clamp(0, 100) as u8,
        }
    }

    pub fn is_off(&self) -> bool {
        *self == Self::OFF
    }

    /// Combined effort, used to break ties toward stronger actions
    pub fn total(&self) -> u16 {
        self.power as u16 + self.fan as u16
    }

    fn distance_sq(&self, power: i32, fan: i32) -> i32 {
        let dp = self.power as i32 - power;
        let df = self.fan as i32 - fan;
        dp * dp + df * df
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.power, self.fan)
    }
}

impl FromStr for ActionKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CoreError::InvalidAction {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (power, fan) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| invalid("expected 'power:fan'"))?;
        let power: u8 = power
            .trim()
            .parse()
            .map_err(|_| invalid("power is not an integer in [0, 100]"))?;
        let fan: u8 = fan
            .trim()
            .parse()
            .map_err(|_| invalid("fan is not an integer in [0, 100]"))?;
        if power > 100 || fan > 100 {
            return Err(invalid("component above 100"));
        }
        Ok(Self { power, fan })
    }
}

impl TryFrom<String> for ActionKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ActionKey> for String {
    fn from(key: ActionKey) -> Self {
        key.to_string()
    }
}

/// Enumerates and validates the legal action lattice.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpace {
    power_levels: Vec<u8>,
    fan_levels: Vec<u8>,
    allowed: Vec<ActionKey>,
}

impl ActionSpace {
    pub fn from_config(config: &ActionConfig) -> Self {
        let power_levels = resolve_levels(&config.power_levels, config.power_step, "power");
        let fan_levels = resolve_levels(&config.fan_levels, config.fan_step, "fan");

        let mut allowed = Vec::with_capacity(power_levels.len() * fan_levels.len() + 1);
        allowed.push(ActionKey::OFF);
        for &power in &power_levels {
            for &fan in &fan_levels {
                let key = ActionKey { power, fan };
                if !key.is_off() {
                    allowed.push(key);
                }
            }
        }

        Self {
            power_levels,
            fan_levels,
            allowed,
        }
    }

    /// All legal actions, `0:0` first, then power-major ascending.
    pub fn allowed(&self) -> &[ActionKey] {
        &self.allowed
    }

    /// Legal actions except `0:0`, used while cooling is demanded.
    pub fn allowed_under_demand(&self) -> Vec<ActionKey> {
        self.allowed.iter().copied().filter(|a| !a.is_off()).collect()
    }

    pub fn contains(&self, action: &ActionKey) -> bool {
        self.allowed.contains(action)
    }

    pub fn power_levels(&self) -> &[u8] {
        &self.power_levels
    }

    pub fn fan_levels(&self) -> &[u8] {
        &self.fan_levels
    }

    /// Ordinal rank of a fan value among configured levels and the largest
    /// rank. Values between levels take the rank of the nearest level below.
    pub fn fan_rank(&self, fan: u8) -> (usize, usize) {
        let mut ranks: Vec<u8> = self.fan_levels.clone();
        if !ranks.contains(&0) {
            ranks.insert(0, 0);
        }
        let rank = ranks.iter().rposition(|&level| level <= fan).unwrap_or(0);
        (rank, ranks.len().saturating_sub(1))
    }

    /// Clamp a candidate to [0, 100] and snap it onto the lattice.
    ///
    /// The nearest allowed pair by squared distance wins; ties keep the
    /// first one found in [`allowed`](Self::allowed) order.
    pub fn validate(&self, power: i32, fan: i32) -> ActionKey {
        let candidate = ActionKey::new(power, fan);
        if self.contains(&candidate) {
            return candidate;
        }
        nearest(
            self.allowed.iter().copied(),
            candidate.power as i32,
            candidate.fan as i32,
        )
        .unwrap_or(ActionKey::OFF)
    }

    /// Move from `last` toward `target` by at most the configured step in
    /// each dimension independently.
    pub fn limit_rate(
        target: ActionKey,
        last: ActionKey,
        max_power_delta: u8,
        max_fan_delta: u8,
    ) -> ActionKey {
        ActionKey {
            power: step_toward(last.power, target.power, max_power_delta),
            fan: step_toward(last.fan, target.fan, max_fan_delta),
        }
    }

    /// Rate-limit then snap onto `candidates`, keeping the snapped result
    /// inside the rate window whenever a candidate there exists.
    ///
    /// When no candidate lies inside the window (a custom ladder whose
    /// lowest level is further than one step from `last`), the candidate
    /// nearest the rate-limited point is returned so the controller still
    /// moves toward `target`. An empty `candidates` snaps onto the full
    /// lattice.
    pub fn limit_and_snap(
        &self,
        target: ActionKey,
        last: ActionKey,
        candidates: &[ActionKey],
        max_power_delta: u8,
        max_fan_delta: u8,
    ) -> ActionKey {
        let limited = Self::limit_rate(target, last, max_power_delta, max_fan_delta);
        let (power, fan) = (limited.power as i32, limited.fan as i32);
        let snapped = nearest(candidates.iter().copied(), power, fan)
            .unwrap_or_else(|| self.validate(power, fan));
        if within_rate(snapped, last, max_power_delta, max_fan_delta) {
            return snapped;
        }

        let reachable = candidates
            .iter()
            .copied()
            .filter(|a| within_rate(*a, last, max_power_delta, max_fan_delta));
        nearest(reachable, power, fan).unwrap_or(snapped)
    }
}

fn resolve_levels(custom: &[u8], step: u8, name: &str) -> Vec<u8> {
    let mut levels: Vec<u8> = custom.iter().map(|&v| v.min(100)).collect();
    if levels.is_empty() {
        let step = if step == 0 {
            log::warn!("{} step is 0, using fallback ladder step {}", name, FALLBACK_STEP);
            FALLBACK_STEP
        } else {
            step.min(100)
        };
        let mut value: u16 = 0;
        while value <= 100 {
            levels.push(value as u8);
            value += step as u16;
        }
        if levels.last() != Some(&100) {
            levels.push(100);
        }
    }
    levels.sort_unstable();
    levels.dedup();
    levels
}

fn step_toward(from: u8, to: u8, max_delta: u8) -> u8 {
    let delta = (to as i16 - from as i16).clamp(-(max_delta as i16), max_delta as i16);
    (from as i16 + delta).clamp(0, 100) as u8
}

fn within_rate(action: ActionKey, last: ActionKey, max_power_delta: u8, max_fan_delta: u8) -> bool {
    action.power.abs_diff(last.power) <= max_power_delta
        && action.fan.abs_diff(last.fan) <= max_fan_delta
}

fn nearest(candidates: impl Iterator<Item = ActionKey>, power: i32, fan: i32) -> Option<ActionKey> {
    let mut best: Option<(ActionKey, i32)> = None;
    for action in candidates {
        let d = action.distance_sq(power, fan);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((action, d)),
        }
    }
    best.map(|(action, _)| action)
}
