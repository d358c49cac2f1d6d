//! Discrete state representation for Q-table indexing.
//!
//! Continuous aggregates are bucketed into four independent dimensions:
//!
//! - **N**: demanding rooms, 0..=4 (4 means four or more)
//! - **D**: worst overshoot over fixed edges, 0..=7
//! - **C**: coil margin over the learning floor, -3..=3
//! - **T**: coil trend, -1 (falling), 0 (flat), 1 (rising)
//!
//! The key renders as `N1|D2|C0|T0`. The space is bounded at 5 × 8 × 7 × 3
//! rows, small enough for a tabular learner without hashing.
//!
//! The trend bit is a Schmitt trigger: entering a trend requires the slope to
//! clear `threshold + h`, leaving it only once the slope falls under
//! `threshold - h`. The threshold itself adapts to sensor noise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::CoreError;
use crate::rl::config::StateConfig;

/// Overshoot band edges (°C)
pub const OVERSHOOT_EDGES: [f64; 7] = [0.3, 0.6, 1.0, 1.5, 2.5, 3.5, 5.0];

/// Coil margin band edges relative to the learning floor (°C)
pub const COIL_MARGIN_EDGES: [f64; 6] = [-2.0, -1.0, -0.5, 0.5, 1.0, 2.0];

/// Demand bucket saturates here
pub const MAX_DEMAND_BUCKET: u8 = 4;

/// Snapshot of the aggregates the encoder reads. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    pub num_active_rooms: u32,

    /// Worst overshoot (°C)
    pub max_delta: f64,

    pub coil_temp: Option<f64>,

    /// Host-supplied coil slope (K/min)
    pub trend_hint: Option<f64>,

    pub observed_at: DateTime<Utc>,
}

/// Coil reading carried from the previous tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoilSample {
    pub temp: f64,
    pub at: DateTime<Utc>,
}

/// Bucketed state, rendered as `N{n}|D{d}|C{c}|T{t}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StateKey {
    pub demand: u8,
    pub overshoot: u8,
    pub coil: i8,
    pub trend: i8,
}

impl StateKey {
    pub fn new(demand: u8, overshoot: u8, coil: i8, trend: i8) -> Self {
        Self {
            demand: demand.min(MAX_DEMAND_BUCKET),
            overshoot: overshoot.min(OVERSHOOT_EDGES.len() as u8),
            coil: coil.clamp(-3, 3),
            trend: trend.clamp(-1, 1),
        }
    }
}

impl Default for StateKey {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "N{}|D{}|C{}|T{}",
            self.demand, self.overshoot, self.coil, self.trend
        )
    }
}

impl FromStr for StateKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CoreError::ConfigError(format!("malformed state key '{}'", s));

        let parts: Vec<&str> = s.split('|').collect();
        if parts.len() != 4 {
            return Err(bad());
        }
        let field = |part: &str, prefix: char| -> Result<i32, CoreError> {
            part.strip_prefix(prefix)
                .and_then(|v| v.parse::<i32>().ok())
                .ok_or_else(bad)
        };

        let demand = field(parts[0], 'N')?;
        let overshoot = field(parts[1], 'D')?;
        let coil = field(parts[2], 'C')?;
        let trend = field(parts[3], 'T')?;

        if !(0..=MAX_DEMAND_BUCKET as i32).contains(&demand)
            || !(0..=OVERSHOOT_EDGES.len() as i32).contains(&overshoot)
            || !(-3..=3).contains(&coil)
            || !(-1..=1).contains(&trend)
        {
            return Err(bad());
        }

        Ok(Self {
            demand: demand as u8,
            overshoot: overshoot as u8,
            coil: coil as i8,
            trend: trend as i8,
        })
    }
}

impl TryFrom<String> for StateKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StateKey> for String {
    fn from(key: StateKey) -> Self {
        key.to_string()
    }
}

pub fn demand_bucket(num_active_rooms: u32) -> u8 {
    num_active_rooms.min(MAX_DEMAND_BUCKET as u32) as u8
}

/// Number of overshoot edges at or below `max_delta`.
pub fn overshoot_bucket(max_delta: f64) -> u8 {
    if !max_delta.is_finite() {
        return 0;
    }
    OVERSHOOT_EDGES.iter().filter(|&&edge| max_delta >= edge).count() as u8
}

/// Coil margin band, -3 (≤ -2.0 °C) to 3 (> 2.0 °C); missing reading is 0.
pub fn coil_bucket(coil_temp: Option<f64>, min_learning_temp: f64) -> i8 {
    let margin = match coil_temp {
        Some(t) if t.is_finite() => t - min_learning_temp,
        _ => return 0,
    };
    let above = COIL_MARGIN_EDGES.iter().filter(|&&edge| margin > edge).count() as i8;
    above - 3
}

/// Stateful encoder: the trend memory is the only persisted part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateEncoder {
    trend_memory: i8,

    #[serde(skip)]
    noise_per_min: f64,

    #[serde(skip)]
    last_slope: Option<f64>,
}

impl StateEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trend_memory(trend_memory: i8) -> Self {
        Self {
            trend_memory: trend_memory.clamp(-1, 1),
            ..Self::default()
        }
    }

    pub fn trend_memory(&self) -> i8 {
        self.trend_memory
    }

    /// Current slope noise estimate (K/min)
    pub fn noise_per_min(&self) -> f64 {
        self.noise_per_min
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn encode(
        &mut self,
        vector: &StateVector,
        previous: Option<&CoilSample>,
        config: &StateConfig,
    ) -> StateKey {
        let trend = match self.coil_slope(vector, previous) {
            Some(slope) => {
                self.observe_noise(slope, config.noise_smoothing);
                let threshold = config
                    .trend_deadband_k_per_min
                    .max(config.trend_noise_multiplier * self.noise_per_min);
                schmitt(self.trend_memory, slope, threshold, config.trend_hysteresis_fraction)
            }
            None => 0,
        };
        self.trend_memory = trend;

        StateKey::new(
            demand_bucket(vector.num_active_rooms),
            overshoot_bucket(vector.max_delta),
            coil_bucket(vector.coil_temp, config.min_learning_temp),
            trend,
        )
    }

    fn coil_slope(&self, vector: &StateVector, previous: Option<&CoilSample>) -> Option<f64> {
        let coil = vector.coil_temp.filter(|t| t.is_finite())?;
        if let Some(hint) = vector.trend_hint.filter(|h| h.is_finite()) {
            return Some(hint);
        }
        let prev = previous?;
        let minutes = (vector.observed_at - prev.at).num_milliseconds() as f64 / 60_000.0;
        if minutes <= 0.0 || !prev.temp.is_finite() {
            return None;
        }
        Some((coil - prev.temp) / minutes)
    }

    fn observe_noise(&mut self, slope: f64, smoothing: f64) {
        if let Some(last) = self.last_slope {
            let residual = (slope - last).abs();
            self.noise_per_min = (1.0 - smoothing) * self.noise_per_min + smoothing * residual;
        }
        self.last_slope = Some(slope);
    }
}

fn schmitt(memory: i8, slope: f64, threshold: f64, hysteresis_fraction: f64) -> i8 {
    let h = threshold * hysteresis_fraction;
    let enter = threshold + h;
    let exit = threshold - h;

    match memory {
        1 if slope > exit => 1,
        -1 if slope < -exit => -1,
        _ if slope > enter => 1,
        _ if slope < -enter => -1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn vector(rooms: u32, delta: f64, coil: Option<f64>, at: DateTime<Utc>) -> StateVector {
        StateVector {
            num_active_rooms: rooms,
            max_delta: delta,
            coil_temp: coil,
            trend_hint: None,
            observed_at: at,
        }
    }

    #[test]
    fn test_key_format_round_trip() {
        let key = StateKey::new(1, 2, 0, 0);
        assert_eq!(key.to_string(), "N1|D2|C0|T0");
        assert_eq!("N1|D2|C0|T0".parse::<StateKey>().unwrap(), key);
        assert_eq!("N4|D7|C-3|T-1".parse::<StateKey>().unwrap(), StateKey::new(4, 7, -3, -1));

        assert!("N1|D2|C0".parse::<StateKey>().is_err());
        assert!("N9|D2|C0|T0".parse::<StateKey>().is_err());
        assert!("X1|D2|C0|T0".parse::<StateKey>().is_err());
    }

    #[test]
    fn test_overshoot_buckets() {
        assert_eq!(overshoot_bucket(0.0), 0);
        assert_eq!(overshoot_bucket(0.29), 0);
        assert_eq!(overshoot_bucket(0.3), 1);
        assert_eq!(overshoot_bucket(0.8), 2);
        assert_eq!(overshoot_bucket(1.2), 3);
        assert_eq!(overshoot_bucket(4.0), 6);
        assert_eq!(overshoot_bucket(12.0), 7);
        assert_eq!(overshoot_bucket(f64::NAN), 0);
    }

    #[test]
    fn test_coil_buckets() {
        let floor = 2.0;
        assert_eq!(coil_bucket(None, floor), 0);
        assert_eq!(coil_bucket(Some(f64::NAN), floor), 0);
        assert_eq!(coil_bucket(Some(-1.0), floor), -3);
        assert_eq!(coil_bucket(Some(0.0), floor), -3);
        assert_eq!(coil_bucket(Some(0.5), floor), -2);
        assert_eq!(coil_bucket(Some(1.2), floor), -1);
        assert_eq!(coil_bucket(Some(2.0), floor), 0);
        assert_eq!(coil_bucket(Some(2.8), floor), 1);
        assert_eq!(coil_bucket(Some(3.5), floor), 2);
        assert_eq!(coil_bucket(Some(9.0), floor), 3);
    }

    #[test]
    fn test_demand_saturates() {
        assert_eq!(demand_bucket(0), 0);
        assert_eq!(demand_bucket(3), 3);
        assert_eq!(demand_bucket(17), 4);
    }

    #[test]
    fn test_same_buckets_same_key() {
        let config = StateConfig::default();
        let mut a = StateEncoder::new();
        let mut b = StateEncoder::new();

        let ka = a.encode(&vector(2, 0.7, Some(6.1), t0()), None, &config);
        let kb = b.encode(&vector(2, 0.95, Some(6.9), t0()), None, &config);
        assert_eq!(ka, kb);
        assert_eq!(ka.to_string(), "N2|D2|C3|T0");
    }

    #[test]
    fn test_missing_coil_is_neutral() {
        let config = StateConfig::default();
        let mut enc = StateEncoder::with_trend_memory(1);
        let prev = CoilSample { temp: 8.0, at: t0() };
        let key = enc.encode(&vector(1, 0.5, None, t0() + Duration::minutes(1)), Some(&prev), &config);
        assert_eq!(key.coil, 0);
        assert_eq!(key.trend, 0);
        assert_eq!(enc.trend_memory(), 0);
    }

    #[test]
    fn test_trend_from_finite_difference() {
        let config = StateConfig::default();
        let mut enc = StateEncoder::new();
        let prev = CoilSample { temp: 8.0, at: t0() };

        // -1 K over 2 minutes = -0.5 K/min, well beyond the 0.05 deadband
        let key = enc.encode(&vector(1, 0.5, Some(7.0), t0() + Duration::minutes(2)), Some(&prev), &config);
        assert_eq!(key.trend, -1);
    }

    #[test]
    fn test_trend_hint_preferred() {
        let config = StateConfig::default();
        let mut enc = StateEncoder::new();
        let mut v = vector(1, 0.5, Some(7.0), t0());
        v.trend_hint = Some(0.4);
        assert_eq!(enc.encode(&v, None, &config).trend, 1);
    }

    #[test]
    fn test_schmitt_holds_near_threshold() {
        // threshold 0.05, h = 0.0125: enter above 0.0625, exit below 0.0375
        assert_eq!(schmitt(0, 0.055, 0.05, 0.25), 0);
        assert_eq!(schmitt(0, 0.07, 0.05, 0.25), 1);
        assert_eq!(schmitt(1, 0.045, 0.05, 0.25), 1);
        assert_eq!(schmitt(1, 0.03, 0.05, 0.25), 0);
        assert_eq!(schmitt(-1, -0.04, 0.05, 0.25), -1);
        assert_eq!(schmitt(-1, 0.07, 0.05, 0.25), 1);
    }

    #[test]
    fn test_noise_raises_threshold() {
        let config = StateConfig {
            noise_smoothing: 1.0,
            ..StateConfig::default()
        };
        let mut enc = StateEncoder::new();
        let mut v = vector(1, 0.5, Some(7.0), t0());

        v.trend_hint = Some(0.2);
        assert_eq!(enc.encode(&v, None, &config).trend, 1);

        // slope jumps by 0.4, noise = 0.4, threshold = 1.2 K/min
        v.trend_hint = Some(-0.2);
        assert_eq!(enc.encode(&v, None, &config).trend, 0);
        assert!((enc.noise_per_min() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_zero_elapsed_time_is_flat() {
        let config = StateConfig::default();
        let mut enc = StateEncoder::new();
        let prev = CoilSample { temp: 8.0, at: t0() };
        let key = enc.encode(&vector(1, 0.5, Some(3.0), t0()), Some(&prev), &config);
        assert_eq!(key.trend, 0);
    }
}
