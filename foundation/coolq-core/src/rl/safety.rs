//! Hardware protection interlock.
//!
//! Three checks in fixed priority order, short-circuiting on the first trip:
//!
//! 1. emergency cutoff
//! 2. coil at or below the learning floor
//! 3. coil falling faster than the configured drop rate
//!
//! The gate never fails. A trip is advisory: the caller forces `0:0` and
//! skips learning. The drop-rate reference point is refreshed on every
//! evaluation, pass or trip, so the watchdog follows real time through
//! repeated faults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rl::config::{SafetyConfig, StateConfig};
use crate::rl::state_encoder::CoilSample;

/// Why the gate tripped
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum GateFault {
    EmergencyCutoff,
    LearningFloor { coil_temp: f64, floor: f64 },
    DropRate { rate_k_per_min: f64, max_k_per_min: f64 },
}

impl GateFault {
    pub fn code(&self) -> &'static str {
        match self {
            GateFault::EmergencyCutoff => "emergency_cutoff",
            GateFault::LearningFloor { .. } => "learning_floor",
            GateFault::DropRate { .. } => "drop_rate",
        }
    }
}

impl fmt::Display for GateFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateFault::EmergencyCutoff => write!(f, "emergency cutoff active"),
            GateFault::LearningFloor { coil_temp, floor } => {
                write!(f, "coil {:.2}°C at or below learning floor {:.2}°C", coil_temp, floor)
            }
            GateFault::DropRate { rate_k_per_min, max_k_per_min } => write!(
                f,
                "coil falling {:.2} K/min, limit {:.2} K/min",
                rate_k_per_min, max_k_per_min
            ),
        }
    }
}

/// Gate result for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub allowed: bool,
    pub fault: Option<GateFault>,
    /// Falling rate computed this evaluation (positive = falling)
    pub drop_rate_k_per_min: Option<f64>,
}

impl GateVerdict {
    fn pass(drop_rate_k_per_min: Option<f64>) -> Self {
        Self {
            allowed: true,
            fault: None,
            drop_rate_k_per_min,
        }
    }

    fn trip(fault: GateFault, drop_rate_k_per_min: Option<f64>) -> Self {
        Self {
            allowed: false,
            fault: Some(fault),
            drop_rate_k_per_min,
        }
    }
}

/// Inputs read by the gate each tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateInput {
    pub emergency_active: bool,
    pub coil_temp: Option<f64>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyGate {
    last_observed: Option<CoilSample>,
}

impl SafetyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watchdog reference point (last observed coil reading)
    pub fn last_observed(&self) -> Option<&CoilSample> {
        self.last_observed.as_ref()
    }

    pub fn evaluate(
        &mut self,
        input: &GateInput,
        safety: &SafetyConfig,
        state: &StateConfig,
    ) -> GateVerdict {
        let coil = input.coil_temp.filter(|t| t.is_finite());
        let verdict = self.check(input, coil, safety, state);

        if let Some(temp) = coil {
            self.last_observed = Some(CoilSample { temp, at: input.now });
        }

        if let Some(fault) = verdict.fault {
            log::warn!("safety gate tripped: {}", fault);
        }
        verdict
    }

    fn check(
        &self,
        input: &GateInput,
        coil: Option<f64>,
        safety: &SafetyConfig,
        state: &StateConfig,
    ) -> GateVerdict {
        if input.emergency_active {
            return GateVerdict::trip(GateFault::EmergencyCutoff, None);
        }

        let coil_temp = match coil {
            Some(t) => t,
            None => {
                log::warn!("coil temperature unavailable, safety gate not blocking");
                return GateVerdict::pass(None);
            }
        };

        if coil_temp <= state.min_learning_temp {
            return GateVerdict::trip(
                GateFault::LearningFloor {
                    coil_temp,
                    floor: state.min_learning_temp,
                },
                None,
            );
        }

        let rate = self.drop_rate(coil_temp, input.now);
        match rate {
            Some(r) if r > safety.max_drop_rate_k_per_min => GateVerdict::trip(
                GateFault::DropRate {
                    rate_k_per_min: r,
                    max_k_per_min: safety.max_drop_rate_k_per_min,
                },
                rate,
            ),
            _ => GateVerdict::pass(rate),
        }
    }

    /// (previous − current) × 60 / Δseconds; positive means falling.
    fn drop_rate(&self, coil_temp: f64, now: DateTime<Utc>) -> Option<f64> {
        let prev = self.last_observed?;
        let seconds = (now - prev.at).num_milliseconds() as f64 / 1000.0;
        if seconds <= 0.0 {
            return None;
        }
        Some((prev.temp - coil_temp) * 60.0 / seconds)
    }

    pub fn reset(&mut self) {
        self.last_observed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn input(emergency: bool, coil: Option<f64>, at: DateTime<Utc>) -> GateInput {
        GateInput {
            emergency_active: emergency,
            coil_temp: coil,
            now: at,
        }
    }

    #[test]
    fn test_pass_with_healthy_coil() {
        let mut gate = SafetyGate::new();
        let v = gate.evaluate(&input(false, Some(8.0), t0()), &SafetyConfig::default(), &StateConfig::default());
        assert!(v.allowed);
        assert_eq!(v.fault, None);
        assert_eq!(gate.last_observed().unwrap().temp, 8.0);
    }

    #[test]
    fn test_emergency_has_priority() {
        let mut gate = SafetyGate::new();
        let v = gate.evaluate(&input(true, Some(1.0), t0()), &SafetyConfig::default(), &StateConfig::default());
        assert!(!v.allowed);
        assert_eq!(v.fault, Some(GateFault::EmergencyCutoff));
        assert_eq!(v.fault.unwrap().code(), "emergency_cutoff");
        // reference refreshed even though the check short-circuited
        assert_eq!(gate.last_observed().unwrap().temp, 1.0);
    }

    #[test]
    fn test_learning_floor() {
        let mut gate = SafetyGate::new();
        let v = gate.evaluate(&input(false, Some(1.0), t0()), &SafetyConfig::default(), &StateConfig::default());
        assert!(!v.allowed);
        assert_eq!(
            v.fault,
            Some(GateFault::LearningFloor { coil_temp: 1.0, floor: 2.0 })
        );

        let v = gate.evaluate(&input(false, Some(2.0), t0()), &SafetyConfig::default(), &StateConfig::default());
        assert!(!v.allowed, "floor is inclusive");
    }

    #[test]
    fn test_drop_rate_trips_and_refreshes() {
        let safety = SafetyConfig::default();
        let state = StateConfig::default();
        let mut gate = SafetyGate::new();

        assert!(gate.evaluate(&input(false, Some(10.0), t0()), &safety, &state).allowed);

        // 4 K in 2 minutes = 2 K/min > 1.5
        let at = t0() + Duration::minutes(2);
        let v = gate.evaluate(&input(false, Some(6.0), at), &safety, &state);
        assert!(!v.allowed);
        assert_eq!(v.fault.unwrap().code(), "drop_rate");
        assert!((v.drop_rate_k_per_min.unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(gate.last_observed().unwrap().temp, 6.0);
        assert_eq!(gate.last_observed().unwrap().at, at);

        // reference moved, so a slow fall from 6.0 passes
        let v = gate.evaluate(&input(false, Some(5.5), at + Duration::minutes(1)), &safety, &state);
        assert!(v.allowed);
        assert!((v.drop_rate_k_per_min.unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rising_coil_is_negative_rate() {
        let mut gate = SafetyGate::new();
        let safety = SafetyConfig::default();
        let state = StateConfig::default();
        gate.evaluate(&input(false, Some(5.0), t0()), &safety, &state);
        let v = gate.evaluate(&input(false, Some(9.0), t0() + Duration::minutes(1)), &safety, &state);
        assert!(v.allowed);
        assert!(v.drop_rate_k_per_min.unwrap() < 0.0);
    }

    #[test]
    fn test_missing_coil_does_not_block() {
        let mut gate = SafetyGate::new();
        let v = gate.evaluate(&input(false, None, t0()), &SafetyConfig::default(), &StateConfig::default());
        assert!(v.allowed);
        assert!(gate.last_observed().is_none());
    }

    #[test]
    fn test_fault_serializes_with_code() {
        let fault = GateFault::DropRate { rate_k_per_min: 2.0, max_k_per_min: 1.5 };
        let json = serde_json::to_value(fault).unwrap();
        assert_eq!(json["code"], "drop_rate");
    }
}
