//! Comfort metrics computed from per-room readings.
//!
//! Hosts that already receive aggregates from a zoning layer do not need
//! this module. Hosts that only see room temperatures can build
//! [`Aggregates`] with [`summarize`].

use serde::{Deserialize, Serialize};

use crate::ports::Aggregates;

/// One room as seen by the zoning layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoomReading {
    pub temp: f64,
    pub setpoint: f64,

    /// Relative size (floor area or volume), used as the WAD weight
    pub weight: f64,

    /// Room is requesting cooling
    pub demanding: bool,

    #[serde(default)]
    pub window_open: bool,
}

impl RoomReading {
    /// temp − setpoint, positive when too warm
    pub fn deviation(&self) -> f64 {
        self.temp - self.setpoint
    }

    pub fn overshoot(&self) -> f64 {
        self.deviation().max(0.0)
    }
}

/// Size-weighted average overshoot across demanding rooms (WAD).
///
/// Rooms with a non-positive or non-finite weight count as weight 1.
/// Returns 0.0 when no room demands cooling.
pub fn weighted_average_deviation(rooms: &[RoomReading]) -> f64 {
    let (sum, total_weight) = rooms
        .iter()
        .filter(|r| r.demanding && r.temp.is_finite() && r.setpoint.is_finite())
        .fold((0.0, 0.0), |(sum, total), r| {
            let w = if r.weight.is_finite() && r.weight > 0.0 { r.weight } else { 1.0 };
            (sum + w * r.overshoot(), total + w)
        });

    if total_weight > 0.0 {
        sum / total_weight
    } else {
        0.0
    }
}

/// Build the aggregate summary the control loop consumes.
pub fn summarize(rooms: &[RoomReading], coil_temp: Option<f64>, emergency_active: bool) -> Aggregates {
    let valid = || rooms.iter().filter(|r| r.temp.is_finite() && r.setpoint.is_finite());
    let demanding = || valid().filter(|r| r.demanding);

    let max_dev = valid()
        .map(|r| r.deviation())
        .fold(0.0_f64, |acc, d| if d.abs() > acc.abs() { d } else { acc });

    Aggregates {
        num_active_rooms: demanding().count() as u32,
        max_delta_t: demanding().map(|r| r.overshoot()).fold(0.0, f64::max),
        coil_temp,
        emergency_active,
        raw_wad: weighted_average_deviation(rooms),
        hot_rooms: valid().filter(|r| r.deviation() > 0.0).count() as u32,
        max_dev,
        d_cold: valid().map(|r| (-r.deviation()).max(0.0)).sum(),
        cooling_demand: None,
        window_open: rooms.iter().any(|r| r.window_open),
        trend_hint: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(temp: f64, setpoint: f64, weight: f64, demanding: bool) -> RoomReading {
        RoomReading {
            temp,
            setpoint,
            weight,
            demanding,
            window_open: false,
        }
    }

    #[test]
    fn test_wad_weights_by_size() {
        let rooms = [
            room(25.0, 23.0, 3.0, true), // +2.0
            room(23.5, 23.0, 1.0, true), // +0.5
            room(30.0, 23.0, 5.0, false),
        ];
        let wad = weighted_average_deviation(&rooms);
        assert!((wad - (3.0 * 2.0 + 0.5) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_wad_ignores_undershoot_and_empty() {
        assert_eq!(weighted_average_deviation(&[]), 0.0);
        let rooms = [room(21.0, 23.0, 1.0, true)];
        assert_eq!(weighted_average_deviation(&rooms), 0.0);
    }

    #[test]
    fn test_summarize() {
        let mut rooms = vec![
            room(25.0, 23.0, 2.0, true),
            room(22.0, 23.5, 1.0, false),
        ];
        rooms[1].window_open = true;

        let agg = summarize(&rooms, Some(7.5), false);
        assert_eq!(agg.num_active_rooms, 1);
        assert_eq!(agg.max_delta_t, 2.0);
        assert_eq!(agg.hot_rooms, 1);
        assert_eq!(agg.max_dev, 2.0);
        assert!((agg.d_cold - 1.5).abs() < 1e-12);
        assert!(agg.window_open);
        assert!(agg.has_demand());
        assert_eq!(agg.coil_temp, Some(7.5));
    }
}
