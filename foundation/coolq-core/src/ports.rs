//! Port abstractions consumed by the control loop.
//!
//! The engine never touches devices or disks directly. Hosts supply an
//! [`AggregateSource`] (the zoning layer's summary), an [`ActuationSink`]
//! (compressor/fan command) and a [`StateStore`](crate::store::StateStore).

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Summary computed by the zoning/demand layer each tick.
///
/// Every field may be stale. Missing readings are `None` and degrade to
/// neutral values instead of blocking the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    /// Rooms currently requesting cooling.
    pub num_active_rooms: u32,

    /// Largest temperature overshoot above setpoint across rooms (°C).
    pub max_delta_t: f64,

    /// Evaporator coil temperature (°C), if the sensor answered.
    #[serde(default)]
    pub coil_temp: Option<f64>,

    /// Externally supplied emergency cutoff signal.
    #[serde(default)]
    pub emergency_active: bool,

    /// Size-weighted average overshoot across demanding rooms (WAD).
    #[serde(default)]
    pub raw_wad: f64,

    /// Rooms above their setpoint band.
    #[serde(default)]
    pub hot_rooms: u32,

    /// Largest absolute deviation from setpoint, signed as reported.
    #[serde(default)]
    pub max_dev: f64,

    /// Aggregate undershoot of rooms that are already too cold (°C).
    #[serde(default)]
    pub d_cold: f64,

    /// Explicit demand flag. When absent, demand is `num_active_rooms > 0`.
    #[serde(default)]
    pub cooling_demand: Option<bool>,

    /// Any monitored window or door currently open.
    #[serde(default)]
    pub window_open: bool,

    /// Coil slope precomputed by the host (K/min), preferred over the
    /// encoder's own finite difference when present.
    #[serde(default)]
    pub trend_hint: Option<f64>,
}

impl Aggregates {
    pub fn has_demand(&self) -> bool {
        self.cooling_demand.unwrap_or(self.num_active_rooms > 0)
    }
}

/// Reads the zoning layer's aggregate summary.
pub trait AggregateSource {
    fn get_aggregates(&mut self) -> Result<Aggregates>;
}

/// Sends a compressor power / fan speed pair to the plant.
///
/// Fire-and-forget: the loop logs a failure and does not retry within the
/// tick.
pub trait ActuationSink {
    fn command_system(&mut self, power: u8, fan: u8) -> Result<()>;
}

impl<T: AggregateSource + ?Sized> AggregateSource for Box<T> {
    fn get_aggregates(&mut self) -> Result<Aggregates> {
        (**self).get_aggregates()
    }
}

impl<T: ActuationSink + ?Sized> ActuationSink for Box<T> {
    fn command_system(&mut self, power: u8, fan: u8) -> Result<()> {
        (**self).command_system(power, fan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demand_falls_back_to_room_count() {
        let mut agg = Aggregates::default();
        assert!(!agg.has_demand());

        agg.num_active_rooms = 2;
        assert!(agg.has_demand());

        agg.cooling_demand = Some(false);
        assert!(!agg.has_demand());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let agg: Aggregates =
            serde_json::from_str(r#"{"num_active_rooms":1,"max_delta_t":0.8}"#).unwrap();
        assert_eq!(agg.coil_temp, None);
        assert!(!agg.emergency_active);
        assert!(agg.has_demand());
    }
}
