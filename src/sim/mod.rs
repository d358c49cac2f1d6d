//! Simulated cooling plant.
//!
//! A first-order thermal model: the coil relaxes toward a target set by
//! compressor power and airflow, rooms gain heat from ambient and lose it
//! to the coil in proportion to fan speed. Randomness (sensor noise,
//! dropouts) comes from a seeded `StdRng`, so a run is reproducible.
//!
//! [`SimPlant`] owns the shared state and hands out a [`SimSensors`]
//! (aggregate source) and a [`SimActuator`] (actuation sink).

use coolq_core::errors::{CoreError, Result};
use coolq_core::{
    summarize, weighted_average_deviation, ActuationSink, AggregateSource, Aggregates, RoomReading,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimRoom {
    pub name: String,
    pub temp: f64,
    pub setpoint: f64,
    pub weight: f64,

    /// Heat gain per minute per kelvin below ambient
    pub leak_per_min: f64,

    /// Heat removed per minute per kelvin above coil at full fan
    pub cooling_gain: f64,
}

impl SimRoom {
    pub fn new(name: &str, temp: f64, setpoint: f64, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            temp,
            setpoint,
            weight,
            leak_per_min: 0.01,
            cooling_gain: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub rooms: Vec<SimRoom>,
    pub ambient: f64,

    /// Coil temperature with the compressor off
    pub coil_idle: f64,

    /// Coil drop at full power with no airflow
    pub coil_depth: f64,

    /// Coil warming from full airflow at full power
    pub airflow_warming: f64,

    pub coil_tau_minutes: f64,

    /// Uniform sensor noise half-width (°C)
    pub sensor_noise: f64,

    /// Chance that an aggregate fetch fails outright
    pub dropout_probability: f64,

    /// Chance that the coil sensor does not answer
    pub coil_loss_probability: f64,

    /// Raise the emergency flag while the coil reads below this
    pub emergency_below: Option<f64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rooms: vec![
                SimRoom::new("living", 27.0, 24.0, 3.0),
                SimRoom::new("bedroom", 25.5, 23.5, 1.5),
                SimRoom::new("office", 24.2, 24.0, 1.0),
            ],
            ambient: 32.0,
            coil_idle: 14.0,
            coil_depth: 16.0,
            airflow_warming: 6.0,
            coil_tau_minutes: 3.0,
            sensor_noise: 0.02,
            dropout_probability: 0.0,
            coil_loss_probability: 0.0,
            emergency_below: Some(-1.0),
        }
    }
}

/// Observable plant state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantSnapshot {
    pub elapsed_minutes: f64,
    pub coil_temp: f64,
    pub power: u8,
    pub fan: u8,
    pub room_temps: Vec<f64>,
    pub wad: f64,
    /// Integrated energy proxy (full-power minutes)
    pub energy: f64,
}

#[derive(Debug)]
struct PlantState {
    config: SimConfig,
    rooms: Vec<SimRoom>,
    coil: f64,
    power: u8,
    fan: u8,
    energy: f64,
    elapsed_minutes: f64,
    rng: StdRng,
}

impl PlantState {
    fn readings(&self) -> Vec<RoomReading> {
        self.rooms
            .iter()
            .map(|room| RoomReading {
                temp: room.temp,
                setpoint: room.setpoint,
                weight: room.weight,
                demanding: room.temp > room.setpoint,
                window_open: false,
            })
            .collect()
    }

    fn noise(&mut self) -> f64 {
        let width = self.config.sensor_noise;
        if width > 0.0 {
            self.rng.gen_range(-width..=width)
        } else {
            0.0
        }
    }

    fn advance(&mut self, minutes: f64) {
        if !(minutes > 0.0) {
            return;
        }
        let p = self.power as f64 / 100.0;
        let f = self.fan as f64 / 100.0;
        let cfg = &self.config;

        let coil_target = cfg.coil_idle - cfg.coil_depth * p + cfg.airflow_warming * p * f;
        let blend = 1.0 - (-minutes / cfg.coil_tau_minutes.max(1e-3)).exp();
        self.coil += (coil_target - self.coil) * blend;

        for room in &mut self.rooms {
            let gain = room.leak_per_min * (cfg.ambient - room.temp);
            let removed = room.cooling_gain * f * (room.temp - self.coil).max(0.0) / room.weight.max(0.1);
            room.temp += (gain - removed) * minutes;
        }

        self.energy += (p.powf(1.5) + 0.3 * f * f) * minutes;
        self.elapsed_minutes += minutes;
    }

    fn snapshot(&self) -> PlantSnapshot {
        PlantSnapshot {
            elapsed_minutes: self.elapsed_minutes,
            coil_temp: self.coil,
            power: self.power,
            fan: self.fan,
            room_temps: self.rooms.iter().map(|r| r.temp).collect(),
            wad: weighted_average_deviation(&self.readings()),
            energy: self.energy,
        }
    }
}

/// Shared simulated plant
#[derive(Debug, Clone)]
pub struct SimPlant {
    state: Arc<Mutex<PlantState>>,
}

impl SimPlant {
    pub fn new(config: SimConfig, seed: u64) -> Self {
        let state = PlantState {
            rooms: config.rooms.clone(),
            coil: config.coil_idle,
            config,
            power: 0,
            fan: 0,
            energy: 0.0,
            elapsed_minutes: 0.0,
            rng: StdRng::seed_from_u64(seed),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn sensors(&self) -> SimSensors {
        SimSensors {
            state: Arc::clone(&self.state),
        }
    }

    pub fn actuator(&self) -> SimActuator {
        SimActuator {
            state: Arc::clone(&self.state),
        }
    }

    /// Integrate the model forward with the current command held.
    pub fn advance(&self, minutes: f64) {
        lock(&self.state).advance(minutes);
    }

    pub fn snapshot(&self) -> PlantSnapshot {
        lock(&self.state).snapshot()
    }
}

/// Aggregate source backed by the plant
#[derive(Debug, Clone)]
pub struct SimSensors {
    state: Arc<Mutex<PlantState>>,
}

impl AggregateSource for SimSensors {
    fn get_aggregates(&mut self) -> Result<Aggregates> {
        let mut plant = lock(&self.state);

        let dropout = plant.config.dropout_probability;
        if dropout > 0.0 && plant.rng.gen::<f64>() < dropout {
            return Err(CoreError::AggregatesUnavailable("zoning bus timeout".into()));
        }

        let mut readings = plant.readings();
        for reading in &mut readings {
            let noise = plant.noise();
            reading.temp += noise;
        }

        let loss = plant.config.coil_loss_probability;
        let coil = if loss > 0.0 && plant.rng.gen::<f64>() < loss {
            None
        } else {
            let noise = plant.noise();
            Some(plant.coil + noise)
        };
        let emergency = match (plant.config.emergency_below, coil) {
            (Some(limit), Some(c)) => c < limit,
            _ => false,
        };

        Ok(summarize(&readings, coil, emergency))
    }
}

/// Actuation sink backed by the plant
#[derive(Debug, Clone)]
pub struct SimActuator {
    state: Arc<Mutex<PlantState>>,
}

impl ActuationSink for SimActuator {
    fn command_system(&mut self, power: u8, fan: u8) -> Result<()> {
        if power > 100 || fan > 100 {
            return Err(CoreError::ActuationFailed(format!("{}:{} out of range", power, fan)));
        }
        let mut plant = lock(&self.state);
        plant.power = power;
        plant.fan = fan;
        Ok(())
    }
}

fn lock(state: &Arc<Mutex<PlantState>>) -> MutexGuard<'_, PlantState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
