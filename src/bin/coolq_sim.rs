// coolq simulator
// Runs the controller against the simulated plant on a virtual clock

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use coolq::sim::{SimConfig, SimPlant};
use coolq::telemetry::{ComponentId, EventData, EventLevel, TelemetryLogger};
use coolq::{config_digest, load_config};
use coolq_core::{
    ActionSpace, ConfigSnapshot, ControlLoop, ControllerConfig, FileStore, MemoryStore, StateStore,
    TickOutcome,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coolq-sim")]
#[command(about = "Run the coolq controller against a simulated plant", long_about = None)]
struct Cli {
    /// Number of control ticks to simulate
    #[arg(short, long, default_value_t = 240)]
    ticks: usize,

    /// Controller configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Persisted state file (overrides persistence.state_path)
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Append JSONL telemetry to this file
    #[arg(long)]
    telemetry: Option<PathBuf>,

    /// Seed for plant noise and exploration
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Forced calibration steps ("power:fan"), applied before the run
    #[arg(long, value_name = "POWER:FAN")]
    calibrate: Vec<String>,

    /// Clear learned state before running
    #[arg(long)]
    reset: bool,

    /// Probability that an aggregate fetch fails
    #[arg(long, default_value_t = 0.0)]
    dropout: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => ControllerConfig::default(),
    };

    let state_path = cli.state.clone().or_else(|| config.persistence.state_path.clone());
    let store: Box<dyn StateStore + Send> = match &state_path {
        Some(path) => Box::new(FileStore::new(path)),
        None => Box::new(MemoryStore::new()),
    };

    let plant = SimPlant::new(
        SimConfig {
            dropout_probability: cli.dropout,
            ..SimConfig::default()
        },
        cli.seed,
    );
    let controller = ControlLoop::new(
        &config,
        plant.sensors(),
        plant.actuator(),
        store,
        StdRng::seed_from_u64(cli.seed.wrapping_add(1)),
    );

    let telemetry = match &cli.telemetry {
        Some(path) => Some(
            TelemetryLogger::with_path(path)
                .with_context(|| format!("opening telemetry {}", path.display()))?,
        ),
        None => None,
    };

    let digest = config_digest(&config)?;
    if let Some(logger) = &telemetry {
        let space = ActionSpace::from_config(&config.actions);
        logger.event(
            ComponentId::Simulator,
            EventLevel::Info,
            EventData::RunStarted {
                config_digest: digest.clone(),
                config: ConfigSnapshot::from_config(&config, space.allowed().len()),
                seed: cli.seed,
            },
        );
    }

    if cli.reset {
        controller.reset(&config);
        if let Some(logger) = &telemetry {
            logger.event(ComponentId::ControlLoop, EventLevel::Info, EventData::Reset);
        }
    }

    let step_minutes = config.timer_interval_secs.max(1) as f64 / 60.0;
    let step = Duration::seconds(config.timer_interval_secs.max(1) as i64);
    let mut now = Utc::now();

    for requested in &cli.calibrate {
        let result = controller.force_action(&config, requested, now);
        println!(
            "calibrate {:>7} -> {}:{} {}",
            requested,
            result.applied_power,
            result.applied_fan,
            result.error_code.as_deref().unwrap_or("ok")
        );
        if let Some(logger) = &telemetry {
            logger.event(
                ComponentId::Calibration,
                if result.ok { EventLevel::Info } else { EventLevel::Warning },
                EventData::ForcedAction {
                    requested: requested.clone(),
                    result: result.clone(),
                },
            );
        }
        plant.advance(step_minutes);
        now += step;
    }

    let start = plant.snapshot();
    let mut outcomes: BTreeMap<String, usize> = BTreeMap::new();
    let mut wad_sum = 0.0;

    for _ in 0..cli.ticks {
        let report = controller.tick(&config, now);
        *outcomes.entry(format!("{:?}", report.outcome)).or_default() += 1;
        if report.outcome == TickOutcome::Gated {
            log::info!("gated at {}: {:?}", now, report.fault);
        }
        if let Some(logger) = &telemetry {
            logger.tick(&report);
        }

        plant.advance(step_minutes);
        wad_sum += plant.snapshot().wad;
        now += step;
    }

    let end = plant.snapshot();
    let status = controller.status();
    if let Some(logger) = &telemetry {
        logger.event(
            ComponentId::Simulator,
            EventLevel::Info,
            EventData::RunFinished {
                ticks: cli.ticks,
                status: status.clone(),
            },
        );
    }

    println!("config      {}", &digest[..16]);
    println!("ticks       {}", cli.ticks);
    for (outcome, count) in &outcomes {
        println!("  {:<10} {}", outcome, count);
    }
    println!("WAD         {:.3} -> {:.3} (mean {:.3})", start.wad, end.wad, wad_sum / cli.ticks.max(1) as f64);
    println!("coil        {:.2} °C", end.coil_temp);
    println!("energy      {:.1}", end.energy - start.energy);
    println!("epsilon     {:.4}", status.epsilon);
    println!("q-table     {} states, {} pairs, {} updates", status.visited_states, status.visited_pairs, status.total_updates);
    if let Some(path) = &state_path {
        println!("state       {}", path.display());
    }
    Ok(())
}
