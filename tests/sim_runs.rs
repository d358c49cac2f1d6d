//! Simulated plant integration tests
//!
//! Runs the controller against the thermal model and checks reproducibility,
//! the safety interlock under real dynamics, and persistence between runs.

use chrono::{DateTime, Duration, TimeZone, Utc};
use coolq::sim::{SimConfig, SimPlant};
use coolq::telemetry::TelemetryLogger;
use coolq::{
    load_state_file, ActionKey, ControlLoop, ControllerConfig, FileStore, MemoryStore, TickOutcome,
    TickReport,
};
use coolq_core::{ActionSpace, GateFault};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 1, 13, 0, 0).unwrap()
}

fn quiet() -> SimConfig {
    SimConfig {
        sensor_noise: 0.0,
        ..SimConfig::default()
    }
}

fn run(
    plant: &SimPlant,
    controller: &ControlLoop,
    config: &ControllerConfig,
    ticks: usize,
) -> Vec<TickReport> {
    (0..ticks)
        .map(|i| {
            let report = controller.tick(config, start() + Duration::minutes(i as i64));
            plant.advance(1.0);
            report
        })
        .collect()
}

fn memory_loop(plant: &SimPlant, config: &ControllerConfig, seed: u64) -> ControlLoop {
    ControlLoop::new(
        config,
        plant.sensors(),
        plant.actuator(),
        MemoryStore::new(),
        StdRng::seed_from_u64(seed),
    )
}

#[test]
fn test_same_seed_same_run() {
    let config = ControllerConfig::default();

    let plant_a = SimPlant::new(SimConfig::default(), 9);
    let reports_a = run(&plant_a, &memory_loop(&plant_a, &config, 10), &config, 120);

    let plant_b = SimPlant::new(SimConfig::default(), 9);
    let reports_b = run(&plant_b, &memory_loop(&plant_b, &config, 10), &config, 120);

    assert_eq!(reports_a, reports_b);
    assert_eq!(plant_a.snapshot(), plant_b.snapshot());
}

#[test]
fn test_interlock_holds_under_faulty_sensors() {
    let config = ControllerConfig::default();
    let space = ActionSpace::from_config(&config.actions);
    let plant = SimPlant::new(
        SimConfig {
            dropout_probability: 0.1,
            coil_loss_probability: 0.1,
            ..SimConfig::default()
        },
        3,
    );
    let controller = memory_loop(&plant, &config, 4);
    let reports = run(&plant, &controller, &config, 300);

    let mut last = ActionKey::OFF;
    for report in &reports {
        match report.outcome {
            TickOutcome::Gated => {
                assert_eq!(report.applied, Some(ActionKey::OFF));
                assert!(report.fault.is_some());
                assert!(!report.learned());
                last = ActionKey::OFF;
            }
            TickOutcome::Degraded => {
                assert_eq!(report.applied.unwrap_or(ActionKey::OFF), last);
                assert!(!report.learned());
            }
            TickOutcome::Idle => {
                assert_eq!(report.applied, Some(ActionKey::OFF));
                last = ActionKey::OFF;
            }
            TickOutcome::Acted => {
                let applied = report.applied.unwrap();
                assert!(space.contains(&applied));
                assert!(applied.power.abs_diff(last.power) <= config.actions.max_power_delta);
                assert!(applied.fan.abs_diff(last.fan) <= config.actions.max_fan_delta);
                last = applied;
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert!(reports.iter().any(|r| r.outcome == TickOutcome::Degraded));
    assert!(controller.status().total_updates > 0);
}

#[test]
fn test_forced_freeze_trips_drop_rate() {
    let config = ControllerConfig::default();
    let plant = SimPlant::new(quiet(), 1);
    let controller = memory_loop(&plant, &config, 1);

    let first = controller.force_action(&config, "100:0", start());
    assert!(first.ok);
    assert_eq!((first.applied_power, first.applied_fan), (100, 0));

    plant.advance(1.0);
    let second = controller.force_action(&config, "100:0", start() + Duration::minutes(1));
    assert!(!second.ok);
    assert_eq!(second.error_code.as_deref(), Some("drop_rate"));
    assert_eq!((second.applied_power, second.applied_fan), (0, 0));
    assert!(matches!(
        controller.status().last_fault,
        Some(GateFault::DropRate { .. })
    ));
    assert_eq!(plant.snapshot().power, 0);
}

#[test]
fn test_learning_resumes_from_state_file() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let telemetry_path = dir.path().join("telemetry.jsonl");
    let config = ControllerConfig::default();

    let plant = SimPlant::new(quiet(), 21);
    let first = ControlLoop::new(
        &config,
        plant.sensors(),
        plant.actuator(),
        FileStore::new(&state_path),
        StdRng::seed_from_u64(22),
    );
    let logger = TelemetryLogger::with_path(&telemetry_path).unwrap();
    for report in run(&plant, &first, &config, 30) {
        logger.tick(&report);
    }
    let first_status = first.status();
    drop(first);

    let on_disk = load_state_file(&state_path).unwrap();
    assert_eq!(on_disk.total_updates, first_status.total_updates);
    assert_eq!(on_disk.epsilon, first_status.epsilon);

    let second = ControlLoop::new(
        &config,
        plant.sensors(),
        plant.actuator(),
        FileStore::new(&state_path),
        StdRng::seed_from_u64(23),
    );
    assert_eq!(second.status().visited_pairs, first_status.visited_pairs);
    assert_eq!(second.snapshot().transition, on_disk.transition);

    let report = second.tick(&config, start() + Duration::minutes(30));
    if report.outcome == TickOutcome::Acted && on_disk.transition.is_some() {
        assert!(report.learned(), "buffered transition from the first run is credited");
        assert_eq!(second.status().total_updates, first_status.total_updates + 1);
    }

    let lines = std::fs::read_to_string(&telemetry_path).unwrap();
    assert_eq!(lines.lines().count(), 30);
}
