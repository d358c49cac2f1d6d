//! Per-tick orchestration.
//!
//! One tick:
//!
//! 1. fetch aggregates (a failure holds the last action, no learning)
//! 2. safety gate (a trip applies `0:0`, no learning, buffer kept)
//! 3. demand check (none applies `0:0`, no learning, buffer kept until it
//!    ages out)
//! 4. encode the state
//! 5. credit the buffered transition with the current metrics
//! 6. select, rate-limit and snap a new action
//! 7. apply, anneal, persist, buffer the new transition
//!
//! Ticks are not reentrant. The loop state sits behind a mutex acquired
//! with `try_lock`, and a tick that finds it held returns
//! [`TickOutcome::Skipped`] without touching anything.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, TryLockError};

use crate::ports::{ActuationSink, AggregateSource, Aggregates};
use crate::rl::action_space::{ActionKey, ActionSpace};
use crate::rl::config::ControllerConfig;
use crate::rl::policy::EpsilonGreedy;
use crate::rl::qtable::QTable;
use crate::rl::reward::{compute_reward, RewardInput, TransitionMetrics};
use crate::rl::safety::{GateFault, GateInput, SafetyGate};
use crate::rl::state_encoder::{CoilSample, StateEncoder, StateKey, StateVector};
use crate::rl::telemetry::{DecisionTelemetry, QUpdateTelemetry, TickOutcome, TickReport};
use crate::store::{PersistedState, StateStore};

/// The (state, action) whose consequence has not been credited yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub state: StateKey,
    pub action: ActionKey,

    /// Action applied before `action`, for the change penalty
    #[serde(default)]
    pub preceding_action: Option<ActionKey>,

    pub metrics: TransitionMetrics,
    pub at: DateTime<Utc>,
}

/// Answer returned to a calibration driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcedActionResult {
    pub ok: bool,
    pub applied_power: u8,
    pub applied_fan: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TickReport>,
}

impl ForcedActionResult {
    fn rejected(code: &str, held: ActionKey) -> Self {
        Self {
            ok: false,
            applied_power: held.power,
            applied_fan: held.fan,
            error_code: Some(code.to_string()),
            report: None,
        }
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub epsilon: f64,
    pub visited_pairs: usize,
    pub visited_states: usize,
    pub total_updates: u64,
    pub last_applied: Option<ActionKey>,
    pub transition_buffered: bool,
    pub trend_memory: i8,
    pub last_fault: Option<GateFault>,
}

struct LoopInner {
    source: Box<dyn AggregateSource + Send>,
    sink: Box<dyn ActuationSink + Send>,
    store: Box<dyn StateStore + Send>,

    qtable: QTable,
    policy: EpsilonGreedy,
    encoder: StateEncoder,
    gate: SafetyGate,
    transition: Option<TransitionRecord>,
    last_applied: Option<ActionKey>,
    total_updates: u64,
    last_fault: Option<GateFault>,
    rng: StdRng,
}

/// Safety-gated Q-learning controller
pub struct ControlLoop {
    inner: Mutex<LoopInner>,
}

/// Stage the loop reached before deciding on an action
enum Admission {
    Proceed(Aggregates),
    Done(TickReport),
}

impl ControlLoop {
    /// Build a loop and restore any persisted state from `store`.
    pub fn new<S, A, P>(
        config: &ControllerConfig,
        source: S,
        sink: A,
        mut store: P,
        rng: StdRng,
    ) -> Self
    where
        S: AggregateSource + Send + 'static,
        A: ActuationSink + Send + 'static,
        P: StateStore + Send + 'static,
    {
        let config = config.sanitized();
        let learning = &config.learning;

        let saved = match store.load() {
            Ok(Some(saved)) => Some(saved),
            Ok(None) => {
                log::info!("no persisted controller state, starting empty");
                None
            }
            Err(e) => {
                log::error!("failed to restore controller state: {}, starting empty", e);
                None
            }
        };

        let mut inner = LoopInner {
            source: Box::new(source),
            sink: Box::new(sink),
            store: Box::new(store),
            qtable: QTable::new(learning.initial_q),
            policy: EpsilonGreedy::new(learning),
            encoder: StateEncoder::new(),
            gate: SafetyGate::new(),
            transition: None,
            last_applied: None,
            total_updates: 0,
            last_fault: None,
            rng,
        };

        if let Some(saved) = saved {
            let mut qtable = saved.qtable;
            qtable.set_initial_value(learning.initial_q);
            log::info!(
                "restored controller state: {} states, {} pairs, epsilon {:.4}, {} updates",
                qtable.num_states(),
                qtable.num_visited(),
                saved.epsilon,
                saved.total_updates
            );
            inner.qtable = qtable;
            inner.policy = EpsilonGreedy::with_epsilon(saved.epsilon, learning);
            inner.encoder = StateEncoder::with_trend_memory(saved.trend_memory);
            inner.transition = saved.transition;
            inner.last_applied = saved.last_applied;
            inner.total_updates = saved.total_updates;
        }

        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Run one control tick. Never fails; every degraded path is reported
    /// in the returned [`TickReport`].
    pub fn tick(&self, config: &ControllerConfig, now: DateTime<Utc>) -> TickReport {
        let Some(mut inner) = self.try_guard() else {
            log::warn!("tick already in progress, skipping");
            return TickReport::new(now, TickOutcome::Skipped);
        };
        let config = config.sanitized();
        inner.tick(&config, now)
    }

    /// Apply an externally chosen `"power:fan"` action and learn from it.
    ///
    /// The action passes the same safety gate and transition discipline as
    /// an autonomous tick. It is snapped onto the lattice but not rate
    /// limited, and demand is not required.
    pub fn force_action(&self, config: &ControllerConfig, input: &str, now: DateTime<Utc>) -> ForcedActionResult {
        let Some(mut inner) = self.try_guard() else {
            log::warn!("forced action '{}' rejected, tick in progress", input);
            return ForcedActionResult::rejected("busy", ActionKey::OFF);
        };
        let config = config.sanitized();
        inner.force(&config, input, now)
    }

    /// Forget everything learned. Idempotent.
    ///
    /// Clears the Q-table, transition buffer and trend memory, restores
    /// epsilon to its start value and persists the empty state. The last
    /// applied action and the safety watchdog reflect the plant, not the
    /// learner, and are kept.
    pub fn reset(&self, config: &ControllerConfig) {
        let mut inner = self.guard();
        let config = config.sanitized();
        inner.qtable.clear();
        inner.qtable.set_initial_value(config.learning.initial_q);
        inner.policy.reset(&config.learning);
        inner.encoder.reset();
        inner.transition = None;
        inner.total_updates = 0;
        inner.persist();
        log::info!("controller reset, epsilon {:.4}", inner.policy.epsilon());
    }

    pub fn status(&self) -> ControllerStatus {
        let inner = self.guard();
        ControllerStatus {
            epsilon: inner.policy.epsilon(),
            visited_pairs: inner.qtable.num_visited(),
            visited_states: inner.qtable.num_states(),
            total_updates: inner.total_updates,
            last_applied: inner.last_applied,
            transition_buffered: inner.transition.is_some(),
            trend_memory: inner.encoder.trend_memory(),
            last_fault: inner.last_fault,
        }
    }

    /// Copy of the persisted surface, as it would be written to the store.
    pub fn snapshot(&self) -> PersistedState {
        self.guard().snapshot()
    }

    pub fn qtable(&self) -> QTable {
        self.guard().qtable.clone()
    }

    fn try_guard(&self) -> Option<MutexGuard<'_, LoopInner>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(poisoned)) => {
                log::warn!("controller lock poisoned, recovering state");
                Some(poisoned.into_inner())
            }
        }
    }

    fn guard(&self) -> MutexGuard<'_, LoopInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            log::warn!("controller lock poisoned, recovering state");
            poisoned.into_inner()
        })
    }
}

impl LoopInner {
    fn tick(&mut self, config: &ControllerConfig, now: DateTime<Utc>) -> TickReport {
        let aggregates = match self.admit(config, now, true) {
            Admission::Proceed(aggregates) => aggregates,
            Admission::Done(report) => return report,
        };

        let space = ActionSpace::from_config(&config.actions);
        let previous_coil = self.previous_coil();
        let (state, metrics) = self.observe(config, &aggregates, previous_coil.as_ref(), now);

        let mut report = TickReport::new(now, TickOutcome::Acted);
        report.q_update = self.credit_transition(config, &space, state, &metrics, now);

        let allowed = space.allowed_under_demand();
        let epsilon = self.policy.epsilon();
        let selection = self.policy.select(
            &state,
            &allowed,
            &self.qtable,
            config.learning.tie_tolerance,
            &mut self.rng,
        );
        let last = self.last_applied.unwrap_or(ActionKey::OFF);
        let action = space.limit_and_snap(
            selection.action,
            last,
            &allowed,
            config.actions.max_power_delta,
            config.actions.max_fan_delta,
        );

        log::debug!(
            "state {} proposed {} ({}) applied {} q={:.4} eps={:.4}",
            state,
            selection.action,
            if selection.explored { "explore" } else { "greedy" },
            action,
            selection.q_value,
            epsilon
        );

        report.decision = Some(DecisionTelemetry {
            state,
            proposed: selection.action,
            action,
            q_value: selection.q_value,
            epsilon,
            was_exploration: selection.explored,
            allowed_count: allowed.len(),
        });

        self.commit(config, state, action, metrics, now, &mut report);
        report
    }

    fn force(&mut self, config: &ControllerConfig, input: &str, now: DateTime<Utc>) -> ForcedActionResult {
        let held = self.last_applied.unwrap_or(ActionKey::OFF);

        let requested: ActionKey = match input.parse() {
            Ok(action) => action,
            Err(e) => {
                log::warn!("forced action rejected: {}", e);
                return ForcedActionResult::rejected("invalid_action", held);
            }
        };

        let aggregates = match self.admit(config, now, false) {
            Admission::Proceed(aggregates) => aggregates,
            Admission::Done(report) => {
                let code = match (&report.fault, report.outcome) {
                    (Some(fault), _) => fault.code(),
                    (None, TickOutcome::Degraded) => "aggregates_unavailable",
                    _ => "rejected",
                };
                let applied = report.applied.unwrap_or(held);
                let mut result = ForcedActionResult::rejected(code, applied);
                result.report = Some(report);
                return result;
            }
        };

        let space = ActionSpace::from_config(&config.actions);
        let previous_coil = self.previous_coil();
        let (state, metrics) = self.observe(config, &aggregates, previous_coil.as_ref(), now);

        let mut report = TickReport::new(now, TickOutcome::Forced);
        report.q_update = self.credit_transition(config, &space, state, &metrics, now);

        let action = space.validate(requested.power as i32, requested.fan as i32);
        if action != requested {
            log::info!("forced action {} snapped to {}", requested, action);
        }
        report.decision = Some(DecisionTelemetry {
            state,
            proposed: requested,
            action,
            q_value: self.qtable.get(&state, &action),
            epsilon: self.policy.epsilon(),
            was_exploration: false,
            allowed_count: space.allowed().len(),
        });

        self.commit(config, state, action, metrics, now, &mut report);

        ForcedActionResult {
            ok: report.error.is_none(),
            applied_power: action.power,
            applied_fan: action.fan,
            error_code: report.error.as_ref().map(|_| "actuation_failed".to_string()),
            report: Some(report),
        }
    }

    /// Steps 1 to 3: fetch, gate and demand. `Done` means the tick is over.
    fn admit(&mut self, config: &ControllerConfig, now: DateTime<Utc>, require_demand: bool) -> Admission {
        let aggregates = match self.source.get_aggregates() {
            Ok(aggregates) => aggregates,
            Err(e) => {
                log::warn!("aggregates unavailable: {}, holding last action", e);
                let mut report = TickReport::new(now, TickOutcome::Degraded);
                report.applied = self.last_applied;
                report.error = Some(e.to_string());
                report.epsilon = Some(self.policy.epsilon());
                return Admission::Done(report);
            }
        };

        let verdict = self.gate.evaluate(
            &GateInput {
                emergency_active: aggregates.emergency_active,
                coil_temp: aggregates.coil_temp,
                now,
            },
            &config.safety,
            &config.state,
        );

        if let Some(fault) = verdict.fault {
            self.last_fault = Some(fault);
            // buffered transition kept: the next admitted tick credits it
            let mut report = TickReport::new(now, TickOutcome::Gated);
            report.fault = Some(fault);
            self.apply_stop(&mut report);
            self.persist();
            return Admission::Done(report);
        }
        self.last_fault = None;

        if require_demand && !aggregates.has_demand() {
            log::debug!("no cooling demand, idling");
            let mut report = TickReport::new(now, TickOutcome::Idle);
            self.apply_stop(&mut report);
            self.persist();
            return Admission::Done(report);
        }

        Admission::Proceed(aggregates)
    }

    /// Coil reading buffered with the pending transition, the trend baseline.
    fn previous_coil(&self) -> Option<CoilSample> {
        let record = self.transition.as_ref()?;
        record.metrics.coil_temp.map(|temp| CoilSample { temp, at: record.at })
    }

    fn observe(
        &mut self,
        config: &ControllerConfig,
        aggregates: &Aggregates,
        previous_coil: Option<&CoilSample>,
        now: DateTime<Utc>,
    ) -> (StateKey, TransitionMetrics) {
        let vector = StateVector {
            num_active_rooms: aggregates.num_active_rooms,
            max_delta: aggregates.max_delta_t.max(0.0),
            coil_temp: aggregates.coil_temp,
            trend_hint: aggregates.trend_hint,
            observed_at: now,
        };
        let state = self.encoder.encode(&vector, previous_coil, &config.state);

        let metrics = TransitionMetrics {
            max_delta: vector.max_delta,
            coil_temp: aggregates.coil_temp.filter(|t| t.is_finite()),
            wad: if aggregates.raw_wad.is_finite() { aggregates.raw_wad } else { 0.0 },
            window_open: aggregates.window_open,
        };
        (state, metrics)
    }

    /// Step 5: reward the buffered transition against the current metrics.
    fn credit_transition(
        &mut self,
        config: &ControllerConfig,
        space: &ActionSpace,
        state: StateKey,
        metrics: &TransitionMetrics,
        now: DateTime<Utc>,
    ) -> Option<QUpdateTelemetry> {
        let record = self.transition.take()?;

        let step_minutes = (now - record.at).num_milliseconds() as f64 / 60_000.0;
        if step_minutes <= 0.0 || step_minutes > config.learning.transition_max_age_minutes {
            log::info!(
                "dropping transition {} / {} from {:.1} min ago",
                record.state,
                record.action,
                step_minutes
            );
            return None;
        }

        let reward = compute_reward(
            &RewardInput {
                action: record.action,
                preceding_action: record.preceding_action,
                current: metrics,
                previous_wad: record.metrics.wad,
                step_minutes,
                min_learning_temp: config.state.min_learning_temp,
            },
            space,
            &config.reward,
        );

        let (q_old, q_new) = self.qtable.update(
            record.state,
            record.action,
            reward.total,
            &state,
            config.learning.alpha,
            config.learning.gamma,
        )?;
        self.total_updates += 1;

        log::debug!(
            "Q({}, {}) {:.4} -> {:.4} reward {:.4}",
            record.state,
            record.action,
            q_old,
            q_new,
            reward.total
        );

        Some(QUpdateTelemetry::new(
            record.state,
            record.action,
            state,
            reward,
            q_old,
            q_new,
            step_minutes,
        ))
    }

    /// Step 7: apply, anneal, persist, buffer.
    fn commit(
        &mut self,
        config: &ControllerConfig,
        state: StateKey,
        action: ActionKey,
        metrics: TransitionMetrics,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        self.apply(action, report);
        let preceding = self.last_applied.replace(action);

        self.policy.anneal(&config.learning);

        self.transition = Some(TransitionRecord {
            state,
            action,
            preceding_action: preceding,
            metrics,
            at: now,
        });
        self.persist();
        report.epsilon = Some(self.policy.epsilon());
    }

    fn apply_stop(&mut self, report: &mut TickReport) {
        self.apply(ActionKey::OFF, report);
        self.last_applied = Some(ActionKey::OFF);
        report.epsilon = Some(self.policy.epsilon());
    }

    fn apply(&mut self, action: ActionKey, report: &mut TickReport) {
        report.applied = Some(action);
        if let Err(e) = self.sink.command_system(action.power, action.fan) {
            log::error!("failed to command {}: {}", action, e);
            report.error = Some(e.to_string());
        }
    }

    fn snapshot(&self) -> PersistedState {
        PersistedState {
            qtable: self.qtable.clone(),
            epsilon: self.policy.epsilon(),
            transition: self.transition.clone(),
            trend_memory: self.encoder.trend_memory(),
            last_applied: self.last_applied,
            total_updates: self.total_updates,
        }
    }

    fn persist(&mut self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save(&snapshot) {
            log::error!("failed to persist controller state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CoreError, Result};
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use rand::SeedableRng;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct Script(Arc<StdMutex<VecDeque<Result<Aggregates>>>>);

    impl Script {
        fn push(&self, item: Result<Aggregates>) {
            self.0.lock().unwrap().push_back(item);
        }
    }

    impl AggregateSource for Script {
        fn get_aggregates(&mut self) -> Result<Aggregates> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CoreError::AggregatesUnavailable("script empty".into())))
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<StdMutex<Vec<(u8, u8)>>>);

    impl ActuationSink for Recorder {
        fn command_system(&mut self, power: u8, fan: u8) -> Result<()> {
            self.0.lock().unwrap().push((power, fan));
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn demand(coil: f64) -> Aggregates {
        Aggregates {
            num_active_rooms: 1,
            max_delta_t: 0.8,
            coil_temp: Some(coil),
            raw_wad: 0.8,
            ..Aggregates::default()
        }
    }

    fn build() -> (ControlLoop, Script, Recorder) {
        let script = Script::default();
        let recorder = Recorder::default();
        let controller = ControlLoop::new(
            &ControllerConfig::default(),
            script.clone(),
            recorder.clone(),
            MemoryStore::new(),
            StdRng::seed_from_u64(11),
        );
        (controller, script, recorder)
    }

    #[test]
    fn test_acting_tick_buffers_and_anneals() {
        let config = ControllerConfig::default();
        let (controller, script, recorder) = build();
        script.push(Ok(demand(8.0)));

        let report = controller.tick(&config, t0());
        assert_eq!(report.outcome, TickOutcome::Acted);
        assert!(!report.learned());
        let applied = report.applied.unwrap();
        assert!(applied.power <= config.actions.max_power_delta);
        assert!(applied.fan <= config.actions.max_fan_delta);
        assert_eq!(recorder.0.lock().unwrap().len(), 1);

        let status = controller.status();
        assert!(status.transition_buffered);
        assert!(status.epsilon < config.learning.epsilon_start);
    }

    #[test]
    fn test_second_tick_credits_first() {
        let config = ControllerConfig::default();
        let (controller, script, _) = build();
        script.push(Ok(demand(8.0)));
        script.push(Ok(demand(7.8)));

        controller.tick(&config, t0());
        let report = controller.tick(&config, t0() + Duration::minutes(1));
        assert!(report.learned());
        assert_eq!(controller.status().total_updates, 1);
        assert_eq!(controller.qtable().num_visited(), 1);
    }

    #[test]
    fn test_degraded_holds_last_action() {
        let config = ControllerConfig::default();
        let (controller, script, recorder) = build();
        script.push(Ok(demand(8.0)));
        let first = controller.tick(&config, t0());
        let eps = controller.status().epsilon;

        // script now empty: source fails
        let report = controller.tick(&config, t0() + Duration::minutes(1));
        assert_eq!(report.outcome, TickOutcome::Degraded);
        assert_eq!(report.applied, first.applied);
        assert!(report.error.is_some());
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
        assert_eq!(controller.status().epsilon, eps);
    }

    #[test]
    fn test_stale_transition_is_dropped() {
        let config = ControllerConfig::default();
        let (controller, script, _) = build();
        script.push(Ok(demand(8.0)));
        script.push(Ok(demand(8.0)));

        controller.tick(&config, t0());
        let report = controller.tick(&config, t0() + Duration::minutes(45));
        assert!(!report.learned());
        assert!(controller.qtable().is_empty());
    }

    #[test]
    fn test_forced_action_snaps_without_rate_limit() {
        let config = ControllerConfig::default();
        let (controller, script, recorder) = build();
        script.push(Ok(demand(8.0)));

        let result = controller.force_action(&config, "97:60", t0());
        assert!(result.ok);
        assert_eq!((result.applied_power, result.applied_fan), (100, 50));
        assert_eq!(recorder.0.lock().unwrap().as_slice(), &[(100, 50)]);
        assert!(controller.status().transition_buffered);
    }

    #[test]
    fn test_forced_action_malformed_input_mutates_nothing() {
        let config = ControllerConfig::default();
        let (controller, script, recorder) = build();
        script.push(Ok(demand(8.0)));
        let before = controller.snapshot();

        let result = controller.force_action(&config, "fast", t0());
        assert!(!result.ok);
        assert_eq!(result.error_code.as_deref(), Some("invalid_action"));
        assert!(recorder.0.lock().unwrap().is_empty());
        assert_eq!(controller.snapshot(), before);
    }

    #[test]
    fn test_forced_action_gated() {
        let config = ControllerConfig::default();
        let (controller, script, recorder) = build();
        script.push(Ok(demand(1.0)));

        let result = controller.force_action(&config, "50:50", t0());
        assert!(!result.ok);
        assert_eq!(result.error_code.as_deref(), Some("learning_floor"));
        assert_eq!((result.applied_power, result.applied_fan), (0, 0));
        assert_eq!(recorder.0.lock().unwrap().as_slice(), &[(0, 0)]);
    }

    #[test]
    fn test_reset_keeps_plant_state() {
        let config = ControllerConfig::default();
        let (controller, script, _) = build();
        script.push(Ok(demand(8.0)));
        script.push(Ok(demand(7.9)));
        controller.tick(&config, t0());
        controller.tick(&config, t0() + Duration::minutes(1));

        controller.reset(&config);
        let status = controller.status();
        assert_eq!(status.visited_pairs, 0);
        assert_eq!(status.total_updates, 0);
        assert!(!status.transition_buffered);
        assert_eq!(status.epsilon, config.learning.epsilon_start);
        assert!(status.last_applied.is_some());
    }
}
