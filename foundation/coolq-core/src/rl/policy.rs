//! Epsilon-greedy action selection over the currently allowed subset.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::rl::action_space::ActionKey;
use crate::rl::config::LearningConfig;
use crate::rl::qtable::QTable;
use crate::rl::state_encoder::StateKey;

/// Outcome of one selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub action: ActionKey,

    /// Q-value of the chosen action before any update
    pub q_value: f64,

    /// Random (exploratory) rather than greedy choice
    pub explored: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpsilonGreedy {
    epsilon: f64,
}

impl EpsilonGreedy {
    pub fn new(config: &LearningConfig) -> Self {
        Self {
            epsilon: config.epsilon_start,
        }
    }

    /// Resume from a persisted epsilon, clamped to the configured bounds.
    pub fn with_epsilon(epsilon: f64, config: &LearningConfig) -> Self {
        let epsilon = if epsilon.is_finite() {
            epsilon.clamp(config.epsilon_min, config.epsilon_start)
        } else {
            config.epsilon_start
        };
        Self { epsilon }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Pick an action for `state` among `allowed`.
    ///
    /// With probability ε a uniformly random member is returned. Otherwise
    /// the best-valued actions within `tie_tolerance` are ranked by total
    /// effort (power + fan, higher first) and one of the top two is drawn
    /// uniformly, so ties never drift toward low-effort actions.
    ///
    /// An empty `allowed` set yields `0:0`.
    pub fn select<R: Rng>(
        &self,
        state: &StateKey,
        allowed: &[ActionKey],
        qtable: &QTable,
        tie_tolerance: f64,
        rng: &mut R,
    ) -> Selection {
        if allowed.is_empty() {
            return Selection {
                action: ActionKey::OFF,
                q_value: qtable.get(state, &ActionKey::OFF),
                explored: false,
            };
        }

        if rng.gen::<f64>() < self.epsilon {
            let action = allowed[rng.gen_range(0..allowed.len())];
            return Selection {
                action,
                q_value: qtable.get(state, &action),
                explored: true,
            };
        }

        let scored: Vec<(ActionKey, f64)> = allowed
            .iter()
            .map(|a| (*a, qtable.get(state, a)))
            .collect();
        let best = scored
            .iter()
            .map(|(_, q)| *q)
            .fold(f64::NEG_INFINITY, f64::max);

        let mut tied: Vec<(ActionKey, f64)> = scored
            .into_iter()
            .filter(|(_, q)| (best - q).abs() <= tie_tolerance)
            .collect();
        // stable: equal totals keep allowed order
        tied.sort_by(|(a, _), (b, _)| b.total().cmp(&a.total()));

        let pick = if tied.len() >= 2 { rng.gen_range(0..2) } else { 0 };
        let (action, q_value) = tied[pick];
        Selection {
            action,
            q_value,
            explored: false,
        }
    }

    /// ε ← max(ε_min, ε × decay). Called once per learning tick.
    pub fn anneal(&mut self, config: &LearningConfig) {
        self.epsilon = (self.epsilon * config.epsilon_decay).max(config.epsilon_min);
    }

    pub fn reset(&mut self, config: &LearningConfig) {
        self.epsilon = config.epsilon_start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn a(key: &str) -> ActionKey {
        key.parse().unwrap()
    }

    fn greedy() -> EpsilonGreedy {
        let config = LearningConfig {
            epsilon_start: 0.0,
            epsilon_min: 0.0,
            ..LearningConfig::default()
        };
        EpsilonGreedy::new(&config)
    }

    #[test]
    fn test_greedy_picks_best() {
        let mut qtable = QTable::new(0.0);
        let state = StateKey::new(1, 2, 0, 0);
        qtable.set(state, a("40:50"), 0.1);
        qtable.set(state, a("70:50"), -0.3);

        let mut rng = StdRng::seed_from_u64(7);
        let allowed = [a("40:50"), a("70:50")];
        for _ in 0..20 {
            let sel = greedy().select(&state, &allowed, &qtable, 1e-6, &mut rng);
            assert_eq!(sel.action, a("40:50"));
            assert!(!sel.explored);
            assert_eq!(sel.q_value, 0.1);
        }
    }

    #[test]
    fn test_ties_prefer_higher_effort_top_two() {
        let qtable = QTable::new(0.0);
        let state = StateKey::default();
        let allowed = [a("10:25"), a("40:50"), a("100:100"), a("70:75")];

        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            let sel = greedy().select(&state, &allowed, &qtable, 1e-6, &mut rng);
            seen.insert(sel.action);
        }
        let expected: std::collections::BTreeSet<_> =
            [a("100:100"), a("70:75")].into_iter().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_exploration_stays_in_allowed() {
        let config = LearningConfig {
            epsilon_start: 1.0,
            ..LearningConfig::default()
        };
        let policy = EpsilonGreedy::new(&config);
        let qtable = QTable::new(0.0);
        let allowed = [a("40:50"), a("70:50"), a("100:50")];
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..100 {
            let sel = policy.select(&StateKey::default(), &allowed, &qtable, 1e-6, &mut rng);
            assert!(sel.explored);
            assert!(allowed.contains(&sel.action));
        }
    }

    #[test]
    fn test_empty_allowed_is_off() {
        let mut rng = StdRng::seed_from_u64(1);
        let sel = greedy().select(&StateKey::default(), &[], &QTable::new(0.0), 1e-6, &mut rng);
        assert_eq!(sel.action, ActionKey::OFF);
    }

    #[test]
    fn test_anneal_respects_floor() {
        let config = LearningConfig {
            epsilon_start: 0.5,
            epsilon_min: 0.1,
            epsilon_decay: 0.5,
            ..LearningConfig::default()
        };
        let mut policy = EpsilonGreedy::new(&config);
        policy.anneal(&config);
        assert_eq!(policy.epsilon(), 0.25);
        policy.anneal(&config);
        policy.anneal(&config);
        assert_eq!(policy.epsilon(), 0.1);

        policy.reset(&config);
        assert_eq!(policy.epsilon(), 0.5);
    }

    #[test]
    fn test_with_epsilon_clamps() {
        let config = LearningConfig::default();
        assert_eq!(EpsilonGreedy::with_epsilon(5.0, &config).epsilon(), config.epsilon_start);
        assert_eq!(EpsilonGreedy::with_epsilon(0.0, &config).epsilon(), config.epsilon_min);
        assert_eq!(EpsilonGreedy::with_epsilon(f64::NAN, &config).epsilon(), config.epsilon_start);
    }
}
