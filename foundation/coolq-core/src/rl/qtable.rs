//! Tabular action-value store.
//!
//! Two-level ordered map `StateKey → ActionKey → Q`. Only visited pairs are
//! stored; unseen pairs read as the configured initial value (0.0 unless the
//! operator opts into optimistic initialization). Ordered maps give a stable
//! JSON layout, so two persisted tables diff cleanly.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::rl::action_space::ActionKey;
use crate::rl::state_encoder::StateKey;

pub type QRow = BTreeMap<ActionKey, f64>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QTable {
    /// Q-values, serialized directly as an object of objects
    values: BTreeMap<StateKey, QRow>,

    /// Value of unseen pairs and of the max over an empty row
    #[serde(skip)]
    initial_value: f64,

    /// Update counts per pair (not persisted)
    #[serde(skip)]
    visit_counts: HashMap<(StateKey, ActionKey), usize>,
}

impl QTable {
    pub fn new(initial_value: f64) -> Self {
        Self {
            values: BTreeMap::new(),
            initial_value,
            visit_counts: HashMap::new(),
        }
    }

    /// Rebuild from a persisted mapping.
    pub fn from_values(values: BTreeMap<StateKey, QRow>, initial_value: f64) -> Self {
        let mut table = Self::new(initial_value);
        for (state, row) in values {
            let row: QRow = row.into_iter().filter(|(_, q)| q.is_finite()).collect();
            if !row.is_empty() {
                table.values.insert(state, row);
            }
        }
        table
    }

    pub fn values(&self) -> &BTreeMap<StateKey, QRow> {
        &self.values
    }

    pub fn initial_value(&self) -> f64 {
        self.initial_value
    }

    pub fn set_initial_value(&mut self, initial_value: f64) {
        self.initial_value = initial_value;
    }

    pub fn get(&self, state: &StateKey, action: &ActionKey) -> f64 {
        self.values
            .get(state)
            .and_then(|row| row.get(action))
            .copied()
            .unwrap_or(self.initial_value)
    }

    pub fn set(&mut self, state: StateKey, action: ActionKey, value: f64) {
        self.values.entry(state).or_default().insert(action, value);
        *self.visit_counts.entry((state, action)).or_insert(0) += 1;
    }

    /// max_a Q(s, a) over stored entries; the initial value for an empty row.
    pub fn max_q_value(&self, state: &StateKey) -> f64 {
        self.values
            .get(state)
            .and_then(|row| row.values().copied().reduce(f64::max))
            .unwrap_or(self.initial_value)
    }

    /// One-step Q-learning:
    ///
    /// Q(s,a) ← (1-α)·Q(s,a) + α·(r + γ·max_a' Q(s',a'))
    ///
    /// Returns `(q_old, q_new)`. A non-finite result leaves the table
    /// untouched and returns `None`.
    pub fn update(
        &mut self,
        state: StateKey,
        action: ActionKey,
        reward: f64,
        next_state: &StateKey,
        alpha: f64,
        gamma: f64,
    ) -> Option<(f64, f64)> {
        let q_old = self.get(&state, &action);
        let max_next = self.max_q_value(next_state);
        let q_new = (1.0 - alpha) * q_old + alpha * (reward + gamma * max_next);

        if !q_new.is_finite() {
            log::error!(
                "rejected non-finite Q-update for {} / {} (reward={}, alpha={}, gamma={})",
                state, action, reward, alpha, gamma
            );
            return None;
        }

        self.set(state, action, q_new);
        Some((q_old, q_new))
    }

    /// Highest-valued action among `allowed` for `state`
    pub fn best_action(&self, state: &StateKey, allowed: &[ActionKey]) -> Option<ActionKey> {
        allowed
            .iter()
            .copied()
            .map(|a| (a, self.get(state, &a)))
            .max_by(|(_, qa), (_, qb)| qa.partial_cmp(qb).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(a, _)| a)
    }

    /// Best stored action per visited state, for export.
    pub fn greedy_policy(&self) -> BTreeMap<StateKey, (ActionKey, f64)> {
        self.values
            .iter()
            .filter_map(|(state, row)| {
                row.iter()
                    .max_by(|(_, qa), (_, qb)| {
                        qa.partial_cmp(qb).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(a, q)| (*state, (*a, *q)))
            })
            .collect()
    }

    pub fn visit_count(&self, state: &StateKey, action: &ActionKey) -> usize {
        self.visit_counts.get(&(*state, *action)).copied().unwrap_or(0)
    }

    /// Number of stored state-action pairs
    pub fn num_visited(&self) -> usize {
        self.values.values().map(|row| row.len()).sum()
    }

    pub fn num_states(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.visit_counts.clear();
    }
}
