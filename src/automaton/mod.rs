//! Weighted finite-state automata.
//!
//! The module is split between the immutable, finalized representation
//! ([`Automaton`]) and the mutable construction surface ([`Builder`]). A
//! finalized automaton stores its states and transitions in flat parallel
//! arrays; each state addresses its outgoing transitions through a
//! contiguous half-open range, which is the only layout readers see.
//! Builders instead thread transitions through per-state linked chains in a
//! shared pool so that edits never move existing entries.

use rustc_hash::FxHashMap;
use thiserror::Error;

pub(crate) mod builder;
mod char_sweep;
mod determinize;
mod simplify;
mod transition;

pub use builder::{Builder, StateBuilder, TransitionIterator};
pub use determinize::{
    WeightedState, WeightedStateSet, WeightedStateSetBuilder, DEFAULT_DETERMINIZATION_LOG_EPS,
};
pub use transition::{StateData, Transition};

use crate::distribution::{DiscreteChar, ElementDistribution};
use crate::weight::Weight;

/// Hard cap on the number of states a builder (and hence an automaton) may
/// hold.
pub const MAX_STATES: usize = 50_000;

/// An automaton over character sequences.
pub type StringAutomaton = Automaton<DiscreteChar>;

/// A builder for automata over character sequences.
pub type StringAutomatonBuilder = Builder<DiscreteChar>;

/// Error type for automaton construction and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AutomatonError {
    /// A builder operation would exceed [`MAX_STATES`].
    #[error("automaton too large: {requested} states exceeds the limit of {max}")]
    TooLarge {
        /// The state count the operation asked for.
        requested: usize,
        /// The configured cap.
        max: usize,
    },
    /// The start state index is out of range.
    #[error("start state {start} out of range for {state_count} states")]
    InvalidStart {
        /// The offending start index.
        start: u32,
        /// The number of states available.
        state_count: usize,
    },
    /// A state's transition range or a transition's destination is out of
    /// range.
    #[error("automaton indices out of range: {reason}")]
    IndicesOutOfRange {
        /// Which structural invariant was violated.
        reason: &'static str,
    },
}

/// What is known about an automaton's determinism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeterminizationState {
    /// Nothing established yet.
    #[default]
    Unknown,
    /// A successful determinization pass produced this automaton.
    IsDeterminized,
    /// Determinization was refused or aborted and will not succeed.
    IsNonDeterminizable,
}

/// A finalized, immutable weighted automaton.
///
/// Logically read-only after finalization; safe to share by reference
/// across threads. The determinizer installs a new backing store through a
/// single internal reseat, so readers never observe a half-updated
/// automaton.
#[derive(Debug, Clone)]
pub struct Automaton<D> {
    pub(crate) states: Vec<StateData>,
    pub(crate) transitions: Vec<Transition<D>>,
    pub(crate) start_state: u32,
    pub(crate) is_epsilon_free: bool,
    pub(crate) determinization_state: DeterminizationState,
    pub(crate) prune_threshold: Option<f64>,
    pub(crate) log_value_override: Option<f64>,
}

/// Read-only handle on one state of an [`Automaton`].
pub struct StateRef<'a, D> {
    automaton: &'a Automaton<D>,
    index: u32,
}

impl<D> Clone for StateRef<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for StateRef<'_, D> {}

impl<'a, D> StateRef<'a, D> {
    /// This state's index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The weight with which sequences may end here.
    pub fn end_weight(&self) -> Weight {
        self.automaton.states[self.index as usize].end_weight
    }

    /// True if the end weight is non-zero.
    pub fn can_end(&self) -> bool {
        self.automaton.states[self.index as usize].can_end()
    }

    /// The state's outgoing transitions as a contiguous slice.
    pub fn transitions(&self) -> &'a [Transition<D>] {
        self.automaton.transitions_of(self.index)
    }
}

impl<D> Automaton<D> {
    pub(crate) fn from_finalized(
        states: Vec<StateData>,
        transitions: Vec<Transition<D>>,
        start_state: u32,
        is_epsilon_free: bool,
    ) -> Automaton<D> {
        Automaton {
            states,
            transitions,
            start_state,
            is_epsilon_free,
            determinization_state: DeterminizationState::Unknown,
            prune_threshold: None,
            log_value_override: None,
        }
    }

    /// Assembles an automaton from raw parts, validating consistency.
    ///
    /// # Errors
    ///
    /// Returns the first structural violation found, as from
    /// [`Automaton::check_consistency`].
    pub(crate) fn from_parts(
        states: Vec<StateData>,
        transitions: Vec<Transition<D>>,
        start_state: u32,
        is_epsilon_free: bool,
    ) -> Result<Automaton<D>, AutomatonError> {
        let automaton = Automaton::from_finalized(states, transitions, start_state, is_epsilon_free);
        automaton.check_consistency()?;
        Ok(automaton)
    }

    /// The number of states.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// The read-only handle for the state at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn state(&self, index: u32) -> StateRef<'_, D> {
        assert!(
            (index as usize) < self.states.len(),
            "state index {index} out of range"
        );
        StateRef {
            automaton: self,
            index,
        }
    }

    /// Iterates over all states.
    pub fn states(&self) -> impl Iterator<Item = StateRef<'_, D>> {
        (0..self.states.len() as u32).map(move |index| StateRef {
            automaton: self,
            index,
        })
    }

    /// The flat transition array.
    pub fn transitions(&self) -> &[Transition<D>] {
        &self.transitions
    }

    /// The outgoing transitions of the state at `index`.
    pub fn transitions_of(&self, index: u32) -> &[Transition<D>] {
        let state = &self.states[index as usize];
        &self.transitions[state.first_transition as usize..state.last_transition as usize]
    }

    /// The start state index.
    pub fn start_state_index(&self) -> u32 {
        self.start_state
    }

    /// True if no transition is an ε-transition.
    pub fn is_epsilon_free(&self) -> bool {
        self.is_epsilon_free
    }

    /// True if any transition carries a non-zero group tag.
    pub fn uses_groups(&self) -> bool {
        self.transitions.iter().any(|t| t.group != 0)
    }

    /// What is known about this automaton's determinism.
    pub fn determinization_state(&self) -> DeterminizationState {
        self.determinization_state
    }

    /// The per-automaton pruning threshold override, if any.
    pub fn prune_threshold(&self) -> Option<f64> {
        self.prune_threshold
    }

    /// Sets the per-automaton pruning threshold used by
    /// [`try_determinize`](Automaton::try_determinize).
    pub fn set_prune_threshold(&mut self, threshold: Option<f64>) {
        self.prune_threshold = threshold;
    }

    /// The log-value override, if any.
    pub fn log_value_override(&self) -> Option<f64> {
        self.log_value_override
    }

    /// Sets the log-value override returned by
    /// [`log_value`](Automaton::log_value) for accepted sequences.
    pub fn set_log_value_override(&mut self, log_value: Option<f64>) {
        self.log_value_override = log_value;
    }

    /// Verifies the structural invariants of the flat layout.
    ///
    /// # Errors
    ///
    /// - [`AutomatonError::InvalidStart`] if the start index is out of
    ///   range.
    /// - [`AutomatonError::IndicesOutOfRange`] if any state's transition
    ///   range or any transition's destination is out of range.
    pub fn check_consistency(&self) -> Result<(), AutomatonError> {
        if self.start_state as usize >= self.states.len() {
            return Err(AutomatonError::InvalidStart {
                start: self.start_state,
                state_count: self.states.len(),
            });
        }
        let transition_count = self.transitions.len() as i32;
        for state in &self.states {
            if state.first_transition < 0
                || state.last_transition < state.first_transition
                || state.last_transition > transition_count
            {
                return Err(AutomatonError::IndicesOutOfRange {
                    reason: "state transition range",
                });
            }
        }
        for transition in &self.transitions {
            if transition.destination as usize >= self.states.len() {
                return Err(AutomatonError::IndicesOutOfRange {
                    reason: "transition destination",
                });
            }
        }
        Ok(())
    }

    /// Installs a new backing store, keeping the caller-facing metadata.
    pub(crate) fn reseat(&mut self, other: Automaton<D>) {
        self.states = other.states;
        self.transitions = other.transitions;
        self.start_state = other.start_state;
        self.is_epsilon_free = other.is_epsilon_free;
    }
}

impl<D: ElementDistribution> Automaton<D> {
    /// The total weight of all accepting paths for `sequence`.
    ///
    /// Computed as a forward pass over weighted state sets, taking the
    /// ε-closure after every consumed element. When a log-value override is
    /// set, it replaces the computed value for every sequence the automaton
    /// accepts with non-zero weight.
    pub fn log_value(&self, sequence: &[D::Element]) -> Weight {
        let mut current: FxHashMap<u32, Weight> = FxHashMap::default();
        current.insert(self.start_state, Weight::ONE);
        current = self.epsilon_closure(current);
        for &element in sequence {
            let mut next: FxHashMap<u32, Weight> = FxHashMap::default();
            for (&state, &weight) in &current {
                for transition in self.transitions_of(state) {
                    let Some(distribution) = &transition.distribution else {
                        continue;
                    };
                    let mass = weight
                        .product(transition.weight)
                        .product(distribution.probability(element));
                    if mass.is_zero() {
                        continue;
                    }
                    let entry = next.entry(transition.destination).or_insert(Weight::ZERO);
                    *entry = entry.sum(mass);
                }
            }
            if next.is_empty() {
                return Weight::ZERO;
            }
            current = self.epsilon_closure(next);
        }
        let total: Weight = current
            .iter()
            .map(|(&state, &weight)| weight.product(self.states[state as usize].end_weight))
            .sum();
        if let Some(log_override) = self.log_value_override {
            if !total.is_zero() {
                return Weight::from_log_value(log_override);
            }
        }
        total
    }

    /// Weighted ε-closure of a state-to-weight map.
    ///
    /// Mass is propagated breadth-first by path length, bounded by the
    /// state count; ε-cycles therefore contribute only paths up to that
    /// length rather than their closed-form series.
    fn epsilon_closure(&self, seed: FxHashMap<u32, Weight>) -> FxHashMap<u32, Weight> {
        if self.is_epsilon_free {
            return seed;
        }
        let mut closed = seed.clone();
        let mut frontier = seed;
        for _ in 0..self.states.len() {
            let mut next: FxHashMap<u32, Weight> = FxHashMap::default();
            for (&state, &weight) in &frontier {
                for transition in self.transitions_of(state) {
                    if !transition.is_epsilon() {
                        continue;
                    }
                    let mass = weight.product(transition.weight);
                    if mass.is_zero() {
                        continue;
                    }
                    let entry = next.entry(transition.destination).or_insert(Weight::ZERO);
                    *entry = entry.sum(mass);
                }
            }
            if next.is_empty() {
                break;
            }
            for (&state, &weight) in &next {
                let entry = closed.entry(state).or_insert(Weight::ZERO);
                *entry = entry.sum(weight);
            }
            frontier = next;
        }
        closed
    }
}

impl<D: ElementDistribution + Clone> Automaton<D> {
    /// Rewrites the automaton without ε-transitions.
    ///
    /// Every state absorbs its weighted ε-closure: closure end weights fold
    /// into the state's end weight, and each closure member's non-ε
    /// transitions are copied over with the closure weight multiplied in.
    /// Parallel duplicates produced by the fold are merged. Exact for
    /// automata whose ε-subgraph is acyclic; see
    /// [`epsilon_closure`](Automaton::log_value) for the cycle bound.
    pub fn make_epsilon_free(&mut self) {
        if self.is_epsilon_free {
            return;
        }
        let mut builder: Builder<D> = Builder {
            states: vec![StateData::new(); self.states.len()],
            transitions: Vec::with_capacity(self.transitions.len()),
            removed_count: 0,
            start_state: self.start_state,
        };
        for index in 0..self.states.len() as u32 {
            let mut seed = FxHashMap::default();
            seed.insert(index, Weight::ONE);
            let mut closure: Vec<(u32, Weight)> =
                self.epsilon_closure(seed).into_iter().collect();
            closure.sort_unstable_by_key(|&(state, _)| state);

            let end_weight: Weight = closure
                .iter()
                .map(|&(state, weight)| weight.product(self.states[state as usize].end_weight))
                .sum();
            builder.states[index as usize].end_weight = end_weight;

            for &(member, weight) in &closure {
                for transition in self.transitions_of(member) {
                    if transition.is_epsilon() {
                        continue;
                    }
                    let mut transition = transition.clone();
                    transition.weight = weight.product(transition.weight);
                    builder.add_transition_raw(index, transition);
                }
            }
        }
        builder.merge_parallel_transitions();
        let Ok(result) = builder.finalize() else {
            return;
        };
        self.reseat(result);
        self.determinization_state = DeterminizationState::Unknown;
    }
}
