//! Weighted powerset determinization.
//!
//! A state of the determinized automaton is a [`WeightedStateSet`]: an
//! ordered, deduplicated list of source states with normalized weights.
//! Sets are interned in a hash map so each is materialized as exactly one
//! output state; a work queue drives the construction in the usual subset
//! style, with the element distribution supplying the outgoing transitions
//! of each set through
//! [`DeterminizableDistribution::outgoing_transitions_for_set`].

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::automaton::builder::Builder;
use crate::automaton::transition::Transition;
use crate::automaton::{Automaton, DeterminizationState, MAX_STATES};
use crate::distribution::DeterminizableDistribution;
use crate::weight::Weight;

/// Default pruning threshold for determinization: contributions whose log
/// weight does not exceed this are dropped.
pub const DEFAULT_DETERMINIZATION_LOG_EPS: f64 = -35.0;

/// Log-value tolerance for weighted-state-set equality.
const WEIGHT_LOG_TOLERANCE: f64 = 1e-6;

/// One member of a [`WeightedStateSet`].
#[derive(Debug, Clone, Copy)]
pub struct WeightedState {
    /// Index of the source state.
    pub index: u32,
    /// The member's weight, normalized so the set's maximum is
    /// [`Weight::ONE`].
    pub weight: Weight,
}

/// An ordered, deduplicated set of weighted source states.
///
/// Equality compares index sequences exactly and weights with a log-value
/// tolerance of `1e-6`; the hash folds in only the high 32 bits of each log
/// value, so near-equal weights collide while grossly unequal ones do not.
#[derive(Debug, Clone, Default)]
pub struct WeightedStateSet {
    states: SmallVec<[WeightedState; 4]>,
}

impl WeightedStateSet {
    /// The set `{(index, One)}`.
    pub fn singleton(index: u32) -> WeightedStateSet {
        let mut states = SmallVec::new();
        states.push(WeightedState {
            index,
            weight: Weight::ONE,
        });
        WeightedStateSet { states }
    }

    /// The number of members.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The members, ascending by state index.
    pub fn as_slice(&self) -> &[WeightedState] {
        &self.states
    }
}

impl PartialEq for WeightedStateSet {
    fn eq(&self, other: &WeightedStateSet) -> bool {
        self.states.len() == other.states.len()
            && self.states.iter().zip(other.states.iter()).all(|(a, b)| {
                a.index == b.index
                    && (a.weight == b.weight
                        || (a.weight.log_value() - b.weight.log_value()).abs()
                            <= WEIGHT_LOG_TOLERANCE)
            })
    }
}

impl Eq for WeightedStateSet {}

impl Hash for WeightedStateSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for member in &self.states {
            state.write_u32(member.index);
            state.write_u32((member.weight.log_value().to_bits() >> 32) as u32);
        }
    }
}

/// Accumulates `(state, weight)` pairs into a normalized
/// [`WeightedStateSet`].
#[derive(Debug, Default)]
pub struct WeightedStateSetBuilder {
    states: SmallVec<[WeightedState; 4]>,
}

impl WeightedStateSetBuilder {
    /// A builder with no members.
    pub fn new() -> WeightedStateSetBuilder {
        WeightedStateSetBuilder::default()
    }

    /// Adds a member; duplicate indices have their weights summed by
    /// [`get`](WeightedStateSetBuilder::get).
    pub fn add(&mut self, index: u32, weight: Weight) {
        self.states.push(WeightedState { index, weight });
    }

    /// Sorts, deduplicates and normalizes the accumulated members.
    ///
    /// Returns the set together with the normalizer: the pre-normalization
    /// maximum weight, which after the division is exactly the weight the
    /// set's heaviest member gave up. An empty (or all-zero) accumulation
    /// yields an empty normalizer of [`Weight::ZERO`].
    pub fn get(mut self) -> (WeightedStateSet, Weight) {
        self.states.sort_unstable_by_key(|member| member.index);
        let mut merged: SmallVec<[WeightedState; 4]> = SmallVec::new();
        for member in self.states {
            match merged.last_mut() {
                Some(last) if last.index == member.index => {
                    last.weight = last.weight.sum(member.weight);
                }
                _ => merged.push(member),
            }
        }
        let maximum = merged
            .iter()
            .map(|member| member.weight)
            .fold(Weight::ZERO, |a, b| if b > a { b } else { a });
        let Ok(inverse) = maximum.inverse() else {
            return (WeightedStateSet { states: merged }, Weight::ZERO);
        };
        for member in merged.iter_mut() {
            member.weight = member.weight.product(inverse);
        }
        (WeightedStateSet { states: merged }, maximum)
    }
}

impl<D: DeterminizableDistribution> Automaton<D> {
    /// Determinizes with the per-automaton pruning threshold, or the
    /// default of [`DEFAULT_DETERMINIZATION_LOG_EPS`].
    ///
    /// See [`try_determinize_with`](Automaton::try_determinize_with).
    pub fn try_determinize(&mut self) -> bool {
        let log_eps = self
            .prune_threshold
            .unwrap_or(DEFAULT_DETERMINIZATION_LOG_EPS);
        self.try_determinize_with(log_eps)
    }

    /// Best-effort weighted powerset determinization.
    ///
    /// Preconditions and refusals:
    /// - a previous outcome is cached in the determinization state and
    ///   returned directly;
    /// - a non-ε-free automaton returns `false` unchanged (run
    ///   [`make_epsilon_free`](Automaton::make_epsilon_free) first);
    /// - an automaton using transition groups is marked non-determinizable
    ///   and returns `false`, since group tags cannot survive the powerset.
    ///
    /// The output may hold at most `min(3 · state_count, MAX_STATES)`
    /// states; exceeding the budget aborts, leaving the automaton
    /// observably unchanged and returning `false`. On success the automaton
    /// is reseated with the deterministic result, parallel transitions
    /// merged, and the determinization state set accordingly.
    pub fn try_determinize_with(&mut self, log_eps: f64) -> bool {
        match self.determinization_state {
            DeterminizationState::IsDeterminized => return true,
            DeterminizationState::IsNonDeterminizable => return false,
            DeterminizationState::Unknown => {}
        }
        if !self.is_epsilon_free {
            return false;
        }
        if self.uses_groups() {
            self.determinization_state = DeterminizationState::IsNonDeterminizable;
            return false;
        }

        let state_limit = MAX_STATES.min(3 * self.state_count());
        let mut builder: Builder<D> = Builder::zero();
        let mut set_to_state: FxHashMap<WeightedStateSet, u32> = FxHashMap::default();
        let mut queue: VecDeque<WeightedStateSet> = VecDeque::new();

        let start_set = WeightedStateSet::singleton(self.start_state);
        builder
            .state(0)
            .set_end_weight(self.end_weight_of_set(&start_set));
        set_to_state.insert(start_set.clone(), 0);
        queue.push_back(start_set);

        while let Some(set) = queue.pop_front() {
            let source = set_to_state[&set];
            let outgoing = match self.singleton_common_destination(&set) {
                Some(fast) => fast,
                None => D::outgoing_transitions_for_set(self, &set, log_eps),
            };
            for (distribution, weight, destination_set) in outgoing {
                let destination = match set_to_state.get(&destination_set) {
                    Some(&existing) => existing,
                    None => {
                        if builder.state_count() >= state_limit {
                            return false;
                        }
                        let end_weight = self.end_weight_of_set(&destination_set);
                        let Ok(mut new_state) = builder.add_state() else {
                            return false;
                        };
                        new_state.set_end_weight(end_weight);
                        let index = new_state.index();
                        queue.push_back(destination_set.clone());
                        set_to_state.insert(destination_set, index);
                        index
                    }
                };
                builder.add_transition_raw(
                    source,
                    Transition::new(Some(distribution), weight, destination, 0),
                );
            }
        }

        builder.merge_parallel_transitions();
        let Ok(result) = builder.finalize() else {
            return false;
        };
        self.reseat(result);
        self.determinization_state = DeterminizationState::IsDeterminized;
        true
    }

    /// Total end weight of a weighted state set.
    fn end_weight_of_set(&self, set: &WeightedStateSet) -> Weight {
        set.as_slice()
            .iter()
            .map(|member| {
                member
                    .weight
                    .product(self.states[member.index as usize].end_weight)
            })
            .sum()
    }

    /// Fast path: a singleton set whose every outgoing transition shares
    /// one destination maps to per-transition outputs verbatim.
    fn singleton_common_destination(
        &self,
        set: &WeightedStateSet,
    ) -> Option<Vec<(D, Weight, WeightedStateSet)>> {
        if set.len() != 1 {
            return None;
        }
        let transitions = self.transitions_of(set.as_slice()[0].index);
        let first = match transitions.first() {
            Some(first) => first,
            None => return Some(Vec::new()),
        };
        if transitions
            .iter()
            .any(|t| t.destination != first.destination)
        {
            return None;
        }
        Some(
            transitions
                .iter()
                .filter_map(|t| {
                    t.distribution.clone().map(|distribution| {
                        (
                            distribution,
                            t.weight,
                            WeightedStateSet::singleton(t.destination),
                        )
                    })
                })
                .collect(),
        )
    }
}
