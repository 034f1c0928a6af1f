//! In-place simplification passes over a [`Builder`].

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;

use crate::automaton::builder::Builder;
use crate::automaton::transition::NO_TRANSITION;
use crate::distribution::ElementDistribution;

impl<D: ElementDistribution> Builder<D> {
    /// Merges parallel transitions.
    ///
    /// For each state, live outgoing transitions are grouped by
    /// `(destination, group)`, with ε-transitions only merging with other
    /// ε-transitions. Each group collapses onto its first member: the
    /// weight becomes the sum of the members' weights, and the element
    /// distribution becomes the weighted mixture of their distributions.
    pub fn merge_parallel_transitions(&mut self) {
        for state in 0..self.states.len() {
            let mut groups: FxHashMap<(u32, u32, bool), usize> = FxHashMap::default();
            let mut cursor = self.states[state].first_transition;
            while cursor != NO_TRANSITION {
                let index = cursor as usize;
                let next = self.transitions[index].next;
                if !self.transitions[index].removed {
                    let key = {
                        let t = &self.transitions[index].transition;
                        (t.destination, t.group, t.is_epsilon())
                    };
                    match groups.entry(key) {
                        Entry::Occupied(entry) => {
                            let kept = *entry.get();
                            let kept_transition = &self.transitions[kept].transition;
                            let current_transition = &self.transitions[index].transition;
                            let merged_weight =
                                kept_transition.weight.sum(current_transition.weight);
                            let merged_distribution = match (
                                &kept_transition.distribution,
                                &current_transition.distribution,
                            ) {
                                (Some(a), Some(b)) => Some(D::weighted_sum(
                                    kept_transition.weight,
                                    a,
                                    current_transition.weight,
                                    b,
                                )),
                                _ => None,
                            };
                            let target = &mut self.transitions[kept].transition;
                            target.weight = merged_weight;
                            target.distribution = merged_distribution;
                            self.tombstone(index);
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(index);
                        }
                    }
                }
                cursor = next;
            }
        }
    }
}

impl<D> Builder<D> {
    /// Removes every state that cannot reach sufficient end weight.
    ///
    /// A state survives if some state with `end_weight.log > threshold` is
    /// reachable from it through live transitions (a state with such an end
    /// weight survives trivially). The rest are removed through
    /// [`Builder::remove_states`]; if the start state itself is removed the
    /// builder resets to zero.
    ///
    /// Returns the number of removed states.
    pub fn prune_states_with_log_end_weight_less_than(&mut self, threshold: f64) -> usize {
        let state_count = self.states.len();
        let mut reaches_end = vec![false; state_count];
        let mut stack: Vec<u32> = Vec::new();
        for (index, state) in self.states.iter().enumerate() {
            if state.end_weight.log_value() > threshold {
                reaches_end[index] = true;
                stack.push(index as u32);
            }
        }

        let mut incoming: Vec<Vec<u32>> = vec![Vec::new(); state_count];
        for state in 0..state_count as u32 {
            for (_, transition) in self.chain(state) {
                incoming[transition.destination as usize].push(state);
            }
        }
        while let Some(state) = stack.pop() {
            for &source in &incoming[state as usize] {
                if !reaches_end[source as usize] {
                    reaches_end[source as usize] = true;
                    stack.push(source);
                }
            }
        }
        self.remove_states(&reaches_end, false)
    }
}

#[cfg(test)]
mod tests {
    use crate::automaton::{Builder, StringAutomatonBuilder};
    use crate::distribution::{DiscreteChar, ElementDistribution};
    use crate::weight::Weight;

    #[test]
    fn test_merge_parallel_transitions() {
        let mut builder: StringAutomatonBuilder = Builder::zero();
        builder.add_states(1).unwrap();
        builder.state(1).set_end_weight(Weight::ONE);
        builder
            .state(0)
            .add_element_transition('a' as u32, Weight::from_value(0.25), Some(1), 0)
            .unwrap();
        builder
            .state(0)
            .add_element_transition('b' as u32, Weight::from_value(0.75), Some(1), 0)
            .unwrap();

        builder.merge_parallel_transitions();
        assert_eq!(builder.transition_count(), 1);

        let automaton = builder.finalize().unwrap();
        let merged = &automaton.transitions_of(0)[0];
        assert!((merged.weight.value() - 1.0).abs() < 1e-12);
        let distribution = merged.distribution.as_ref().unwrap();
        assert!((distribution.probability('a' as u32).value() - 0.25).abs() < 1e-12);
        assert!((distribution.probability('b' as u32).value() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_merge_keeps_distinct_destinations_apart() {
        let mut builder: StringAutomatonBuilder = Builder::zero();
        builder.add_states(2).unwrap();
        builder
            .state(0)
            .add_element_transition('a' as u32, Weight::ONE, Some(1), 0)
            .unwrap();
        builder
            .state(0)
            .add_element_transition('a' as u32, Weight::ONE, Some(2), 0)
            .unwrap();
        builder.merge_parallel_transitions();
        assert_eq!(builder.transition_count(), 2);
    }

    #[test]
    fn test_merge_separates_epsilon_from_element_transitions() {
        let mut builder: StringAutomatonBuilder = Builder::zero();
        builder.add_states(1).unwrap();
        builder
            .state(0)
            .add_element_transition('a' as u32, Weight::ONE, Some(1), 0)
            .unwrap();
        builder
            .state(0)
            .add_epsilon_transition(Weight::ONE, Some(1), 0)
            .unwrap();
        builder
            .state(0)
            .add_epsilon_transition(Weight::ONE, Some(1), 0)
            .unwrap();
        builder.merge_parallel_transitions();
        assert_eq!(builder.transition_count(), 2);
        let automaton = builder.finalize().unwrap();
        let epsilon = automaton
            .transitions_of(0)
            .iter()
            .find(|t| t.is_epsilon())
            .unwrap();
        assert!((epsilon.weight.value() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_prune_keeps_path_to_heavy_end() {
        let mut builder: StringAutomatonBuilder = Builder::zero();
        builder.add_states(3).unwrap();
        // 0 → 1 (end weight 1), 0 → 2 → 3 where 3 has negligible end weight.
        builder
            .state(0)
            .add_element_transition('a' as u32, Weight::ONE, Some(1), 0)
            .unwrap();
        builder.state(1).set_end_weight(Weight::ONE);
        builder
            .state(0)
            .add_element_transition('b' as u32, Weight::ONE, Some(2), 0)
            .unwrap();
        builder
            .state(2)
            .add_element_transition('c' as u32, Weight::ONE, Some(3), 0)
            .unwrap();
        builder
            .state(3)
            .set_end_weight(Weight::from_log_value(-100.0));

        let removed = builder.prune_states_with_log_end_weight_less_than(-50.0);
        assert_eq!(removed, 2);
        assert_eq!(builder.state_count(), 2);
        let automaton = builder.finalize().unwrap();
        assert_eq!(automaton.transitions().len(), 1);
        assert!(automaton.state(1).can_end());
    }

    #[test]
    fn test_prune_resets_builder_when_start_cannot_end() {
        let mut builder: StringAutomatonBuilder = Builder::zero();
        builder.add_states(1).unwrap();
        builder
            .state(0)
            .add_element_transition('a' as u32, Weight::ONE, Some(1), 0)
            .unwrap();
        let removed = builder.prune_states_with_log_end_weight_less_than(0.5);
        assert_eq!(removed, 2);
        assert_eq!(builder.state_count(), 1);
        assert_eq!(builder.transition_count(), 0);
    }
}
