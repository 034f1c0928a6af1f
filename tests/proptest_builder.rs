//! Property-based tests for builder compaction and state removal.

use libwfsa::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct RandomAutomaton {
    state_count: usize,
    /// `(source, destination, element, remove)` per transition.
    transitions: Vec<(u32, u32, u32, bool)>,
    end_states: Vec<u32>,
}

fn random_automaton() -> impl Strategy<Value = RandomAutomaton> {
    (2usize..8).prop_flat_map(|state_count| {
        let n = state_count as u32;
        let transition = (0..n, 0..n, 'a' as u32..'z' as u32, any::<bool>());
        (
            Just(state_count),
            proptest::collection::vec(transition, 0..20),
            proptest::collection::vec(0..n, 0..3),
        )
            .prop_map(|(state_count, transitions, end_states)| RandomAutomaton {
                state_count,
                transitions,
                end_states,
            })
    })
}

fn build(description: &RandomAutomaton) -> StringAutomatonBuilder {
    let mut builder: StringAutomatonBuilder = Builder::zero();
    builder.add_states(description.state_count - 1).unwrap();
    for &end_state in &description.end_states {
        builder.state(end_state).set_end_weight(Weight::ONE);
    }
    let mut removals: Vec<(u32, usize)> = Vec::new();
    for &(source, destination, element, remove) in &description.transitions {
        builder
            .state(source)
            .add_element_transition(element, Weight::ONE, Some(destination), 0)
            .unwrap();
        if remove {
            // Position within the source state's chain, counted live.
            let position = builder
                .finalize()
                .unwrap()
                .transitions_of(source)
                .len()
                .saturating_sub(1);
            removals.push((source, position));
        }
    }
    for &(source, position) in removals.iter().rev() {
        let mut state = builder.state(source);
        let mut cursor = state.transitions();
        for _ in 0..=position {
            assert!(cursor.advance());
        }
        cursor.remove();
    }
    builder
}

/// Live transitions per state, in chain order, as `(destination, element)`.
fn live_transitions(automaton: &StringAutomaton) -> Vec<Vec<(u32, u32)>> {
    (0..automaton.state_count() as u32)
        .map(|state| {
            automaton
                .transitions_of(state)
                .iter()
                .map(|t| {
                    (
                        t.destination,
                        t.distribution.as_ref().unwrap().ranges()[0].start,
                    )
                })
                .collect()
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn finalization_is_contiguous_and_ordered(description in random_automaton()) {
        let builder = build(&description);
        let automaton = builder.finalize().unwrap();

        prop_assert_eq!(automaton.state_count(), description.state_count);
        prop_assert!(automaton.check_consistency().is_ok());

        // State ranges partition the flat array in order.
        let mut covered = 0usize;
        for state in 0..automaton.state_count() as u32 {
            let transitions = automaton.transitions_of(state);
            prop_assert_eq!(
                transitions.as_ptr() as usize,
                automaton.transitions()[covered..].as_ptr() as usize
            );
            covered += transitions.len();
        }
        prop_assert_eq!(covered, automaton.transitions().len());

        // Finalizing twice yields the same content.
        let again = builder.finalize().unwrap();
        prop_assert_eq!(live_transitions(&automaton), live_transitions(&again));
    }

    #[test]
    fn from_automaton_preserves_content(description in random_automaton()) {
        let automaton = build(&description).finalize().unwrap();
        let copied = Builder::from_automaton(&automaton).finalize().unwrap();
        prop_assert_eq!(live_transitions(&automaton), live_transitions(&copied));
        prop_assert_eq!(copied.start_state_index(), automaton.start_state_index());
        for state in 0..automaton.state_count() as u32 {
            prop_assert_eq!(
                copied.state(state).end_weight(),
                automaton.state(state).end_weight()
            );
        }
    }

    #[test]
    fn remove_state_remaps_destinations(description in random_automaton(), victim_seed in any::<u32>()) {
        let mut builder = build(&description);
        let victim = victim_seed % builder.state_count() as u32;
        prop_assume!(victim != builder.start_state_index());

        let before = live_transitions(&builder.finalize().unwrap());
        builder.remove_state(victim);
        let after_automaton = builder.finalize().unwrap();
        let after = live_transitions(&after_automaton);

        prop_assert_eq!(after.len(), before.len() - 1);
        for (old_source, transitions) in before.iter().enumerate() {
            if old_source as u32 == victim {
                continue;
            }
            let new_source = if (old_source as u32) < victim {
                old_source
            } else {
                old_source - 1
            };
            let expected: Vec<(u32, u32)> = transitions
                .iter()
                .filter(|(destination, _)| *destination != victim)
                .map(|&(destination, element)| {
                    let destination = if destination > victim {
                        destination - 1
                    } else {
                        destination
                    };
                    (destination, element)
                })
                .collect();
            prop_assert_eq!(&after[new_source], &expected, "source {}", old_source);
        }
    }

    #[test]
    fn remove_states_matches_reference_mapping(description in random_automaton(), labels in proptest::collection::vec(any::<bool>(), 8)) {
        let mut builder = build(&description);
        let labels = &labels[..builder.state_count()];
        let before = live_transitions(&builder.finalize().unwrap());
        let start_before = builder.start_state_index();

        let removed = builder.remove_states(labels, true);
        prop_assert_eq!(removed, labels.iter().filter(|&&l| l).count());

        if labels[start_before as usize] {
            // Start removed: reset to the zero automaton.
            prop_assert_eq!(builder.state_count(), 1);
            prop_assert_eq!(builder.transition_count(), 0);
            return Ok(());
        }

        let mut mapping = vec![None; labels.len()];
        let mut next = 0u32;
        for (old, &removed) in labels.iter().enumerate() {
            if !removed {
                mapping[old] = Some(next);
                next += 1;
            }
        }
        let after = live_transitions(&builder.finalize().unwrap());
        for (old_source, transitions) in before.iter().enumerate() {
            let Some(new_source) = mapping[old_source] else {
                continue;
            };
            let expected: Vec<(u32, u32)> = transitions
                .iter()
                .filter_map(|&(destination, element)| {
                    mapping[destination as usize].map(|d| (d, element))
                })
                .collect();
            prop_assert_eq!(&after[new_source as usize], &expected);
        }
    }
}
