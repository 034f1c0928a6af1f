//! Transition and per-state records.

use crate::weight::Weight;

/// Sentinel for "no transition" in the builder's linked chains.
pub(crate) const NO_TRANSITION: i32 = -1;

/// A labeled, weighted edge between two states.
///
/// `destination` is a weak back-reference: it may point at any state of the
/// same automaton, including the transition's own source, so arbitrary
/// cycles are representable without ownership hazards.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<D> {
    /// The element distribution consumed by this transition; `None` marks
    /// an ε-transition, which contributes weight without consuming input.
    pub distribution: Option<D>,
    /// The transition weight.
    pub weight: Weight,
    /// Index of the destination state.
    pub destination: u32,
    /// Group tag; `0` means ungrouped.
    pub group: u32,
}

impl<D> Transition<D> {
    /// Creates a transition with an explicit distribution.
    pub fn new(distribution: Option<D>, weight: Weight, destination: u32, group: u32) -> Self {
        Transition {
            distribution,
            weight,
            destination,
            group,
        }
    }

    /// Creates an ε-transition.
    pub fn epsilon(weight: Weight, destination: u32, group: u32) -> Self {
        Transition {
            distribution: None,
            weight,
            destination,
            group,
        }
    }

    /// True if this is an ε-transition.
    #[inline]
    pub fn is_epsilon(&self) -> bool {
        self.distribution.is_none()
    }
}

/// Per-state record.
///
/// Inside a [`Builder`](crate::automaton::Builder), `first_transition` and
/// `last_transition` are the head and tail of the state's singly-linked
/// transition chain (`-1` when the state has none). After finalization they
/// are reinterpreted as the half-open range `[first, last)` into the flat
/// transition array.
#[derive(Debug, Clone, Copy)]
pub struct StateData {
    pub(crate) first_transition: i32,
    pub(crate) last_transition: i32,
    pub(crate) end_weight: Weight,
}

impl StateData {
    /// A fresh state: no transitions, end weight zero.
    pub(crate) fn new() -> StateData {
        StateData {
            first_transition: NO_TRANSITION,
            last_transition: NO_TRANSITION,
            end_weight: Weight::ZERO,
        }
    }

    /// A finalized state addressing `[first, last)` of the flat transition
    /// array.
    pub(crate) fn from_range(
        first_transition: i32,
        last_transition: i32,
        end_weight: Weight,
    ) -> StateData {
        StateData {
            first_transition,
            last_transition,
            end_weight,
        }
    }

    /// The weight with which sequences may end in this state.
    #[inline]
    pub fn end_weight(&self) -> Weight {
        self.end_weight
    }

    /// True if the end weight is non-zero.
    #[inline]
    pub fn can_end(&self) -> bool {
        !self.end_weight.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_has_no_transitions() {
        let state = StateData::new();
        assert_eq!(state.first_transition, NO_TRANSITION);
        assert_eq!(state.last_transition, NO_TRANSITION);
        assert!(!state.can_end());
    }

    #[test]
    fn test_epsilon_constructor() {
        let t: Transition<()> = Transition::epsilon(Weight::ONE, 3, 0);
        assert!(t.is_epsilon());
        assert_eq!(t.destination, 3);
    }
}
