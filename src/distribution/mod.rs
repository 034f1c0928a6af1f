//! Element distributions.
//!
//! An automaton is generic over the distribution type its transitions carry.
//! The [`ElementDistribution`] trait is the capability surface the automaton
//! core needs: point-mass construction, per-element probability lookup, and
//! the weighted mixture used when parallel transitions are merged.
//!
//! Distributions that additionally implement
//! [`DeterminizableDistribution`] can drive the weighted powerset
//! construction; the single hook they provide synthesizes the set of
//! disjoint outgoing distributions for a weighted set of source states.

use crate::automaton::{Automaton, WeightedStateSet};
use crate::weight::Weight;

pub mod discrete_char;

pub use discrete_char::{CharRange, DiscreteChar, RangeError, CHAR_UNIVERSE_END};

/// Capability surface required of a transition's element distribution.
pub trait ElementDistribution: Clone {
    /// The element type sequences are made of.
    type Element: Copy;

    /// The point-mass distribution concentrated on one element.
    fn point(element: Self::Element) -> Self;

    /// The probability this distribution assigns to an element.
    fn probability(&self, element: Self::Element) -> Weight;

    /// The weighted mixture `(w_a·a + w_b·b) / (w_a + w_b)`.
    ///
    /// Used when merging parallel transitions: the merged transition keeps
    /// the summed weight and carries the mixture of the members'
    /// distributions.
    fn weighted_sum(w_a: Weight, a: &Self, w_b: Weight, b: &Self) -> Self;
}

/// Element distributions that can drive determinization.
///
/// The determinizer is parameterized over the distribution through this one
/// hook: given a weighted set of source states of `automaton`, produce the
/// outgoing transitions of the corresponding determinized state as a list of
/// `(distribution, weight, destination set)` triples. The produced
/// distributions must be pairwise disjoint in support, and every destination
/// set must be normalized (maximum member weight [`Weight::ONE`]).
///
/// `log_eps` is the pruning threshold: contributions whose log weight does
/// not exceed it are dropped.
pub trait DeterminizableDistribution: ElementDistribution + Sized {
    /// Computes the outgoing transitions of the determinized state for
    /// `set`.
    fn outgoing_transitions_for_set(
        automaton: &Automaton<Self>,
        set: &WeightedStateSet,
        log_eps: f64,
    ) -> Vec<(Self, Weight, WeightedStateSet)>;
}
