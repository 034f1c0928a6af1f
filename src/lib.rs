//! # libwfsa
//!
//! Weighted finite-state automata over sequences of elements drawn from an
//! element-distribution type.
//!
//! An automaton is a directed multigraph of states. Each state carries an
//! *end weight* (non-zero means the state can end a sequence), and each
//! transition carries a weight, an optional element distribution (absent
//! means an ε-transition), and a group tag. Weights live in log space and
//! are combined with the numerically careful operations of [`weight::Weight`].
//!
//! Construction goes through [`automaton::Builder`], which owns an
//! append-only state vector and a pool of singly-linked transitions with
//! logical removal, so transition indices stay stable while an automaton is
//! being rewritten in place. [`automaton::Builder::finalize`] compacts the
//! pool into the flat, read-only [`automaton::Automaton`] representation.
//!
//! Non-deterministic automata can be converted to deterministic ones with
//! [`automaton::Automaton::try_determinize`], a weighted powerset
//! construction parameterized over the element distribution. The bundled
//! [`distribution::DiscreteChar`] distribution — a weighted union of
//! half-open character ranges plus a background *common value* — implements
//! the determinization hook with a line-sweep over range endpoints, giving
//! the *string automaton* specialization.
//!
//! ## Example
//!
//! ```rust,ignore
//! use libwfsa::prelude::*;
//!
//! let builder = StringAutomatonBuilder::constant_on(
//!     Weight::ONE,
//!     "abc".chars().map(|c| c as u32),
//! )?;
//! let automaton = builder.finalize()?;
//! assert_eq!(
//!     automaton.log_value(&['a' as u32, 'b' as u32, 'c' as u32]),
//!     Weight::ONE,
//! );
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod automaton;
pub mod distribution;
pub mod serialization;
pub mod weight;

/// Common imports for convenient usage
pub mod prelude {
    pub use crate::automaton::{
        Automaton, Builder, DeterminizationState, StateBuilder, StringAutomaton,
        StringAutomatonBuilder, Transition, MAX_STATES,
    };
    pub use crate::distribution::{DiscreteChar, ElementDistribution};
    pub use crate::weight::Weight;
}
