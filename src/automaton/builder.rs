//! Mutable construction surface for automata.
//!
//! A [`Builder`] owns an append-only vector of states and a pool of
//! transitions threaded into per-state singly-linked chains. Removal is
//! logical: a removed transition keeps its pool slot (a *tombstone*), so
//! transition indices held elsewhere stay valid until finalization. The
//! [`Builder::finalize`] pass compacts live transitions into the flat
//! arrays of an immutable [`Automaton`].

use crate::automaton::transition::{StateData, Transition, NO_TRANSITION};
use crate::automaton::{Automaton, AutomatonError, MAX_STATES};
use crate::distribution::ElementDistribution;
use crate::weight::Weight;

/// A pooled transition: the payload plus its chain link and tombstone flag.
#[derive(Debug, Clone)]
pub(crate) struct LinkedTransition<D> {
    pub(crate) transition: Transition<D>,
    pub(crate) next: i32,
    pub(crate) removed: bool,
}

/// Mutable builder for weighted automata.
///
/// A builder always contains at least one state; [`Builder::zero`] starts
/// from a single transition-less state with end weight zero. States are
/// addressed by index through [`Builder::state`], which returns the
/// [`StateBuilder`] façade.
#[derive(Debug, Clone)]
pub struct Builder<D> {
    pub(crate) states: Vec<StateData>,
    pub(crate) transitions: Vec<LinkedTransition<D>>,
    pub(crate) removed_count: usize,
    pub(crate) start_state: u32,
}

impl<D> Builder<D> {
    /// A builder for the zero automaton: one state, no transitions, end
    /// weight zero.
    pub fn zero() -> Builder<D> {
        Builder {
            states: vec![StateData::new()],
            transitions: Vec::new(),
            removed_count: 0,
            start_state: 0,
        }
    }

    /// The number of states.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// The number of live (non-tombstoned) transitions.
    pub fn transition_count(&self) -> usize {
        self.transitions.len() - self.removed_count
    }

    /// The current start state index.
    pub fn start_state_index(&self) -> u32 {
        self.start_state
    }

    /// Sets the start state index. The index is validated at finalization.
    pub fn set_start_state(&mut self, index: u32) {
        self.start_state = index;
    }

    /// The façade for the start state.
    pub fn start(&mut self) -> StateBuilder<'_, D> {
        let index = self.start_state;
        StateBuilder {
            builder: self,
            index,
        }
    }

    /// The façade for the state at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn state(&mut self, index: u32) -> StateBuilder<'_, D> {
        assert!(
            (index as usize) < self.states.len(),
            "state index {index} out of range"
        );
        StateBuilder {
            builder: self,
            index,
        }
    }

    /// Appends a fresh state with end weight zero.
    ///
    /// # Errors
    ///
    /// Fails with [`AutomatonError::TooLarge`] if the builder already holds
    /// [`MAX_STATES`] states.
    pub fn add_state(&mut self) -> Result<StateBuilder<'_, D>, AutomatonError> {
        if self.states.len() >= MAX_STATES {
            return Err(AutomatonError::TooLarge {
                requested: self.states.len() + 1,
                max: MAX_STATES,
            });
        }
        self.states.push(StateData::new());
        let index = (self.states.len() - 1) as u32;
        Ok(StateBuilder {
            builder: self,
            index,
        })
    }

    /// Appends `count` fresh states.
    ///
    /// # Errors
    ///
    /// Fails with [`AutomatonError::TooLarge`] if the result would exceed
    /// [`MAX_STATES`]; no state is added in that case.
    pub fn add_states(&mut self, count: usize) -> Result<(), AutomatonError> {
        let requested = self.states.len() + count;
        if requested > MAX_STATES {
            return Err(AutomatonError::TooLarge {
                requested,
                max: MAX_STATES,
            });
        }
        self.states
            .extend(std::iter::repeat_with(StateData::new).take(count));
        Ok(())
    }

    /// Walks the live transitions of `state` read-only.
    pub(crate) fn chain(&self, state: u32) -> ChainIter<'_, D> {
        ChainIter {
            transitions: &self.transitions,
            cursor: self.states[state as usize].first_transition,
        }
    }

    pub(crate) fn has_live_transitions(&self, state: u32) -> bool {
        self.chain(state).next().is_some()
    }

    /// Appends a transition to `source`'s chain and returns its pool index.
    ///
    /// The chain update is the canonical sequence: patch the tail's link if
    /// a tail exists, otherwise set the head; then the new transition
    /// becomes the tail.
    pub(crate) fn add_transition_raw(&mut self, source: u32, transition: Transition<D>) -> usize {
        debug_assert!((transition.destination as usize) < self.states.len());
        let index = self.transitions.len();
        self.transitions.push(LinkedTransition {
            transition,
            next: NO_TRANSITION,
            removed: false,
        });
        let state = &mut self.states[source as usize];
        if state.last_transition != NO_TRANSITION {
            self.transitions[state.last_transition as usize].next = index as i32;
        } else {
            state.first_transition = index as i32;
        }
        state.last_transition = index as i32;
        index
    }

    pub(crate) fn tombstone(&mut self, index: usize) {
        let entry = &mut self.transitions[index];
        debug_assert!(!entry.removed, "transition removed twice");
        if !entry.removed {
            entry.removed = true;
            self.removed_count += 1;
        }
    }

    /// Removes the state at `index` physically.
    ///
    /// Outgoing transitions of the removed state are tombstoned; surviving
    /// transitions pointing at it are tombstoned too, and destinations
    /// greater than `index` are decremented. The start index is *not*
    /// adjusted — the caller must keep it valid.
    pub fn remove_state(&mut self, index: u32) {
        assert!(
            (index as usize) < self.states.len(),
            "state index {index} out of range"
        );
        let mut cursor = self.states[index as usize].first_transition;
        while cursor != NO_TRANSITION {
            let next = self.transitions[cursor as usize].next;
            if !self.transitions[cursor as usize].removed {
                self.tombstone(cursor as usize);
            }
            cursor = next;
        }
        self.states.remove(index as usize);

        let mut tombstoned = Vec::new();
        for (i, entry) in self.transitions.iter_mut().enumerate() {
            if entry.removed {
                continue;
            }
            if entry.transition.destination == index {
                tombstoned.push(i);
            } else if entry.transition.destination > index {
                entry.transition.destination -= 1;
            }
        }
        for i in tombstoned {
            self.tombstone(i);
        }
    }

    /// Bulk state removal driven by a per-state label vector.
    ///
    /// States whose label equals `remove_label` are removed; the survivors
    /// are compacted in place, transitions into removed states are
    /// tombstoned and the remaining destinations renumbered. If the start
    /// state is removed the builder is reset to [`Builder::zero`].
    ///
    /// Returns the number of removed states.
    pub fn remove_states(&mut self, labels: &[bool], remove_label: bool) -> usize {
        assert_eq!(
            labels.len(),
            self.states.len(),
            "one label per state required"
        );
        let mut mapping = vec![NO_TRANSITION; self.states.len()];
        let mut kept = 0usize;
        for (old, &label) in labels.iter().enumerate() {
            if label != remove_label {
                mapping[old] = kept as i32;
                kept += 1;
            }
        }
        let removed = self.states.len() - kept;
        if removed == 0 {
            return 0;
        }
        if mapping[self.start_state as usize] == NO_TRANSITION {
            *self = Builder::zero();
            return removed;
        }

        // Chains of removed states would otherwise keep their entries live
        // in the pool, skewing the transition count.
        for (old, &label) in labels.iter().enumerate() {
            if label == remove_label {
                let mut cursor = self.states[old].first_transition;
                while cursor != NO_TRANSITION {
                    let next = self.transitions[cursor as usize].next;
                    if !self.transitions[cursor as usize].removed {
                        self.tombstone(cursor as usize);
                    }
                    cursor = next;
                }
            }
        }

        for old in 0..self.states.len() {
            let new = mapping[old];
            if new != NO_TRANSITION {
                self.states[new as usize] = self.states[old];
            }
        }
        self.states.truncate(kept);

        let mut tombstoned = Vec::new();
        for (i, entry) in self.transitions.iter_mut().enumerate() {
            if entry.removed {
                continue;
            }
            let new = mapping[entry.transition.destination as usize];
            if new == NO_TRANSITION {
                tombstoned.push(i);
            } else {
                entry.transition.destination = new as u32;
            }
        }
        for i in tombstoned {
            self.tombstone(i);
        }
        self.start_state = mapping[self.start_state as usize] as u32;
        removed
    }
}

impl<D: Clone> Builder<D> {
    /// Deep-copies an automaton into fresh builder storage.
    ///
    /// State indices are preserved; the start index is copied over.
    pub fn from_automaton(automaton: &Automaton<D>) -> Builder<D> {
        let mut builder = Builder {
            states: Vec::with_capacity(automaton.state_count()),
            transitions: Vec::with_capacity(automaton.transitions().len()),
            removed_count: 0,
            start_state: automaton.start_state_index(),
        };
        builder.import_states(automaton, 0);
        builder
    }

    /// Copies all states of `automaton` into this builder.
    ///
    /// Transition destinations are rebased by the state count at the time
    /// of the call. Returns the rebase offset, i.e. the index the foreign
    /// state `0` received.
    ///
    /// # Errors
    ///
    /// Fails with [`AutomatonError::TooLarge`] if the result would exceed
    /// [`MAX_STATES`]; the builder is unchanged in that case.
    pub fn add_states_from(&mut self, automaton: &Automaton<D>) -> Result<u32, AutomatonError> {
        let requested = self.states.len() + automaton.state_count();
        if requested > MAX_STATES {
            return Err(AutomatonError::TooLarge {
                requested,
                max: MAX_STATES,
            });
        }
        Ok(self.import_states(automaton, 0))
    }

    fn import_states(&mut self, automaton: &Automaton<D>, group: u32) -> u32 {
        let offset = self.states.len() as u32;
        for index in 0..automaton.state_count() as u32 {
            let mut state = StateData::new();
            state.end_weight = automaton.states[index as usize].end_weight;
            self.states.push(state);
        }
        for index in 0..automaton.state_count() as u32 {
            for transition in automaton.transitions_of(index) {
                let mut transition = transition.clone();
                transition.destination += offset;
                if group != 0 {
                    transition.group = group;
                }
                self.add_transition_raw(offset + index, transition);
            }
        }
        offset
    }

    /// Concatenates `other` onto every current end state.
    ///
    /// With `avoid_epsilon` set, and when either every current end state
    /// has no outgoing transitions or `other`'s start has no incoming
    /// transitions, the appended start state is fused away: its outgoing
    /// transitions are copied onto each end state (non-self-loop weights
    /// scaled by that state's end weight, self-loops re-rooted), end
    /// weights are multiplied through, and the appended start is removed.
    /// Otherwise each end state gets an ε-transition carrying its end
    /// weight to the appended start and its end weight is cleared.
    ///
    /// A non-zero `group` relabels every appended transition.
    ///
    /// # Errors
    ///
    /// Fails with [`AutomatonError::TooLarge`] if the combined state count
    /// would exceed [`MAX_STATES`]; the builder is unchanged in that case.
    pub fn append(
        &mut self,
        other: &Automaton<D>,
        group: u32,
        avoid_epsilon: bool,
    ) -> Result<(), AutomatonError> {
        let requested = self.states.len() + other.state_count();
        if requested > MAX_STATES {
            return Err(AutomatonError::TooLarge {
                requested,
                max: MAX_STATES,
            });
        }
        let end_states: Vec<u32> = (0..self.states.len() as u32)
            .filter(|&s| self.states[s as usize].can_end())
            .collect();
        let other_start_has_incoming = other
            .transitions()
            .iter()
            .any(|t| t.destination == other.start_state_index());

        let offset = self.import_states(other, group);
        let appended_start = offset + other.start_state_index();

        let end_states_are_leaves = end_states.iter().all(|&s| !self.has_live_transitions(s));
        if avoid_epsilon && (end_states_are_leaves || !other_start_has_incoming) {
            let start_transitions: Vec<Transition<D>> = self
                .chain(appended_start)
                .map(|(_, t)| t.clone())
                .collect();
            let appended_start_end_weight = self.states[appended_start as usize].end_weight;
            for &end_state in &end_states {
                let end_weight = self.states[end_state as usize].end_weight;
                for transition in &start_transitions {
                    let mut transition = transition.clone();
                    if transition.destination == appended_start {
                        transition.destination = end_state;
                    } else {
                        transition.weight = transition.weight.product(end_weight);
                    }
                    self.add_transition_raw(end_state, transition);
                }
                self.states[end_state as usize].end_weight =
                    end_weight.product(appended_start_end_weight);
            }
            self.remove_state(appended_start);
        } else {
            for &end_state in &end_states {
                let end_weight = self.states[end_state as usize].end_weight;
                self.add_transition_raw(
                    end_state,
                    Transition::epsilon(end_weight, appended_start, group),
                );
                self.states[end_state as usize].end_weight = Weight::ZERO;
            }
        }
        Ok(())
    }

    /// Compacts the builder into an immutable automaton.
    ///
    /// Each state's live transitions are appended, in chain order, to the
    /// flat transition array, and the state records its half-open
    /// `[first, last)` range. The builder stays usable afterwards.
    ///
    /// # Errors
    ///
    /// Fails with [`AutomatonError::InvalidStart`] if the start index is
    /// out of range.
    pub fn finalize(&self) -> Result<Automaton<D>, AutomatonError> {
        if self.start_state as usize >= self.states.len() {
            return Err(AutomatonError::InvalidStart {
                start: self.start_state,
                state_count: self.states.len(),
            });
        }
        let mut states = Vec::with_capacity(self.states.len());
        let mut transitions = Vec::with_capacity(self.transition_count());
        let mut is_epsilon_free = true;
        for index in 0..self.states.len() {
            let first = transitions.len() as i32;
            for (_, transition) in self.chain(index as u32) {
                if transition.is_epsilon() {
                    is_epsilon_free = false;
                }
                transitions.push(transition.clone());
            }
            states.push(StateData {
                first_transition: first,
                last_transition: transitions.len() as i32,
                end_weight: self.states[index].end_weight,
            });
        }
        Ok(Automaton::from_finalized(
            states,
            transitions,
            self.start_state,
            is_epsilon_free,
        ))
    }
}

impl<D: ElementDistribution> Builder<D> {
    /// A builder accepting exactly `sequence` with the given weight.
    ///
    /// # Errors
    ///
    /// Fails with [`AutomatonError::TooLarge`] for sequences longer than
    /// [`MAX_STATES`] allows.
    pub fn constant_on<I>(weight: Weight, sequence: I) -> Result<Builder<D>, AutomatonError>
    where
        I: IntoIterator<Item = D::Element>,
    {
        let mut builder = Builder::zero();
        let mut start = builder.start();
        let mut end = start.add_transitions_for_sequence(sequence, None)?;
        end.set_end_weight(weight);
        Ok(builder)
    }
}

/// Read-only walk over one state's live transitions.
pub(crate) struct ChainIter<'a, D> {
    transitions: &'a [LinkedTransition<D>],
    cursor: i32,
}

impl<'a, D> Iterator for ChainIter<'a, D> {
    type Item = (usize, &'a Transition<D>);

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor != NO_TRANSITION {
            let index = self.cursor as usize;
            let entry = &self.transitions[index];
            self.cursor = entry.next;
            if !entry.removed {
                return Some((index, &entry.transition));
            }
        }
        None
    }
}

/// Value handle for mutating one state of a [`Builder`].
pub struct StateBuilder<'a, D> {
    pub(crate) builder: &'a mut Builder<D>,
    pub(crate) index: u32,
}

impl<'a, D> StateBuilder<'a, D> {
    /// The index of the state this façade mutates.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The state's end weight.
    pub fn end_weight(&self) -> Weight {
        self.builder.states[self.index as usize].end_weight
    }

    /// Sets the state's end weight.
    pub fn set_end_weight(&mut self, weight: Weight) {
        self.builder.states[self.index as usize].end_weight = weight;
    }

    /// Adds a transition out of this state and returns the destination's
    /// façade, so construction can be chained.
    ///
    /// A `None` destination allocates a fresh state.
    ///
    /// # Errors
    ///
    /// Fails with [`AutomatonError::TooLarge`] when a fresh state cannot be
    /// allocated.
    pub fn add_transition(
        &mut self,
        distribution: Option<D>,
        weight: Weight,
        destination: Option<u32>,
        group: u32,
    ) -> Result<StateBuilder<'_, D>, AutomatonError> {
        let destination = match destination {
            Some(index) => index,
            None => self.builder.add_state()?.index(),
        };
        self.builder.add_transition_raw(
            self.index,
            Transition::new(distribution, weight, destination, group),
        );
        Ok(StateBuilder {
            builder: &mut *self.builder,
            index: destination,
        })
    }

    /// Appends an already-assembled transition record.
    pub fn append_transition(&mut self, transition: Transition<D>) -> StateBuilder<'_, D> {
        let destination = transition.destination;
        self.builder.add_transition_raw(self.index, transition);
        StateBuilder {
            builder: &mut *self.builder,
            index: destination,
        }
    }

    /// Adds an ε-transition out of this state.
    ///
    /// # Errors
    ///
    /// Fails with [`AutomatonError::TooLarge`] when a fresh state cannot be
    /// allocated.
    pub fn add_epsilon_transition(
        &mut self,
        weight: Weight,
        destination: Option<u32>,
        group: u32,
    ) -> Result<StateBuilder<'_, D>, AutomatonError> {
        self.add_transition(None, weight, destination, group)
    }

    /// Adds a self-loop on this state.
    pub fn add_self_transition(&mut self, distribution: Option<D>, weight: Weight, group: u32) {
        self.builder.add_transition_raw(
            self.index,
            Transition::new(distribution, weight, self.index, group),
        );
    }

    /// Walks this state's transition chain with removal and in-place
    /// replacement.
    pub fn transitions(&mut self) -> TransitionIterator<'_, D> {
        let next = self.builder.states[self.index as usize].first_transition;
        TransitionIterator {
            builder: &mut *self.builder,
            current: NO_TRANSITION,
            next,
        }
    }
}

impl<'a, D: ElementDistribution> StateBuilder<'a, D> {
    /// Adds a point-mass transition consuming `element`.
    ///
    /// # Errors
    ///
    /// Fails with [`AutomatonError::TooLarge`] when a fresh state cannot be
    /// allocated.
    pub fn add_element_transition(
        &mut self,
        element: D::Element,
        weight: Weight,
        destination: Option<u32>,
        group: u32,
    ) -> Result<StateBuilder<'_, D>, AutomatonError> {
        self.add_transition(Some(D::point(element)), weight, destination, group)
    }

    /// Strings weight-one point transitions for `sequence` out of this
    /// state, allocating a fresh state per element; the final element lands
    /// on `final_destination` when given. Returns the façade for the last
    /// state reached.
    ///
    /// # Errors
    ///
    /// Fails with [`AutomatonError::TooLarge`] when a fresh state cannot be
    /// allocated.
    pub fn add_transitions_for_sequence<I>(
        &mut self,
        sequence: I,
        final_destination: Option<u32>,
    ) -> Result<StateBuilder<'_, D>, AutomatonError>
    where
        I: IntoIterator<Item = D::Element>,
    {
        let mut current = self.index;
        let mut elements = sequence.into_iter().peekable();
        while let Some(element) = elements.next() {
            let destination = match final_destination {
                Some(index) if elements.peek().is_none() => index,
                _ => self.builder.add_state()?.index(),
            };
            self.builder.add_transition_raw(
                current,
                Transition::new(Some(D::point(element)), Weight::ONE, destination, 0),
            );
            current = destination;
        }
        Ok(StateBuilder {
            builder: &mut *self.builder,
            index: current,
        })
    }
}

/// Cursor over one state's transition chain, skipping tombstones.
///
/// Transitions appended to the same state while the cursor is live are
/// placed at the pool tail; whether the cursor visits them depends on its
/// position. Removing states invalidates cursors, which the borrow on the
/// builder enforces statically.
pub struct TransitionIterator<'a, D> {
    builder: &'a mut Builder<D>,
    current: i32,
    next: i32,
}

impl<'a, D> TransitionIterator<'a, D> {
    /// Advances to the next live transition. Returns `false` at the end of
    /// the chain.
    pub fn advance(&mut self) -> bool {
        while self.next != NO_TRANSITION {
            let index = self.next as usize;
            self.next = self.builder.transitions[index].next;
            if !self.builder.transitions[index].removed {
                self.current = index as i32;
                return true;
            }
        }
        self.current = NO_TRANSITION;
        false
    }

    /// The transition the cursor is on, if any.
    pub fn current(&self) -> Option<&Transition<D>> {
        if self.current == NO_TRANSITION {
            return None;
        }
        Some(&self.builder.transitions[self.current as usize].transition)
    }

    /// Replaces the current transition in place.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not on a transition.
    pub fn replace(&mut self, transition: Transition<D>) {
        assert!(self.current != NO_TRANSITION, "no current transition");
        self.builder.transitions[self.current as usize].transition = transition;
    }

    /// Tombstones the current transition.
    ///
    /// Double removal is a programming error caught by a debug assertion.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not on a transition.
    pub fn remove(&mut self) {
        assert!(self.current != NO_TRANSITION, "no current transition");
        self.builder.tombstone(self.current as usize);
    }
}
