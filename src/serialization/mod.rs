//! Binary wire format for string automata.
//!
//! The format is a flat sequence of host-byte-order primitives:
//!
//! ```text
//! Automaton     := f64(version_hash) i32(state_count) State{state_count}
//!                  i32(transition_count) Transition{transition_count}
//!                  i32(start_state_index) u8(is_epsilon_free)
//! State         := i32(first_transition) i32(last_transition) f64(end_weight_log)
//! Transition    := u8(has_distribution) [DiscreteChar?] f64(weight_log)
//!                  i32(destination_state) i32(group)
//! DiscreteChar  := i32(range_count) Range{range_count} f64(common_value_log)
//! Range         := i32(start_inclusive) i32(end_exclusive) f64(probability_log)
//! ```
//!
//! Reading and writing are exact inverses for well-formed input; a read
//! validates the version hash and finishes with the automaton consistency
//! check.

use std::io::{Read, Write};

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::automaton::{Automaton, AutomatonError, StateData, StringAutomaton, Transition};
use crate::distribution::{CharRange, DiscreteChar};
use crate::weight::Weight;

/// Version stamp written ahead of every automaton.
pub const FORMAT_VERSION_HASH: f64 = 612_437.0;

/// Errors raised while reading or writing the wire format.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Underlying I/O failure.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    /// The stream does not start with the expected version hash.
    #[error("format version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// The version this build writes.
        expected: f64,
        /// The version found in the stream.
        found: f64,
    },
    /// A count or range field that cannot describe a valid automaton.
    #[error("malformed automaton data: {0}")]
    Malformed(&'static str),
    /// The decoded arrays violate the automaton's structural invariants.
    #[error("inconsistent automaton data")]
    Inconsistent(#[from] AutomatonError),
}

fn read_length(reader: &mut impl Read, what: &'static str) -> Result<usize, SerializationError> {
    let value = reader.read_i32::<NativeEndian>()?;
    usize::try_from(value).map_err(|_| SerializationError::Malformed(what))
}

impl DiscreteChar {
    /// Writes this distribution in the wire format.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    pub fn write(&self, writer: &mut impl Write) -> Result<(), SerializationError> {
        writer.write_i32::<NativeEndian>(self.ranges().len() as i32)?;
        for range in self.ranges() {
            writer.write_i32::<NativeEndian>(range.start as i32)?;
            writer.write_i32::<NativeEndian>(range.end as i32)?;
            writer.write_f64::<NativeEndian>(range.probability.log_value())?;
        }
        writer.write_f64::<NativeEndian>(self.probability_outside_ranges().log_value())?;
        Ok(())
    }

    /// Reads a distribution in the wire format.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or when the decoded ranges are not an ascending
    /// disjoint list inside the character universe.
    pub fn read(reader: &mut impl Read) -> Result<DiscreteChar, SerializationError> {
        let range_count = read_length(reader, "negative range count")?;
        let mut ranges = Vec::with_capacity(range_count.min(1024));
        for _ in 0..range_count {
            let start = reader.read_i32::<NativeEndian>()?;
            let end = reader.read_i32::<NativeEndian>()?;
            let probability = Weight::from_log_value(reader.read_f64::<NativeEndian>()?);
            let (Ok(start), Ok(end)) = (u32::try_from(start), u32::try_from(end)) else {
                return Err(SerializationError::Malformed("negative range bound"));
            };
            ranges.push(CharRange {
                start,
                end,
                probability,
            });
        }
        let common_value = Weight::from_log_value(reader.read_f64::<NativeEndian>()?);
        DiscreteChar::from_ranges(ranges, common_value)
            .map_err(|_| SerializationError::Malformed("invalid character ranges"))
    }
}

impl StringAutomaton {
    /// Writes this automaton in the wire format.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    pub fn write(&self, writer: &mut impl Write) -> Result<(), SerializationError> {
        writer.write_f64::<NativeEndian>(FORMAT_VERSION_HASH)?;
        writer.write_i32::<NativeEndian>(self.state_count() as i32)?;
        for state in &self.states {
            writer.write_i32::<NativeEndian>(state.first_transition)?;
            writer.write_i32::<NativeEndian>(state.last_transition)?;
            writer.write_f64::<NativeEndian>(state.end_weight().log_value())?;
        }
        writer.write_i32::<NativeEndian>(self.transitions().len() as i32)?;
        for transition in self.transitions() {
            match &transition.distribution {
                Some(distribution) => {
                    writer.write_u8(1)?;
                    distribution.write(writer)?;
                }
                None => writer.write_u8(0)?,
            }
            writer.write_f64::<NativeEndian>(transition.weight.log_value())?;
            writer.write_i32::<NativeEndian>(transition.destination as i32)?;
            writer.write_i32::<NativeEndian>(transition.group as i32)?;
        }
        writer.write_i32::<NativeEndian>(self.start_state_index() as i32)?;
        writer.write_u8(u8::from(self.is_epsilon_free()))?;
        Ok(())
    }

    /// Reads an automaton in the wire format.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, a version mismatch, malformed counts, or when
    /// the decoded arrays fail the consistency check.
    pub fn read(reader: &mut impl Read) -> Result<StringAutomaton, SerializationError> {
        let found = reader.read_f64::<NativeEndian>()?;
        if found != FORMAT_VERSION_HASH {
            return Err(SerializationError::VersionMismatch {
                expected: FORMAT_VERSION_HASH,
                found,
            });
        }
        let state_count = read_length(reader, "negative state count")?;
        let mut states = Vec::with_capacity(state_count.min(4096));
        for _ in 0..state_count {
            let first_transition = reader.read_i32::<NativeEndian>()?;
            let last_transition = reader.read_i32::<NativeEndian>()?;
            let end_weight = Weight::from_log_value(reader.read_f64::<NativeEndian>()?);
            states.push(StateData::from_range(
                first_transition,
                last_transition,
                end_weight,
            ));
        }
        let transition_count = read_length(reader, "negative transition count")?;
        let mut transitions = Vec::with_capacity(transition_count.min(4096));
        for _ in 0..transition_count {
            let distribution = match reader.read_u8()? {
                0 => None,
                1 => Some(DiscreteChar::read(reader)?),
                _ => return Err(SerializationError::Malformed("invalid distribution tag")),
            };
            let weight = Weight::from_log_value(reader.read_f64::<NativeEndian>()?);
            let destination = reader.read_i32::<NativeEndian>()?;
            let destination = u32::try_from(destination)
                .map_err(|_| SerializationError::Malformed("negative destination"))?;
            let group = reader.read_i32::<NativeEndian>()?;
            let group = u32::try_from(group)
                .map_err(|_| SerializationError::Malformed("negative group"))?;
            transitions.push(Transition::new(distribution, weight, destination, group));
        }
        let start_state = reader.read_i32::<NativeEndian>()?;
        let start_state = u32::try_from(start_state)
            .map_err(|_| SerializationError::Malformed("negative start state"))?;
        let is_epsilon_free = match reader.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(SerializationError::Malformed("invalid epsilon-free flag")),
        };
        Ok(Automaton::from_parts(
            states,
            transitions,
            start_state,
            is_epsilon_free,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::Builder;

    fn chars(text: &str) -> Vec<u32> {
        text.chars().map(|c| c as u32).collect()
    }

    #[test]
    fn test_discrete_char_round_trip() {
        let distribution = DiscreteChar::from_ranges(
            vec![
                CharRange {
                    start: 10,
                    end: 20,
                    probability: Weight::from_value(0.05),
                },
                CharRange {
                    start: 50,
                    end: 51,
                    probability: Weight::from_value(0.5),
                },
            ],
            Weight::from_log_value(-20.0),
        )
        .unwrap();
        let mut buffer = Vec::new();
        distribution.write(&mut buffer).unwrap();
        let decoded = DiscreteChar::read(&mut buffer.as_slice()).unwrap();
        assert_eq!(decoded, distribution);
    }

    #[test]
    fn test_automaton_round_trip() {
        let automaton = Builder::constant_on(Weight::from_value(0.5), chars("wire"))
            .unwrap()
            .finalize()
            .unwrap();
        let mut buffer = Vec::new();
        automaton.write(&mut buffer).unwrap();
        let decoded = StringAutomaton::read(&mut buffer.as_slice()).unwrap();

        assert_eq!(decoded.state_count(), automaton.state_count());
        assert_eq!(decoded.transitions().len(), automaton.transitions().len());
        assert_eq!(decoded.start_state_index(), automaton.start_state_index());
        assert_eq!(decoded.is_epsilon_free(), automaton.is_epsilon_free());
        let value = decoded.log_value(&chars("wire"));
        assert!((value.value() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let automaton = Builder::constant_on(Weight::ONE, chars("v"))
            .unwrap()
            .finalize()
            .unwrap();
        let mut buffer = Vec::new();
        automaton.write(&mut buffer).unwrap();
        buffer[0] ^= 0xFF;
        assert!(matches!(
            StringAutomaton::read(&mut buffer.as_slice()),
            Err(SerializationError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_stream_is_an_io_error() {
        let automaton = Builder::constant_on(Weight::ONE, chars("cut"))
            .unwrap()
            .finalize()
            .unwrap();
        let mut buffer = Vec::new();
        automaton.write(&mut buffer).unwrap();
        buffer.truncate(buffer.len() / 2);
        assert!(matches!(
            StringAutomaton::read(&mut buffer.as_slice()),
            Err(SerializationError::Io(_))
        ));
    }

    #[test]
    fn test_out_of_range_start_fails_consistency() {
        let automaton = Builder::constant_on(Weight::ONE, chars("x"))
            .unwrap()
            .finalize()
            .unwrap();
        let mut buffer = Vec::new();
        automaton.write(&mut buffer).unwrap();
        // The start index is the i32 just ahead of the trailing flag byte.
        let tail = buffer.len() - 5;
        buffer[tail..tail + 4].copy_from_slice(&7i32.to_ne_bytes());
        assert!(matches!(
            StringAutomaton::read(&mut buffer.as_slice()),
            Err(SerializationError::Inconsistent(_))
        ));
    }
}
