//! Character distributions as weighted range unions.
//!
//! A [`DiscreteChar`] assigns probability mass to the character universe
//! `[0, 65536)` through an ascending, disjoint list of half-open
//! [`CharRange`]s plus a *common value*: the probability of every character
//! not covered by any range. Point masses, uniform ranges, and mixtures all
//! stay in this closed representation, which is what the determinization
//! line-sweep consumes.

use thiserror::Error;

use crate::distribution::ElementDistribution;
use crate::weight::Weight;

/// One past the largest character value: the element space is
/// `[0, CHAR_UNIVERSE_END)`.
pub const CHAR_UNIVERSE_END: u32 = 65_536;

/// Error type for invalid range lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeError {
    /// A range with `start >= end`.
    #[error("empty or inverted character range")]
    EmptyRange,
    /// A bound outside `[0, 65536]`.
    #[error("character range bound outside the universe")]
    OutOfUniverse,
    /// Ranges not ascending and disjoint.
    #[error("character ranges must be ascending and disjoint")]
    Unordered,
}

/// A half-open character range `[start, end)` with a per-element
/// probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharRange {
    /// First character of the range (inclusive).
    pub start: u32,
    /// One past the last character of the range (exclusive).
    pub end: u32,
    /// Probability of each individual character in the range.
    pub probability: Weight,
}

/// A distribution over characters in `[0, 65536)`.
///
/// Characters inside one of the listed ranges take that range's per-element
/// probability; every other character takes the common value. The range
/// list is always ascending and disjoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteChar {
    ranges: Vec<CharRange>,
    common_value: Weight,
}

impl DiscreteChar {
    /// The uniform distribution over the whole universe.
    pub fn uniform() -> DiscreteChar {
        DiscreteChar {
            ranges: Vec::new(),
            common_value: Weight::from_value(1.0 / CHAR_UNIVERSE_END as f64),
        }
    }

    /// The uniform distribution over `[start, end)`.
    ///
    /// Each character in the range has probability `1 / (end - start)`;
    /// characters outside have probability zero.
    ///
    /// # Panics
    ///
    /// Panics if the range is empty or extends past the universe.
    pub fn in_range(start: u32, end: u32) -> DiscreteChar {
        assert!(
            start < end && end <= CHAR_UNIVERSE_END,
            "invalid character range [{start}, {end})"
        );
        DiscreteChar {
            ranges: vec![CharRange {
                start,
                end,
                probability: Weight::from_value(1.0 / (end - start) as f64),
            }],
            common_value: Weight::ZERO,
        }
    }

    /// Builds a distribution from an explicit range list and common value.
    ///
    /// # Errors
    ///
    /// Returns a [`RangeError`] if any range is empty, extends past the
    /// universe, or the list is not ascending and disjoint.
    pub fn from_ranges(
        ranges: Vec<CharRange>,
        common_value: Weight,
    ) -> Result<DiscreteChar, RangeError> {
        let mut previous_end = 0;
        for range in &ranges {
            if range.start >= range.end {
                return Err(RangeError::EmptyRange);
            }
            if range.end > CHAR_UNIVERSE_END {
                return Err(RangeError::OutOfUniverse);
            }
            if range.start < previous_end {
                return Err(RangeError::Unordered);
            }
            previous_end = range.end;
        }
        Ok(DiscreteChar {
            ranges,
            common_value,
        })
    }

    /// The ascending, disjoint range view.
    pub fn ranges(&self) -> &[CharRange] {
        &self.ranges
    }

    /// The probability of every character outside the listed ranges.
    pub fn probability_outside_ranges(&self) -> Weight {
        self.common_value
    }
}

impl ElementDistribution for DiscreteChar {
    type Element = u32;

    fn point(element: u32) -> DiscreteChar {
        debug_assert!(element < CHAR_UNIVERSE_END);
        DiscreteChar {
            ranges: vec![CharRange {
                start: element,
                end: element + 1,
                probability: Weight::ONE,
            }],
            common_value: Weight::ZERO,
        }
    }

    fn probability(&self, element: u32) -> Weight {
        let candidate = self.ranges.partition_point(|r| r.end <= element);
        match self.ranges.get(candidate) {
            Some(range) if range.start <= element => range.probability,
            _ => self.common_value,
        }
    }

    /// Boundary-merge mixture of two range unions.
    ///
    /// The output is constant on every interval between consecutive range
    /// endpoints of the inputs; intervals whose mixture equals the mixed
    /// common value are folded into it, and adjacent equal intervals
    /// coalesce.
    fn weighted_sum(w_a: Weight, a: &DiscreteChar, w_b: Weight, b: &DiscreteChar) -> DiscreteChar {
        let total = w_a.sum(w_b);
        let Ok(total_inverse) = total.inverse() else {
            // Both mixture weights are zero; either operand will do.
            return a.clone();
        };
        let coeff_a = w_a.product(total_inverse);
        let coeff_b = w_b.product(total_inverse);
        let common_value = coeff_a
            .product(a.common_value)
            .sum(coeff_b.product(b.common_value));

        let mut cuts: Vec<u32> = Vec::with_capacity(2 * (a.ranges.len() + b.ranges.len()));
        for range in a.ranges.iter().chain(b.ranges.iter()) {
            cuts.push(range.start);
            cuts.push(range.end);
        }
        cuts.sort_unstable();
        cuts.dedup();

        let mut ranges: Vec<CharRange> = Vec::new();
        for window in cuts.windows(2) {
            let (start, end) = (window[0], window[1]);
            let probability = coeff_a
                .product(a.probability(start))
                .sum(coeff_b.product(b.probability(start)));
            if probability == common_value {
                continue;
            }
            match ranges.last_mut() {
                Some(last) if last.end == start && last.probability == probability => {
                    last.end = end;
                }
                _ => ranges.push(CharRange {
                    start,
                    end,
                    probability,
                }),
            }
        }
        DiscreteChar {
            ranges,
            common_value,
        }
    }
}
