//! Numeric interval predicates.
//!
//! A [`Range`] is the building block for every numeric condition in a filter
//! rule (mapping quality, insert size, clip count, ...). A range is either
//! `Every`, which accepts any value and marks the predicate inactive, or a
//! band `[min, max]` that may be inverted to express "outside the band".

use anyhow::{bail, Result};
use serde_json::Value;
use std::fmt;

/// An inclusive numeric band with optional inversion, or the inactive
/// accept-everything state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Range {
    /// Accepts every value. Used as the inactive marker for predicates that
    /// were not mentioned in the rule script.
    Every,
    /// Accepts values in `[min, max]`, or outside it when `inverted`.
    Band { min: i64, max: i64, inverted: bool },
}

impl Default for Range {
    fn default() -> Self {
        Range::Every
    }
}

impl Range {
    /// Build a band from a raw pair. A pair given as `min > max` encodes the
    /// complement of the swapped band, so the bounds are swapped and the
    /// inversion toggled.
    pub fn new(min: i64, max: i64) -> Self {
        if min > max {
            Range::Band {
                min: max,
                max: min,
                inverted: true,
            }
        } else {
            Range::Band {
                min,
                max,
                inverted: false,
            }
        }
    }

    /// A one-sided band accepting any value at or above `min`.
    pub fn at_least(min: i64) -> Self {
        Range::new(min, i64::MAX)
    }

    /// A one-sided band accepting any value at or below `max`.
    pub fn at_most(max: i64) -> Self {
        Range::new(0, max)
    }

    pub fn is_every(&self) -> bool {
        matches!(self, Range::Every)
    }

    /// Lower edge of the band; 0 for the inactive range.
    pub fn lower_bound(&self) -> i64 {
        match self {
            Range::Every => 0,
            Range::Band { min, .. } => *min,
        }
    }

    /// Test a value against the range.
    pub fn contains(&self, v: i64) -> bool {
        match self {
            Range::Every => true,
            Range::Band { min, max, inverted } => {
                let in_band = *min <= v && v <= *max;
                in_band ^ inverted
            }
        }
    }

    /// The same band with the acceptance inverted. `Every` has no complement
    /// and is returned unchanged.
    pub fn complement(&self) -> Self {
        match self {
            Range::Every => Range::Every,
            Range::Band { min, max, inverted } => Range::Band {
                min: *min,
                max: *max,
                inverted: !inverted,
            },
        }
    }

    /// Parse the JSON value given for a range key.
    ///
    /// Three shapes are accepted: `[min, max]` (exactly two integers), a bare
    /// integer lower bound, or a boolean switch where `true` means `[1, MAX]`
    /// and `false` its complement. Anything else is a configuration error.
    pub fn parse(v: &Value, name: &str) -> Result<Self> {
        match v {
            Value::Array(items) => {
                if items.len() != 2 {
                    bail!(
                        "range '{}' must be a two-element array, got {} elements",
                        name,
                        items.len()
                    );
                }
                let min = items[0]
                    .as_i64()
                    .ok_or_else(|| anyhow::anyhow!("range '{}': non-integer minimum", name))?;
                let max = items[1]
                    .as_i64()
                    .ok_or_else(|| anyhow::anyhow!("range '{}': non-integer maximum", name))?;
                Ok(Range::new(min, max))
            }
            Value::Number(n) => {
                let min = n
                    .as_i64()
                    .ok_or_else(|| anyhow::anyhow!("range '{}': non-integer value", name))?;
                Ok(Range::at_least(min))
            }
            // true -> [1, MAX]; false -> [MAX, 1], which normalizes to the
            // inverted band.
            Value::Bool(true) => Ok(Range::new(1, i64::MAX)),
            Value::Bool(false) => Ok(Range::new(i64::MAX, 1)),
            other => bail!("unexpected value for range '{}': {}", name, other),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Range::Every => write!(f, "ALL"),
            Range::Band { min, max, inverted } => {
                if *inverted {
                    write!(f, "NOT ")?;
                }
                if *max == i64::MAX {
                    write!(f, "[{},MAX]", min)
                } else {
                    write!(f, "[{},{}]", min, max)
                }
            }
        }
    }
}
