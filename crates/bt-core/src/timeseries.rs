//! Dense, date-indexed per-node historical buffer.

use serde::{Deserialize, Serialize};

use crate::date::Date;

/// A per-node historical buffer, one slot per date in the universe's
/// date axis.
///
/// Sized once at `setup` time from the universe's date axis and never
/// reallocated during updates (spec §5): memory usage is `O(nodes *
/// dates)`, not `O(nodes * ticks_seen)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    /// Creates a new buffer with `len` slots, all initialized to `0.0`.
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    /// Creates a new buffer with `len` slots, all initialized to `NaN`
    /// (used for buffers that start "not yet observed" rather than
    /// "observed as zero", e.g. a synthesized security's own price
    /// series before its first tick).
    #[must_use]
    pub fn nan(len: usize) -> Self {
        Self {
            values: vec![f64::NAN; len],
        }
    }

    /// Number of slots in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the buffer has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Writes `value` at row `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds — callers always derive `row`
    /// from `Universe::row_of`, so an out-of-range index means the
    /// buffer was sized from the wrong universe, which is a
    /// programming error, not a runtime condition to recover from.
    pub fn set(&mut self, row: usize, value: f64) {
        self.values[row] = value;
    }

    /// Reads the value at row `row`, if in bounds.
    #[must_use]
    pub fn get(&self, row: usize) -> Option<f64> {
        self.values.get(row).copied()
    }

    /// Reads the value at row `row`, returning `NaN` if out of bounds.
    #[must_use]
    pub fn get_or_nan(&self, row: usize) -> f64 {
        self.get(row).unwrap_or(f64::NAN)
    }

    /// All values as a plain slice, in date-axis order.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Pairs each value with its date, skipping dates beyond this
    /// buffer's length (can happen transiently right after a resize is
    /// attempted by a caller, though the engine itself never resizes).
    pub fn iter_with_dates<'a>(&'a self, dates: &'a [Date]) -> impl Iterator<Item = (Date, f64)> + 'a {
        dates.iter().copied().zip(self.values.iter().copied())
    }
}
