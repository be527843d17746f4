//! The bounded integer range behind `range(...)`.

use crate::error::EvalError;

/// A finite, restartable integer sequence `start, start + step, ...`
/// stopping before `stop`.
///
/// The range itself is a plain value; [`IntRange::iter`] produces a fresh
/// lazy iterator each time it is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    start: i64,
    stop: i64,
    step: i64,
}

impl IntRange {
    /// Build a range. A zero step is an error; a step pointing away from
    /// `stop` gives an empty range.
    pub fn new(start: i64, stop: i64, step: i64) -> Result<Self, EvalError> {
        if step == 0 {
            return Err(EvalError::ZeroStep);
        }
        Ok(Self { start, stop, step })
    }

    /// `range(stop)`
    pub fn to(stop: i64) -> Self {
        Self {
            start: 0,
            stop,
            step: 1,
        }
    }

    pub fn iter(&self) -> RangeIter {
        RangeIter {
            next: Some(self.start),
            stop: self.stop,
            step: self.step,
        }
    }

    /// Number of elements, without iterating.
    pub fn len(&self) -> usize {
        let span = if self.step > 0 {
            i128::from(self.stop) - i128::from(self.start)
        } else {
            i128::from(self.start) - i128::from(self.stop)
        };
        if span <= 0 {
            return 0;
        }
        let step = i128::from(self.step).abs();
        usize::try_from((span + step - 1) / step).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `value` is one of the range's elements, without iterating.
    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }
}

impl IntoIterator for IntRange {
    type Item = i64;
    type IntoIter = RangeIter;

    fn into_iter(self) -> RangeIter {
        self.iter()
    }
}

/// Lazy iterator over an [`IntRange`].
#[derive(Debug, Clone)]
pub struct RangeIter {
    next: Option<i64>,
    stop: i64,
    step: i64,
}

impl Iterator for RangeIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let current = self.next?;
        let in_bounds = if self.step > 0 {
            current < self.stop
        } else {
            current > self.stop
        };
        if !in_bounds {
            self.next = None;
            return None;
        }
        // Overflow past i64 ends the sequence.
        self.next = current.checked_add(self.step);
        Some(current)
    }
}
