//! Aligned float storage for logits and embedding tables.
//!
//! `AlignedBuffer` owns one allocation; `LogitsView` is a borrowed
//! offset/width window into it covering one sequence position.

mod buffer;

use std::ops::Range;

pub use buffer::{AlignedBuffer, ALIGNMENT};

use crate::probability::Normalization;

/// One vocabulary-wide row of scores inside a larger buffer.
///
/// Holds the whole backing slice plus the `[start, end)` range, so the
/// range-based extractor can normalize over exactly this segment.
#[derive(Debug, Clone, Copy)]
pub struct LogitsView<'a> {
    data: &'a [f32],
    start: usize,
    end: usize,
}

impl<'a> LogitsView<'a> {
    pub(crate) fn new(data: &'a [f32], start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= data.len());
        Self { data, start, end }
    }

    /// The scores covered by this view.
    pub fn row(&self) -> &'a [f32] {
        &self.data[self.start..self.end]
    }

    /// Element range inside the backing buffer.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn width(&self) -> usize {
        self.end - self.start
    }

    /// Probability of `token_id` under this row. `token_id` must be `< width()`.
    pub fn probability(&self, token_id: u32, normalization: Normalization) -> f32 {
        normalization.probability_in_range(token_id, self.data, self.start, self.end)
    }

    /// Arg-max token of this row with its normalized probability.
    pub fn argmax(&self, normalization: Normalization) -> (u32, f32) {
        normalization.argmax_with_probability(self.row())
    }
}
