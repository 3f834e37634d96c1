//! Per-token probabilities from raw logits rows.
//!
//! The default [`Normalization::Raw`] divides `exp(row[t])` by the sum of
//! exponentials of the whole row without subtracting the row maximum first.
//! That reproduces the reference rankings but overflows to `inf`/`NaN` once
//! logits exceed ~88. [`Normalization::MaxShifted`] subtracts the maximum and
//! yields the same arg-max and the same relative ordering whenever the raw
//! form does not overflow.

use serde::Deserialize;

use crate::kernels::{self, horizontal_max, load_lanes, LANE_WIDTH};

/// How a logits row is turned into probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `exp(x_t) / sum(exp(x))`.
    #[default]
    Raw,
    /// `exp(x_t - max) / sum(exp(x - max))`.
    MaxShifted,
}

impl Normalization {
    /// Probability of `token_id` within the row `data[from..to]`.
    pub fn probability_in_range(self, token_id: u32, data: &[f32], from: usize, to: usize) -> f32 {
        match self {
            Normalization::Raw => probability_in_range(token_id, data, from, to),
            Normalization::MaxShifted => shifted_probability_in_range(token_id, data, from, to),
        }
    }

    pub fn probability_of(self, token_id: u32, row: &[f32]) -> f32 {
        self.probability_in_range(token_id, row, 0, row.len())
    }

    pub fn argmax_with_probability(self, row: &[f32]) -> (u32, f32) {
        match self {
            Normalization::Raw => argmax_with_probability(row),
            Normalization::MaxShifted => shifted_argmax_with_probability(row),
        }
    }
}

/// `exp(row[token_id]) / sum(exp(row))`. `token_id` must index into `row`.
#[inline]
pub fn probability_of(token_id: u32, row: &[f32]) -> f32 {
    probability_in_range(token_id, row, 0, row.len())
}

/// [`probability_of`] restricted to the sub-row `data[from..to]`, with
/// `token_id` relative to `from`.
///
/// The range is not checked for emptiness; callers pass non-empty ranges.
#[inline]
pub fn probability_in_range(token_id: u32, data: &[f32], from: usize, to: usize) -> f32 {
    let row = &data[from..to];
    row[token_id as usize].exp() / kernels::exp_sum(row)
}

/// Arg-max of `row` with its normalized probability.
///
/// A lane chunk is only scanned element by element when its
/// [`horizontal_max`] beats the running best; the denominator comes from
/// [`kernels::exp_sum`]. Ties resolve to the first occurrence. `row` should be
/// non-empty.
pub fn argmax_with_probability(row: &[f32]) -> (u32, f32) {
    let mut best_idx = 0usize;
    let mut best = f32::NEG_INFINITY;

    let chunks = row.chunks_exact(LANE_WIDTH);
    let tail = chunks.remainder();
    for (c, chunk) in chunks.enumerate() {
        let lanes = load_lanes(chunk);
        if horizontal_max(&lanes) > best {
            for (j, &x) in lanes.iter().enumerate() {
                if x > best {
                    best = x;
                    best_idx = c * LANE_WIDTH + j;
                }
            }
        }
    }

    let base = row.len() - tail.len();
    for (j, &x) in tail.iter().enumerate() {
        if x > best {
            best = x;
            best_idx = base + j;
        }
    }

    (best_idx as u32, best.exp() / kernels::exp_sum(row))
}

fn shifted_probability_in_range(token_id: u32, data: &[f32], from: usize, to: usize) -> f32 {
    let row = &data[from..to];
    let max = kernels::max_value(row);
    (row[token_id as usize] - max).exp() / kernels::exp_sum_shifted(row, max)
}

fn shifted_argmax_with_probability(row: &[f32]) -> (u32, f32) {
    let max = kernels::max_value(row);
    let idx = row.iter().position(|&x| x == max).unwrap_or(0);
    (idx as u32, 1.0 / kernels::exp_sum_shifted(row, max))
}
