//! Nearest-row search over an embedding table.

use tracing::trace;

use crate::error::{Result, ScoreError};
use crate::kernels::{self, horizontal_max, Lanes, LANE_WIDTH};
use crate::tensor::AlignedBuffer;

/// Best-matching table row for a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub index: usize,
    /// Inner product of the query with the winning row.
    pub score: f32,
    /// `exp(score) / sum(exp(score_r))` over every row `r`.
    pub confidence: f32,
}

/// Find the row of `table` with the largest inner product against `query`.
///
/// Rows are scored `LANE_WIDTH` at a time so the running maximum and the
/// exponential sum share one pass; a partial final group is padded with `-inf`
/// (contributing `exp(-inf) = 0`). Ties resolve to
/// the lowest row index.
pub fn find_best(query: &[f32], table: &AlignedBuffer) -> Result<SearchHit> {
    if query.len() != table.cols() {
        return Err(ScoreError::mismatch("search query width", table.cols(), query.len()));
    }
    if table.rows() == 0 {
        return Err(ScoreError::mismatch("search table rows", 1, 0));
    }
    let cols = table.cols();
    if cols == 0 {
        return Err(ScoreError::mismatch("search table width", 1, 0));
    }

    let data = table.as_slice();
    let mut best_idx = 0usize;
    let mut best = f32::NEG_INFINITY;
    let mut sum = 0.0f32;

    for (group, rows) in data.chunks(cols * LANE_WIDTH).enumerate() {
        let mut scores: Lanes = [f32::NEG_INFINITY; LANE_WIDTH];
        for (lane, row) in rows.chunks_exact(cols).enumerate() {
            scores[lane] = kernels::inner_product(query, row);
        }
        sum += kernels::exp_sum(&scores);
        if horizontal_max(&scores) > best {
            for (lane, &s) in scores.iter().enumerate() {
                if s > best {
                    best = s;
                    best_idx = group * LANE_WIDTH + lane;
                }
            }
        }
    }

    let confidence = best.exp() / sum;
    trace!(rows = table.rows(), index = best_idx, score = best, "find_best");
    Ok(SearchHit {
        index: best_idx,
        score: best,
        confidence,
    })
}

/// Remove the positional bias for `position` from a token representation.
///
/// `token[i] -= positions[position][i]` in place.
pub fn subtract_position(
    token: &mut [f32],
    positions: &AlignedBuffer,
    position: usize,
) -> Result<()> {
    if token.len() != positions.cols() {
        return Err(ScoreError::mismatch(
            "position table width",
            positions.cols(),
            token.len(),
        ));
    }
    let bias = positions
        .row(position)
        .ok_or(ScoreError::mismatch("position index", positions.rows(), position))?;
    kernels::subtract_into(token, bias);
    Ok(())
}
