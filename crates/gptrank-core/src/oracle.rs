//! Boundaries to the two external collaborators: the subword tokenizer and
//! the inference engine. Backends live outside the scoring core; the
//! `neural` feature provides one.

use std::fmt;

use crate::batch::Batch;
use crate::error::{Result, ScoreError};

/// Text to token ids.
pub trait Tokenizer {
    type Error: fmt::Display;

    fn encode(&self, text: &str) -> std::result::Result<Vec<u32>, Self::Error>;

    fn eos_id(&self) -> u32;
}

/// Padded token matrix plus attention mask, both row-major `[batch, seq_len]`.
#[derive(Debug, Clone, Copy)]
pub struct OracleInput<'a> {
    pub batch: usize,
    pub seq_len: usize,
    pub tokens: &'a [u32],
    pub mask: &'a [u8],
}

impl<'a> OracleInput<'a> {
    pub fn from_batch(batch: &'a Batch<'_>) -> Self {
        let (n, seq_len) = batch.shape();
        Self {
            batch: n,
            seq_len,
            tokens: batch.tokens(),
            mask: batch.mask(),
        }
    }

    pub fn tokens_row(&self, index: usize) -> &'a [u32] {
        &self.tokens[index * self.seq_len..(index + 1) * self.seq_len]
    }

    pub fn mask_row(&self, index: usize) -> &'a [u8] {
        &self.mask[index * self.seq_len..(index + 1) * self.seq_len]
    }

    /// Number of real (unmasked) tokens in row `index`.
    pub fn real_len(&self, index: usize) -> usize {
        self.mask_row(index).iter().filter(|&&m| m != 0).count()
    }
}

/// Unnormalized scores `[batch, seq_len, vocab]`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct LogitsTensor {
    shape: [usize; 3],
    data: Vec<f32>,
}

impl LogitsTensor {
    /// Wrap `data`, checking it holds exactly `batch * seq_len * vocab` values.
    pub fn new(shape: [usize; 3], data: Vec<f32>) -> Result<Self> {
        let [b, s, v] = shape;
        let expected = b
            .checked_mul(s)
            .and_then(|bs| bs.checked_mul(v))
            .ok_or(ScoreError::mismatch("logits tensor size", usize::MAX, data.len()))?;
        if data.len() != expected {
            return Err(ScoreError::mismatch("logits tensor size", expected, data.len()));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn vocab(&self) -> usize {
        self.shape[2]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// The external inference engine: one call per batch.
pub trait InferenceOracle {
    type Error: fmt::Display;

    fn run(&mut self, input: &OracleInput<'_>) -> std::result::Result<LogitsTensor, Self::Error>;
}

impl<O: InferenceOracle + ?Sized> InferenceOracle for &mut O {
    type Error = O::Error;

    fn run(&mut self, input: &OracleInput<'_>) -> std::result::Result<LogitsTensor, Self::Error> {
        (**self).run(input)
    }
}
