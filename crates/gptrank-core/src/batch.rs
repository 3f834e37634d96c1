//! Tokenized sequences and the padded batch handed to the oracle.

use crate::error::{Result, ScoreError};

/// Token id written into padding cells.
pub const PAD_TOKEN: u32 = 0;

/// Token ids of one candidate, with the text they came from when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    text: Option<String>,
    tokens: Vec<u32>,
}

impl Sequence {
    pub fn new(tokens: Vec<u32>) -> Self {
        Self { text: None, tokens }
    }

    pub fn with_text(text: impl Into<String>, tokens: Vec<u32>) -> Self {
        Self {
            text: Some(text.into()),
            tokens,
        }
    }

    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl From<Vec<u32>> for Sequence {
    fn from(tokens: Vec<u32>) -> Self {
        Self::new(tokens)
    }
}

/// Sequences scored together, right-padded to a `[n, max_len]` matrix.
///
/// `mask[i][j] == 1` iff `j < sequences[i].len()`; padding cells hold
/// [`PAD_TOKEN`].
#[derive(Debug)]
pub struct Batch<'a> {
    sequences: &'a [Sequence],
    max_len: usize,
    tokens: Vec<u32>,
    mask: Vec<u8>,
}

impl<'a> Batch<'a> {
    /// Pad `sequences` into a token matrix and attention mask.
    ///
    /// A sequence with no tokens has nothing to condition on and is rejected.
    pub fn new(sequences: &'a [Sequence]) -> Result<Self> {
        if sequences.iter().any(Sequence::is_empty) {
            return Err(ScoreError::mismatch("sequence length", 1, 0));
        }
        let max_len = sequences.iter().map(Sequence::len).max().unwrap_or(0);
        let cells = sequences.len() * max_len;
        let mut tokens = vec![PAD_TOKEN; cells];
        let mut mask = vec![0u8; cells];
        for (i, seq) in sequences.iter().enumerate() {
            let start = i * max_len;
            tokens[start..start + seq.len()].copy_from_slice(seq.tokens());
            mask[start..start + seq.len()].fill(1);
        }
        Ok(Self {
            sequences,
            max_len,
            tokens,
            mask,
        })
    }

    pub fn sequences(&self) -> &'a [Sequence] {
        self.sequences
    }

    /// `(n, max_len)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.sequences.len(), self.max_len)
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Row-major `[n, max_len]` token ids.
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    /// Row-major `[n, max_len]` attention mask.
    pub fn mask(&self) -> &[u8] {
        &self.mask
    }

    pub fn tokens_row(&self, index: usize) -> Option<&[u32]> {
        (index < self.sequences.len())
            .then(|| &self.tokens[index * self.max_len..(index + 1) * self.max_len])
    }

    pub fn mask_row(&self, index: usize) -> Option<&[u8]> {
        (index < self.sequences.len())
            .then(|| &self.mask[index * self.max_len..(index + 1) * self.max_len])
    }

    /// First position at which the sequences stop agreeing.
    ///
    /// Positions `0..divergence_point()` hold the same token in every
    /// sequence. Running off the end of any sequence counts as diverging.
    pub fn divergence_point(&self) -> usize {
        let Some((first, rest)) = self.sequences.split_first() else {
            return 0;
        };
        rest.iter().fold(first.len(), |shared, seq| {
            first.tokens()[..shared]
                .iter()
                .zip(seq.tokens())
                .take_while(|(a, b)| a == b)
                .count()
        })
    }
}
