//! Batch scoring: one oracle call per batch, one probability trajectory per
//! sequence, and the ranking and greedy-decoding entry points built on it.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;

use tracing::{debug, debug_span, warn};

use crate::batch::{Batch, Sequence};
use crate::error::{Result, ScoreError};
use crate::oracle::{InferenceOracle, OracleInput, Tokenizer};
use crate::probability::Normalization;
use crate::settings::Settings;
use crate::tensor::{AlignedBuffer, LogitsView};

/// Runtime knobs of a [`BatchScorer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScorerConfig {
    pub normalization: Normalization,
    /// Emit 1.0 for positions inside the prefix every sequence shares.
    pub skip_shared_prefix: bool,
    /// Default budget for [`BatchScorer::greedy_continue`] callers.
    pub max_tokens: usize,
    pub stop_at_eos: bool,
}

impl ScorerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            normalization: settings.scoring.normalization,
            skip_shared_prefix: settings.scoring.skip_shared_prefix,
            max_tokens: settings.generate.max_tokens,
            stop_at_eos: settings.generate.stop_at_eos,
        }
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            normalization: Normalization::Raw,
            skip_shared_prefix: false,
            max_tokens: 10,
            stop_at_eos: true,
        }
    }
}

/// Per-token probabilities of one sequence.
///
/// Entry 0 is always 1.0 (the first token has no context). Entry `t` for
/// `1 <= t < len` is the probability of token `t` given tokens `..t`. The
/// final entry is the probability of end-of-sequence after the last token.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTrajectory {
    probabilities: Vec<f32>,
    skipped_prefix: usize,
}

impl ScoreTrajectory {
    pub fn probabilities(&self) -> &[f32] {
        &self.probabilities
    }

    /// Number of leading positions filled with 1.0 because every sequence in
    /// the batch shared them.
    pub fn skipped_prefix(&self) -> usize {
        self.skipped_prefix
    }

    /// Sequence length plus one.
    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    /// Sum of natural logs of the probabilities.
    pub fn log_prob(&self) -> f64 {
        self.probabilities.iter().map(|&p| f64::from(p).ln()).sum()
    }
}

/// A sentence with its aggregate score, as returned by [`BatchScorer::rank`].
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSentence {
    /// Position in the caller's input.
    pub index: usize,
    pub text: String,
    pub log_prob: f64,
    pub trajectory: ScoreTrajectory,
}

/// Scores batches of sequences against an [`InferenceOracle`].
///
/// Owns the aligned logits buffer for its whole lifetime; consecutive batches
/// with the same `batch * seq_len * vocab` reuse the allocation.
pub struct BatchScorer<O> {
    oracle: O,
    logits: AlignedBuffer,
    config: ScorerConfig,
}

impl<O: InferenceOracle> BatchScorer<O> {
    pub fn new(oracle: O) -> Self {
        Self::with_config(oracle, ScorerConfig::default())
    }

    pub fn with_config(oracle: O, config: ScorerConfig) -> Self {
        Self {
            oracle,
            logits: AlignedBuffer::new(),
            config,
        }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn into_oracle(self) -> O {
        self.oracle
    }

    /// Logits of the most recent oracle call, `[batch * seq_len, vocab]`.
    pub fn logits(&self) -> &AlignedBuffer {
        &self.logits
    }

    /// Score `sequences` as one batch.
    ///
    /// Returns one trajectory per sequence in input order, or an empty vector
    /// when anything fails. An empty result means "unscored".
    pub fn score(&mut self, sequences: &[Sequence], eos_id: u32) -> Vec<ScoreTrajectory> {
        match self.try_score(sequences, eos_id) {
            Ok(trajectories) => trajectories,
            Err(e) => {
                warn!(
                    batch = sequences.len(),
                    "batch scoring failed, returning no trajectories: {e}"
                );
                Vec::new()
            }
        }
    }

    /// [`score`](Self::score) with the failure reported instead of swallowed.
    pub fn try_score(
        &mut self,
        sequences: &[Sequence],
        eos_id: u32,
    ) -> Result<Vec<ScoreTrajectory>> {
        if sequences.is_empty() {
            return Ok(Vec::new());
        }
        let _span = debug_span!("score_batch", batch = sequences.len()).entered();

        let batch = Batch::new(sequences)?;
        let vocab = self.forward(&batch)?;
        check_token(eos_id, vocab)?;
        for seq in sequences {
            for &token in seq.tokens() {
                check_token(token, vocab)?;
            }
        }

        let shared = if self.config.skip_shared_prefix && sequences.len() > 1 {
            batch.divergence_point()
        } else {
            0
        };
        let max_len = batch.max_len();
        let normalization = self.config.normalization;

        let mut trajectories = Vec::with_capacity(sequences.len());
        for (i, seq) in sequences.iter().enumerate() {
            let tokens = seq.tokens();
            let mut probabilities = Vec::with_capacity(tokens.len() + 1);
            probabilities.push(1.0);
            for (t, &token) in tokens.iter().enumerate().skip(1) {
                if t < shared {
                    probabilities.push(1.0);
                    continue;
                }
                let row = self.row(i * max_len + t - 1, vocab)?;
                probabilities.push(row.probability(token, normalization));
            }
            let last = self.row(i * max_len + tokens.len() - 1, vocab)?;
            probabilities.push(last.probability(eos_id, normalization));

            trajectories.push(ScoreTrajectory {
                probabilities,
                skipped_prefix: shared.saturating_sub(1),
            });
        }

        debug!(
            batch = trajectories.len(),
            skipped_prefix = shared.saturating_sub(1),
            "batch scored"
        );
        Ok(trajectories)
    }

    /// Tokenize `sentences` and score them as one batch.
    ///
    /// Empty when tokenization or scoring fails.
    pub fn score_sentences<T, S>(&mut self, tokenizer: &T, sentences: &[S]) -> Vec<ScoreTrajectory>
    where
        T: Tokenizer,
        S: AsRef<str>,
    {
        match encode_all(tokenizer, sentences) {
            Ok(sequences) => self.score(&sequences, tokenizer.eos_id()),
            Err(e) => {
                warn!(
                    batch = sentences.len(),
                    "tokenization failed, returning no trajectories: {e}"
                );
                Vec::new()
            }
        }
    }

    /// Score `sentences` and order them from most to least plausible.
    ///
    /// Sentences with equal log-probability keep their input order; a NaN
    /// aggregate sorts last. Empty when scoring fails.
    pub fn rank<T, S>(&mut self, tokenizer: &T, sentences: &[S]) -> Vec<RankedSentence>
    where
        T: Tokenizer,
        S: AsRef<str>,
    {
        let trajectories = self.score_sentences(tokenizer, sentences);
        let mut ranked: Vec<RankedSentence> = trajectories
            .into_iter()
            .zip(sentences)
            .enumerate()
            .map(|(index, (trajectory, text))| RankedSentence {
                index,
                text: text.as_ref().to_string(),
                log_prob: trajectory.log_prob(),
                trajectory,
            })
            .collect();
        ranked.sort_by(|a, b| rank_order(a.log_prob, b.log_prob));
        ranked
    }

    /// Arg-max next token after `tokens`, with its probability.
    pub fn predict_next(&mut self, tokens: &[u32]) -> Result<(u32, f32)> {
        let sequences = [Sequence::new(tokens.to_vec())];
        let batch = Batch::new(&sequences)?;
        let vocab = self.forward(&batch)?;
        for &token in tokens {
            check_token(token, vocab)?;
        }
        let row = self.row(tokens.len() - 1, vocab)?;
        Ok(row.argmax(self.config.normalization))
    }

    /// Extend `tokens` greedily, one [`predict_next`](Self::predict_next) per
    /// step, for at most `max_tokens` steps.
    ///
    /// With `stop_at_eos` the loop ends when `eos_id` is predicted; the EOS
    /// token is not returned. Returns the appended tokens and probabilities.
    pub fn greedy_continue(
        &mut self,
        tokens: &[u32],
        max_tokens: usize,
        eos_id: u32,
    ) -> Result<Vec<(u32, f32)>> {
        let _span = debug_span!("greedy_continue", context = tokens.len(), max_tokens).entered();
        let mut context = tokens.to_vec();
        let mut generated = Vec::with_capacity(max_tokens);
        for _ in 0..max_tokens {
            let (token, probability) = self.predict_next(&context)?;
            if self.config.stop_at_eos && token == eos_id {
                break;
            }
            context.push(token);
            generated.push((token, probability));
        }
        debug!(generated = generated.len());
        Ok(generated)
    }

    /// Run the oracle on `batch` and load its logits into the aligned buffer.
    /// Returns the vocabulary size.
    fn forward(&mut self, batch: &Batch<'_>) -> Result<usize> {
        let (n, max_len) = batch.shape();
        let input = OracleInput::from_batch(batch);
        let logits = self
            .oracle
            .run(&input)
            .map_err(|e| ScoreError::Oracle(e.to_string()))?;

        let [b, s, vocab] = logits.shape();
        if b != n {
            return Err(ScoreError::mismatch("logits batch", n, b));
        }
        if s != max_len {
            return Err(ScoreError::mismatch("logits sequence length", max_len, s));
        }
        if vocab == 0 {
            return Err(ScoreError::mismatch("logits vocabulary", 1, 0));
        }

        let previous = self.logits.len();
        self.logits.copy_from(b * s, vocab, Some(logits.data()))?;
        debug!(
            batch = b,
            max_len = s,
            vocab,
            reallocated = previous != self.logits.len(),
            "logits loaded"
        );
        Ok(vocab)
    }

    fn row(&self, row: usize, vocab: usize) -> Result<LogitsView<'_>> {
        self.logits.view(row * vocab, vocab)
    }
}

fn check_token(token: u32, vocab: usize) -> Result<()> {
    if token as usize >= vocab {
        return Err(ScoreError::mismatch("token id", vocab, token as usize));
    }
    Ok(())
}

fn encode_all<T: Tokenizer, S: AsRef<str>>(
    tokenizer: &T,
    sentences: &[S],
) -> Result<Vec<Sequence>> {
    sentences
        .iter()
        .map(|s| {
            let text = s.as_ref();
            tokenizer
                .encode(text)
                .map(|tokens| Sequence::with_text(text, tokens))
                .map_err(|e| ScoreError::Tokenizer(e.to_string()))
        })
        .collect()
}

/// Order aggregate log-probabilities from most to least plausible.
///
/// NaN sorts after everything, `-inf` included; two NaNs compare equal.
pub fn rank_order(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => b.total_cmp(&a),
        (a_nan, b_nan) => a_nan.cmp(&b_nan),
    }
}
