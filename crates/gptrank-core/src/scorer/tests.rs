use super::*;
use crate::oracle::LogitsTensor;

/// Logits at each position depend only on the token at that position.
struct BigramOracle {
    vocab: usize,
    table: Vec<f32>,
    calls: usize,
}

impl BigramOracle {
    fn new(vocab: usize) -> Self {
        Self {
            vocab,
            table: vec![0.0; vocab * vocab],
            calls: 0,
        }
    }

    fn set(&mut self, prev: u32, next: u32, score: f32) {
        self.table[prev as usize * self.vocab + next as usize] = score;
    }
}

impl InferenceOracle for BigramOracle {
    type Error = String;

    fn run(&mut self, input: &OracleInput<'_>) -> std::result::Result<LogitsTensor, String> {
        self.calls += 1;
        let mut data = Vec::with_capacity(input.tokens.len() * self.vocab);
        for &token in input.tokens {
            let start = token as usize * self.vocab;
            data.extend_from_slice(&self.table[start..start + self.vocab]);
        }
        LogitsTensor::new([input.batch, input.seq_len, self.vocab], data).map_err(|e| e.to_string())
    }
}

/// Returns the same tensor on every call and records what it was given.
struct FixedOracle {
    shape: [usize; 3],
    data: Vec<f32>,
    seen: Vec<(Vec<u32>, Vec<u8>)>,
}

impl FixedOracle {
    fn new(shape: [usize; 3], data: Vec<f32>) -> Self {
        Self {
            shape,
            data,
            seen: Vec::new(),
        }
    }
}

impl InferenceOracle for FixedOracle {
    type Error = String;

    fn run(&mut self, input: &OracleInput<'_>) -> std::result::Result<LogitsTensor, String> {
        self.seen.push((input.tokens.to_vec(), input.mask.to_vec()));
        LogitsTensor::new(self.shape, self.data.clone()).map_err(|e| e.to_string())
    }
}

struct FailingOracle;

impl InferenceOracle for FailingOracle {
    type Error = &'static str;

    fn run(&mut self, _input: &OracleInput<'_>) -> std::result::Result<LogitsTensor, &'static str> {
        Err("session lost")
    }
}

/// `a..=o` map to 0..=14; anything else is an error. EOS is 15.
struct LetterTokenizer;

impl Tokenizer for LetterTokenizer {
    type Error = String;

    fn encode(&self, text: &str) -> std::result::Result<Vec<u32>, String> {
        text.chars()
            .map(|c| match c {
                'a'..='o' => Ok(c as u32 - 'a' as u32),
                other => Err(format!("unknown character {other:?}")),
            })
            .collect()
    }

    fn eos_id(&self) -> u32 {
        15
    }
}

fn seqs(rows: &[&[u32]]) -> Vec<Sequence> {
    rows.iter().map(|r| Sequence::new(r.to_vec())).collect()
}

fn assert_close(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-6, "{a:?} vs {b:?}");
    }
}

fn softmax_at(row: &[f32], index: usize) -> f32 {
    row[index].exp() / row.iter().map(|x| x.exp()).sum::<f32>()
}

#[test]
fn test_shared_prefix_end_to_end() {
    let vocab = 16;
    let mut data = vec![0.0f32; 2 * 3 * vocab];
    data[(0 * 3 + 1) * vocab + 9] = 5.0;
    data[(1 * 3 + 1) * vocab + 4] = 3.0;
    let mut scorer = BatchScorer::new(FixedOracle::new([2, 3, vocab], data));

    let sequences = seqs(&[&[7, 12, 9], &[7, 12, 4]]);
    let trajectories = scorer.score(&sequences, 15);
    assert_eq!(trajectories.len(), 2);

    let (a, b) = (&trajectories[0], &trajectories[1]);
    assert_eq!(a.len(), 4);
    assert_eq!(b.len(), 4);
    assert_eq!(a.probabilities()[0], 1.0);
    assert_eq!(b.probabilities()[0], 1.0);
    assert!((a.probabilities()[1] - 1.0 / 16.0).abs() < 1e-6);
    assert!(a.probabilities()[2] > b.probabilities()[2]);
    let expected = 5.0f32.exp() / (5.0f32.exp() + 15.0);
    assert!((a.probabilities()[2] - expected).abs() < 1e-6);
    assert!(a.log_prob() > b.log_prob());
    assert_eq!(scorer.oracle().seen.len(), 1);
}

#[test]
fn test_oracle_sees_padded_matrix_and_mask() {
    let vocab = 4;
    let mut scorer = BatchScorer::new(FixedOracle::new([2, 5, vocab], vec![0.0; 2 * 5 * vocab]));
    let sequences = seqs(&[&[1, 2, 3], &[3, 2, 1, 2, 3]]);
    assert_eq!(scorer.score(&sequences, 0).len(), 2);

    let (tokens, mask) = &scorer.oracle().seen[0];
    assert_eq!(tokens, &[1, 2, 3, 0, 0, 3, 2, 1, 2, 3]);
    assert_eq!(mask, &[1, 1, 1, 0, 0, 1, 1, 1, 1, 1]);
}

#[test]
fn test_eos_uses_last_real_position() {
    let vocab = 8;
    let mut oracle = BigramOracle::new(vocab);
    oracle.set(3, 7, 4.0);
    oracle.set(0, 7, -4.0); // padding token
    let mut scorer = BatchScorer::new(oracle);

    let trajectories = scorer.score(&seqs(&[&[1, 3], &[1, 2, 2, 2]]), 7);
    let short = trajectories[0].probabilities();
    let mut row = vec![0.0f32; vocab];
    row[7] = 4.0;
    assert!((short[2] - softmax_at(&row, 7)).abs() < 1e-6);
}

#[test]
fn test_scoring_is_batch_composition_invariant() {
    let vocab = 12;
    let mut oracle = BigramOracle::new(vocab);
    for prev in 0..vocab as u32 {
        for next in 0..vocab as u32 {
            oracle.set(prev, next, ((prev * 7 + next * 3) % 11) as f32 * 0.4);
        }
    }
    let mut scorer = BatchScorer::new(oracle);
    let a = Sequence::new(vec![1, 5, 9, 2]);
    let b = Sequence::new(vec![3, 3, 8, 10, 11, 4, 6]);
    let c = Sequence::new(vec![2]);

    let ab = scorer.score(&[a.clone(), b.clone()], 0);
    let ba = scorer.score(&[b.clone(), a.clone()], 0);
    let alone = scorer.score(&[a.clone()], 0);
    let with_c = scorer.score(&[c, a, b], 0);

    assert_close(ab[0].probabilities(), ba[1].probabilities());
    assert_close(ab[1].probabilities(), ba[0].probabilities());
    assert_close(ab[0].probabilities(), alone[0].probabilities());
    assert_close(ab[0].probabilities(), with_c[1].probabilities());
    assert_close(ab[1].probabilities(), with_c[2].probabilities());
    assert_eq!(with_c[0].len(), 2);
    assert_eq!(scorer.oracle().calls, 4);
}

#[test]
fn test_oracle_failure_yields_empty_result() {
    let mut scorer = BatchScorer::new(FailingOracle);
    let sequences = seqs(&[&[1, 2], &[3]]);
    assert!(scorer.score(&sequences, 0).is_empty());
    assert_eq!(
        scorer.try_score(&sequences, 0).unwrap_err(),
        ScoreError::Oracle("session lost".to_string())
    );
}

#[test]
fn test_wrong_logits_shape_yields_empty_result() {
    let mut scorer = BatchScorer::new(FixedOracle::new([1, 3, 4], vec![0.0; 12]));
    let sequences = seqs(&[&[1, 2, 3], &[1]]);
    assert!(scorer.score(&sequences, 0).is_empty());
    assert_eq!(
        scorer.try_score(&sequences, 0).unwrap_err(),
        ScoreError::DimensionMismatch {
            what: "logits batch",
            expected: 2,
            got: 1,
        }
    );

    let mut scorer = BatchScorer::new(FixedOracle::new([2, 2, 4], vec![0.0; 16]));
    assert!(matches!(
        scorer.try_score(&sequences, 0),
        Err(ScoreError::DimensionMismatch { what: "logits sequence length", .. })
    ));
}

#[test]
fn test_out_of_vocabulary_ids_are_rejected() {
    let mut scorer = BatchScorer::new(FixedOracle::new([1, 2, 4], vec![0.0; 8]));
    assert!(scorer.score(&seqs(&[&[1, 4]]), 0).is_empty());
    assert!(matches!(
        scorer.try_score(&seqs(&[&[1, 2]]), 4),
        Err(ScoreError::DimensionMismatch { what: "token id", expected: 4, got: 4 })
    ));
}

#[test]
fn test_empty_inputs() {
    let mut scorer = BatchScorer::new(FixedOracle::new([0, 0, 4], Vec::new()));
    assert!(scorer.score(&[], 0).is_empty());
    assert!(scorer.oracle().seen.is_empty());

    assert!(scorer.score(&seqs(&[&[1], &[]]), 0).is_empty());
    assert!(scorer.oracle().seen.is_empty());
}

#[test]
fn test_logits_buffer_reused_for_equal_shapes() {
    let mut scorer = BatchScorer::new(BigramOracle::new(16));
    scorer.score(&seqs(&[&[1, 2, 3], &[4, 5]]), 0);
    let first = scorer.logits().as_ptr();
    assert_eq!(scorer.logits().shape(), (6, 16));

    scorer.score(&seqs(&[&[6, 7], &[8, 9, 10]]), 0);
    assert_eq!(scorer.logits().as_ptr(), first);

    scorer.score(&seqs(&[&[1, 2, 3, 4]]), 0);
    assert_eq!(scorer.logits().shape(), (4, 16));
    assert_eq!(scorer.logits().len(), 64);
}

#[test]
fn test_skip_shared_prefix_keeps_ranking() {
    let vocab = 16;
    let mut oracle = BigramOracle::new(vocab);
    oracle.set(7, 12, 2.0);
    oracle.set(12, 9, 3.0);
    oracle.set(12, 4, 1.0);
    let sequences = seqs(&[&[7, 12, 9], &[7, 12, 4]]);

    let mut plain = BatchScorer::new(oracle);
    let full = plain.score(&sequences, 15);

    let config = ScorerConfig {
        skip_shared_prefix: true,
        ..ScorerConfig::default()
    };
    let mut skipping = BatchScorer::with_config(plain.into_oracle(), config);
    let skipped = skipping.score(&sequences, 15);

    assert_eq!(skipped[0].skipped_prefix(), 1);
    assert_eq!(skipped[0].probabilities()[1], 1.0);
    assert!(full[0].probabilities()[1] < 1.0);
    assert_eq!(skipped[0].probabilities()[2..], full[0].probabilities()[2..]);

    let full_gap = full[0].log_prob() - full[1].log_prob();
    let skipped_gap = skipped[0].log_prob() - skipped[1].log_prob();
    assert!((full_gap - skipped_gap).abs() < 1e-6);
}

#[test]
fn test_skip_shared_prefix_ignored_for_single_sequence() {
    let config = ScorerConfig {
        skip_shared_prefix: true,
        ..ScorerConfig::default()
    };
    let mut scorer = BatchScorer::with_config(BigramOracle::new(8), config);
    let trajectories = scorer.score(&seqs(&[&[1, 2, 3]]), 0);
    assert_eq!(trajectories[0].skipped_prefix(), 0);
    assert!((trajectories[0].probabilities()[1] - 0.125).abs() < 1e-6);
}

#[test]
fn test_max_shifted_survives_large_logits() {
    let data = vec![100.0f32; 2 * 4];
    let sequences = seqs(&[&[1, 2]]);

    let mut raw = BatchScorer::new(FixedOracle::new([1, 2, 4], data.clone()));
    let raw_trajectory = raw.score(&sequences, 3);
    assert!(raw_trajectory[0].probabilities()[1].is_nan());

    let config = ScorerConfig {
        normalization: Normalization::MaxShifted,
        ..ScorerConfig::default()
    };
    let mut shifted = BatchScorer::with_config(FixedOracle::new([1, 2, 4], data), config);
    let trajectory = shifted.score(&sequences, 3);
    assert_close(trajectory[0].probabilities(), &[1.0, 0.25, 0.25]);
}

#[test]
fn test_predict_next_reads_last_position() {
    let mut oracle = BigramOracle::new(8);
    oracle.set(5, 3, 6.0);
    oracle.set(1, 6, 9.0);
    let mut scorer = BatchScorer::new(oracle);
    let (token, probability) = scorer.predict_next(&[1, 5]).unwrap();
    assert_eq!(token, 3);
    let mut row = vec![0.0f32; 8];
    row[3] = 6.0;
    assert!((probability - softmax_at(&row, 3)).abs() < 1e-6);

    assert!(scorer.predict_next(&[]).is_err());
}

#[test]
fn test_greedy_continue_stops_at_eos() {
    let mut oracle = BigramOracle::new(16);
    oracle.set(1, 2, 5.0);
    oracle.set(2, 3, 5.0);
    oracle.set(3, 15, 5.0);
    let mut scorer = BatchScorer::new(oracle);

    let generated = scorer.greedy_continue(&[1], 10, 15).unwrap();
    let tokens: Vec<u32> = generated.iter().map(|&(t, _)| t).collect();
    assert_eq!(tokens, vec![2, 3]);
    assert!(generated.iter().all(|&(_, p)| p > 0.5));

    let config = ScorerConfig {
        stop_at_eos: false,
        ..ScorerConfig::default()
    };
    let mut scorer = BatchScorer::with_config(scorer.into_oracle(), config);
    let generated = scorer.greedy_continue(&[1], 4, 15).unwrap();
    let tokens: Vec<u32> = generated.iter().map(|&(t, _)| t).collect();
    assert_eq!(tokens, vec![2, 3, 15, 0]);

    assert!(scorer.greedy_continue(&[1], 0, 15).unwrap().is_empty());
}

#[test]
fn test_rank_orders_by_log_probability() {
    let mut oracle = BigramOracle::new(16);
    // "ab" is likely, "ba" is not
    oracle.set(0, 1, 6.0);
    oracle.set(1, 15, 6.0);
    oracle.set(1, 0, -3.0);
    let mut scorer = BatchScorer::new(oracle);

    let ranked = scorer.rank(&LetterTokenizer, &["ba", "ab", "cc"]);
    assert_eq!(ranked.len(), 3);
    assert_eq!(ranked[0].text, "ab");
    assert_eq!(ranked[0].index, 1);
    assert!(ranked.windows(2).all(|w| w[0].log_prob >= w[1].log_prob));
    for r in &ranked {
        assert!((r.log_prob - r.trajectory.log_prob()).abs() < 1e-12);
        assert_eq!(r.trajectory.len(), r.text.len() + 1);
    }
}

#[test]
fn test_rank_ties_keep_input_order() {
    let mut scorer = BatchScorer::new(BigramOracle::new(16));
    let ranked = scorer.rank(&LetterTokenizer, &["cd", "ab", "ef"]);
    let order: Vec<usize> = ranked.iter().map(|r| r.index).collect();
    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn test_rank_puts_nan_after_negative_infinity() {
    let mut oracle = BigramOracle::new(16);
    // after 'c' every logit overflows the raw softmax: inf / inf
    for next in 0..16 {
        oracle.set(2, next, 100.0);
    }
    // after 'a' the probability of 'b' underflows to 0, so log_prob is -inf
    oracle.set(0, 1, -200.0);
    let mut scorer = BatchScorer::new(oracle);

    let ranked = scorer.rank(&LetterTokenizer, &["cd", "ab"]);
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].text, "ab");
    assert_eq!(ranked[0].log_prob, f64::NEG_INFINITY);
    assert_eq!(ranked[1].text, "cd");
    assert!(ranked[1].log_prob.is_nan());
}

#[test]
fn test_rank_order_sorts_nan_last() {
    let mut values = vec![f64::NAN, -1.0, f64::NEG_INFINITY, 0.5, f64::NAN];
    values.sort_by(|a, b| rank_order(*a, *b));
    assert_eq!(values[..3], [0.5, -1.0, f64::NEG_INFINITY]);
    assert!(values[3..].iter().all(|v| v.is_nan()));
}

#[test]
fn test_tokenizer_failure_yields_empty_result() {
    let mut scorer = BatchScorer::new(BigramOracle::new(16));
    assert!(scorer.score_sentences(&LetterTokenizer, &["ab", "xyz"]).is_empty());
    assert!(scorer.rank(&LetterTokenizer, &["ab", "xyz"]).is_empty());
    assert_eq!(scorer.oracle().calls, 0);
}

#[test]
fn test_config_defaults_match_embedded_settings() {
    let settings =
        crate::settings::parse_settings_toml(crate::settings::DEFAULT_SETTINGS_TOML).unwrap();
    assert_eq!(ScorerConfig::from_settings(&settings), ScorerConfig::default());
}
