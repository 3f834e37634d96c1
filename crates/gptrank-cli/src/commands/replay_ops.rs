//! Score pre-tokenized sequences against a saved logits dump, no model needed.
//!
//! Dump format:
//!
//! ```json
//! {"shape": [2, 3, 16], "logits": [...], "sequences": [[7, 12, 9], [7, 12, 4]], "eos_id": 15}
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use gptrank_core::oracle::{InferenceOracle, LogitsTensor, OracleInput};
use gptrank_core::settings::settings;
use gptrank_core::{BatchScorer, ScoreError, ScorerConfig, Sequence};

use super::{print_reports, SequenceReport};

#[derive(Debug, Deserialize)]
pub struct LogitsDump {
    pub shape: [usize; 3],
    pub logits: Vec<f32>,
    pub sequences: Vec<Vec<u32>>,
    pub eos_id: u32,
    /// Optional labels, one per sequence.
    #[serde(default)]
    pub texts: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid logits dump: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{texts} labels for {sequences} sequences")]
    Labels { texts: usize, sequences: usize },
    #[error("logits dump already consumed")]
    Exhausted,
    #[error(transparent)]
    Score(#[from] ScoreError),
}

/// Hands out a recorded logits tensor once.
pub struct ReplayOracle {
    logits: Option<LogitsTensor>,
}

impl ReplayOracle {
    pub fn new(logits: LogitsTensor) -> Self {
        Self {
            logits: Some(logits),
        }
    }
}

impl InferenceOracle for ReplayOracle {
    type Error = ReplayError;

    fn run(&mut self, _input: &OracleInput<'_>) -> Result<LogitsTensor, ReplayError> {
        self.logits.take().ok_or(ReplayError::Exhausted)
    }
}

pub fn load_dump(path: &Path) -> Result<LogitsDump, ReplayError> {
    let content = fs::read_to_string(path).map_err(|source| ReplayError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Score every sequence of `dump` in one batch.
pub fn replay(dump: LogitsDump, config: ScorerConfig) -> Result<Vec<SequenceReport>, ReplayError> {
    if !dump.texts.is_empty() && dump.texts.len() != dump.sequences.len() {
        return Err(ReplayError::Labels {
            texts: dump.texts.len(),
            sequences: dump.sequences.len(),
        });
    }
    let logits = LogitsTensor::new(dump.shape, dump.logits)?;
    let mut texts = dump.texts.into_iter();
    let sequences: Vec<Sequence> = dump
        .sequences
        .into_iter()
        .map(|tokens| match texts.next() {
            Some(text) => Sequence::with_text(text, tokens),
            None => Sequence::new(tokens),
        })
        .collect();

    let mut scorer = BatchScorer::with_config(ReplayOracle::new(logits), config);
    let trajectories = scorer.try_score(&sequences, dump.eos_id)?;
    Ok(sequences
        .iter()
        .zip(&trajectories)
        .enumerate()
        .map(|(i, (seq, trajectory))| SequenceReport::new(i, seq, trajectory))
        .collect())
}

pub fn replay_cmd(file: &str, json: bool) {
    let dump = die!(load_dump(Path::new(file)), "Error: {}");
    let config = ScorerConfig::from_settings(settings());
    let reports = die!(replay(dump, config), "Error scoring batch: {}");
    print_reports(&reports, json);
}
