//! Sentence reranking by language-model likelihood.
//!
//! The pipeline runs bottom-up: [`tensor::AlignedBuffer`] holds the logits
//! returned by an [`oracle::InferenceOracle`], [`kernels`] reduce them,
//! [`probability`] turns rows into token probabilities and
//! [`scorer::BatchScorer`] assembles one [`scorer::ScoreTrajectory`] per
//! candidate sequence.

pub mod batch;
pub mod error;
pub mod kernels;
#[cfg(feature = "neural")]
pub mod neural;
pub mod oracle;
pub mod probability;
pub mod scorer;
pub mod search;
pub mod settings;
pub mod tensor;
pub mod trace_init;

pub use batch::{Batch, Sequence};
pub use error::{Result, ScoreError};
pub use oracle::{InferenceOracle, LogitsTensor, OracleInput, Tokenizer};
pub use probability::Normalization;
pub use scorer::{BatchScorer, RankedSentence, ScoreTrajectory, ScorerConfig};
pub use tensor::{AlignedBuffer, LogitsView};
