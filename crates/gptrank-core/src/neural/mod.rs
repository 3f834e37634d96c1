//! GGUF-backed GPT-2 oracle and tokenizer.
//!
//! Loads a quantized GPT-2 and its byte-level BPE vocabulary from one GGUF
//! file. [`QuantizedGpt2`] implements [`InferenceOracle`](crate::oracle::InferenceOracle)
//! and [`BpeTokenizer`] implements [`Tokenizer`](crate::oracle::Tokenizer), so
//! both plug straight into [`BatchScorer`].

mod gpt2;
mod tokenizer;

use std::path::Path;

use candle_core::Device;
use tracing::debug_span;

use crate::scorer::{BatchScorer, ScorerConfig};
use crate::search::{self, SearchHit};

pub use gpt2::QuantizedGpt2;
pub use tokenizer::BpeTokenizer;

pub struct NeuralModel {
    model: QuantizedGpt2,
    tokenizer: BpeTokenizer,
}

impl NeuralModel {
    /// Load model weights and tokenizer from a GGUF file.
    pub fn open(model_path: &Path) -> anyhow::Result<Self> {
        let _span = debug_span!("open_model", path = %model_path.display()).entered();
        let device = Device::Cpu;

        let mut file = std::fs::File::open(model_path)?;
        let content = candle_core::quantized::gguf_file::Content::read(&mut file)
            .map_err(|e| anyhow::anyhow!("failed to read GGUF: {e}"))?;
        let tokenizer = BpeTokenizer::from_gguf(&content)?;
        drop(file); // Close file before loading model (which reopens it)
        let model = QuantizedGpt2::from_gguf(model_path, &device)?;

        Ok(Self { model, tokenizer })
    }

    pub fn tokenizer(&self) -> &BpeTokenizer {
        &self.tokenizer
    }

    pub fn model(&self) -> &QuantizedGpt2 {
        &self.model
    }

    /// Split into the tokenizer and a scorer driving the model.
    pub fn into_scorer(self, config: ScorerConfig) -> (BpeTokenizer, BatchScorer<QuantizedGpt2>) {
        (self.tokenizer, BatchScorer::with_config(self.model, config))
    }

    /// Map each input embedding of `tokens` back to its nearest vocabulary row.
    ///
    /// For position `p` the model's input is `wte[t] + wpe[p]`; removing
    /// `wpe[p]` and searching the token table should land on `t` again.
    pub fn nearest_tokens(&self, tokens: &[u32]) -> anyhow::Result<Vec<SearchHit>> {
        let _span = debug_span!("nearest_tokens", n = tokens.len()).entered();
        let token_table = self.model.token_table()?;
        let position_table = self.model.position_table()?;
        let hidden = self.model.input_embeddings(tokens)?.to_vec2::<f32>()?;

        let mut hits = Vec::with_capacity(tokens.len());
        for (position, mut row) in hidden.into_iter().enumerate() {
            search::subtract_position(&mut row, &position_table, position)?;
            hits.push(search::find_best(&row, &token_table)?);
        }
        Ok(hits)
    }
}
