//! Quantized GPT-2 model loaded from GGUF format.
//!
//! Architecture: GPT-2 with LayerNorm, learned position embeddings,
//! weight tying (wte == lm_head^T), and gelu_new activation.
//!
//! GGUF tensor names follow the llama.cpp convention for GPT-2. Every call
//! runs the whole padded batch at once and returns logits for every
//! position; there is no KV cache.

use std::path::Path;

use candle_core::quantized::gguf_file;
use candle_core::quantized::QMatMul;
use candle_core::{DType, Device, IndexOp, Module, Result, Tensor};
use candle_nn::{Embedding, LayerNorm};

use crate::oracle::{InferenceOracle, LogitsTensor, OracleInput};
use crate::tensor::AlignedBuffer;

// ---- Configuration ----

struct Gpt2Config {
    n_embd: usize,
    n_head: usize,
    n_layer: usize,
    n_positions: usize,
    vocab_size: usize,
}

impl Gpt2Config {
    fn from_gguf(content: &gguf_file::Content) -> Self {
        let get_u32 = |key: &str, default: u32| -> usize {
            content
                .metadata
                .get(key)
                .and_then(|v| v.to_u32().ok())
                .unwrap_or(default) as usize
        };
        Self {
            n_embd: get_u32("gpt2.embedding_length", 768),
            n_head: get_u32("gpt2.attention.head_count", 12),
            n_layer: get_u32("gpt2.block_count", 12),
            n_positions: get_u32("gpt2.context_length", 1024),
            vocab_size: get_u32("gpt2.vocab_size", 50257),
        }
    }

    fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }
}

// ---- Attention ----

struct Attention {
    qkv: QMatMul,
    qkv_bias: Tensor,
    out_proj: QMatMul,
    out_bias: Tensor,
    n_head: usize,
    head_dim: usize,
}

impl Attention {
    /// `mask`: additive `[batch, 1, seq, seq]`, 0 or -inf.
    fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, n_embd) = x.dims3()?;
        let head_dim = self.head_dim;
        let n_head = self.n_head;

        // QKV projection: [batch, seq, 3*n_embd]
        let qkv = self.qkv.forward(x)?.broadcast_add(&self.qkv_bias)?;
        let qkv = qkv.reshape((batch, seq_len, 3, n_head, head_dim))?;

        // each [batch, n_head, seq, head_dim]
        let q = qkv.i((.., .., 0))?.transpose(1, 2)?.contiguous()?;
        let k = qkv.i((.., .., 1))?.transpose(1, 2)?.contiguous()?;
        let v = qkv.i((.., .., 2))?.transpose(1, 2)?.contiguous()?;

        let scale = (head_dim as f64).sqrt();
        let attn_weights = (q.matmul(&k.transpose(2, 3)?)? / scale)?;
        let attn_weights = attn_weights.broadcast_add(mask)?;
        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights)?;
        let attn_out = attn_weights.matmul(&v)?;

        let attn_out = attn_out
            .transpose(1, 2)?
            .reshape((batch, seq_len, n_embd))?;

        self.out_proj
            .forward(&attn_out)?
            .broadcast_add(&self.out_bias)
    }
}

/// Causal mask combined with the key padding mask.
///
/// Query `i` of row `b` may attend to key `j` iff `j <= i` and `j` is a real
/// token. Key 0 is always real, so no query row is fully masked.
fn create_attention_mask(
    padding: &[u8],
    batch: usize,
    seq_len: usize,
    device: &Device,
) -> Result<Tensor> {
    let mut mask = Vec::with_capacity(batch * seq_len * seq_len);
    for keys in padding.chunks_exact(seq_len).take(batch) {
        for i in 0..seq_len {
            mask.extend(keys.iter().enumerate().map(|(j, &real)| {
                if j <= i && real != 0 {
                    0.0f32
                } else {
                    f32::NEG_INFINITY
                }
            }));
        }
    }
    Tensor::from_vec(mask, (batch, 1, seq_len, seq_len), device)
}

// ---- MLP ----

struct Mlp {
    fc: QMatMul,
    fc_bias: Tensor,
    proj: QMatMul,
    proj_bias: Tensor,
}

impl Mlp {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.fc.forward(x)?.broadcast_add(&self.fc_bias)?;
        let h = gelu_new(&h)?;
        self.proj.forward(&h)?.broadcast_add(&self.proj_bias)
    }
}

/// GPT-2's gelu_new activation: 0.5 * x * (1 + tanh(sqrt(2/pi) * (x + 0.044715 * x^3)))
fn gelu_new(x: &Tensor) -> Result<Tensor> {
    let x3 = x.powf(3.0)?;
    let inner = ((x + (x3 * 0.044715)?)? * (2.0f64 / std::f64::consts::PI).sqrt())?;
    let tanh_inner = inner.tanh()?;
    (x * (tanh_inner + 1.0)?)? * 0.5
}

// ---- Transformer Block ----

struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let h = self.attn.forward(&self.ln_1.forward(x)?, mask)?;
        let x = (x + h)?;
        let h = self.mlp.forward(&self.ln_2.forward(&x)?)?;
        x + h
    }
}

// ---- Full GPT-2 Model ----

pub struct QuantizedGpt2 {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Option<QMatMul>,
    config: Gpt2Config,
}

/// Reads tensors of one GGUF file by name.
struct GgufReader<'a> {
    content: &'a gguf_file::Content,
    file: std::fs::File,
    device: &'a Device,
}

impl GgufReader<'_> {
    /// Load and dequantize a tensor.
    fn tensor(&mut self, name: &str) -> anyhow::Result<Tensor> {
        let qt = self
            .content
            .tensor(&mut self.file, name, self.device)
            .map_err(|e| anyhow::anyhow!("failed to load tensor {name}: {e}"))?;
        qt.dequantize(self.device)
            .map_err(|e| anyhow::anyhow!("failed to dequantize {name}: {e}"))
    }

    /// Load a quantized tensor as QMatMul.
    fn qmatmul(&mut self, name: &str) -> anyhow::Result<QMatMul> {
        let qt = self
            .content
            .tensor(&mut self.file, name, self.device)
            .map_err(|e| anyhow::anyhow!("failed to load tensor {name}: {e}"))?;
        QMatMul::from_qtensor(qt)
            .map_err(|e| anyhow::anyhow!("failed to create QMatMul for {name}: {e}"))
    }

    fn layer_norm(&mut self, prefix: &str) -> anyhow::Result<LayerNorm> {
        Ok(LayerNorm::new(
            self.tensor(&format!("{prefix}.weight"))?,
            self.tensor(&format!("{prefix}.bias"))?,
            1e-5,
        ))
    }
}

impl QuantizedGpt2 {
    /// Load a quantized GPT-2 model from a GGUF file.
    pub fn from_gguf(path: &Path, device: &Device) -> anyhow::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let content = gguf_file::Content::read(&mut file)
            .map_err(|e| anyhow::anyhow!("failed to read GGUF: {e}"))?;
        let config = Gpt2Config::from_gguf(&content);
        if config.n_head == 0 || config.n_embd % config.n_head != 0 {
            anyhow::bail!(
                "embedding length {} is not divisible by head count {}",
                config.n_embd,
                config.n_head
            );
        }

        let mut reader = GgufReader {
            content: &content,
            file,
            device,
        };

        // Embeddings (typically F16/F32 in GGUF, not quantized)
        let wte = Embedding::new(reader.tensor("token_embd.weight")?, config.n_embd);
        let wpe = Embedding::new(reader.tensor("position_embd.weight")?, config.n_embd);

        let mut blocks = Vec::with_capacity(config.n_layer);
        for i in 0..config.n_layer {
            let ln_1 = reader.layer_norm(&format!("blk.{i}.attn_norm"))?;
            let attn = Attention {
                qkv: reader.qmatmul(&format!("blk.{i}.attn_qkv.weight"))?,
                qkv_bias: reader.tensor(&format!("blk.{i}.attn_qkv.bias"))?,
                out_proj: reader.qmatmul(&format!("blk.{i}.attn_output.weight"))?,
                out_bias: reader.tensor(&format!("blk.{i}.attn_output.bias"))?,
                n_head: config.n_head,
                head_dim: config.head_dim(),
            };
            let ln_2 = reader.layer_norm(&format!("blk.{i}.ffn_norm"))?;
            let mlp = Mlp {
                fc: reader.qmatmul(&format!("blk.{i}.ffn_up.weight"))?,
                fc_bias: reader.tensor(&format!("blk.{i}.ffn_up.bias"))?,
                proj: reader.qmatmul(&format!("blk.{i}.ffn_down.weight"))?,
                proj_bias: reader.tensor(&format!("blk.{i}.ffn_down.bias"))?,
            };
            blocks.push(Block {
                ln_1,
                attn,
                ln_2,
                mlp,
            });
        }

        let ln_f = reader.layer_norm("output_norm")?;

        // lm_head: may be absent if weight tying (use wte instead)
        let lm_head = if content.tensor_infos.contains_key("output.weight") {
            Some(reader.qmatmul("output.weight")?)
        } else {
            None
        };

        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            lm_head,
            config,
        })
    }

    /// Token plus position embeddings for one unpadded sequence: `[seq, n_embd]`.
    pub fn input_embeddings(&self, tokens: &[u32]) -> Result<Tensor> {
        let device = self.wte.embeddings().device();
        let token_ids = Tensor::new(tokens, device)?;
        let pos_ids = Tensor::arange(0u32, tokens.len() as u32, device)?;
        self.wte.forward(&token_ids)? + self.wpe.forward(&pos_ids)?
    }

    /// Run the padded batch and return logits for every position:
    /// `[batch, seq_len, vocab_size]`.
    pub fn forward_batch(&self, input: &OracleInput<'_>) -> anyhow::Result<Tensor> {
        let (batch, seq_len) = (input.batch, input.seq_len);
        if seq_len > self.config.n_positions {
            anyhow::bail!(
                "sequence length {seq_len} exceeds the model context of {}",
                self.config.n_positions
            );
        }
        let device = self.wte.embeddings().device().clone();

        let token_ids = Tensor::from_vec(input.tokens.to_vec(), (batch, seq_len), &device)?;
        let pos_ids = Tensor::arange(0u32, seq_len as u32, &device)?;
        let mut h = self
            .wte
            .forward(&token_ids)?
            .broadcast_add(&self.wpe.forward(&pos_ids)?)?;

        let mask = create_attention_mask(input.mask, batch, seq_len, &device)?;
        for block in &self.blocks {
            h = block.forward(&h, &mask)?;
        }
        let h = self.ln_f.forward(&h)?;

        let logits = match &self.lm_head {
            Some(lm_head) => lm_head.forward(&h)?,
            // Weight tying: logits = h @ wte.T
            None => h.broadcast_matmul(&self.wte.embeddings().t()?)?,
        };
        Ok(logits)
    }

    /// Token embedding table `[vocab, n_embd]` as an aligned buffer.
    pub fn token_table(&self) -> anyhow::Result<AlignedBuffer> {
        embedding_table(self.wte.embeddings())
    }

    /// Position embedding table `[n_positions, n_embd]` as an aligned buffer.
    pub fn position_table(&self) -> anyhow::Result<AlignedBuffer> {
        embedding_table(self.wpe.embeddings())
    }

    /// Get model configuration summary.
    pub fn config_summary(&self) -> String {
        format!(
            "GPT-2: {}L/{}H/{}E, vocab={}, ctx={}",
            self.config.n_layer,
            self.config.n_head,
            self.config.n_embd,
            self.config.vocab_size,
            self.config.n_positions,
        )
    }
}

fn embedding_table(weights: &Tensor) -> anyhow::Result<AlignedBuffer> {
    let (rows, cols) = weights.dims2()?;
    let data = weights.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    Ok(AlignedBuffer::with_shape(rows, cols, Some(&data))?)
}

impl InferenceOracle for QuantizedGpt2 {
    type Error = anyhow::Error;

    fn run(&mut self, input: &OracleInput<'_>) -> anyhow::Result<LogitsTensor> {
        let logits = self.forward_batch(input)?;
        let (batch, seq_len, vocab) = logits.dims3()?;
        let data = logits.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        Ok(LogitsTensor::new([batch, seq_len, vocab], data)?)
    }
}
