//! Byte-level BPE tokenizer built from GGUF metadata.
//!
//! The GGUF file embeds `tokenizer.ggml.tokens` and `tokenizer.ggml.merges`.
//! Text is encoded as UTF-8 bytes, each byte is mapped to a displayable
//! character through the GPT-2 byte table, and merges are applied lowest
//! rank first until no ranked pair remains.

use std::collections::HashMap;
use std::convert::Infallible;

use candle_core::quantized::gguf_file;

use crate::oracle::Tokenizer;

/// Token strings matched atomically when the GGUF carries no token types.
const DEFAULT_SPECIALS: &[&str] = &[
    "<|endoftext|>",
    "<s>",
    "</s>",
    "<unk>",
    "<pad>",
    "[UNK]",
    "[PAD]",
];

const UNK_CANDIDATES: &[&str] = &["<unk>", "[UNK]", "<|endoftext|>"];

/// `tokenizer.ggml.token_type` values that mark control / user-defined tokens.
const TOKEN_TYPE_CONTROL: i32 = 3;
const TOKEN_TYPE_USER_DEFINED: i32 = 4;

pub struct BpeTokenizer {
    token_to_id: HashMap<String, u32>,
    id_to_token: Vec<String>,
    /// `"left right"` → merge rank (lower merges first)
    merge_ranks: HashMap<String, usize>,
    /// Atomic tokens, longest first.
    specials: Vec<(String, u32)>,
    unk_id: u32,
    eos_id: u32,
    byte_to_char: [char; 256],
    char_to_byte: HashMap<char, u8>,
}

impl BpeTokenizer {
    /// Build the tokenizer from GGUF metadata.
    pub fn from_gguf(content: &gguf_file::Content) -> anyhow::Result<Self> {
        let tokens = get_string_array(&content.metadata, "tokenizer.ggml.tokens")?;
        let merges = get_string_array(&content.metadata, "tokenizer.ggml.merges")?;
        let token_types = content
            .metadata
            .get("tokenizer.ggml.token_type")
            .and_then(|v| v.to_vec().ok())
            .map(|arr| arr.iter().map(|v| v.to_i32().unwrap_or(0)).collect::<Vec<_>>());
        let eos_id = content
            .metadata
            .get("tokenizer.ggml.eos_token_id")
            .and_then(|v| v.to_u32().ok());
        Self::from_parts(tokens, &merges, token_types.as_deref(), eos_id)
    }

    /// Build from a vocabulary, merge lines (`"left right"`), optional token
    /// types and optional EOS id.
    ///
    /// EOS falls back to `</s>`, then `<|endoftext|>`.
    pub fn from_parts(
        tokens: Vec<String>,
        merges: &[String],
        token_types: Option<&[i32]>,
        eos_id: Option<u32>,
    ) -> anyhow::Result<Self> {
        if tokens.is_empty() {
            anyhow::bail!("tokenizer vocabulary is empty");
        }
        let token_to_id: HashMap<String, u32> = tokens
            .iter()
            .enumerate()
            .map(|(i, tok)| (tok.clone(), i as u32))
            .collect();

        let merge_ranks: HashMap<String, usize> = merges
            .iter()
            .filter(|line| line.contains(' '))
            .enumerate()
            .map(|(rank, line)| (line.clone(), rank))
            .collect();

        let mut specials: Vec<(String, u32)> = match token_types {
            Some(types) => tokens
                .iter()
                .zip(types)
                .enumerate()
                .filter(|&(_, (_, &t))| t == TOKEN_TYPE_CONTROL || t == TOKEN_TYPE_USER_DEFINED)
                .map(|(i, (tok, _))| (tok.clone(), i as u32))
                .collect(),
            None => DEFAULT_SPECIALS
                .iter()
                .filter_map(|&s| token_to_id.get(s).map(|&id| (s.to_string(), id)))
                .collect(),
        };
        specials.retain(|(s, _)| !s.is_empty());
        specials.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let eos_id = eos_id
            .filter(|&id| (id as usize) < tokens.len())
            .or_else(|| token_to_id.get("</s>").copied())
            .or_else(|| token_to_id.get("<|endoftext|>").copied())
            .ok_or_else(|| anyhow::anyhow!("no end-of-sequence token in vocabulary"))?;
        let unk_id = UNK_CANDIDATES
            .iter()
            .find_map(|s| token_to_id.get(*s).copied())
            .unwrap_or(0);

        let (byte_to_char, char_to_byte) = build_byte_mapping();

        Ok(Self {
            token_to_id,
            id_to_token: tokens,
            merge_ranks,
            specials,
            unk_id,
            eos_id,
            byte_to_char,
            char_to_byte,
        })
    }

    /// Encode text into token ids using byte-level BPE.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::new();
        for segment in self.split_special_tokens(text) {
            match segment {
                Segment::Special(id) => ids.push(id),
                Segment::Text(s) => ids.extend(self.bpe_encode_segment(s)),
            }
        }
        ids
    }

    /// Decode token ids back to text.
    ///
    /// Special tokens are emitted verbatim; everything else goes through the
    /// reverse byte table. Invalid UTF-8 is replaced lossily.
    pub fn decode(&self, tokens: &[u32]) -> String {
        let mut bytes = Vec::new();
        for &id in tokens {
            let Some(tok) = self.id_to_token.get(id as usize) else {
                continue;
            };
            if self.specials.iter().any(|(_, sid)| *sid == id) {
                bytes.extend_from_slice(tok.as_bytes());
                continue;
            }
            for c in tok.chars() {
                match self.char_to_byte.get(&c) {
                    Some(&b) => bytes.push(b),
                    None => {
                        let mut buf = [0u8; 4];
                        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    }
                }
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn vocab_size(&self) -> usize {
        self.id_to_token.len()
    }

    fn bpe_encode_segment(&self, text: &str) -> Vec<u32> {
        let mut symbols: Vec<String> = text
            .bytes()
            .map(|b| self.byte_to_char[b as usize].to_string())
            .collect();

        while symbols.len() > 1 {
            let best = symbols
                .windows(2)
                .filter_map(|pair| self.rank(&pair[0], &pair[1]))
                .min();
            let Some(rank) = best else {
                break;
            };

            // Merge every occurrence of the winning pair, left to right.
            let mut merged = Vec::with_capacity(symbols.len());
            let mut i = 0;
            while i < symbols.len() {
                if i + 1 < symbols.len() && self.rank(&symbols[i], &symbols[i + 1]) == Some(rank) {
                    merged.push(format!("{}{}", symbols[i], symbols[i + 1]));
                    i += 2;
                } else {
                    merged.push(std::mem::take(&mut symbols[i]));
                    i += 1;
                }
            }
            symbols = merged;
        }

        symbols
            .iter()
            .map(|s| self.token_to_id.get(s).copied().unwrap_or(self.unk_id))
            .collect()
    }

    fn rank(&self, left: &str, right: &str) -> Option<usize> {
        self.merge_ranks.get(&format!("{left} {right}")).copied()
    }

    /// Split text into plain segments and atomic special tokens.
    fn split_special_tokens<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        let mut segments = Vec::new();
        let mut remaining = text;

        while !remaining.is_empty() {
            // Earliest match; at equal positions the longest special wins.
            let earliest = self
                .specials
                .iter()
                .filter_map(|(s, id)| remaining.find(s.as_str()).map(|pos| (pos, s.len(), *id)))
                .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

            match earliest {
                Some((pos, len, id)) => {
                    if pos > 0 {
                        segments.push(Segment::Text(&remaining[..pos]));
                    }
                    segments.push(Segment::Special(id));
                    remaining = &remaining[pos + len..];
                }
                None => {
                    segments.push(Segment::Text(remaining));
                    break;
                }
            }
        }

        segments
    }
}

impl Tokenizer for BpeTokenizer {
    type Error = Infallible;

    fn encode(&self, text: &str) -> Result<Vec<u32>, Infallible> {
        Ok(BpeTokenizer::encode(self, text))
    }

    fn eos_id(&self) -> u32 {
        self.eos_id
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Special(u32),
}

/// Build the GPT-2 byte-to-unicode mapping table.
///
/// Printable ASCII (33-126) and Latin-1 (161-172, 174-255) map to themselves;
/// every other byte maps to U+0100 onwards in byte order.
fn build_byte_mapping() -> ([char; 256], HashMap<char, u8>) {
    let mut byte_to_char = ['\0'; 256];
    let mut char_to_byte = HashMap::with_capacity(256);

    for b in (33u8..=126).chain(161u8..=172).chain(174u8..=255) {
        byte_to_char[b as usize] = b as char;
        char_to_byte.insert(b as char, b);
    }

    let mut remapped = (0x100u32..).filter_map(char::from_u32);
    for b in 0u8..=255 {
        if byte_to_char[b as usize] == '\0' {
            if let Some(c) = remapped.next() {
                byte_to_char[b as usize] = c;
                char_to_byte.insert(c, b);
            }
        }
    }

    (byte_to_char, char_to_byte)
}

/// Extract a string array from GGUF metadata.
fn get_string_array(
    metadata: &HashMap<String, gguf_file::Value>,
    key: &str,
) -> anyhow::Result<Vec<String>> {
    let value = metadata
        .get(key)
        .ok_or_else(|| anyhow::anyhow!("missing GGUF metadata key: {key}"))?;
    let arr = value
        .to_vec()
        .map_err(|e| anyhow::anyhow!("metadata key {key} is not an array: {e}"))?;
    arr.iter()
        .map(|v| {
            v.to_string()
                .cloned()
                .map_err(|e| anyhow::anyhow!("non-string element in {key}: {e}"))
        })
        .collect()
}
