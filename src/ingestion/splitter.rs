//! Character-window chunking and token estimation.
//!
//! Chunk boundaries are fixed-size character windows derived from a token budget using a
//! constant characters-per-token ratio. Windows overlap so that text near a boundary stays
//! visible to retrieval from both sides. Token estimates used for rate limiting prefer
//! `tiktoken-rs` and fall back to the same ratio when no encoding is available.

use super::types::{Chunk, ChunkingError};
use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model};

/// Average characters per token used to convert token budgets into character windows.
pub const CHARS_PER_TOKEN: f64 = 3.5;

/// Convert a token budget into a character count.
pub fn tokens_to_chars(tokens: usize) -> usize {
    (tokens as f64 * CHARS_PER_TOKEN).round() as usize
}

/// Splits text into overlapping character windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSplitter {
    chunk_chars: usize,
    overlap_chars: usize,
}

impl ChunkSplitter {
    /// Build a splitter from token budgets. Overlap is clamped below the chunk size so the
    /// window always advances.
    pub fn new(chunk_tokens: usize, overlap_tokens: usize) -> Result<Self, ChunkingError> {
        let chunk_chars = tokens_to_chars(chunk_tokens);
        if chunk_chars == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        let overlap_chars = tokens_to_chars(overlap_tokens).min(chunk_chars - 1);
        Ok(Self {
            chunk_chars,
            overlap_chars,
        })
    }

    /// Window length in characters.
    pub fn chunk_chars(&self) -> usize {
        self.chunk_chars
    }

    /// Overlap between adjacent windows in characters.
    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    /// Split `text` into chunks indexed `0..n` in document order.
    ///
    /// Windows holding only whitespace are skipped without leaving a gap in the indices.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_count = boundaries.len() - 1;
        let stride = self.chunk_chars - self.overlap_chars;

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_chars).min(char_count);
            let window = &text[boundaries[start]..boundaries[end]];
            if !window.trim().is_empty() {
                chunks.push(Chunk {
                    index: chunks.len(),
                    text: window.to_string(),
                });
            }
            if end == char_count {
                break;
            }
            start += stride;
        }
        chunks
    }
}

/// Split `text` using token budgets; see [`ChunkSplitter::split`].
pub fn split_into_chunks(
    text: &str,
    chunk_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<Chunk>, ChunkingError> {
    Ok(ChunkSplitter::new(chunk_tokens, overlap_tokens)?.split(text))
}

/// Estimates token counts for rate-limiter accounting.
#[derive(Clone)]
pub struct TokenEstimator {
    encoding: Option<Arc<CoreBPE>>,
}

impl TokenEstimator {
    /// Use the tokenizer of `model` when `tiktoken-rs` knows it, `cl100k_base` otherwise.
    pub fn for_model(model: &str) -> Self {
        let encoding = match get_bpe_from_model(model.trim()) {
            Ok(encoding) => Ok(encoding),
            Err(error) => {
                tracing::debug!(model, error = %error, "Tokenizer lookup failed; using cl100k_base");
                cl100k_base()
            }
        };
        match encoding {
            Ok(encoding) => Self {
                encoding: Some(Arc::new(encoding)),
            },
            Err(error) => {
                tracing::warn!(error = %error, "Tokenizer unavailable; estimating tokens from characters");
                Self::heuristic()
            }
        }
    }

    /// Estimate from the characters-per-token ratio only.
    pub fn heuristic() -> Self {
        Self { encoding: None }
    }

    /// Estimated token count of `text`.
    pub fn estimate(&self, text: &str) -> u64 {
        match &self.encoding {
            Some(encoding) => encoding.encode_ordinary(text).len() as u64,
            None => (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as u64,
        }
    }
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("tiktoken", &self.encoding.is_some())
            .finish()
    }
}
