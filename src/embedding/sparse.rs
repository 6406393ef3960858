//! Deterministic BM25-style sparse term weighting.
//!
//! Sparse vectors are computed locally so they cost no quota and are
//! reproducible across runs: term indices are derived from a SHA-256 prefix
//! of the lowercased term, and values follow the BM25 term-frequency
//! saturation formula with a fixed average document length. The collection's
//! IDF modifier handles the document-frequency half server-side.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Sparse vector in index/value pair form, indices sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SparseVector {
    /// Term hash indices.
    pub indices: Vec<u32>,
    /// BM25 term weights aligned with `indices`.
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Whether the vector carries no terms.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Local BM25 term-weight encoder.
pub struct Bm25SparseEncoder {
    k1: f32,
    b: f32,
    avg_len: f32,
}

impl Default for Bm25SparseEncoder {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            avg_len: 256.0,
        }
    }
}

impl Bm25SparseEncoder {
    /// Encode one text into a sparse vector. Whitespace-only input yields an
    /// empty vector.
    pub fn encode(&self, text: &str) -> SparseVector {
        let tokens: Vec<String> = tokenize(text).collect();
        let doc_len = tokens.len() as f32;

        let mut frequencies: BTreeMap<u32, f32> = BTreeMap::new();
        for token in &tokens {
            *frequencies.entry(term_index(token)).or_default() += 1.0;
        }

        let norm = self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_len);
        let mut indices = Vec::with_capacity(frequencies.len());
        let mut values = Vec::with_capacity(frequencies.len());
        for (index, tf) in frequencies {
            indices.push(index);
            values.push(tf * (self.k1 + 1.0) / (tf + norm));
        }

        SparseVector { indices, values }
    }

    /// Encode a batch, aligned index-for-index with the input.
    pub fn encode_batch(&self, texts: &[String]) -> Vec<SparseVector> {
        texts.iter().map(|text| self.encode(text)).collect()
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= 2)
        .map(str::to_lowercase)
}

/// Stable 32-bit index for a term, taken from its SHA-256 prefix.
fn term_index(token: &str) -> u32 {
    let digest = Sha256::digest(token.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
