//! Embeddings
//!
//! The engine calls embedding models through the [`Embedder`] trait so tests
//! and offline deployments can substitute backends:
//!
//! - [`HashEmbedder`] - deterministic token-hash embeddings, always available
//! - `LocalEmbedder` - fastembed (ONNX) inference behind the `embeddings`
//!   feature
//!
//! Vectors are persisted as packed little-endian `f32` blobs. Every read
//! validates that the byte length equals `dimensions * 4`; a mis-sized blob
//! corrupts the vector space and is rejected as an integrity violation.

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
mod local;

#[cfg(feature = "embeddings")]
pub use local::LocalEmbedder;

use crate::error::{Result, VesperError};

// ============================================================================
// EMBEDDER TRAIT
// ============================================================================

/// Embedding backend abstraction
///
/// Implementations must produce vectors of exactly `dimensions()` length.
pub trait Embedder: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Fixed output dimension D
    fn dimensions(&self) -> usize;
}

// ============================================================================
// EMBEDDING BLOB CODEC
// ============================================================================

/// A validated embedding vector
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// The vector, exactly `dimensions` long
    pub vector: Vec<f32>,
}

impl Embedding {
    /// Wrap a vector, checking its length against the configured dimension
    pub fn new(vector: Vec<f32>, dimensions: usize) -> Result<Self> {
        if vector.len() != dimensions {
            return Err(VesperError::Integrity(format!(
                "Embedding has {} dimensions, expected {}",
                vector.len(),
                dimensions
            )));
        }
        Ok(Self { vector })
    }

    /// Serialize as packed little-endian f32 bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize from bytes, failing fast unless `bytes.len() == dims * 4`
    pub fn from_bytes(bytes: &[u8], dimensions: usize) -> Result<Self> {
        if bytes.len() != dimensions * 4 {
            return Err(VesperError::Integrity(format!(
                "Embedding blob is {} bytes, expected {} ({} * 4)",
                bytes.len(),
                dimensions * 4,
                dimensions
            )));
        }
        let vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self { vector })
    }
}

// ============================================================================
// SIMILARITY
// ============================================================================

/// Cosine similarity with an explicit zero-norm guard.
///
/// Mismatched lengths and zero-norm inputs score 0 rather than erroring so
/// ranking loops stay total.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot_product / denominator
    } else {
        0.0
    }
}

/// Elementwise difference `b - a`, the relational "edit" between two vectors
pub fn vector_difference(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| y - x).collect()
}

/// Elementwise sum `a + b`
pub fn vector_sum(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
}

// ============================================================================
// HASH EMBEDDER
// ============================================================================

/// Deterministic token-hash embedder
///
/// Each lowercase whitespace token is hashed into a pseudo-random unit
/// direction; the text embedding is the L2-normalized sum of its token
/// directions. Shared tokens therefore pull texts together, which gives the
/// compositional behavior analogical search relies on, with zero model
/// downloads and stable output across runs.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Create a hash embedder with the given output dimension
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn token_direction(&self, token: &str) -> Vec<f32> {
        let mut state = fnv1a64(token.as_bytes());
        (0..self.dimensions)
            .map(|_| {
                state = splitmix64(state);
                // Map the top 24 bits onto [-1, 1]
                let bits = (state >> 40) as u32;
                (bits as f32 / 8_388_607.5) - 1.0
            })
            .collect()
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(VesperError::validation("text", "cannot be empty"));
        }

        let mut sum = vec![0.0_f32; self.dimensions];
        for token in text.to_lowercase().split_whitespace() {
            for (acc, x) in sum.iter_mut().zip(self.token_direction(token)) {
                *acc += x;
            }
        }

        let norm = sum.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut sum {
                *x /= norm;
            }
        }
        Ok(sum)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// FNV-1a 64-bit hash; stable across platforms and releases
fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// SplitMix64 state advance; expands one seed into a value stream
fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

// ============================================================================
// TESTS
// ============================================================================
