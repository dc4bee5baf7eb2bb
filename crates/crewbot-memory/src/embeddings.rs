//! Embedding plumbing: the `Embedder` trait, byte packing, and cosine
//! similarity.
//!
//! All stored embeddings share one fixed dimension and are packed as
//! little-endian `f32` arrays. A dimension mismatch on read is a hard
//! error — mixed-dimension stores cannot be compared meaningfully.

use thiserror::Error;

/// Global embedding dimension of the deployment (bge-small family).
pub const EMBEDDING_DIM: usize = 384;

/// Errors from embedding byte handling.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding blob has {actual} bytes, expected {expected} ({dim}-dim f32)")]
    DimensionMismatch {
        actual: usize,
        expected: usize,
        dim: usize,
    },
}

/// Produces fixed-dimension embeddings, deterministically for a given
/// text. Implementations wrap local models or embedding APIs.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Pack an embedding as little-endian f32 bytes.
pub fn pack_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Unpack little-endian f32 bytes, enforcing the global dimension.
pub fn unpack_embedding(bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
    let expected = EMBEDDING_DIM * 4;
    if bytes.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            actual: bytes.len(),
            expected,
            dim: EMBEDDING_DIM,
        });
    }

    let mut values = Vec::with_capacity(EMBEDDING_DIM);
    for chunk in bytes.chunks_exact(4) {
        values.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(values)
}

/// Cosine similarity between two vectors. Zero-length or zero-magnitude
/// vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ─────────────────────────────────────────────
// HashingEmbedder — deterministic local fallback
// ─────────────────────────────────────────────

/// Feature-hashing embedder used when no model is configured.
///
/// Tokenizes on non-alphanumerics, hashes each token (FNV-1a, stable
/// across platforms and releases) into one of the dimension buckets,
/// and L2-normalizes. Deterministic and cheap; good enough for
/// keyword-overlap retrieval, not for semantic nuance.
pub struct HashingEmbedder;

impl HashingEmbedder {
    pub fn new() -> Self {
        HashingEmbedder
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; EMBEDDING_DIM];

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(token.as_bytes()) as usize) % EMBEDDING_DIM;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// FNV-1a 64-bit hash.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
