//! Embedding provider seam.
//!
//! The store computes embeddings lazily and treats provider failure as a
//! degradation, never an error: writes always succeed, and search falls back
//! to tag+recency ranking until the sidecar is filled.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimension.
    fn dimension(&self) -> usize;

    /// Normalize text before embedding.
    fn normalize_text(&self, text: &str) -> String {
        text.trim()
            .chars()
            .filter(|c| !c.is_control())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Deterministic offline embedder: hashed token projection, L2-normalized.
/// Not a semantic model - it makes identical and near-identical texts close,
/// which is enough for the core to work without a backend and for tests to
/// be reproducible.
pub struct HashedTokenEmbedder {
    dimension: usize,
}

impl HashedTokenEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashedTokenEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashedTokenEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let normalized = self.normalize_text(text).to_lowercase();
        let mut vector = vec![0.0_f32; self.dimension];
        for token in normalized.split_whitespace() {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x1000_0000_01b3);
            }
            let slot = (hash % self.dimension as u64) as usize;
            // Sign from a second hash bit keeps buckets from only adding up.
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Always-failing provider for exercising the degraded search path.
#[cfg(test)]
pub struct FailingEmbedder;

#[cfg(test)]
#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("embedding backend unavailable")
    }

    fn dimension(&self) -> usize {
        256
    }
}
