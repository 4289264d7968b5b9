//! Deterministic embedding backend.
//!
//! Real embedding models are an out-of-scope external collaborator (spec.md
//! §1), so the shipped default is a hashing bag-of-tokens embedder: no
//! network call, no model weights, stable across restarts. A real model
//! backend is a drop-in `Embedder` impl.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Turns text into a fixed-length vector for cosine-similarity recall.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Vec<f32>;
    fn dims(&self) -> usize;
}

/// Hashes each whitespace token into one of `dims` buckets and accumulates
/// a signed count per bucket, then L2-normalizes. Same text always yields
/// the same vector; similar token sets land close in cosine distance.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0.0f32; self.dims];
        for token in text.split_whitespace() {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bytes: [u8; 8] = digest[0..8].try_into().expect("sha256 digest is >= 8 bytes");
            let h = u64::from_le_bytes(bytes);
            let index = (h % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            buckets[index] += sign;
        }
        let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for b in &mut buckets {
                *b /= norm;
            }
        }
        buckets
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_embeds_identically() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("the quick brown fox").await;
        let b = embedder.embed("the quick brown fox").await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn embedding_is_unit_normalized() {
        let embedder = HashingEmbedder::default();
        let v = embedder.embed("some sample text for normalization").await;
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("explain the http protocol handshake").await;
        let b = embedder.embed("describe the http protocol handshake steps").await;
        let c = embedder.embed("bake a chocolate cake recipe").await;
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }
}
