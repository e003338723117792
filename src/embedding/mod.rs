//! Embedding providers for semantic matching
//!
//! Two interchangeable implementations sit behind [`EmbeddingProvider`]:
//! - [`OpenAiEmbeddingProvider`] calls an OpenAI-compatible `/embeddings`
//!   endpoint and caches vectors per input text.
//! - [`HashingEmbedder`] computes lower-dimensional feature-hashed vectors
//!   locally and never fails.
//!
//! [`EmbeddingSelector`] picks one at construction time.

pub mod local;
pub mod openai;
pub mod selector;

pub use local::HashingEmbedder;
pub use openai::{OpenAiEmbeddingConfig, OpenAiEmbeddingProvider};
pub use selector::{EmbeddingSelector, SelectedEmbedder};

use async_trait::async_trait;
use thiserror::Error;

/// Text embedding provider
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Dimensionality of produced vectors
    fn dimensions(&self) -> usize;

    /// Whether vectors are computed in-process rather than by a model
    fn is_local(&self) -> bool {
        false
    }

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Embedding provider errors
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("Embedding provider not configured: {0}")]
    NotConfigured(String),
    #[error("Embedding request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Embedding timed out after {0}ms")]
    Timeout(u64),
    #[error("Cannot embed empty text")]
    EmptyInput,
}

/// Cosine similarity of two vectors; zero for mismatched or zero-length input
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if similarity.is_nan() {
        0.0
    } else {
        similarity.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
