//! Local feature-hashing embedder
//!
//! Word unigrams, word bigrams, and character trigrams are hashed into a
//! fixed number of signed buckets and the result is L2-normalized. Vectors are
//! deterministic across processes, so exemplar caches built with this
//! provider stay comparable with query vectors.

use super::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const UNIGRAM_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.7;
const TRIGRAM_WEIGHT: f32 = 0.35;
const STOPWORD_WEIGHT: f32 = 0.25;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "my", "me", "i", "to", "of", "for", "on", "in", "at", "is", "are", "please",
    "can", "you", "could", "would",
];

/// Deterministic bag-of-features embedder
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(16),
        }
    }

    /// Compute the embedding synchronously
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let words = tokenize(text);

        for word in &words {
            let weight = if STOPWORDS.contains(&word.as_str()) {
                STOPWORD_WEIGHT
            } else {
                UNIGRAM_WEIGHT
            };
            self.add_feature(&mut vector, "w", word, weight);

            let padded: Vec<char> = format!("#{word}#").chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut vector, "c", &trigram, TRIGRAM_WEIGHT);
            }
        }

        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vector, "b", &bigram, BIGRAM_WEIGHT);
        }

        normalize(&mut vector);
        vector
    }

    fn add_feature(&self, vector: &mut [f32], namespace: &str, feature: &str, weight: f32) {
        let hash = fnv1a(namespace.as_bytes(), feature.as_bytes());
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "local-hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(self.embed_text(text))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn fnv1a(namespace: &[u8], bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in namespace.iter().chain([0u8].iter()).chain(bytes) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_embeddings_are_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(128);
        let a = embedder.embed_text("show my unread emails");
        let b = embedder.embed_text("show my unread emails");

        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_similar_phrases_score_higher_than_unrelated() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed_text("how many unread emails do I have");
        let close = embedder.embed_text("how many emails do I have");
        let far = embedder.embed_text("forward this to the team");

        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn test_minimum_dimensions() {
        assert_eq!(HashingEmbedder::new(2).dimensions(), 16);
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected() {
        let embedder = HashingEmbedder::default();
        assert!(matches!(
            embedder.embed("   ").await,
            Err(EmbeddingError::EmptyInput)
        ));
        assert!(embedder.embed("list tasks").await.is_ok());
    }
}
