//! OpenAI-compatible `/embeddings` provider with a per-text cache

use super::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const MAX_CACHE_ENTRIES: usize = 10_000;

/// OpenAI embedding provider configuration
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for OpenAiEmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            timeout: Duration::from_secs(3),
        }
    }
}

/// Network embedding provider
pub struct OpenAiEmbeddingProvider {
    config: OpenAiEmbeddingConfig,
    client: Client,
    cache: RwLock<HashMap<String, Vec<f32>>>,
    dimensions: RwLock<Option<usize>>,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: OpenAiEmbeddingConfig) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::NotConfigured(
                "embedding API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;

        Ok(Self {
            config,
            client,
            cache: RwLock::new(HashMap::new()),
            dimensions: RwLock::new(None),
        })
    }

    /// Number of cached texts
    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn request_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.config.model,
            input: inputs,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout(self.config.timeout.as_millis() as u64)
                } else {
                    EmbeddingError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::RequestFailed(format!(
                "embeddings API error: {status} - {error_text}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        Self::order_embeddings(parsed, inputs.len())
    }

    /// Reorder response data by index and check the count (pure function)
    fn order_embeddings(
        response: EmbeddingResponse,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if response.data.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {expected} embeddings, got {}",
                response.data.len()
            )));
        }

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    async fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<(), EmbeddingError> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let mut known = self.dimensions.write().await;
        let expected = *known.get_or_insert(first.len());
        for vector in vectors {
            if vector.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
            .try_read()
            .ok()
            .and_then(|d| *d)
            .unwrap_or(0)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding batch".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut results: Vec<Option<Vec<f32>>> = {
            let cache = self.cache.read().await;
            texts.iter().map(|t| cache.get(t).cloned()).collect()
        };

        let missing: Vec<String> = texts
            .iter()
            .zip(&results)
            .filter(|(_, cached)| cached.is_none())
            .map(|(text, _)| text.clone())
            .collect();

        if !missing.is_empty() {
            debug!(
                requested = texts.len(),
                uncached = missing.len(),
                model = %self.config.model,
                "Requesting embeddings"
            );
            let fetched = self.request_embeddings(&missing).await?;
            self.check_dimensions(&fetched).await?;

            let mut cache = self.cache.write().await;
            let mut fetched_iter = missing.iter().zip(fetched);
            for slot in results.iter_mut().filter(|r| r.is_none()) {
                if let Some((text, vector)) = fetched_iter.next() {
                    if cache.len() < MAX_CACHE_ENTRIES {
                        cache.insert(text.clone(), vector.clone());
                    } else {
                        warn!("Embedding cache full, not caching new entries");
                    }
                    *slot = Some(vector);
                }
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.ok_or_else(|| EmbeddingError::InvalidResponse("missing embedding".to_string()))
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        assert!(matches!(
            OpenAiEmbeddingProvider::new(OpenAiEmbeddingConfig::default()),
            Err(EmbeddingError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_order_embeddings_sorts_by_index() {
        let response: EmbeddingResponse = serde_json::from_value(serde_json::json!({
            "data": [
                {"embedding": [0.0, 1.0], "index": 1},
                {"embedding": [1.0, 0.0], "index": 0}
            ]
        }))
        .unwrap();

        let ordered = OpenAiEmbeddingProvider::order_embeddings(response, 2).unwrap();
        assert_eq!(ordered[0], vec![1.0, 0.0]);
        assert_eq!(ordered[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_order_embeddings_rejects_wrong_count() {
        let response: EmbeddingResponse =
            serde_json::from_value(serde_json::json!({"data": []})).unwrap();
        assert!(matches!(
            OpenAiEmbeddingProvider::order_embeddings(response, 1),
            Err(EmbeddingError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_input_rejected_before_network() {
        let provider = OpenAiEmbeddingProvider::new(OpenAiEmbeddingConfig {
            api_key: "k".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            provider.embed(" ").await,
            Err(EmbeddingError::EmptyInput)
        ));
    }
}
