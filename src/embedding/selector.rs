//! Construction-time choice between the preferred and fallback embedders

use super::{EmbeddingError, EmbeddingProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The provider that successfully embedded the exemplar set
pub struct SelectedEmbedder {
    pub provider: Arc<dyn EmbeddingProvider>,
    /// Exemplar vectors, in input order
    pub vectors: Vec<Vec<f32>>,
    /// Whether the fallback provider had to be used
    pub used_fallback: bool,
}

impl std::fmt::Debug for SelectedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedEmbedder")
            .field("provider", &self.provider.name())
            .field("vectors", &self.vectors.len())
            .field("used_fallback", &self.used_fallback)
            .finish()
    }
}

/// Picks an embedding provider by trying to embed the exemplar set
///
/// The preferred provider is tried first. If it errors or times out the
/// fallback embeds everything instead, so exemplar and query vectors always
/// come from the same provider.
pub struct EmbeddingSelector {
    preferred: Option<Arc<dyn EmbeddingProvider>>,
    fallback: Option<Arc<dyn EmbeddingProvider>>,
    timeout: Duration,
}

impl EmbeddingSelector {
    pub fn new(
        preferred: Option<Arc<dyn EmbeddingProvider>>,
        fallback: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            preferred,
            fallback,
            timeout: Duration::from_secs(10),
        }
    }

    /// Bound each initialization attempt
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Select a provider, or `None` when neither can embed the exemplars
    pub async fn select(&self, exemplars: &[String]) -> Option<SelectedEmbedder> {
        if let Some(preferred) = &self.preferred {
            match self.try_provider(preferred, exemplars).await {
                Ok(vectors) => {
                    info!(
                        provider = preferred.name(),
                        exemplars = vectors.len(),
                        "Embedding provider selected"
                    );
                    return Some(SelectedEmbedder {
                        provider: Arc::clone(preferred),
                        vectors,
                        used_fallback: false,
                    });
                }
                Err(e) => warn!(
                    provider = preferred.name(),
                    error = %e,
                    "Preferred embedding provider unavailable, trying fallback"
                ),
            }
        }

        let fallback = self.fallback.as_ref()?;
        match self.try_provider(fallback, exemplars).await {
            Ok(vectors) => {
                info!(
                    provider = fallback.name(),
                    exemplars = vectors.len(),
                    "Fallback embedding provider selected"
                );
                Some(SelectedEmbedder {
                    provider: Arc::clone(fallback),
                    vectors,
                    used_fallback: self.preferred.is_some(),
                })
            }
            Err(e) => {
                warn!(
                    provider = fallback.name(),
                    error = %e,
                    "No embedding provider could initialize, semantic signal disabled"
                );
                None
            }
        }
    }

    /// Exemplar vectors from the fallback provider, kept on standby when the
    /// preferred provider won selection
    pub async fn standby(
        &self,
        selected: &SelectedEmbedder,
        exemplars: &[String],
    ) -> Option<SelectedEmbedder> {
        if self.preferred.is_none() || selected.used_fallback {
            return None;
        }
        let fallback = self.fallback.as_ref()?;
        match self.try_provider(fallback, exemplars).await {
            Ok(vectors) => {
                info!(provider = fallback.name(), "Standby embedding provider ready");
                Some(SelectedEmbedder {
                    provider: Arc::clone(fallback),
                    vectors,
                    used_fallback: true,
                })
            }
            Err(e) => {
                warn!(provider = fallback.name(), error = %e, "Standby embedding provider unavailable");
                None
            }
        }
    }

    async fn try_provider(
        &self,
        provider: &Arc<dyn EmbeddingProvider>,
        exemplars: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = tokio::time::timeout(self.timeout, provider.embed_batch(exemplars))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.timeout.as_millis() as u64))??;

        if vectors.len() != exemplars.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                exemplars.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}
