//! Mock implementations for testing
//!
//! Provides mock LlmProvider, EmbeddingProvider, and ActionExecutor
//! implementations so routing can be exercised without network services.

use crate::dispatch::ActionExecutor;
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::error::ExecutionError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::types::{Action, Entities};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Mock LLM provider for testing
///
/// Responses are returned in order and cycle once exhausted. Every request
/// is recorded, including ones the mock rejects.
#[derive(Debug)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub current_response: Arc<Mutex<usize>>,
    pub should_fail: bool,
    structured_support: bool,
    reject_structured: bool,
    delay: Option<Duration>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            current_response: Arc::new(Mutex::new(0)),
            should_fail: false,
            structured_support: true,
            reject_structured: false,
            delay: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Report no structured output support
    pub fn without_structured_output(mut self) -> Self {
        self.structured_support = false;
        self
    }

    /// Claim structured output support but reject schema requests
    pub fn rejecting_structured_output(mut self) -> Self {
        self.reject_structured = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_structured_output(&self) -> bool {
        self.structured_support
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let structured = request.is_structured();
        self.requests.lock().await.push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }
        if structured && self.reject_structured {
            return Err(LlmError::Unsupported(
                "response_format json_schema".to_string(),
            ));
        }

        let mut current = self.current_response.lock().await;
        let response_idx = *current % self.responses.len().max(1);
        *current += 1;

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[response_idx].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::RequestFailed(
                "Mock health check failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Mock embedding provider with deterministic hash vectors
///
/// Identical texts embed identically; unrelated texts are close to
/// orthogonal. A batch call counts as one call for `failing_after`.
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
    should_fail: bool,
    fail_after: Option<usize>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            should_fail: false,
            fail_after: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Succeed for the first `calls` calls, then fail
    pub fn failing_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn begin_call(&self) -> Result<(), EmbeddingError> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let exhausted = self.fail_after.is_some_and(|limit| previous >= limit);
        if self.should_fail || exhausted {
            return Err(EmbeddingError::RequestFailed(
                "Mock embedding failure".to_string(),
            ));
        }
        Ok(())
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text.to_lowercase().split_whitespace() {
            let hash = word
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                    (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
                });
            vector[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock-embedding"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.begin_call().await?;
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.begin_call().await?;
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Mock domain executor that records every call
///
/// Unscripted actions succeed with an echo of the action and entities.
#[derive(Debug, Default)]
pub struct MockActionExecutor {
    results: HashMap<Action, Result<Value, ExecutionError>>,
    calls: Arc<Mutex<Vec<(Action, Entities)>>>,
}

impl MockActionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, action: Action, result: Value) -> Self {
        self.results.insert(action, Ok(result));
        self
    }

    pub fn with_failure(mut self, action: Action, error: ExecutionError) -> Self {
        self.results.insert(action, Err(error));
        self
    }

    pub async fn calls(&self) -> Vec<(Action, Entities)> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.calls.lock().await.clear();
    }
}

#[async_trait]
impl ActionExecutor for MockActionExecutor {
    async fn execute(&self, action: Action, entities: &Entities) -> Result<Value, ExecutionError> {
        self.calls.lock().await.push((action, entities.clone()));
        match self.results.get(&action) {
            Some(result) => result.clone(),
            None => Ok(json!({
                "action": action.as_str(),
                "entities": entities,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_llm_cycles_responses() {
        let provider = MockLlmProvider::new(vec!["first".to_string(), "second".to_string()]);
        let request = CompletionRequest::new("mock-model", "system", "user");

        let mut contents = Vec::new();
        for _ in 0..3 {
            let response = provider.complete(request.clone()).await.unwrap();
            contents.push(response.content.unwrap());
        }
        assert_eq!(contents, vec!["first", "second", "first"]);
        assert_eq!(provider.requests().await.len(), 3);
    }

    #[tokio::test]
    async fn test_mock_llm_failure() {
        let provider = MockLlmProvider::with_failure();
        let request = CompletionRequest::new("mock-model", "system", "user");
        assert!(provider.complete(request).await.is_err());
        assert!(provider.health_check().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_embedding_is_deterministic() {
        let provider = MockEmbeddingProvider::new(32);
        let a = provider.embed("show my inbox").await.unwrap();
        let b = provider.embed("show my inbox").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn test_mock_embedding_failing_after() {
        let provider = MockEmbeddingProvider::new(8).failing_after(1);
        let batch = vec!["a".to_string(), "b".to_string()];
        assert!(provider.embed_batch(&batch).await.is_ok());
        assert!(provider.embed("c").await.is_err());
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_executor_records_calls() {
        let executor = MockActionExecutor::new()
            .with_failure(Action::Delete, ExecutionError::NotFound("msg-1".to_string()));

        let mut entities = Entities::new();
        entities.insert("id".to_string(), json!("msg-1"));
        let echoed = executor.execute(Action::List, &Entities::new()).await.unwrap();
        assert_eq!(echoed["action"], "list");
        assert!(executor.execute(Action::Delete, &entities).await.is_err());

        let calls = executor.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, Action::Delete);
    }
}
