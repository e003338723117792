//! LLM provider abstraction and trait definitions
//!
//! This module defines the language-model client boundary consumed by the
//! classifier: a completion request that optionally carries a JSON schema
//! response format, and a provider trait with a unified interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// A single message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Message roles in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// LLM completion request parameters
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub response_format: Option<ResponseFormat>,
    pub metadata: HashMap<String, String>,
}

impl CompletionRequest {
    /// Build a system + user request with no response format
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
            model: model.into(),
            max_tokens: None,
            temperature: None,
            response_format: None,
            metadata: HashMap::new(),
        }
    }

    /// Whether this request asks for schema-constrained output
    pub fn is_structured(&self) -> bool {
        matches!(self.response_format, Some(ResponseFormat::JsonSchema { .. }))
    }
}

/// LLM completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
    pub metadata: HashMap<String, String>,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason why completion finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
}

/// Response format for structured outputs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Plain text response
    #[default]
    Text,
    /// JSON object without schema validation
    Json,
    /// JSON with schema validation
    JsonSchema { json_schema: JsonSchemaDefinition },
}

/// JSON Schema definition for structured outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSchemaDefinition {
    /// Schema name
    pub name: String,
    /// Whether to use strict mode (OpenAI only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
    /// The JSON Schema object
    pub schema: serde_json::Value,
}

/// LLM provider trait for dependency injection and testing
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openai")
    fn name(&self) -> &str;

    /// Whether the provider honours `ResponseFormat::JsonSchema`
    ///
    /// Providers that return `false` are only sent free-text requests.
    fn supports_structured_output(&self) -> bool {
        true
    }

    /// Generate a completion from the given request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Check if the provider is configured and ready
    async fn health_check(&self) -> Result<(), LlmError>;
}

/// LLM provider errors
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Structured output not supported: {0}")]
    Unsupported(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Request timed out after {0}ms")]
    Timeout(u64),
    #[error("API error: {0}")]
    ApiError(String),
}
