//! OpenAI-compatible chat completions provider
//!
//! Works against api.openai.com and any server exposing the same
//! `/chat/completions` contract (vLLM, llama.cpp server, Ollama's OpenAI
//! shim). Servers that reject `response_format` are reported as
//! [`LlmError::Unsupported`] so the classifier can fall back to free text.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, Message,
    MessageRole, ResponseFormat, TokenUsage,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, warn};

/// OpenAI provider configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Send `response_format: json_schema` when asked for structured output
    pub structured_output: bool,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(30),
            structured_output: true,
        }
    }
}

/// OpenAI provider implementation
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "OpenAI API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Convert completion request to OpenAI format (pure function)
    fn convert_to_openai_request(request: &CompletionRequest) -> OpenAiCompletionRequest {
        let response_format = request.response_format.as_ref().map(|rf| match rf {
            ResponseFormat::Text => OpenAiResponseFormat::Simple {
                format_type: "text".to_string(),
            },
            ResponseFormat::Json => OpenAiResponseFormat::Simple {
                format_type: "json_object".to_string(),
            },
            ResponseFormat::JsonSchema { json_schema } => OpenAiResponseFormat::JsonSchema {
                format_type: "json_schema".to_string(),
                json_schema: OpenAiJsonSchema {
                    name: json_schema.name.clone(),
                    strict: json_schema.strict,
                    schema: json_schema.schema.clone(),
                },
            },
        });

        OpenAiCompletionRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format,
        }
    }

    /// Parse OpenAI completion response (pure function)
    fn parse_completion_response(
        openai_response: OpenAiCompletionResponse,
        request_metadata: HashMap<String, String>,
    ) -> Result<CompletionResponse, LlmError> {
        let choice = openai_response.choices.into_iter().next().ok_or_else(|| {
            LlmError::InvalidResponse("No choices returned from OpenAI".to_string())
        })?;

        let usage = openai_response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content,
            model: openai_response.model,
            usage,
            finish_reason: Self::convert_finish_reason(choice.finish_reason.as_deref()),
            metadata: request_metadata,
        })
    }

    /// Convert OpenAI finish reason to internal format (pure function)
    fn convert_finish_reason(reason: Option<&str>) -> FinishReason {
        match reason {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Error,
        }
    }

    fn convert_message(message: &Message) -> OpenAiMessage {
        OpenAiMessage {
            role: match message.role {
                MessageRole::System => "system".to_string(),
                MessageRole::User => "user".to_string(),
                MessageRole::Assistant => "assistant".to_string(),
            },
            content: Some(message.content.clone()),
        }
    }

    /// Classify a non-success status into an error (pure function)
    fn classify_client_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        let lowered = body.to_lowercase();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            LlmError::AuthenticationFailed(format!("OpenAI API error: {status}"))
        } else if status.as_u16() == 429 {
            LlmError::RateLimitExceeded(body.to_string())
        } else if status.as_u16() == 400
            && (lowered.contains("response_format") || lowered.contains("json_schema"))
        {
            LlmError::Unsupported(body.to_string())
        } else {
            LlmError::ApiError(format!("OpenAI API error: {status} - {body}"))
        }
    }

    /// Check if error should trigger retry (pure)
    fn should_retry(error: &LlmError) -> bool {
        match error {
            LlmError::NetworkError(_) => true,
            LlmError::ApiError(msg) => msg.contains("server error"),
            _ => false,
        }
    }

    /// Retry orchestrator - handles only I/O and retry logic
    async fn complete_with_retry(
        &self,
        openai_request: OpenAiCompletionRequest,
        metadata: HashMap<String, String>,
    ) -> Result<CompletionResponse, LlmError> {
        let backoff_delays = [100u64, 200];
        let mut last_error = None;

        for (attempt, &delay_ms) in std::iter::once(&0u64)
            .chain(backoff_delays.iter())
            .enumerate()
        {
            if attempt > 0 {
                debug!(attempt, delay_ms, "OpenAI retry attempt");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match self.make_api_request(&openai_request).await {
                Ok(openai_response) => {
                    let response = Self::parse_completion_response(openai_response, metadata)?;
                    debug!(
                        total_tokens = response.usage.total_tokens,
                        finish_reason = ?response.finish_reason,
                        "OpenAI completion received"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "OpenAI request attempt failed");
                    if !Self::should_retry(&e) {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        error!("OpenAI request failed after all retries");
        Err(last_error
            .unwrap_or_else(|| LlmError::NetworkError("All retry attempts failed".to_string())))
    }

    /// Make single API request
    async fn make_api_request(
        &self,
        openai_request: &OpenAiCompletionRequest,
    ) -> Result<OpenAiCompletionResponse, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(openai_request)
            .send()
            .await
            .map_err(|e| {
                LlmError::NetworkError(format!(
                    "HTTP request failed: {} (is_connect: {}, is_timeout: {})",
                    e,
                    e.is_connect(),
                    e.is_timeout()
                ))
            })?;

        let status = response.status();

        if status.is_server_error() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!(
                "OpenAI API server error: {status} - {error_text}"
            )));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Self::classify_client_error(status, &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn supports_structured_output(&self) -> bool {
        self.config.structured_output
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if request.is_structured() && !self.config.structured_output {
            return Err(LlmError::Unsupported(
                "structured output disabled for this provider".to_string(),
            ));
        }

        let openai_request = Self::convert_to_openai_request(&request);
        debug!(
            model = %openai_request.model,
            messages = openai_request.messages.len(),
            structured = request.is_structured(),
            "Sending OpenAI completion request"
        );

        self.complete_with_retry(openai_request, request.metadata)
            .await
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::AuthenticationFailed(
                "OpenAI API authentication failed".to_string(),
            ))
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiCompletionRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompletionResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// OpenAI response format
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiResponseFormat {
    Simple {
        #[serde(rename = "type")]
        format_type: String,
    },
    JsonSchema {
        #[serde(rename = "type")]
        format_type: String,
        json_schema: OpenAiJsonSchema,
    },
}

#[derive(Debug, Serialize)]
struct OpenAiJsonSchema {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    strict: Option<bool>,
    schema: serde_json::Value,
}
