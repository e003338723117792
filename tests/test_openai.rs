//! Integration tests for the OpenAI-compatible completion provider
//!
//! Tests behavioral contracts against a mock HTTP server:
//! - request/response handling, including `json_schema` response formats
//! - error classification (auth, rate limits, schema rejection, server errors)
//! - retry on server errors only
//! - structured output disabled by configuration

use intent_router::llm::provider::{
    CompletionRequest, FinishReason, JsonSchemaDefinition, LlmError, LlmProvider, ResponseFormat,
};
use intent_router::llm::providers::openai::{OpenAiConfig, OpenAiProvider};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(base_url: &str) -> OpenAiConfig {
    OpenAiConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        structured_output: true,
    }
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "gpt-4o-mini",
        "choices": [
            {
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }
        ],
        "usage": {"prompt_tokens": 10, "completion_tokens": 15, "total_tokens": 25}
    })
}

fn structured_request() -> CompletionRequest {
    let mut request = CompletionRequest::new(
        "gpt-4o-mini",
        "Classify the request.",
        "Request: \"show my inbox\"",
    );
    request.response_format = Some(ResponseFormat::JsonSchema {
        json_schema: JsonSchemaDefinition {
            name: "classification".to_string(),
            strict: Some(false),
            schema: json!({
                "type": "object",
                "properties": {"action": {"type": "string"}},
                "required": ["action"]
            }),
        },
    });
    request
}

#[tokio::test]
async fn test_openai_provider_returns_successful_completion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-api-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body(r#"{"action": "list"}"#)),
        )
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let response = provider
        .complete(CompletionRequest::new("gpt-4o-mini", "system", "user"))
        .await
        .unwrap();

    assert_eq!(response.content.as_deref(), Some(r#"{"action": "list"}"#));
    assert_eq!(response.model, "gpt-4o-mini");
    assert_eq!(response.usage.total_tokens, 25);
    assert!(matches!(response.finish_reason, FinishReason::Stop));
}

#[tokio::test]
async fn test_openai_provider_sends_json_schema_response_format() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "response_format": {
                "type": "json_schema",
                "json_schema": {"name": "classification", "strict": false}
            }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body(r#"{"action": "list"}"#)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let response = provider.complete(structured_request()).await.unwrap();
    assert!(response.content.is_some());
}

#[tokio::test]
async fn test_openai_provider_classifies_schema_rejection_as_unsupported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            r#"{"error": {"message": "Invalid parameter: 'response_format' of type 'json_schema' is not supported with this model."}}"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let result = provider.complete(structured_request()).await;

    assert!(matches!(result, Err(LlmError::Unsupported(_))));
}

#[tokio::test]
async fn test_openai_provider_rejects_structured_request_when_disabled() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{}")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = OpenAiConfig {
        structured_output: false,
        ..test_config(&mock_server.uri())
    };
    let provider = OpenAiProvider::new(config).unwrap();
    assert!(!provider.supports_structured_output());

    let result = provider.complete(structured_request()).await;
    assert!(matches!(result, Err(LlmError::Unsupported(_))));
}

#[tokio::test]
async fn test_openai_provider_returns_auth_error_on_401() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string(
            r#"{"error": {"message": "Incorrect API key provided"}}"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let result = provider
        .complete(CompletionRequest::new("gpt-4o-mini", "system", "user"))
        .await;

    match result {
        Err(LlmError::AuthenticationFailed(msg)) => assert!(msg.contains("401")),
        other => panic!("Expected AuthenticationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_openai_provider_returns_rate_limit_error_on_429() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string(
            r#"{"error": {"message": "Rate limit exceeded"}}"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let result = provider
        .complete(CompletionRequest::new("gpt-4o-mini", "system", "user"))
        .await;

    assert!(matches!(result, Err(LlmError::RateLimitExceeded(_))));
}

#[tokio::test]
async fn test_openai_provider_retries_server_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let result = provider
        .complete(CompletionRequest::new("gpt-4o-mini", "system", "user"))
        .await;

    match result {
        Err(LlmError::ApiError(msg)) => assert!(msg.contains("server error")),
        other => panic!("Expected ApiError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_openai_provider_rejects_response_without_choices() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-mini",
            "choices": []
        })))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let result = provider
        .complete(CompletionRequest::new("gpt-4o-mini", "system", "user"))
        .await;

    assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_openai_provider_health_check() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    assert!(provider.health_check().await.is_ok());
}

#[test]
fn test_openai_provider_requires_api_key() {
    let config = OpenAiConfig {
        api_key: String::new(),
        ..OpenAiConfig::default()
    };
    assert!(OpenAiProvider::new(config).is_err());
}
