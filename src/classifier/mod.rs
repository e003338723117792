//! Language-model classification
//!
//! `StructuredClassifier` asks the model for an action, entities, a
//! confidence and a rationale. It first sends a schema-constrained request;
//! if the provider cannot honour schemas it switches to free-text requests
//! and parses the reply defensively. No call here returns an error: failures
//! become an `unknown` decision with confidence 0 or `None`.

pub mod parse;
pub mod prompt;
pub mod schema;

use crate::learning::LearnedExample;
use crate::llm::provider::{CompletionRequest, JsonSchemaDefinition, LlmError, LlmProvider, ResponseFormat};
use crate::observability::metrics;
use crate::types::{
    Action, ClassificationDecision, Confidence, ConversationContext, DecisionSource, Domain,
    Entities, Query, SignalSource,
};
use parse::{normalize_classification, normalize_plan_steps, parse_action, parse_confidence, parse_json_lenient};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Verdict from a self-validation call
#[derive(Debug, Clone, PartialEq)]
pub struct Critique {
    pub is_correct: bool,
    /// Replacement action, already restricted to the domain
    pub corrected_action: Option<Action>,
    pub confidence: Confidence,
    pub reason: String,
}

/// A step proposed by the model in plan mode
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub description: String,
    /// `None` when the model gave no usable action; the step is routed later
    pub action: Option<Action>,
    pub params: Entities,
    /// 1-based indexes of earlier steps
    pub depends_on: Vec<usize>,
}

struct CallSpec {
    purpose: &'static str,
    schema_name: &'static str,
    schema: Value,
    system: String,
    user: String,
    /// Last-resort reading of a free-text reply that holds no JSON object
    text_fallback: fn(&str) -> Option<Value>,
}

fn no_text_fallback(_: &str) -> Option<Value> {
    None
}

fn sequence_text_fallback(raw: &str) -> Option<Value> {
    parse::parse_sequence_answer(raw).map(|sequential| json!({ "sequential": sequential }))
}

/// Schema-first model classifier for one domain
pub struct StructuredClassifier {
    llm: Arc<dyn LlmProvider>,
    model: String,
    domain: Domain,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
    structured: AtomicBool,
}

impl StructuredClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>, domain: Domain) -> Self {
        let structured = llm.supports_structured_output();
        Self {
            llm,
            model: model.into(),
            domain,
            temperature: 0.0,
            max_tokens: Some(500),
            timeout: Duration::from_secs(8),
            structured: AtomicBool::new(structured),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        if max_tokens.is_some() {
            self.max_tokens = max_tokens;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disable schema-constrained requests even if the provider supports them
    pub fn with_structured_output(self, enabled: bool) -> Self {
        let supported = self.llm.supports_structured_output();
        self.structured.store(enabled && supported, Ordering::Relaxed);
        self
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn provider_name(&self) -> &str {
        self.llm.name()
    }

    /// Whether the next call will request schema-constrained output
    pub fn structured_output_active(&self) -> bool {
        self.structured.load(Ordering::Relaxed)
    }

    /// Classify a query, using learned examples as few-shot guidance
    pub async fn classify(&self, query: &Query, examples: &[LearnedExample]) -> ClassificationDecision {
        self.classify_text(&query.text, examples, query.context.as_ref())
            .await
    }

    pub async fn classify_text(
        &self,
        text: &str,
        examples: &[LearnedExample],
        context: Option<&ConversationContext>,
    ) -> ClassificationDecision {
        if text.trim().is_empty() {
            return ClassificationDecision::unknown("empty request");
        }

        let spec = CallSpec {
            purpose: "classify",
            schema_name: "action_classification",
            schema: schema::classification_schema(self.domain),
            system: prompt::classification_system_prompt(self.domain),
            user: prompt::classification_user_prompt(text, examples, context),
            text_fallback: no_text_fallback,
        };

        let Some(value) = self.complete_json(&spec).await else {
            metrics().signal_failed(SignalSource::Llm);
            return ClassificationDecision::unknown("classifier unavailable");
        };

        match normalize_classification(&value, self.domain) {
            Some(parsed) if !parsed.action.is_unknown() => {
                debug!(
                    action = %parsed.action,
                    confidence = parsed.confidence.value(),
                    "Model classification"
                );
                ClassificationDecision::action(
                    parsed.action,
                    parsed.entities,
                    parsed.confidence,
                    DecisionSource::Llm,
                )
                .with_rationale(parsed.rationale)
            }
            Some(parsed) => ClassificationDecision::unknown(if parsed.rationale.is_empty() {
                "model answered unknown".to_string()
            } else {
                parsed.rationale
            }),
            None => {
                warn!(output = %value, "Classifier output has no usable action");
                metrics().signal_failed(SignalSource::Llm);
                ClassificationDecision::unknown("unparsable classifier output")
            }
        }
    }

    /// Ask the model to review a classification
    pub async fn critique(&self, text: &str, decision: &ClassificationDecision) -> Option<Critique> {
        let spec = CallSpec {
            purpose: "critique",
            schema_name: "classification_critique",
            schema: schema::critique_schema(self.domain),
            system: prompt::critique_system_prompt(self.domain),
            user: prompt::critique_user_prompt(text, decision),
            text_fallback: no_text_fallback,
        };

        let value = self.complete_json(&spec).await?;
        let object = value.as_object()?;
        let is_correct = object
            .get("is_correct")
            .or_else(|| object.get("correct"))
            .and_then(Value::as_bool)?;
        let corrected_action = object
            .get("corrected_action")
            .and_then(Value::as_str)
            .map(|label| parse_action(label, self.domain))
            .filter(|action| !action.is_unknown());

        Some(Critique {
            is_correct,
            corrected_action,
            confidence: object
                .get("confidence")
                .and_then(parse_confidence)
                .unwrap_or(Confidence::new(0.5)),
            reason: object
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Decompose a compound request into at most `max_steps` ordered steps
    pub async fn decompose(&self, text: &str, max_steps: usize) -> Option<Vec<PlannedStep>> {
        let spec = CallSpec {
            purpose: "decompose",
            schema_name: "request_plan",
            schema: schema::plan_schema(self.domain),
            system: prompt::decompose_system_prompt(self.domain, max_steps),
            user: prompt::decompose_user_prompt(text),
            text_fallback: no_text_fallback,
        };

        let value = self.complete_json(&spec).await?;
        let steps: Vec<PlannedStep> = normalize_plan_steps(&value)?
            .into_iter()
            .take(max_steps)
            .enumerate()
            .map(|(i, step)| {
                let action = Some(parse_action(&step.action, self.domain)).filter(|a| !a.is_unknown());
                let position = i + 1;
                let mut depends_on: Vec<usize> = step
                    .depends_on
                    .into_iter()
                    .filter(|d| *d >= 1 && *d < position)
                    .collect();
                depends_on.sort_unstable();
                depends_on.dedup();
                PlannedStep {
                    description: step.description,
                    action,
                    params: step.params,
                    depends_on,
                }
            })
            .collect();

        if steps.is_empty() {
            None
        } else {
            Some(steps)
        }
    }

    /// Ask the model whether a request is sequential
    pub async fn detect_sequence(&self, text: &str) -> Option<bool> {
        let spec = CallSpec {
            purpose: "detect_sequence",
            schema_name: "sequence_check",
            schema: schema::sequence_schema(),
            system: prompt::sequence_system_prompt(self.domain),
            user: prompt::sequence_user_prompt(text),
            text_fallback: sequence_text_fallback,
        };

        self.complete_json(&spec)
            .await?
            .get("sequential")
            .and_then(Value::as_bool)
    }

    fn request(&self, system: String, user: String) -> CompletionRequest {
        let mut request = CompletionRequest::new(self.model.clone(), system, user);
        request.temperature = Some(self.temperature);
        request.max_tokens = self.max_tokens;
        request
    }

    async fn send(&self, request: CompletionRequest) -> Result<String, LlmError> {
        match tokio::time::timeout(self.timeout, self.llm.complete(request)).await {
            Ok(Ok(response)) => response
                .content
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| LlmError::InvalidResponse("empty completion".to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LlmError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn complete_json(&self, spec: &CallSpec) -> Option<Value> {
        if self.structured_output_active() {
            let mut request = self.request(spec.system.clone(), spec.user.clone());
            request.response_format = Some(ResponseFormat::JsonSchema {
                json_schema: JsonSchemaDefinition {
                    name: spec.schema_name.to_string(),
                    // Entities are open-ended maps, which strict mode rejects
                    strict: Some(false),
                    schema: spec.schema.clone(),
                },
            });

            match self.send(request).await {
                Ok(content) => match parse_json_lenient(&content) {
                    Some(value) => match schema::validate_output(&spec.schema, &value) {
                        Ok(()) => return Some(value),
                        Err(e) => warn!(
                            purpose = spec.purpose,
                            error = %e,
                            "Structured output failed validation, retrying as free text"
                        ),
                    },
                    None => warn!(
                        purpose = spec.purpose,
                        "Structured output was not JSON, retrying as free text"
                    ),
                },
                Err(LlmError::Unsupported(message)) => {
                    info!(
                        provider = self.llm.name(),
                        reason = %message,
                        "Structured output unsupported, using free-text classification"
                    );
                    self.structured.store(false, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(purpose = spec.purpose, provider = self.llm.name(), error = %e, "Model call failed");
                    return None;
                }
            }
        }

        let request = self.request(
            format!("{}\n\n{}", spec.system, prompt::JSON_ONLY_SUFFIX),
            spec.user.clone(),
        );
        match self.send(request).await {
            Ok(content) => {
                let value = parse_json_lenient(&content).or_else(|| (spec.text_fallback)(&content));
                if value.is_none() {
                    warn!(purpose = spec.purpose, "Could not parse free-text model output");
                }
                value
            }
            Err(e) => {
                warn!(purpose = spec.purpose, provider = self.llm.name(), error = %e, "Model call failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for StructuredClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredClassifier")
            .field("provider", &self.llm.name())
            .field("model", &self.model)
            .field("domain", &self.domain)
            .field("structured", &self.structured_output_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockLlmProvider;
    use crate::types::DecisionOutcome;

    fn classifier(mock: MockLlmProvider, domain: Domain) -> (Arc<MockLlmProvider>, StructuredClassifier) {
        let mock = Arc::new(mock);
        let classifier = StructuredClassifier::new(mock.clone(), "mock-model", domain);
        (mock, classifier)
    }

    #[tokio::test]
    async fn test_structured_classification() {
        let (mock, classifier) = classifier(
            MockLlmProvider::single_response(
                r#"{"action": "count", "entities": {"unread": true}, "confidence": 0.93, "rationale": "how many"}"#,
            ),
            Domain::Email,
        );

        let decision = classifier
            .classify(&Query::new("how many unread emails do I have", Domain::Email), &[])
            .await;

        assert_eq!(decision.resolved_action(), Some(Action::Count));
        assert_eq!(decision.chosen_source, DecisionSource::Llm);
        assert_eq!(decision.entities["unread"], true);

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].is_structured());
        assert_eq!(requests[0].temperature, Some(0.0));
    }

    #[tokio::test]
    async fn test_unsupported_schema_falls_back_to_free_text() {
        let (mock, classifier) = classifier(
            MockLlmProvider::single_response(
                "Here you go:\n```json\n{\"intent\": \"list\", \"confidence\": \"80%\",}\n```",
            )
            .rejecting_structured_output(),
            Domain::Calendar,
        );

        let decision = classifier
            .classify(&Query::new("what's on tomorrow", Domain::Calendar), &[])
            .await;

        assert_eq!(decision.resolved_action(), Some(Action::List));
        assert!((decision.confidence.value() - 0.8).abs() < 1e-6);
        assert!(!classifier.structured_output_active());

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(!requests[1].is_structured());
        assert!(requests[1].messages[0].content.contains("single JSON object"));
    }

    #[tokio::test]
    async fn test_provider_without_schema_support_skips_structured_call() {
        let (mock, classifier) = classifier(
            MockLlmProvider::single_response(r#"{"action": "complete", "confidence": 0.7}"#)
                .without_structured_output(),
            Domain::Task,
        );

        let decision = classifier
            .classify(&Query::new("done with the report", Domain::Task), &[])
            .await;
        assert_eq!(decision.resolved_action(), Some(Action::Complete));
        assert_eq!(mock.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_yields_unknown_with_zero_confidence() {
        let (_, classifier) = classifier(MockLlmProvider::with_failure(), Domain::Email);

        let decision = classifier
            .classify(&Query::new("show my inbox", Domain::Email), &[])
            .await;

        assert_eq!(
            decision.outcome,
            DecisionOutcome::Action {
                action: Action::Unknown
            }
        );
        assert_eq!(decision.confidence, Confidence::ZERO);
    }

    #[tokio::test]
    async fn test_timeout_yields_unknown() {
        let (_, classifier) = classifier(
            MockLlmProvider::single_response(r#"{"action": "list", "confidence": 0.9}"#)
                .with_delay(Duration::from_millis(200)),
            Domain::Email,
        );
        let classifier = classifier.with_timeout(Duration::from_millis(20));

        let decision = classifier
            .classify(&Query::new("show my inbox", Domain::Email), &[])
            .await;
        assert!(!decision.is_actionable());
    }

    #[tokio::test]
    async fn test_out_of_domain_answer_is_unknown() {
        let (_, classifier) = classifier(
            MockLlmProvider::single_response(r#"{"action": "reply", "confidence": 0.9}"#)
                .without_structured_output(),
            Domain::Task,
        );
        let decision = classifier
            .classify(&Query::new("reply to bob", Domain::Task), &[])
            .await;
        assert_eq!(decision.resolved_action(), Some(Action::Unknown));
        assert_eq!(decision.confidence, Confidence::ZERO);
    }

    #[tokio::test]
    async fn test_critique_parses_correction() {
        let (_, classifier) = classifier(
            MockLlmProvider::single_response(
                r#"{"is_correct": false, "corrected_action": "list", "confidence": 0.9, "reason": "it is a question"}"#,
            ),
            Domain::Calendar,
        );
        let decision = ClassificationDecision::action(
            Action::Create,
            Entities::new(),
            0.7,
            DecisionSource::Llm,
        );

        let critique = classifier
            .critique("what meetings do I have", &decision)
            .await
            .unwrap();
        assert!(!critique.is_correct);
        assert_eq!(critique.corrected_action, Some(Action::List));
    }

    #[tokio::test]
    async fn test_decompose_sanitizes_dependencies() {
        let (_, classifier) = classifier(
            MockLlmProvider::single_response(
                r#"{"steps": [
                    {"description": "find the email from Sarah", "action": "search", "params": {"sender": "Sarah"}, "depends_on": [2]},
                    {"description": "reply saying thanks", "action": "reply", "params": {"body": "thanks"}, "depends_on": [1, 1]},
                    {"description": "extra", "action": "archive", "params": {}, "depends_on": []}
                ]}"#,
            ),
            Domain::Email,
        );

        let steps = classifier
            .decompose("find the email from Sarah then reply saying thanks", 2)
            .await
            .unwrap();

        assert_eq!(steps.len(), 2);
        assert!(steps[0].depends_on.is_empty());
        assert_eq!(steps[1].depends_on, vec![1]);
        assert_eq!(steps[1].action, Some(Action::Reply));
    }

    #[tokio::test]
    async fn test_detect_sequence_accepts_plain_answer() {
        let (_, classifier) = classifier(
            MockLlmProvider::single_response("Yes, these are two separate operations.")
                .without_structured_output(),
            Domain::Email,
        );
        assert_eq!(classifier.detect_sequence("archive and delete").await, Some(true));
    }
}
