//! Sequential plan execution
//!
//! Steps run strictly in index order. Each step is routed through the normal
//! classification pipeline, its parameters are resolved against earlier
//! outputs, and the routed action is handed to the `ActionExecutor`. A failed
//! step never stops independent later steps; steps depending on it are
//! skipped. Cancellation is checked only between steps.

use super::plan::{ExecutionResult, Plan, Step, StepOutcome};
use crate::dispatch::ActionExecutor;
use crate::error::{sanitize_error_message, RouterError};
use crate::step_span;
use crate::types::{merge_entities, ClassificationDecision, Confidence, Entities};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

/// `{{step2.id}}`, `{{step1.messages.0.subject}}`, `{{previous.id}}`
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*(?:step(?P<step>\d+)|(?P<previous>previous))(?P<path>(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
        .expect("Invalid regex")
});

/// Parameter key bound to the previous dependency's output
pub const PREVIOUS_KEY: &str = "previous";

/// Routes a single step's text to a decision
#[async_trait]
pub trait StepRouter: Send + Sync {
    async fn route_step(&self, step: &Step) -> ClassificationDecision;
}

/// Shared flag checked at step boundaries
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Placeholder resolution failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("step {step} has no output to reference")]
    MissingStep { step: usize },
    #[error("no previous step output to reference")]
    MissingPrevious,
    #[error("'{path}' not found in output of step {step}")]
    MissingPath { step: usize, path: String },
}

/// Collect step numbers referenced by placeholders in `value`
pub fn referenced_steps(value: &Value, out: &mut Vec<usize>) {
    match value {
        Value::String(s) => {
            for captures in PLACEHOLDER.captures_iter(s) {
                if let Some(step) = captures.name("step").and_then(|m| m.as_str().parse().ok()) {
                    out.push(step);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| referenced_steps(v, out)),
        Value::Object(map) => map.values().for_each(|v| referenced_steps(v, out)),
        _ => {}
    }
}

/// Walk a dotted path; a non-numeric segment applied to an array reads the first element
fn lookup<'a>(mut value: &'a Value, path: &str) -> Option<&'a Value> {
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        value = match value {
            Value::Array(items) => match segment.parse::<usize>() {
                Ok(index) => items.get(index)?,
                Err(_) => items.first()?.get(segment)?,
            },
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(value)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Earlier outputs available to placeholder resolution
pub struct StepOutputs<'a> {
    outputs: &'a BTreeMap<usize, Value>,
    previous: Option<usize>,
}

impl<'a> StepOutputs<'a> {
    pub fn new(outputs: &'a BTreeMap<usize, Value>, previous: Option<usize>) -> Self {
        Self { outputs, previous }
    }

    fn reference(&self, captures: &regex::Captures<'_>) -> Result<&'a Value, ResolveError> {
        let path = captures.name("path").map_or("", |m| m.as_str());
        let step = match captures.name("step").and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(step) => step,
            None => self.previous.ok_or(ResolveError::MissingPrevious)?,
        };
        let output = self
            .outputs
            .get(&step)
            .ok_or(ResolveError::MissingStep { step })?;
        lookup(output, path).ok_or_else(|| ResolveError::MissingPath {
            step,
            path: path.trim_start_matches('.').to_string(),
        })
    }

    /// Replace placeholders in `value`
    ///
    /// A string that is exactly one placeholder takes the referenced value
    /// with its JSON type; placeholders embedded in longer text are rendered
    /// as text.
    pub fn resolve(&self, value: &Value) -> Result<Value, ResolveError> {
        match value {
            Value::String(s) => {
                if let Some(captures) = PLACEHOLDER.captures(s) {
                    if captures.get(0).is_some_and(|m| m.as_str() == s.trim()) {
                        return self.reference(&captures).cloned();
                    }
                }
                let mut error = None;
                let rendered = PLACEHOLDER.replace_all(s, |captures: &regex::Captures<'_>| {
                    match self.reference(captures) {
                        Ok(v) => render(v),
                        Err(e) => {
                            error.get_or_insert(e);
                            String::new()
                        }
                    }
                });
                match error {
                    Some(e) => Err(e),
                    None => Ok(Value::String(rendered.into_owned())),
                }
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| self.resolve(v).map(|v| (k.clone(), v)))
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    pub fn resolve_entities(&self, entities: &Entities) -> Result<Entities, ResolveError> {
        entities
            .iter()
            .map(|(k, v)| self.resolve(v).map(|v| (k.clone(), v)))
            .collect()
    }
}

/// Results of a plan run before it is summarized
#[derive(Debug, Clone)]
pub struct PlanRun {
    pub results: Vec<ExecutionResult>,
    pub cancelled: bool,
    /// Lowest routed-step confidence
    pub min_confidence: Confidence,
}

/// Execute `plan` step by step
pub async fn execute_plan(
    plan: &Plan,
    router: &dyn StepRouter,
    executor: &dyn ActionExecutor,
    cancel: Option<&CancellationToken>,
) -> PlanRun {
    let mut results: Vec<ExecutionResult> = Vec::with_capacity(plan.steps.len());
    let mut outputs: BTreeMap<usize, Value> = BTreeMap::new();
    let mut min_confidence = Confidence::ONE;
    let mut cancelled: Option<String> = None;

    for step in &plan.steps {
        if cancelled.is_none() && cancel.is_some_and(CancellationToken::is_cancelled) {
            let err = RouterError::Cancelled {
                next_step: step.index,
            };
            info!(plan_id = %plan.id, error = %err, "Plan cancelled");
            cancelled = Some(err.to_user_message());
        }
        if let Some(reason) = &cancelled {
            results.push(ExecutionResult {
                step_index: step.index,
                description: step.description.clone(),
                action: step.action,
                outcome: StepOutcome::Skipped(reason.clone()),
            });
            continue;
        }

        let span = step_span!(plan_id = %plan.id, step = step.index);
        let (result, confidence) = run_step(step, &outputs, router, executor)
            .instrument(span)
            .await;

        if let Some(confidence) = confidence {
            if confidence < min_confidence {
                min_confidence = confidence;
            }
        }
        if let Some(output) = result.output() {
            outputs.insert(step.index, output.clone());
        }
        results.push(result);
    }

    PlanRun {
        results,
        cancelled: cancelled.is_some(),
        min_confidence,
    }
}

async fn run_step(
    step: &Step,
    outputs: &BTreeMap<usize, Value>,
    router: &dyn StepRouter,
    executor: &dyn ActionExecutor,
) -> (ExecutionResult, Option<Confidence>) {
    let finish = |action, outcome| ExecutionResult {
        step_index: step.index,
        description: step.description.clone(),
        action,
        outcome,
    };

    let dependencies = step.dependencies();
    if let Some(missing) = dependencies.iter().find(|d| !outputs.contains_key(*d)) {
        debug!(step = step.index, dependency = missing, "Skipping step with failed dependency");
        return (
            finish(
                step.action,
                StepOutcome::Skipped(format!("step {missing} did not complete")),
            ),
            None,
        );
    }

    let decision = router.route_step(step).await;
    let confidence = Some(decision.confidence);
    let action = match decision.resolved_action() {
        Some(action) if !action.is_unknown() => action,
        _ => {
            let reason = decision
                .needs_clarification_question()
                .map(|q| format!("needs clarification: {q}"))
                .unwrap_or_else(|| "could not determine an action".to_string());
            return (finish(step.action, StepOutcome::Failed(reason)), confidence);
        }
    };

    let previous = dependencies.last().copied();
    let resolver = StepOutputs::new(outputs, previous);
    let mut params = match resolver.resolve_entities(&step.params) {
        Ok(params) => params,
        Err(e) => {
            warn!(step = step.index, error = %e, "Unresolved step reference");
            return (finish(Some(action), StepOutcome::Failed(e.to_string())), confidence);
        }
    };
    merge_entities(&mut params, &decision.entities);
    if let Some(output) = previous.and_then(|p| outputs.get(&p)) {
        params
            .entry(PREVIOUS_KEY.to_string())
            .or_insert_with(|| output.clone());
    }

    debug!(step = step.index, %action, "Executing step");
    let outcome = match executor.execute(action, &params).await {
        Ok(output) => StepOutcome::Success(output),
        Err(e) => {
            warn!(step = step.index, %action, error = %e, "Step failed");
            StepOutcome::Failed(sanitize_error_message(&e.to_string()))
        }
    };
    (finish(Some(action), outcome), confidence)
}
