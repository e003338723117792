//! Plans, step outcomes and plan reports

use crate::types::{Action, Confidence, Entities};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a plan was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionMethod {
    /// Not a compound request; one step holding the whole query
    Single,
    /// Split by the model in plan mode
    Llm,
    /// Split on sequential connectors
    Heuristic,
}

/// One operation in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position
    pub index: usize,
    pub description: String,
    /// Action proposed at decomposition time; routed again before execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default)]
    pub params: Entities,
    /// Earlier steps whose output this step needs
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

impl Step {
    pub fn new(index: usize, description: impl Into<String>) -> Self {
        Self {
            index,
            description: description.into(),
            action: None,
            params: Entities::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: Option<Action>) -> Self {
        self.action = action;
        self
    }

    pub fn with_params(mut self, params: Entities) -> Self {
        self.params = params;
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<usize>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Declared dependencies plus any step referenced by a `{{stepN...}}` placeholder
    pub fn dependencies(&self) -> Vec<usize> {
        let mut deps = self.depends_on.clone();
        for value in self.params.values() {
            super::executor::referenced_steps(value, &mut deps);
        }
        deps.retain(|d| *d >= 1 && *d < self.index);
        deps.sort_unstable();
        deps.dedup();
        deps
    }
}

/// Ordered steps for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub source_query: String,
    pub steps: Vec<Step>,
    pub method: DecompositionMethod,
    /// How sure the planner is about the split itself
    pub confidence: Confidence,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(
        source_query: impl Into<String>,
        steps: Vec<Step>,
        method: DecompositionMethod,
        confidence: impl Into<Confidence>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_query: source_query.into(),
            steps,
            method,
            confidence: confidence.into(),
            created_at: Utc::now(),
        }
    }

    /// Plan of exactly one step covering the whole query
    pub fn single(source_query: impl Into<String>) -> Self {
        let source_query = source_query.into();
        let step = Step::new(1, source_query.clone());
        Self::new(source_query, vec![step], DecompositionMethod::Single, Confidence::ONE)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_multi_step(&self) -> bool {
        self.steps.len() > 1
    }
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Success(Value),
    Failed(String),
    Skipped(String),
}

/// Result of one step, in plan order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub step_index: usize,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub outcome: StepOutcome,
}

impl ExecutionResult {
    pub fn output(&self) -> Option<&Value> {
        match &self.outcome {
            StepOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            StepOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StepOutcome::Success(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, StepOutcome::Skipped(_))
    }
}

/// Aggregate outcome of an executed plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub plan: Plan,
    pub results: Vec<ExecutionResult>,
    pub cancelled: bool,
    /// Lowest confidence across the plan split and each routed step
    pub confidence: Confidence,
    /// e.g. "Steps 1-2 completed, step 3 failed: not found"
    pub summary: String,
    /// Explanation returned alongside results for less certain plans
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
}

impl PlanReport {
    pub fn completed(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.error().is_some()).count()
    }

    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|r| r.is_skipped()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        !self.results.is_empty() && self.completed() == self.results.len()
    }

    pub fn is_partial(&self) -> bool {
        self.completed() > 0 && !self.all_succeeded()
    }

    /// Output of the last successful step
    pub fn final_output(&self) -> Option<&Value> {
        self.results.iter().rev().find_map(ExecutionResult::output)
    }
}

fn step_range(first: usize, last: usize) -> String {
    if first == last {
        format!("step {first}")
    } else {
        format!("steps {first}-{last}")
    }
}

/// Per-step summary with consecutive successes collapsed into ranges
pub fn summarize(results: &[ExecutionResult], cancelled: bool) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut run: Option<(usize, usize)> = None;

    let flush = |run: &mut Option<(usize, usize)>, parts: &mut Vec<String>| {
        if let Some((first, last)) = run.take() {
            parts.push(format!("{} completed", step_range(first, last)));
        }
    };

    for result in results {
        match &result.outcome {
            StepOutcome::Success(_) => {
                run = Some(match run {
                    Some((first, _)) => (first, result.step_index),
                    None => (result.step_index, result.step_index),
                });
            }
            StepOutcome::Failed(message) => {
                flush(&mut run, &mut parts);
                parts.push(format!("step {} failed: {message}", result.step_index));
            }
            StepOutcome::Skipped(reason) => {
                flush(&mut run, &mut parts);
                parts.push(format!("step {} skipped ({reason})", result.step_index));
            }
        }
    }
    flush(&mut run, &mut parts);

    let mut summary = parts.join(", ");
    if cancelled {
        summary.push_str(if summary.is_empty() {
            "cancelled before any step ran"
        } else {
            "; cancelled"
        });
    }
    capitalize(&summary)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Sentence explaining what was run without waiting for approval
pub fn confirmation_sentence(plan: &Plan, results: &[ExecutionResult]) -> String {
    let described: Vec<String> = plan
        .steps
        .iter()
        .map(|s| s.description.trim().trim_end_matches(['.', '?', '!']).to_string())
        .collect();
    let completed = results.iter().filter(|r| r.is_success()).count();
    format!(
        "I read this as {} steps ({}) and went ahead; {} of them completed. Let me know if you meant something else.",
        plan.steps.len(),
        described.join(", then "),
        completed
    )
}
