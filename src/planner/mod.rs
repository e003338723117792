//! Multi-step planning
//!
//! Compound requests ("find the email from Sarah then reply saying thanks")
//! are decomposed into an ordered `Plan`. Each step re-enters the routing
//! pipeline through a `StepRouter` and runs strictly after the one before it.

pub mod detect;
pub mod executor;
pub mod plan;

pub use detect::{sequence_signal, split_segments, Segment, SequenceSignal};
pub use executor::{
    execute_plan, CancellationToken, PlanRun, ResolveError, StepOutputs, StepRouter, PREVIOUS_KEY,
};
pub use plan::{
    confirmation_sentence, summarize, DecompositionMethod, ExecutionResult, Plan, PlanReport, Step,
    StepOutcome,
};

use crate::classifier::StructuredClassifier;
use crate::config::ConfigError;
use crate::dispatch::ActionExecutor;
use crate::observability::metrics;
use crate::plan_span;
use crate::types::{Confidence, Domain};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

const MAX_STEPS_LIMIT: usize = 20;

/// Planner tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_steps: usize,
    /// Ask the model when sequential phrasing is ambiguous
    pub llm_detection: bool,
    /// Let the model decompose before falling back to connector splitting
    pub llm_decomposition: bool,
    /// Plans below this confidence come back with an explanatory sentence
    pub confirm_below: f32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            llm_detection: true,
            llm_decomposition: true,
            confirm_below: 0.85,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 || self.max_steps > MAX_STEPS_LIMIT {
            return Err(ConfigError::InvalidConfig(format!(
                "planner.max_steps must be between 1 and {MAX_STEPS_LIMIT}, got {}",
                self.max_steps
            )));
        }
        if !(0.0..=1.0).contains(&self.confirm_below) {
            return Err(ConfigError::InvalidConfig(format!(
                "planner.confirm_below must be between 0 and 1, got {}",
                self.confirm_below
            )));
        }
        Ok(())
    }
}

/// Plan-split confidence by method and connector strength
fn split_confidence(method: DecompositionMethod, signal: SequenceSignal) -> Confidence {
    let value = match (method, signal) {
        (DecompositionMethod::Single, _) => 1.0,
        (DecompositionMethod::Llm, SequenceSignal::Strong) => 0.9,
        (DecompositionMethod::Llm, _) => 0.75,
        (DecompositionMethod::Heuristic, SequenceSignal::Strong) => 0.85,
        (DecompositionMethod::Heuristic, _) => 0.65,
    };
    Confidence::new(value)
}

/// Detects, decomposes and executes compound requests
pub struct MultiStepPlanner {
    domain: Domain,
    config: PlannerConfig,
    classifier: Option<Arc<StructuredClassifier>>,
}

impl MultiStepPlanner {
    pub fn new(domain: Domain, config: PlannerConfig, classifier: Option<Arc<StructuredClassifier>>) -> Self {
        Self {
            domain,
            config,
            classifier,
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Whether the request asks for more than one operation
    pub async fn is_multi_step(&self, text: &str) -> bool {
        self.detect(text).await != SequenceSignal::None
    }

    async fn detect(&self, text: &str) -> SequenceSignal {
        match sequence_signal(text) {
            SequenceSignal::Weak => {
                let fallback = split_segments(text).len() > 1;
                let confirmed = match (&self.classifier, self.config.llm_detection) {
                    (Some(classifier), true) => {
                        classifier.detect_sequence(text).await.unwrap_or(fallback)
                    }
                    _ => fallback,
                };
                debug!(confirmed, "Weak sequential phrasing checked");
                if confirmed {
                    SequenceSignal::Weak
                } else {
                    SequenceSignal::None
                }
            }
            signal => signal,
        }
    }

    /// Decompose a request; non-compound requests yield a single-step plan
    pub async fn decompose(&self, text: &str) -> Plan {
        let signal = self.detect(text).await;
        if signal == SequenceSignal::None {
            return Plan::single(text);
        }

        if self.config.llm_decomposition {
            if let Some(classifier) = &self.classifier {
                match classifier.decompose(text, self.config.max_steps).await {
                    Some(planned) if planned.len() >= 2 => {
                        let steps = planned
                            .into_iter()
                            .enumerate()
                            .map(|(i, p)| {
                                Step::new(i + 1, p.description)
                                    .with_action(p.action)
                                    .with_params(p.params)
                                    .with_depends_on(p.depends_on)
                            })
                            .collect();
                        let method = DecompositionMethod::Llm;
                        return Plan::new(text, steps, method, split_confidence(method, signal));
                    }
                    _ => debug!("Model decomposition unusable, splitting on connectors"),
                }
            }
        }

        self.heuristic_plan(text, signal)
    }

    fn heuristic_plan(&self, text: &str, signal: SequenceSignal) -> Plan {
        let mut segments = split_segments(text);
        if segments.len() < 2 {
            return Plan::single(text);
        }

        if segments.len() > self.config.max_steps {
            warn!(
                segments = segments.len(),
                max_steps = self.config.max_steps,
                "Request has more steps than allowed, merging the tail"
            );
            let tail: Vec<String> = segments
                .drain(self.config.max_steps - 1..)
                .map(|s| s.text)
                .collect();
            segments.push(Segment {
                text: tail.join(" then "),
                refers_back: true,
            });
        }

        let steps = segments
            .into_iter()
            .enumerate()
            .map(|(i, segment)| {
                let depends_on = if segment.refers_back && i > 0 {
                    vec![i]
                } else {
                    Vec::new()
                };
                Step::new(i + 1, segment.text).with_depends_on(depends_on)
            })
            .collect();

        let method = DecompositionMethod::Heuristic;
        Plan::new(text, steps, method, split_confidence(method, signal))
    }

    /// Run the plan and summarize per-step outcomes
    pub async fn execute(
        &self,
        plan: Plan,
        router: &dyn StepRouter,
        executor: &dyn ActionExecutor,
        cancel: Option<&CancellationToken>,
    ) -> PlanReport {
        let span = plan_span!(plan_id = %plan.id, steps = plan.len(), method = ?plan.method);
        let run = execute_plan(&plan, router, executor, cancel)
            .instrument(span)
            .await;

        let confidence = plan.confidence.min(run.min_confidence);
        let summary = summarize(&run.results, run.cancelled);
        let confirmation = (plan.is_multi_step() && confidence.value() < self.config.confirm_below)
            .then(|| confirmation_sentence(&plan, &run.results));

        let report = PlanReport {
            plan,
            results: run.results,
            cancelled: run.cancelled,
            confidence,
            summary,
            confirmation,
        };

        metrics().plan_finished(report.completed(), report.failed(), report.skipped(), report.cancelled);
        info!(
            plan_id = %report.plan.id,
            completed = report.completed(),
            failed = report.failed(),
            skipped = report.skipped(),
            cancelled = report.cancelled,
            "Plan finished: {}",
            report.summary
        );
        report
    }
}

impl std::fmt::Debug for MultiStepPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiStepPlanner")
            .field("domain", &self.domain)
            .field("config", &self.config)
            .field("llm", &self.classifier.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockLlmProvider;
    use crate::types::Action;

    fn heuristic_planner() -> MultiStepPlanner {
        MultiStepPlanner::new(Domain::Email, PlannerConfig::default(), None)
    }

    #[tokio::test]
    async fn test_single_request_is_one_step() {
        let plan = heuristic_planner().decompose("list my emails from today").await;
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.method, DecompositionMethod::Single);
    }

    #[tokio::test]
    async fn test_heuristic_split_links_follow_up() {
        let plan = heuristic_planner()
            .decompose("find the email from Sarah then reply saying thanks")
            .await;
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.method, DecompositionMethod::Heuristic);
        assert_eq!(plan.steps[1].depends_on, vec![1]);
    }

    #[tokio::test]
    async fn test_overflow_segments_are_merged() {
        let config = PlannerConfig {
            max_steps: 2,
            ..Default::default()
        };
        let planner = MultiStepPlanner::new(Domain::Task, config, None);
        let plan = planner
            .decompose("add milk then add eggs then add bread")
            .await;
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[1].description, "add eggs then add bread");
    }

    #[tokio::test]
    async fn test_model_decomposition_preferred() {
        let llm = Arc::new(MockLlmProvider::single_response(
            r#"{"steps": [
                {"description": "find the email from Sarah", "action": "search", "params": {"sender": "Sarah"}, "depends_on": []},
                {"description": "reply saying thanks", "action": "reply", "params": {"message_id": "{{step1.id}}", "body": "thanks"}, "depends_on": [1]}
            ]}"#,
        ));
        let classifier = Arc::new(StructuredClassifier::new(llm, "mock-model", Domain::Email));
        let planner = MultiStepPlanner::new(Domain::Email, PlannerConfig::default(), Some(classifier));

        let plan = planner
            .decompose("find the email from Sarah then reply saying thanks")
            .await;
        assert_eq!(plan.method, DecompositionMethod::Llm);
        assert_eq!(plan.steps[0].action, Some(Action::Search));
        assert_eq!(plan.steps[1].dependencies(), vec![1]);
    }

    #[tokio::test]
    async fn test_weak_signal_rejected_by_model() {
        let llm = Arc::new(
            MockLlmProvider::single_response(r#"{"sequential": false, "reason": "one search"}"#),
        );
        let classifier = Arc::new(StructuredClassifier::new(llm, "mock-model", Domain::Email));
        let planner = MultiStepPlanner::new(Domain::Email, PlannerConfig::default(), Some(classifier));

        assert!(!planner.is_multi_step("search and find the invoice").await);
    }

    #[test]
    fn test_config_validation() {
        assert!(PlannerConfig::default().validate().is_ok());
        let config = PlannerConfig {
            max_steps: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
