//! Intent engine
//!
//! Wires the detectors, the router, the learning store and the planner into
//! the operations callers use: `classify_and_route`, `handle_feedback`,
//! `record_resolution` and `handle_request`. One engine serves one domain
//! and one user's learning history.

use crate::classifier::StructuredClassifier;
use crate::classify_span;
use crate::config::{ConfigError, EmbeddingProviderKind, RouterConfig};
use crate::dispatch::ActionExecutor;
use crate::embedding::{
    EmbeddingProvider, EmbeddingSelector, HashingEmbedder, OpenAiEmbeddingConfig,
    OpenAiEmbeddingProvider,
};
use crate::error::{RouterError, RouterResult};
use crate::learning::{CorrectionRecord, LearningStore, SuccessRecord};
use crate::llm::providers::openai::{OpenAiConfig, OpenAiProvider};
use crate::llm::LlmProvider;
use crate::observability::metrics;
use crate::patterns::PatternDetector;
use crate::planner::{CancellationToken, MultiStepPlanner, PlanReport, PlannerConfig, Step, StepRouter};
use crate::routing::{ConfidenceRouter, RoutingConfig};
use crate::semantic::{SemanticConfig, SemanticMatcher};
use crate::types::{
    Action, ClassificationDecision, ConversationContext, DecisionSource, Domain, Entities, Query,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// What `handle_request` did
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestOutcome {
    /// A single action ran
    Executed {
        decision: ClassificationDecision,
        output: Value,
    },
    /// Nothing ran; the user must clarify
    Clarification {
        decision: ClassificationDecision,
        question: String,
    },
    /// A compound request ran as a plan
    Plan(PlanReport),
}

/// Classification and routing core for one domain
pub struct IntentEngine {
    domain: Domain,
    detector: PatternDetector,
    semantic: SemanticMatcher,
    classifier: Arc<StructuredClassifier>,
    router: ConfidenceRouter,
    learning: Arc<LearningStore>,
    planner: MultiStepPlanner,
}

impl IntentEngine {
    pub fn builder(domain: Domain) -> IntentEngineBuilder {
        IntentEngineBuilder::new(domain)
    }

    /// Build providers from configuration and open the learning store
    pub async fn from_config(config: &RouterConfig) -> RouterResult<Self> {
        let domain = config.router.domain;
        let llm = OpenAiProvider::new(OpenAiConfig {
            api_key: config.get_llm_api_key()?,
            base_url: config.llm.base_url.clone(),
            timeout: config.llm.timeout(),
            structured_output: config.llm.structured_output,
        })?;

        let mut builder = IntentEngineBuilder::new(domain)
            .llm(Arc::new(llm), config.llm.model.clone())
            .temperature(config.llm.temperature)
            .max_tokens(config.llm.max_tokens)
            .llm_timeout(config.llm.timeout())
            .structured_output(config.llm.structured_output)
            .routing(config.routing.clone())
            .planner(config.planner.clone())
            .semantic_config(SemanticConfig {
                min_similarity: config.embedding.min_similarity,
                local_min_similarity: config.embedding.local_min_similarity,
                timeout: config.embedding.timeout(),
            });

        if config.embedding.enabled {
            builder = builder.embedding_fallback(Arc::new(HashingEmbedder::new(
                config.embedding.local_dimensions,
            )));
            if config.embedding.provider == EmbeddingProviderKind::OpenAi {
                match network_embedder(config) {
                    Ok(provider) => builder = builder.embedding(Arc::new(provider)),
                    Err(e) => warn!(error = %e, "Network embeddings unavailable, using local embedder"),
                }
            }
        } else {
            builder = builder.without_embeddings();
        }

        let learning = Arc::new(LearningStore::from_config(
            config.router.user_id.clone(),
            config.learning.clone(),
        ));
        let loaded = learning.open().await;
        debug!(records = loaded, "Learning store opened");

        builder.learning_store(learning).build().await
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn learning(&self) -> &Arc<LearningStore> {
        &self.learning
    }

    pub fn router(&self) -> &ConfidenceRouter {
        &self.router
    }

    pub fn planner(&self) -> &MultiStepPlanner {
        &self.planner
    }

    pub fn semantic(&self) -> &SemanticMatcher {
        &self.semantic
    }

    pub fn classifier(&self) -> &Arc<StructuredClassifier> {
        &self.classifier
    }

    /// Classify one request and route it to a single decision
    ///
    /// Never fails: unavailable signals are treated as absent and ambiguity
    /// becomes a clarification question.
    pub async fn classify_and_route(
        &self,
        text: &str,
        context: Option<&ConversationContext>,
    ) -> ClassificationDecision {
        let span = classify_span!(domain = %self.domain, user_id = %self.learning.user_id());
        self.classify_inner(text, context, None)
            .instrument(span)
            .await
    }

    async fn classify_inner(
        &self,
        text: &str,
        context: Option<&ConversationContext>,
        action_hint: Option<Action>,
    ) -> ClassificationDecision {
        let started = Instant::now();

        let examples = match context.and_then(|c| c.user_id.as_deref()) {
            Some(user) if user != self.learning.user_id() => {
                debug!(context_user = user, "Context belongs to another user, skipping learned examples");
                Vec::new()
            }
            _ => {
                self.learning
                    .get_similar(text, self.learning.config().few_shot_k)
                    .await
            }
        };

        let pattern = self.detector.detect(text);

        let (semantic, llm) = match action_hint {
            Some(action) => {
                let semantic = self.semantic.match_query(text, &examples).await;
                let hinted = ClassificationDecision::action(
                    action,
                    Entities::new(),
                    self.router.config().high_threshold,
                    DecisionSource::Llm,
                )
                .with_rationale("proposed during plan decomposition");
                (semantic, hinted)
            }
            None => {
                let mut query = Query::new(text, self.domain);
                if let Some(context) = context {
                    query = query.with_context(context.clone());
                }
                tokio::join!(
                    self.semantic.match_query(text, &examples),
                    self.classifier.classify(&query, &examples)
                )
            }
        };

        let routed = self
            .router
            .route(text, pattern.as_ref(), semantic.as_ref(), &llm);
        let decision = self.self_validate(text, routed).await;

        metrics().decision_made(decision.chosen_source, started.elapsed());
        if decision.needs_clarification_question().is_some() {
            metrics().clarification_requested();
        }
        info!(
            action = ?decision.resolved_action(),
            source = decision.chosen_source.as_str(),
            confidence = decision.confidence.value(),
            validated = decision.validated,
            pattern = ?pattern.as_ref().map(|c| c.action),
            semantic = ?semantic.as_ref().map(|c| c.action),
            llm = ?llm.resolved_action(),
            "Request classified"
        );
        decision
    }

    async fn self_validate(&self, text: &str, decision: ClassificationDecision) -> ClassificationDecision {
        if !self.router.should_validate(&decision) {
            return decision;
        }

        let Some(critique) = self.classifier.critique(text, &decision).await else {
            debug!("Self-validation unavailable, keeping decision");
            return decision;
        };

        let (decision, correction) = self.router.apply_critique(text, decision, &critique);
        metrics().self_validation_run(correction.is_some());
        if let Some(correction) = correction {
            // Candidate correction only; learning records come from explicit feedback
            info!(
                query = text,
                wrong = %correction.wrong_action,
                correct = %correction.correct_action,
                reason = %correction.reason,
                "Self-validation replaced classification"
            );
        }
        decision
    }

    /// Record that `wrong_action` should have been `correct_action`
    pub async fn handle_feedback(
        &self,
        text: &str,
        wrong_action: Action,
        correct_action: Action,
    ) -> Option<CorrectionRecord> {
        if !self.domain.supports(correct_action) {
            warn!(domain = %self.domain, action = %correct_action, "Ignoring correction to an action outside the domain");
            return None;
        }
        self.learning
            .record_correction(text, wrong_action, correct_action)
            .await
    }

    /// Record an explicitly confirmed successful resolution
    pub async fn record_resolution(
        &self,
        text: &str,
        action: Action,
        entities: Entities,
    ) -> Option<SuccessRecord> {
        if !self.domain.supports(action) {
            return None;
        }
        self.learning.record_success(text, action, entities).await
    }

    /// Rewrite the learning snapshot, surfacing storage errors
    pub async fn flush_learning(&self) -> RouterResult<()> {
        self.learning.try_flush().await?;
        Ok(())
    }

    /// Classify and execute a request, as a plan when it is compound
    ///
    /// Only domain execution failures of a single action surface as errors;
    /// plan step failures are reported per step in the `PlanReport`.
    pub async fn handle_request(
        &self,
        text: &str,
        context: Option<&ConversationContext>,
        executor: &dyn ActionExecutor,
    ) -> RouterResult<RequestOutcome> {
        self.handle_request_with_cancel(text, context, executor, None)
            .await
    }

    pub async fn handle_request_with_cancel(
        &self,
        text: &str,
        context: Option<&ConversationContext>,
        executor: &dyn ActionExecutor,
        cancel: Option<&CancellationToken>,
    ) -> RouterResult<RequestOutcome> {
        let plan = self.planner.decompose(text).await;
        if plan.is_multi_step() {
            let report = self.planner.execute(plan, self, executor, cancel).await;
            return Ok(RequestOutcome::Plan(report));
        }

        let decision = self.classify_and_route(text, context).await;
        if let Some(question) = decision.needs_clarification_question() {
            return Ok(RequestOutcome::Clarification {
                question: question.to_string(),
                decision,
            });
        }

        let action = decision
            .resolved_action()
            .filter(|a| !a.is_unknown())
            .ok_or_else(|| RouterError::ambiguous("no action resolved"))?;

        let output = executor
            .execute(action, &decision.entities)
            .await
            .map_err(|e| RouterError::execution_failed(action, e))?;
        Ok(RequestOutcome::Executed { decision, output })
    }
}

#[async_trait]
impl StepRouter for IntentEngine {
    async fn route_step(&self, step: &Step) -> ClassificationDecision {
        self.classify_inner(&step.description, None, step.action)
            .await
    }
}

impl std::fmt::Debug for IntentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentEngine")
            .field("domain", &self.domain)
            .field("classifier", &self.classifier)
            .field("semantic", &self.semantic)
            .field("user_id", &self.learning.user_id())
            .finish()
    }
}

fn network_embedder(config: &RouterConfig) -> Result<OpenAiEmbeddingProvider, RouterError> {
    let provider = OpenAiEmbeddingProvider::new(OpenAiEmbeddingConfig {
        api_key: config.get_embedding_api_key()?,
        base_url: config.embedding_base_url().to_string(),
        model: config.embedding.model.clone(),
        timeout: config.embedding.timeout(),
    })?;
    Ok(provider)
}

/// Assembles an `IntentEngine` from injected collaborators
pub struct IntentEngineBuilder {
    domain: Domain,
    user_id: String,
    llm: Option<(Arc<dyn LlmProvider>, String)>,
    temperature: f32,
    max_tokens: Option<u32>,
    llm_timeout: Duration,
    structured_output: bool,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    embedding_fallback: Option<Arc<dyn EmbeddingProvider>>,
    embeddings_enabled: bool,
    semantic: SemanticConfig,
    routing: RoutingConfig,
    planner: PlannerConfig,
    learning: Option<Arc<LearningStore>>,
}

impl IntentEngineBuilder {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            user_id: "default".to_string(),
            llm: None,
            temperature: 0.0,
            max_tokens: None,
            llm_timeout: Duration::from_secs(8),
            structured_output: true,
            embedding: None,
            embedding_fallback: Some(Arc::new(HashingEmbedder::default())),
            embeddings_enabled: true,
            semantic: SemanticConfig::default(),
            routing: RoutingConfig::default(),
            planner: PlannerConfig::default(),
            learning: None,
        }
    }

    pub fn llm(mut self, provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        self.llm = Some((provider, model.into()));
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    pub fn structured_output(mut self, enabled: bool) -> Self {
        self.structured_output = enabled;
        self
    }

    /// Preferred embedding provider
    pub fn embedding(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding = Some(provider);
        self
    }

    /// Provider used when the preferred one cannot embed the exemplars
    pub fn embedding_fallback(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_fallback = Some(provider);
        self
    }

    pub fn without_embeddings(mut self) -> Self {
        self.embeddings_enabled = false;
        self
    }

    pub fn semantic_config(mut self, config: SemanticConfig) -> Self {
        self.semantic = config;
        self
    }

    pub fn routing(mut self, config: RoutingConfig) -> Self {
        self.routing = config;
        self
    }

    pub fn planner(mut self, config: PlannerConfig) -> Self {
        self.planner = config;
        self
    }

    /// Learning store owner when no store is injected
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn learning_store(mut self, store: Arc<LearningStore>) -> Self {
        self.learning = Some(store);
        self
    }

    /// Validate settings, embed exemplars and assemble the engine
    pub async fn build(self) -> RouterResult<IntentEngine> {
        self.routing.validate()?;
        self.planner.validate()?;

        let (llm, model) = self.llm.ok_or_else(|| {
            RouterError::Config(ConfigError::InvalidConfig(
                "an LLM provider is required".to_string(),
            ))
        })?;

        let classifier = Arc::new(
            StructuredClassifier::new(llm, model, self.domain)
                .with_temperature(self.temperature)
                .with_max_tokens(self.max_tokens)
                .with_timeout(self.llm_timeout)
                .with_structured_output(self.structured_output),
        );

        let semantic = if self.embeddings_enabled {
            let selector = EmbeddingSelector::new(self.embedding, self.embedding_fallback);
            SemanticMatcher::initialize(self.domain, &selector, &self.semantic).await
        } else {
            SemanticMatcher::disabled(self.domain)
        };

        let learning = match self.learning {
            Some(store) => store,
            None => Arc::new(LearningStore::in_memory(self.user_id, Default::default())),
        };

        let planner = MultiStepPlanner::new(self.domain, self.planner, Some(Arc::clone(&classifier)));

        info!(
            domain = %self.domain,
            llm = classifier.provider_name(),
            embeddings = ?semantic.index().map(|i| i.provider_name().to_string()),
            user_id = learning.user_id(),
            "Intent engine ready"
        );

        Ok(IntentEngine {
            domain: self.domain,
            detector: PatternDetector::for_domain(self.domain),
            semantic,
            classifier,
            router: ConfidenceRouter::new(self.domain, self.routing),
            learning,
            planner,
        })
    }
}
