//! Intent Router
//!
//! Confidence-routed intent classification for email, calendar and task
//! assistants.
//!
//! # Overview
//!
//! Each request passes through three detectors that run side by side:
//! - a regex `PatternDetector` for common phrasings
//! - a `SemanticMatcher` comparing embeddings against action exemplars and
//!   the user's learned examples
//! - a `StructuredClassifier` asking a language model for schema-constrained
//!   output, with few-shot examples from the `LearningStore`
//!
//! The `ConfidenceRouter` merges the signals by confidence band, the
//! misclassification guard keeps questions from turning into writes, and
//! medium-confidence decisions are double-checked by the model. Compound
//! requests are split by the `MultiStepPlanner` and executed step by step.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use intent_router::{ConversationContext, IntentEngine, RouterConfig};
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RouterConfig::load_from_file(Path::new("router.toml"))?;
//! let engine = IntentEngine::from_config(&config).await?;
//!
//! let decision = engine
//!     .classify_and_route("what meetings do I have tomorrow", Some(&ConversationContext::default()))
//!     .await;
//! println!("{:?}", decision.resolved_action());
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod learning;
pub mod llm;
pub mod observability;
pub mod patterns;
pub mod planner;
pub mod routing;
pub mod semantic;
pub mod testing;
pub mod types;

pub use classifier::StructuredClassifier;
pub use config::{ConfigError, RouterConfig};
pub use dispatch::{ActionExecutor, ActionHandlers, HandlerExecutor};
pub use embedding::{EmbeddingProvider, HashingEmbedder};
pub use engine::{IntentEngine, IntentEngineBuilder, RequestOutcome};
pub use error::{ExecutionError, RouterError, RouterResult};
pub use learning::{
    CorrectionRecord, InMemoryBackend, JsonlFileBackend, LearningConfig, LearningStore,
    PersistenceBackend, SuccessRecord,
};
pub use llm::LlmProvider;
pub use patterns::PatternDetector;
pub use planner::{CancellationToken, MultiStepPlanner, Plan, PlanReport, PlannerConfig};
pub use routing::{ConfidenceRouter, MisclassificationGuard, RoutingConfig, ValidationPolicy};
pub use semantic::SemanticMatcher;
pub use types::*;
