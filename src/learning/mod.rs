//! Learning from explicit user feedback
//!
//! Corrections and confirmed resolutions are kept in a bounded per-user
//! window and fed back as few-shot examples to the semantic matcher and the
//! structured classifier.

pub mod backend;
pub mod records;
pub mod store;

pub use backend::{InMemoryBackend, JsonlFileBackend, PersistenceBackend, PersistenceError};
pub use records::{CorrectionRecord, ExampleKind, LearnedExample, LearningRecord, SuccessRecord};
pub use store::{text_similarity, LearningConfig, LearningStore};
