//! Language-model client layer
//!
//! Provider-agnostic completion interface plus the OpenAI-compatible
//! chat-completions implementation used in production.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
