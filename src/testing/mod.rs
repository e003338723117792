//! Testing utilities and mock implementations
//!
//! Mocks for the model, embedding, and domain-execution collaborators so the
//! router can be tested without network services.

pub mod mocks;

pub use mocks::*;
