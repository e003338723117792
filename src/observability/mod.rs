//! Observability for the routing core
//!
//! Structured logging setup and process-wide metrics counters.

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{classify_span, learning_span, plan_span, step_span};
