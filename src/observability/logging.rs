//! Structured logging system using tracing crate
//!
//! Provides contextual, machine-readable logging with span macros for the
//! classification, planning, and learning paths.
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! The router is a library, so initialization uses `try_init` and leaves an
//! already-installed global subscriber in place.

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string, defaulting to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a `LOG_LEVEL` value, defaulting to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    let mut filter = EnvFilter::new(level.to_string());
    for directive in ["hyper=warn", "reqwest=warn", "tokio=warn", "h2=warn"] {
        if let Ok(parsed) = directive.parse() {
            filter = filter.add_directive(parsed);
        }
    }
    filter
}

fn span_events(include_spans: bool) -> fmt::format::FmtSpan {
    if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    }
}

/// Initialize logging with manual configuration
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) -> bool {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let result = match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_span_events(span_events(include_spans)))
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
    };

    result.is_ok()
}

/// Initialize logging from environment variables
pub fn init_default_logging() -> bool {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()));
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    let include_spans = env::var("LOG_SPANS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    init_logging(level, format, include_spans)
}

/// Create a span covering one classify-and-route request
#[macro_export]
macro_rules! classify_span {
    ($($field:tt)*) => {
        tracing::info_span!("classify_request", $($field)*)
    };
}

/// Create a span covering a multi-step plan
#[macro_export]
macro_rules! plan_span {
    ($($field:tt)*) => {
        tracing::info_span!("plan_execution", $($field)*)
    };
}

/// Create a span for one plan step
#[macro_export]
macro_rules! step_span {
    ($($field:tt)*) => {
        tracing::info_span!("plan_step", $($field)*)
    };
}

/// Create a span for learning store operations
#[macro_export]
macro_rules! learning_span {
    ($($field:tt)*) => {
        tracing::debug_span!("learning_store", $($field)*)
    };
}

pub use {classify_span, learning_span, plan_span, step_span};
