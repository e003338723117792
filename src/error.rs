//! Error taxonomy for the intent routing core
//!
//! Only [`RouterError::ExecutionFailed`] is meant to reach the ultimate caller.
//! Every other variant describes a failure that the engine recovers from
//! locally: a signal degrades to absent, ambiguity becomes a clarifying
//! question, and learning I/O failures are logged and dropped.

use crate::types::Action;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern compiles")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern compiles")
});

const MAX_USER_MESSAGE_LEN: usize = 500;

/// Main error type for routing core operations
#[derive(Debug, Error)]
pub enum RouterError {
    /// A sub-detector could not run. Callers degrade and continue.
    #[error("Signal unavailable ({source_name}): {message}")]
    SignalUnavailable {
        source_name: &'static str,
        message: String,
    },

    /// Signals conflict below the confidence floor.
    #[error("Classification ambiguous: {message}")]
    ClassificationAmbiguous { message: String },

    /// The domain action itself failed. Propagated unchanged.
    #[error("Execution of {action} failed: {source}")]
    ExecutionFailed {
        action: Action,
        #[source]
        source: ExecutionError,
    },

    /// Learning storage could not be read or written.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] crate::learning::PersistenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("LLM provider error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("Embedding provider error: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    #[error("Plan execution cancelled before step {next_step}")]
    Cancelled { next_step: usize },
}

/// Errors raised by domain action executors
///
/// The core never inspects these beyond formatting; they pass through to the
/// caller exactly as the collaborator produced them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Action not supported in this domain: {0}")]
    Unsupported(String),
    #[error("Upstream service error: {0}")]
    Upstream(String),
}

impl RouterError {
    /// Create a signal-unavailable error for the named source
    pub fn signal_unavailable<S: Into<String>>(source_name: &'static str, message: S) -> Self {
        Self::SignalUnavailable {
            source_name,
            message: message.into(),
        }
    }

    /// Create an ambiguity error
    pub fn ambiguous<S: Into<String>>(message: S) -> Self {
        Self::ClassificationAmbiguous {
            message: message.into(),
        }
    }

    /// Wrap a collaborator failure for the given action
    pub fn execution_failed(action: Action, source: ExecutionError) -> Self {
        Self::ExecutionFailed { action, source }
    }

    /// Whether this error is recovered inside the core rather than surfaced
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RouterError::ExecutionFailed { .. })
    }

    /// Render the error for a user-visible report with sensitive data removed
    pub fn to_user_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Sanitize error messages before they are placed in user-visible reports
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_USER_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_USER_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for routing core operations
pub type RouterResult<T> = Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_failed_is_not_recoverable() {
        let error = RouterError::execution_failed(
            Action::Reply,
            ExecutionError::NotFound("message 42".to_string()),
        );

        assert!(!error.is_recoverable());
        assert!(error.to_string().contains("reply"));
        assert!(error.to_string().contains("message 42"));
    }

    #[test]
    fn test_signal_failures_are_recoverable() {
        let error = RouterError::signal_unavailable("semantic", "provider timed out");
        assert!(error.is_recoverable());
        assert_eq!(
            error.to_string(),
            "Signal unavailable (semantic): provider timed out"
        );

        let ambiguous = RouterError::ambiguous("pattern and llm disagree");
        assert!(ambiguous.is_recoverable());
    }

    #[test]
    fn test_user_message_redacts_secrets() {
        let error = RouterError::execution_failed(
            Action::Send,
            ExecutionError::Upstream("auth failed: token=abc456 password=hunter2".to_string()),
        );

        let message = error.to_user_message();
        assert!(!message.contains("abc456"));
        assert!(!message.contains("hunter2"));
        assert!(message.contains("token=***"));
    }

    #[test]
    fn test_sanitize_redacts_sensitive_paths() {
        let sanitized = sanitize_error_message("could not read /home/me/.aws/credentials");
        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains(".aws/credentials"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_exactly_500_chars() {
        let message = "x".repeat(500);
        assert_eq!(sanitize_error_message(&message), message);
    }
}
