//! Router configuration loaded from TOML
//!
//! Secrets are never stored in the file itself. Sections name the environment
//! variable that holds each API key, and keys are resolved when providers are
//! constructed.

use crate::learning::LearningConfig;
use crate::planner::PlannerConfig;
use crate::routing::RoutingConfig;
use crate::types::Domain;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level configuration for one domain engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    pub router: RouterSection,
    pub llm: LlmSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
}

/// Engine identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterSection {
    /// Which assistant domain this engine serves
    pub domain: Domain,
    /// Owner of the learning store (must match [a-zA-Z0-9._-]+)
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

fn default_user_id() -> String {
    "default".to_string()
}

/// Language model section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    /// Provider name; only "openai" (and compatible servers) is supported
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    /// Model identifier
    pub model: String,
    /// Environment variable containing API key
    pub api_key_env: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Per-call timeout in milliseconds (default: 8000)
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether to request `json_schema` constrained output
    #[serde(default = "default_true")]
    pub structured_output: bool,
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_timeout_ms() -> u64 {
    8000
}

fn default_true() -> bool {
    true
}

impl LlmSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which embedding provider to prefer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// OpenAI-compatible `/embeddings`, falling back to local hashing
    #[default]
    OpenAi,
    /// Local hashing embedder only
    Local,
}

/// Embedding section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Defaults to the LLM key variable when omitted
    pub api_key_env: Option<String>,
    /// Defaults to the LLM base URL when omitted
    pub base_url: Option<String>,
    /// Per-call timeout in milliseconds (default: 3000)
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_local_dimensions")]
    pub local_dimensions: usize,
    /// Minimum cosine similarity for network embeddings
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Minimum cosine similarity for the local hashing embedder
    #[serde(default = "default_local_min_similarity")]
    pub local_min_similarity: f32,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_timeout_ms() -> u64 {
    3000
}

fn default_local_dimensions() -> usize {
    256
}

fn default_min_similarity() -> f32 {
    0.75
}

fn default_local_min_similarity() -> f32 {
    0.55
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: EmbeddingProviderKind::default(),
            model: default_embedding_model(),
            api_key_env: None,
            base_url: None,
            timeout_ms: default_embedding_timeout_ms(),
            local_dimensions: default_local_dimensions(),
            min_similarity: default_min_similarity(),
            local_min_similarity: default_local_min_similarity(),
        }
    }
}

impl EmbeddingSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid user ID format: {0}")]
    InvalidUserId(String),
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RouterConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RouterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_user_id(&self.router.user_id)?;

        if self.llm.provider != "openai" {
            return Err(ConfigError::InvalidConfig(format!(
                "unsupported llm provider '{}', expected 'openai'",
                self.llm.provider
            )));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "llm.model must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidConfig(format!(
                "llm.temperature {} must be within 0.0..=2.0",
                self.llm.temperature
            )));
        }
        validate_base_url(&self.llm.base_url)?;
        if let Some(base_url) = &self.embedding.base_url {
            validate_base_url(base_url)?;
        }
        if self.embedding.local_dimensions == 0 {
            return Err(ConfigError::InvalidConfig(
                "embedding.local_dimensions must be positive".to_string(),
            ));
        }

        self.routing.validate()?;
        self.learning.validate()?;
        self.planner.validate()?;
        Ok(())
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Get LLM API key from environment variable
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        Self::get_env_var_required(&self.llm.api_key_env)
    }

    /// Get embedding API key, falling back to the LLM key variable
    pub fn get_embedding_api_key(&self) -> Result<String, ConfigError> {
        let name = self
            .embedding
            .api_key_env
            .as_deref()
            .unwrap_or(&self.llm.api_key_env);
        Self::get_env_var_required(name)
    }

    /// Embedding base URL, falling back to the LLM base URL
    pub fn embedding_base_url(&self) -> &str {
        self.embedding
            .base_url
            .as_deref()
            .unwrap_or(&self.llm.base_url)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[router]
domain = "email"
user_id = "test-user"

[llm]
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// User IDs become file names in the learning store
fn validate_user_id(user_id: &str) -> Result<(), ConfigError> {
    let valid_chars = user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if user_id.is_empty() || !valid_chars || user_id.starts_with('.') {
        return Err(ConfigError::InvalidUserId(format!(
            "User ID '{user_id}' must match pattern [a-zA-Z0-9._-]+ and not start with '.'"
        )));
    }

    Ok(())
}

fn validate_base_url(raw: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}
