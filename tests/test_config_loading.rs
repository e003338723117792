//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use intent_router::config::{ConfigError, EmbeddingProviderKind, RouterConfig};
use intent_router::types::Domain;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const MINIMAL: &str = r#"
[router]
domain = "calendar"

[llm]
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
"#;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[router]
domain = "email"
user_id = "alice"

[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
base_url = "http://localhost:8080/v1"
temperature = 0.0
max_tokens = 400
timeout_ms = 5000
structured_output = false

[embedding]
provider = "local"
local_dimensions = 128

[routing]
high_threshold = 0.9
medium_threshold = 0.65
guard_enabled = true

[routing.validation]
enabled = true
band_low = 0.65
band_high = 0.9

[learning]
max_corrections = 20
max_successes = 10
storage_dir = "/var/lib/intent-router"

[planner]
max_steps = 4
llm_decomposition = false
"#
    )
    .unwrap();

    let config = RouterConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.router.domain, Domain::Email);
    assert_eq!(config.router.user_id, "alice");
    assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
    assert_eq!(config.llm.max_tokens, Some(400));
    assert!(!config.llm.structured_output);
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::Local);
    assert_eq!(config.embedding.local_dimensions, 128);
    assert!((config.routing.high_threshold - 0.9).abs() < f32::EPSILON);
    assert!((config.routing.validation.band_low - 0.65).abs() < f32::EPSILON);
    assert_eq!(config.learning.max_corrections, 20);
    assert_eq!(
        config.learning.storage_dir.as_deref(),
        Some(Path::new("/var/lib/intent-router"))
    );
    assert_eq!(config.planner.max_steps, 4);
    assert!(!config.planner.llm_decomposition);
    assert!(config.planner.llm_detection);
}

#[test]
fn test_minimal_config_fills_defaults() {
    let config = RouterConfig::from_toml_str(MINIMAL).unwrap();

    assert_eq!(config.router.domain, Domain::Calendar);
    assert_eq!(config.router.user_id, "default");
    assert_eq!(config.llm.provider, "openai");
    assert_eq!(config.llm.timeout_ms, 8000);
    assert!(config.embedding.enabled);
    assert_eq!(config.embedding.model, "text-embedding-3-small");
    assert!((config.routing.high_threshold - 0.85).abs() < f32::EPSILON);
    assert!((config.routing.medium_threshold - 0.6).abs() < f32::EPSILON);
    assert!(config.routing.guard_enabled);
    assert!(config.routing.validation.enabled);
    assert_eq!(config.learning.storage_dir, None::<PathBuf>);
    assert_eq!(config.learning.few_shot_k, 5);
    assert_eq!(config.planner.max_steps, 5);
}

#[test]
fn test_embedding_defaults_to_llm_endpoint() {
    let config = RouterConfig::from_toml_str(MINIMAL).unwrap();
    assert_eq!(config.embedding_base_url(), config.llm.base_url);
}

#[test]
fn test_config_fails_when_file_does_not_exist() {
    let result = RouterConfig::load_from_file(Path::new("/nonexistent/router.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_fails_on_malformed_toml() {
    let result = RouterConfig::from_toml_str("[router\ndomain = ");
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_fails_on_unknown_domain() {
    let toml = MINIMAL.replace("calendar", "weather");
    assert!(matches!(
        RouterConfig::from_toml_str(&toml),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_config_rejects_invalid_user_id() {
    for user_id in ["../etc", ".hidden", "has space", ""] {
        let toml = format!(
            "[router]\ndomain = \"task\"\nuser_id = \"{user_id}\"\n\n[llm]\nmodel = \"m\"\napi_key_env = \"K\"\n"
        );
        assert!(
            matches!(
                RouterConfig::from_toml_str(&toml),
                Err(ConfigError::InvalidUserId(_))
            ),
            "user id {user_id:?} should be rejected"
        );
    }
}

#[test]
fn test_config_rejects_inverted_thresholds() {
    let toml = format!("{MINIMAL}\n[routing]\nhigh_threshold = 0.5\nmedium_threshold = 0.7\n");
    assert!(matches!(
        RouterConfig::from_toml_str(&toml),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_config_rejects_unsupported_provider() {
    let toml = MINIMAL.replace("[llm]", "[llm]\nprovider = \"carrier-pigeon\"");
    assert!(matches!(
        RouterConfig::from_toml_str(&toml),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_config_rejects_non_http_base_url() {
    let toml = MINIMAL.replace("[llm]", "[llm]\nbase_url = \"ftp://example.com\"");
    assert!(matches!(
        RouterConfig::from_toml_str(&toml),
        Err(ConfigError::InvalidUrl { .. })
    ));
}

#[test]
fn test_config_rejects_zero_plan_steps() {
    let toml = format!("{MINIMAL}\n[planner]\nmax_steps = 0\n");
    assert!(matches!(
        RouterConfig::from_toml_str(&toml),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_config_rejects_empty_learning_window() {
    let toml = format!("{MINIMAL}\n[learning]\nmax_corrections = 0\n");
    assert!(matches!(
        RouterConfig::from_toml_str(&toml),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_missing_api_key_variable_is_reported() {
    let toml = MINIMAL.replace("OPENAI_API_KEY", "INTENT_ROUTER_TEST_UNSET_KEY");
    let config = RouterConfig::from_toml_str(&toml).unwrap();

    match config.get_llm_api_key() {
        Err(ConfigError::EnvVarNotFound(name)) => {
            assert_eq!(name, "INTENT_ROUTER_TEST_UNSET_KEY")
        }
        other => panic!("Expected EnvVarNotFound, got {other:?}"),
    }
    assert!(config.get_embedding_api_key().is_err());
}
