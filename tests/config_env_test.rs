//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Config::from_env() also loads a .env file
//! via dotenvy, which never overrides variables that are already set, so each
//! test sets everything it asserts on.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use research_orchestrator::config::{Config, LogFormat};
use research_orchestrator::AppError;
use serial_test::serial;
use std::env;
use std::time::Duration;

const MANAGED_VARS: &[&str] = &[
    "PRIMARY_LLM_KEYS",
    "SECONDARY_LLM_KEYS",
    "GOOGLE_SEARCH_KEYS",
    "GOOGLE_SEARCH_ENGINE_IDS",
    "TAVILY_API_KEY",
    "DATABASE_PATH",
    "LOG_FORMAT",
    "QUALITY_THRESHOLD",
    "HTML_TIMEOUT_SECS",
    "PDF_TIMEOUT_SECS",
    "CACHE_ENABLED",
];

/// Start every test from a known environment with one primary key
fn reset_env() {
    for var in MANAGED_VARS {
        env::remove_var(var);
    }
    env::set_var("PRIMARY_LLM_KEYS", "key-a");
}

#[test]
#[serial]
fn test_config_from_env_loads_successfully() {
    reset_env();

    let config = Config::from_env().unwrap();
    assert_eq!(config.providers.generation.len(), 1);
    assert_eq!(config.providers.generation[0].name, "primary");
    assert_eq!(config.providers.generation[0].api_keys, vec!["key-a"]);
}

#[test]
#[serial]
fn test_config_key_lists_are_split() {
    reset_env();
    env::set_var("PRIMARY_LLM_KEYS", "k1, k2 ,k3");
    env::set_var("SECONDARY_LLM_KEYS", "s1");

    let config = Config::from_env().unwrap();
    assert_eq!(config.providers.generation.len(), 2);
    assert_eq!(config.providers.generation[0].api_keys, vec!["k1", "k2", "k3"]);
    assert_eq!(config.providers.generation[1].name, "secondary");

    reset_env();
}

#[test]
#[serial]
fn test_config_requires_generation_keys() {
    reset_env();
    env::set_var("PRIMARY_LLM_KEYS", " , ");

    let result = Config::from_env();
    assert!(matches!(result, Err(AppError::Config { .. })));

    reset_env();
}

#[test]
#[serial]
fn test_config_google_keys_must_pair_with_engines() {
    reset_env();
    env::set_var("GOOGLE_SEARCH_KEYS", "g1,g2");
    env::set_var("GOOGLE_SEARCH_ENGINE_IDS", "e1");

    assert!(matches!(Config::from_env(), Err(AppError::Config { .. })));

    env::set_var("GOOGLE_SEARCH_ENGINE_IDS", "e1,e2");
    let config = Config::from_env().unwrap();
    let google = config.providers.google.unwrap();
    assert_eq!(google.engine_ids, vec!["e1", "e2"]);

    reset_env();
}

#[test]
#[serial]
fn test_config_tavily_optional() {
    reset_env();

    let config = Config::from_env().unwrap();
    assert!(config.providers.tavily.is_none());

    env::set_var("TAVILY_API_KEY", "tvly-123");
    let config = Config::from_env().unwrap();
    assert_eq!(config.providers.tavily.unwrap().api_key, "tvly-123");

    reset_env();
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    reset_env();
    env::set_var("LOG_FORMAT", "json");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);

    reset_env();
}

#[test]
#[serial]
fn test_config_research_overrides() {
    reset_env();
    env::set_var("QUALITY_THRESHOLD", "0.8");
    env::set_var("HTML_TIMEOUT_SECS", "10");
    env::set_var("PDF_TIMEOUT_SECS", "40");
    env::set_var("CACHE_ENABLED", "false");
    env::set_var("DATABASE_PATH", "/custom/path.db");

    let config = Config::from_env().unwrap();
    assert!((config.research.quality_threshold - 0.8).abs() < f64::EPSILON);
    assert_eq!(config.research.html_timeout, Duration::from_secs(10));
    assert_eq!(config.research.pdf_timeout, Duration::from_secs(40));
    assert!(!config.research.cache_enabled);
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/path.db");

    reset_env();
}

#[test]
#[serial]
fn test_config_invalid_numbers_fall_back() {
    reset_env();
    env::set_var("QUALITY_THRESHOLD", "high");

    let config = Config::from_env().unwrap();
    assert!((config.research.quality_threshold - 0.7).abs() < f64::EPSILON);

    reset_env();
}
