//! Config environment variable tests
//!
//! Config::from_env() also loads a .env file through dotenvy, so each test
//! sets the variables it asserts on and removes them afterwards.
//!
//! Tests use #[serial] to prevent races on the shared process environment.

use investigation_engine::config::{Config, LogFormat};
use serial_test::serial;
use std::env;

fn with_api_key() {
    env::set_var("LANGBASE_API_KEY", "test-key");
}

fn clear(keys: &[&str]) {
    for key in keys {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_config_requires_api_key() {
    let saved = env::var("LANGBASE_API_KEY").ok();
    env::remove_var("LANGBASE_API_KEY");

    // A .env file in the working directory may still provide the key
    if std::path::Path::new(".env").exists() {
        return;
    }

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("LANGBASE_API_KEY"));

    if let Some(key) = saved {
        env::set_var("LANGBASE_API_KEY", key);
    }
}

#[test]
#[serial]
fn test_config_custom_database_and_logging() {
    with_api_key();
    env::set_var("DATABASE_PATH", "/custom/cases.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");
    env::set_var("LOG_FORMAT", "JSON");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/cases.db");
    assert_eq!(config.database.max_connections, 10);
    assert_eq!(config.logging.format, LogFormat::Json);

    clear(&["DATABASE_PATH", "DATABASE_MAX_CONNECTIONS", "LOG_FORMAT"]);
}

#[test]
#[serial]
fn test_config_request_defaults_leave_retry_to_engine() {
    with_api_key();
    clear(&["REQUEST_TIMEOUT_MS", "MAX_RETRIES", "RETRY_DELAY_MS"]);

    let config = Config::from_env().unwrap();
    assert_eq!(config.request.timeout_ms, 30000);
    assert_eq!(config.request.max_retries, 0);
}

#[test]
#[serial]
fn test_config_custom_pipes() {
    with_api_key();
    env::set_var("PIPE_OODA_STEP", "ooda-v2");
    env::set_var("PIPE_EVIDENCE_CLASSIFIER", "classifier-v2");
    env::set_var("PIPE_CONSULTANT", "consultant-v2");

    let config = Config::from_env().unwrap();
    assert_eq!(config.pipes.ooda_step, "ooda-v2");
    assert_eq!(config.pipes.evidence_classifier, "classifier-v2");
    assert_eq!(config.pipes.consultant, "consultant-v2");

    clear(&["PIPE_OODA_STEP", "PIPE_EVIDENCE_CLASSIFIER", "PIPE_CONSULTANT"]);
}

#[test]
#[serial]
fn test_config_engine_overrides() {
    with_api_key();
    env::set_var("COLLABORATOR_TIMEOUT_MS", "5000");
    env::set_var("COLLABORATOR_RETRY_BACKOFF_MS", "50");
    env::set_var("REQUIRE_PHASE_CONFIRMATION", "off");
    env::set_var("FAST_TRACK_CRITICAL", "0");

    let config = Config::from_env().unwrap();
    assert_eq!(config.engine.collaborator_timeout_ms, 5000);
    assert_eq!(config.engine.collaborator_retry_backoff_ms, 50);
    assert!(!config.engine.require_phase_confirmation);
    assert!(!config.engine.fast_track_critical);

    clear(&[
        "COLLABORATOR_TIMEOUT_MS",
        "COLLABORATOR_RETRY_BACKOFF_MS",
        "REQUIRE_PHASE_CONFIRMATION",
        "FAST_TRACK_CRITICAL",
    ]);
}

#[test]
#[serial]
fn test_config_invalid_values_fall_back_to_defaults() {
    with_api_key();
    env::set_var("COLLABORATOR_TIMEOUT_MS", "soon");
    env::set_var("REQUIRE_PHASE_CONFIRMATION", "maybe");

    let config = Config::from_env().unwrap();
    assert_eq!(config.engine.collaborator_timeout_ms, 30000);
    assert!(config.engine.require_phase_confirmation);

    clear(&["COLLABORATOR_TIMEOUT_MS", "REQUIRE_PHASE_CONFIRMATION"]);
}
