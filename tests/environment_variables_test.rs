//! Integration tests for configuration environment variables.
//!
//! Verifies that `PushConfig::load()` reads the config directory named by
//! `TASKBOARD_CONFIG_DIR` and that the `TASKBOARD_*` overrides win over the
//! file.

use std::env;
use std::fs;
use std::sync::Mutex;

use taskboard_push::env::Environment;
use taskboard_push::{ConfigError, PushConfig};
use tempfile::TempDir;

// Global lock to prevent env var pollution between tests
static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: [&str; 5] = [
    "TASKBOARD_CONFIG_DIR",
    "TASKBOARD_VAPID_PUBLIC_KEY",
    "TASKBOARD_WORKER_SCRIPT",
    "TASKBOARD_WORKER_SCOPE",
    "TASKBOARD_ENV",
];

/// Helper to set up a temporary config directory for tests
fn setup_test_env() -> (TempDir, std::sync::MutexGuard<'static, ()>) {
    let guard = ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let temp_dir = TempDir::new().expect("temp dir");

    for var in VARS {
        env::remove_var(var);
    }
    env::set_var("TASKBOARD_CONFIG_DIR", temp_dir.path());

    (temp_dir, guard)
}

#[test]
fn test_load_without_file_uses_defaults() {
    let (_dir, _guard) = setup_test_env();

    let config = PushConfig::load().expect("load");
    assert_eq!(config, PushConfig::default());
}

#[test]
fn test_env_overrides_file() {
    let (dir, _guard) = setup_test_env();
    fs::write(
        dir.path().join("push.json"),
        r#"{ "application_server_key": "QUJD", "worker_script": "/from-file.js" }"#,
    )
    .expect("write config");

    env::set_var("TASKBOARD_VAPID_PUBLIC_KEY", "REVG");
    env::set_var("TASKBOARD_WORKER_SCOPE", "/board/");

    let config = PushConfig::load().expect("load");
    assert_eq!(config.application_server_key.as_deref(), Some("REVG"));
    assert_eq!(config.worker_script, "/from-file.js");
    assert_eq!(config.worker_scope, "/board/");
    assert_eq!(config.registration_key().to_string(), "/from-file.js @ /board/");
}

#[test]
fn test_environment_gates_placeholder_key() {
    let (_dir, _guard) = setup_test_env();
    let config = PushConfig::load().expect("load");

    env::set_var("TASKBOARD_ENV", "development");
    assert!(config.resolve_server_key(Environment::current()).is_ok());

    env::set_var("TASKBOARD_ENV", "production");
    assert_eq!(
        config.resolve_server_key(Environment::current()),
        Err(ConfigError::MissingServerKey(Environment::Production))
    );
}

#[test]
fn test_malformed_file_is_an_error() {
    let (dir, _guard) = setup_test_env();
    fs::write(dir.path().join("push.json"), "not json").expect("write config");

    let err = PushConfig::load().expect_err("should fail");
    assert!(err.to_string().contains("push.json"));
}
