//! Configuration loading.
//!
//! Reads `push.json` from the taskboard configuration directory, then
//! applies environment variable overrides:
//!
//! - `TASKBOARD_VAPID_PUBLIC_KEY` - application server public key (base64url)
//! - `TASKBOARD_WORKER_SCRIPT` - worker script path
//! - `TASKBOARD_WORKER_SCOPE` - worker registration scope
//! - `TASKBOARD_CONFIG_DIR` - overrides the configuration directory
//!
//! A missing server key is a configuration error outside development. In
//! development the placeholder key is substituted, with a warning, so the
//! dashboard can be exercised without a push backend.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env::Environment;
use crate::key::{ApplicationServerKey, DecodeError};
use crate::notifier::NotificationDefaults;
use crate::worker::RegistrationKey;

/// Development-only stand-in for the application server key.
pub const PLACEHOLDER_SERVER_KEY: &str =
    "BNDxrLsyT-BTNT9Xl-r5MjAXTREeLfVe-cjH3q_r4mFLqJMzL5pCqGe9E3GQ1C_4LFqT1";

/// Problems with the push configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No application server key was configured.
    #[error(
        "no application server key configured (set TASKBOARD_VAPID_PUBLIC_KEY); \
         placeholder keys are only allowed in development, current environment is {0}"
    )]
    MissingServerKey(Environment),

    /// The configured key does not decode.
    #[error("configured application server key is invalid: {0}")]
    InvalidServerKey(#[from] DecodeError),
}

/// Push notification configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct PushConfig {
    /// Application server (VAPID) public key, unpadded base64url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_server_key: Option<String>,
    /// Worker script path.
    pub worker_script: String,
    /// Worker registration scope.
    pub worker_scope: String,
    /// Defaults applied to local notifications.
    pub notifications: NotificationDefaults,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            application_server_key: None,
            worker_script: "/sw.js".to_string(),
            worker_scope: "/".to_string(),
            notifications: NotificationDefaults::default(),
        }
    }
}

impl PushConfig {
    /// Returns the configuration directory path.
    ///
    /// `TASKBOARD_CONFIG_DIR` wins; otherwise the platform config dir
    /// (macOS: ~/Library/Application Support/taskboard).
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("TASKBOARD_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("taskboard"))
    }

    /// Loads configuration from file (if present), with environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("push.json");
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            log::debug!("[Config] {} not found, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Loads configuration from a specific file, without overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("TASKBOARD_VAPID_PUBLIC_KEY").filter(|k| !k.trim().is_empty()) {
            self.application_server_key = Some(key.trim().to_string());
        }
        if let Some(script) = lookup("TASKBOARD_WORKER_SCRIPT") {
            self.worker_script = script;
        }
        if let Some(scope) = lookup("TASKBOARD_WORKER_SCOPE") {
            self.worker_scope = scope;
        }
    }

    /// The worker this configuration registers.
    pub fn registration_key(&self) -> RegistrationKey {
        RegistrationKey::new(&self.worker_script, &self.worker_scope)
    }

    /// The server key to subscribe with in `environment`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidServerKey`] if the configured key does not decode
    /// - [`ConfigError::MissingServerKey`] if none is configured outside development
    pub fn resolve_server_key(&self, environment: Environment) -> Result<String, ConfigError> {
        match self.application_server_key.as_deref() {
            Some(key) if !key.is_empty() => {
                ApplicationServerKey::from_base64url(key)?;
                Ok(key.to_string())
            }
            _ if environment.is_development() => {
                log::warn!(
                    "[Config] TASKBOARD_VAPID_PUBLIC_KEY is not set; using the PLACEHOLDER \
                     application server key. Push delivery will not work."
                );
                Ok(PLACEHOLDER_SERVER_KEY.to_string())
            }
            _ => Err(ConfigError::MissingServerKey(environment)),
        }
    }
}
