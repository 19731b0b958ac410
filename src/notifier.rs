//! Local notification dispatch.
//!
//! Notifications go through the active worker registration whenever one
//! exists, because only the worker can display while the dashboard tab is
//! in the background. Without a worker (or if the worker refuses), a direct
//! display is attempted, but only with granted permission.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityProbe;
use crate::error::{PushError, PushResult};
use crate::host::NotificationHost;
use crate::permission::{PermissionCoordinator, PermissionStatus};
use crate::worker::{RegistrationKey, WorkerRegistrar, WorkerRegistration};

/// Source of the current time, injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    /// Identifier delivered back to the worker on click.
    pub action: String,
    /// Button label.
    pub title: String,
    /// Optional button icon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Caller-supplied notification options; everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    /// Body text.
    pub body: Option<String>,
    /// Icon asset path.
    pub icon: Option<String>,
    /// Badge asset path (monochrome, status bar).
    pub badge: Option<String>,
    /// Replacement tag; same-tag notifications replace each other.
    pub tag: Option<String>,
    /// Arbitrary payload handed to the worker's click handler.
    pub data: Option<serde_json::Value>,
    /// Action buttons.
    pub actions: Option<Vec<NotificationAction>>,
    /// Vibration pattern in milliseconds.
    pub vibrate: Option<Vec<u32>>,
    /// Keep the notification until the user interacts with it.
    pub require_interaction: Option<bool>,
}

/// A fully resolved notification, as handed to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Title line.
    pub title: String,
    /// Body text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Icon asset path.
    pub icon: String,
    /// Badge asset path.
    pub badge: String,
    /// Replacement tag.
    pub tag: String,
    /// Click payload.
    pub data: serde_json::Value,
    /// Action buttons.
    pub actions: Vec<NotificationAction>,
    /// Vibration pattern in milliseconds.
    pub vibrate: Vec<u32>,
    /// Keep until interaction.
    pub require_interaction: bool,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Values applied when the caller omits an option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    /// Default icon asset path.
    pub icon: String,
    /// Default badge asset path.
    pub badge: String,
    /// Default vibration pattern.
    pub vibrate: Vec<u32>,
    /// Prefix for generated tags.
    pub tag_prefix: String,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/badge-72x72.png".to_string(),
            vibrate: vec![200, 100, 200],
            tag_prefix: "taskboard".to_string(),
        }
    }
}

/// Displays notifications through the best available path.
pub struct LocalNotifier {
    capability: CapabilityProbe,
    registrar: Arc<WorkerRegistrar>,
    permissions: PermissionCoordinator,
    host: Arc<dyn NotificationHost>,
    key: RegistrationKey,
    defaults: NotificationDefaults,
    clock: Clock,
    sequence: AtomicU64,
}

impl std::fmt::Debug for LocalNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNotifier")
            .field("key", &self.key)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl LocalNotifier {
    /// Create a notifier that prefers the registration for `key`.
    pub fn new(
        capability: CapabilityProbe,
        registrar: Arc<WorkerRegistrar>,
        permissions: PermissionCoordinator,
        host: Arc<dyn NotificationHost>,
        key: RegistrationKey,
        defaults: NotificationDefaults,
    ) -> Self {
        Self {
            capability,
            registrar,
            permissions,
            host,
            key,
            defaults,
            clock: Arc::new(Utc::now),
            sequence: AtomicU64::new(0),
        }
    }

    /// Replace the clock used for timestamps and generated tags.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Apply defaults to `options` without displaying anything.
    ///
    /// A missing tag is generated from the current time plus a per-notifier
    /// sequence number, so two calls never share a tag.
    pub fn prepare(&self, title: &str, options: NotificationOptions) -> Notification {
        let now = (self.clock)().timestamp_millis();
        let tag = options.tag.unwrap_or_else(|| {
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            format!("{}-{now}-{seq}", self.defaults.tag_prefix)
        });

        Notification {
            title: title.to_string(),
            body: options.body,
            icon: options.icon.unwrap_or_else(|| self.defaults.icon.clone()),
            badge: options.badge.unwrap_or_else(|| self.defaults.badge.clone()),
            tag,
            data: options
                .data
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            actions: options.actions.unwrap_or_default(),
            vibrate: options
                .vibrate
                .unwrap_or_else(|| self.defaults.vibrate.clone()),
            require_interaction: options.require_interaction.unwrap_or(false),
            timestamp: now,
        }
    }

    /// Display a notification. Returns what was displayed.
    ///
    /// # Errors
    ///
    /// - [`PushError::CapabilityUnsupported`] if the host lacks push
    /// - [`PushError::Notify`] if no path could display it
    pub async fn show(&self, title: &str, options: NotificationOptions) -> PushResult<Notification> {
        self.capability.require()?;
        let notification = self.prepare(title, options);

        let active = match self
            .registrar
            .existing(&self.key.script, &self.key.scope)
            .await
        {
            Ok(registration) => registration.filter(WorkerRegistration::is_activated),
            Err(e) => {
                log::warn!("[Notify] Worker lookup failed ({e}), trying direct");
                None
            }
        };
        if let Some(registration) = active {
            match self
                .host
                .show_via_worker(registration.id(), &notification)
                .await
            {
                Ok(()) => {
                    log::debug!("[Notify] Shown via worker: {}", notification.tag);
                    return Ok(notification);
                }
                Err(e) => log::warn!("[Notify] Worker display failed ({e}), trying direct"),
            }
        }

        let status = self.permissions.status();
        if status != PermissionStatus::Granted {
            return Err(PushError::Notify(format!(
                "no worker available and permission is {status}"
            )));
        }

        self.host
            .show_direct(&notification)
            .await
            .map_err(|e| PushError::Notify(e.to_string()))?;
        log::debug!("[Notify] Shown directly: {}", notification.tag);
        Ok(notification)
    }
}
