//! Host capability surface.
//!
//! The coordinator never talks to a concrete platform API. Everything it
//! needs from the host is expressed as four primitive traits plus a set of
//! capability flags:
//!
//! ```text
//! HostBindings
//!     │
//!     ├── HostCapabilities   (worker hosting? push messaging?)
//!     ├── WorkerHost         register(script, scope) + lifecycle events
//!     ├── PermissionHost     status() sync, request() async
//!     ├── PushHost           get / subscribe / unsubscribe per registration
//!     └── NotificationHost   show via worker, or directly
//! ```
//!
//! A browser backend implements these over the service worker, Push and
//! Notification APIs. [`memory::MemoryHost`] implements all of them in
//! process for tests and the demo binary.

// Rust guideline compliant 2026-02

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::HostError;
use crate::notifier::Notification;

/// Host-assigned identity of a worker registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(pub String);

impl std::fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    /// Script fetched, install handler running.
    Installing,
    /// Installed; waiting to take over.
    Installed,
    /// Activate handler running.
    Activating,
    /// Controlling clients; push subscriptions allowed.
    Activated,
}

impl std::fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
        };
        write!(f, "{s}")
    }
}

/// A phase change reported by the host for one worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStateChange {
    /// Monotonic version of the worker script that changed state.
    pub version: u64,
    /// The phase it entered.
    pub phase: WorkerPhase,
    /// Whether an older worker controls the page at the time of the change.
    pub has_controller: bool,
}

/// Result of a successful host registration.
#[derive(Debug)]
pub struct HostRegistration {
    /// Host-assigned identity.
    pub id: RegistrationId,
    /// Scope the host actually granted (may be normalized).
    pub scope: String,
    /// Phase of the newest worker at registration time.
    pub phase: WorkerPhase,
    /// Stream of lifecycle changes for this registration.
    pub events: mpsc::UnboundedReceiver<WorkerStateChange>,
}

/// Notification permission as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPermission {
    /// User has not decided yet.
    Default,
    /// User allowed notifications.
    Granted,
    /// User blocked notifications.
    Denied,
}

/// Client keys the host generated for a push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Browser's P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// Shared auth secret (base64url).
    pub auth: String,
}

/// An established push channel, as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostSubscription {
    /// Push service endpoint URL; unique per subscription.
    pub endpoint: String,
    /// Encryption keys for payload delivery.
    pub keys: SubscriptionKeys,
}

/// Options for creating a push subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Every push must surface a notification. Always `true` here.
    pub user_visible_only: bool,
    /// Decoded VAPID public key of the application server.
    pub application_server_key: Vec<u8>,
}

/// Which primitives the host exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostCapabilities {
    /// Background worker hosting (service workers).
    pub workers: bool,
    /// Push messaging (PushManager).
    pub push: bool,
}

impl HostCapabilities {
    /// A host exposing every primitive.
    pub fn full() -> Self {
        Self {
            workers: true,
            push: true,
        }
    }
}

/// Background-worker registration primitive.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Register (or update) the worker script for `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host rejects the script or scope, e.g. on a
    /// cross-origin violation or a failed script fetch.
    async fn register(&self, script: &str, scope: &str) -> Result<HostRegistration, HostError>;

    /// The registration already controlling `scope`, if any. Never registers.
    ///
    /// Registrations outlive the page, so this is how a fresh session finds
    /// the worker (and subscription) an earlier one created.
    async fn registration(&self, scope: &str) -> Result<Option<HostRegistration>, HostError>;
}

/// Notification permission primitive.
#[async_trait]
pub trait PermissionHost: Send + Sync {
    /// Current decision. Never prompts.
    fn status(&self) -> HostPermission;

    /// Prompt the user and suspend until they decide.
    ///
    /// Cannot be cancelled once shown.
    async fn request(&self) -> Result<HostPermission, HostError>;
}

/// Push subscription primitive, scoped to a worker registration.
#[async_trait]
pub trait PushHost: Send + Sync {
    /// The subscription currently held by `registration`, if any.
    async fn get(&self, registration: &RegistrationId) -> Result<Option<HostSubscription>, HostError>;

    /// Create a subscription for `registration`.
    async fn subscribe(
        &self,
        registration: &RegistrationId,
        options: SubscribeOptions,
    ) -> Result<HostSubscription, HostError>;

    /// Remove the subscription held by `registration`.
    ///
    /// Returns `false` if there was nothing to remove.
    async fn unsubscribe(&self, registration: &RegistrationId) -> Result<bool, HostError>;
}

/// Notification display primitive.
#[async_trait]
pub trait NotificationHost: Send + Sync {
    /// Display through the worker; works while the app is backgrounded.
    async fn show_via_worker(
        &self,
        registration: &RegistrationId,
        notification: &Notification,
    ) -> Result<(), HostError>;

    /// Display directly from the foreground page.
    async fn show_direct(&self, notification: &Notification) -> Result<(), HostError>;
}

/// Everything the coordinator needs from the host, bundled.
#[derive(Clone)]
pub struct HostBindings {
    /// Capability flags, read once at construction.
    pub capabilities: HostCapabilities,
    /// Worker registration primitive.
    pub workers: Arc<dyn WorkerHost>,
    /// Permission primitive.
    pub permissions: Arc<dyn PermissionHost>,
    /// Push subscription primitive.
    pub push: Arc<dyn PushHost>,
    /// Notification display primitive.
    pub notifications: Arc<dyn NotificationHost>,
}

impl std::fmt::Debug for HostBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBindings")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl HostBindings {
    /// Bind every primitive to one object implementing all four traits.
    pub fn from_host<H>(host: &Arc<H>, capabilities: HostCapabilities) -> Self
    where
        H: WorkerHost + PermissionHost + PushHost + NotificationHost + 'static,
    {
        Self {
            capabilities,
            workers: Arc::clone(host) as Arc<dyn WorkerHost>,
            permissions: Arc::clone(host) as Arc<dyn PermissionHost>,
            push: Arc::clone(host) as Arc<dyn PushHost>,
            notifications: Arc::clone(host) as Arc<dyn NotificationHost>,
        }
    }
}
