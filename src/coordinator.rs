//! The push coordinator: single owner of the lifecycle components.
//!
//! Built once per process by the application shell and handed to whatever
//! needs push. It wires the components over one set of [`HostBindings`]:
//!
//! ```text
//! PushCoordinator
//!     ├── CapabilityProbe          (read once)
//!     ├── WorkerRegistrar          (shared with the two below)
//!     ├── PermissionCoordinator    (cloned into the two below)
//!     ├── SubscriptionManager      (configured script + scope)
//!     └── LocalNotifier            (configured defaults)
//! ```
//!
//! It also tracks the combined permission × subscription
//! [`LifecycleState`] and publishes it on a `watch` channel. Transitions the
//! state machine does not allow are dropped rather than applied, so an
//! observer never sees an impossible sequence.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::capability::CapabilityProbe;
use crate::config::{ConfigError, PushConfig};
use crate::env::Environment;
use crate::error::{PushError, PushResult};
use crate::host::HostBindings;
use crate::notifier::{LocalNotifier, Notification, NotificationOptions};
use crate::permission::{PermissionCoordinator, PermissionStatus};
use crate::state::LifecycleState;
use crate::subscription::{Subscription, SubscriptionManager};
use crate::worker::{UpdateAvailable, WorkerRegistrar, WorkerRegistration};

/// Owns every push component for the application.
pub struct PushCoordinator {
    config: PushConfig,
    server_key: String,
    capability: CapabilityProbe,
    registrar: Arc<WorkerRegistrar>,
    permissions: PermissionCoordinator,
    subscriptions: SubscriptionManager,
    notifier: LocalNotifier,
    state: watch::Sender<LifecycleState>,
}

impl std::fmt::Debug for PushCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushCoordinator")
            .field("capability", &self.capability)
            .field("worker", &self.subscriptions.key())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl PushCoordinator {
    /// Build the coordinator for the environment named by `TASKBOARD_ENV`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if no usable application server key is
    /// configured.
    pub fn new(config: PushConfig, host: HostBindings) -> Result<Self, ConfigError> {
        Self::with_environment(config, host, Environment::current())
    }

    /// Build the coordinator for an explicit environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if no usable application server key is
    /// configured for `environment`.
    pub fn with_environment(
        config: PushConfig,
        host: HostBindings,
        environment: Environment,
    ) -> Result<Self, ConfigError> {
        let server_key = config.resolve_server_key(environment)?;
        let capability = CapabilityProbe::new(host.capabilities);
        let registrar = Arc::new(WorkerRegistrar::new(host.workers, capability));
        let permissions = PermissionCoordinator::new(host.permissions, capability);
        let key = config.registration_key();

        let subscriptions = SubscriptionManager::new(
            capability,
            Arc::clone(&registrar),
            permissions.clone(),
            host.push,
            key.clone(),
        );
        let notifier = LocalNotifier::new(
            capability,
            Arc::clone(&registrar),
            permissions.clone(),
            host.notifications,
            key,
            config.notifications.clone(),
        );

        let initial = if capability.supported() {
            match permissions.status() {
                PermissionStatus::Granted => LifecycleState::PermissionGranted,
                PermissionStatus::Denied => LifecycleState::PermissionDenied,
                PermissionStatus::Default | PermissionStatus::Unsupported => {
                    LifecycleState::NoPermission
                }
            }
        } else {
            LifecycleState::Unsupported
        };
        log::info!(
            "[Push] Coordinator ready ({environment}, worker {}, state {initial})",
            subscriptions.key()
        );

        Ok(Self {
            config,
            server_key,
            capability,
            registrar,
            permissions,
            subscriptions,
            notifier,
            state: watch::channel(initial).0,
        })
    }

    /// Whether push can work on this host.
    pub fn supported(&self) -> bool {
        self.capability.supported()
    }

    /// Current permission. Never prompts.
    pub fn permission_status(&self) -> PermissionStatus {
        self.permissions.status()
    }

    /// Ask the user for permission if still undecided.
    ///
    /// # Errors
    ///
    /// See [`PermissionCoordinator::request`].
    pub async fn request_permission(&self) -> PushResult<PermissionStatus> {
        self.capability.require()?;
        self.transition(LifecycleState::RequestingPermission);

        let result = self.permissions.request().await;
        match &result {
            Ok(_) => self.transition(LifecycleState::PermissionGranted),
            Err(_) if self.permissions.is_denied() => {
                self.transition(LifecycleState::PermissionDenied);
            }
            Err(_) => self.transition(LifecycleState::NoPermission),
        }
        result
    }

    /// Subscribe with the configured application server key.
    ///
    /// # Errors
    ///
    /// See [`SubscriptionManager::subscribe`].
    pub async fn subscribe(&self) -> PushResult<Subscription> {
        self.subscribe_with_key(&self.server_key).await
    }

    /// Subscribe with an explicit application server key.
    ///
    /// # Errors
    ///
    /// See [`SubscriptionManager::subscribe`].
    pub async fn subscribe_with_key(&self, server_key: &str) -> PushResult<Subscription> {
        self.capability.require()?;
        self.sync_permission();
        self.transition(LifecycleState::Subscribing);

        let result = self.subscriptions.subscribe(server_key).await;
        match &result {
            Ok(_) => self.transition(LifecycleState::Subscribed),
            Err(PushError::PermissionDenied) if self.permissions.is_denied() => {
                self.transition(LifecycleState::PermissionDenied);
            }
            Err(e) => {
                log::warn!("[Push] Subscribe failed: {e}");
                self.transition(LifecycleState::SubscribeFailed);
            }
        }
        result
    }

    /// Remove the push subscription, if any.
    ///
    /// # Errors
    ///
    /// See [`SubscriptionManager::unsubscribe`].
    pub async fn unsubscribe(&self) -> PushResult<()> {
        self.capability.require()?;
        // Only a known subscription passes through `Unsubscribing`; a failed
        // removal puts back whatever was there before.
        let previous = self.state();
        self.transition(LifecycleState::Unsubscribing);

        let result = self.subscriptions.unsubscribe().await;
        match &result {
            Ok(()) => self.transition(LifecycleState::NotSubscribed),
            Err(_) => self.transition(previous),
        }
        result
    }

    /// Request permission, then subscribe.
    ///
    /// # Errors
    ///
    /// The first failure of [`Self::request_permission`] or [`Self::subscribe`].
    pub async fn enable(&self) -> PushResult<Subscription> {
        self.request_permission().await?;
        self.subscribe().await
    }

    /// The current subscription, without creating one.
    ///
    /// # Errors
    ///
    /// See [`SubscriptionManager::current`].
    pub async fn current_subscription(&self) -> PushResult<Option<Subscription>> {
        self.subscriptions.current().await
    }

    /// Display a local notification.
    ///
    /// # Errors
    ///
    /// See [`LocalNotifier::show`].
    pub async fn show(&self, title: &str, options: NotificationOptions) -> PushResult<Notification> {
        self.notifier.show(title, options).await
    }

    /// Register the configured worker without subscribing.
    ///
    /// # Errors
    ///
    /// See [`WorkerRegistrar::register`].
    pub async fn register_worker(&self) -> PushResult<WorkerRegistration> {
        let key = self.subscriptions.key();
        self.registrar.register(&key.script, &key.scope).await
    }

    /// Receive a signal whenever a new worker version is waiting.
    pub fn updates(&self) -> broadcast::Receiver<UpdateAvailable> {
        self.registrar.updates()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Observe lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Configuration the coordinator was built from.
    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    /// Permission component.
    pub fn permissions(&self) -> &PermissionCoordinator {
        &self.permissions
    }

    /// Subscription component.
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Notification component.
    pub fn notifier(&self) -> &LocalNotifier {
        &self.notifier
    }

    /// Worker registration component.
    pub fn registrar(&self) -> &Arc<WorkerRegistrar> {
        &self.registrar
    }

    /// Catch up with a decision the user made outside [`Self::request_permission`].
    fn sync_permission(&self) {
        match self.permissions.status() {
            PermissionStatus::Granted => self.transition(LifecycleState::PermissionGranted),
            PermissionStatus::Denied => self.transition(LifecycleState::PermissionDenied),
            PermissionStatus::Default | PermissionStatus::Unsupported => {}
        }
    }

    fn transition(&self, next: LifecycleState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                log::trace!("[Push] Ignoring transition {current} -> {next}");
                return false;
            }
            log::debug!("[Push] State {current} -> {next}");
            *current = next;
            true
        });
    }
}
