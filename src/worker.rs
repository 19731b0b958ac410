//! Background worker registration and lifecycle observation.
//!
//! # Idempotency
//!
//! Each (script, scope) pair owns a slot guarded by an async mutex. The
//! first caller holds the slot while the host registers; concurrent callers
//! queue on the same slot and get the cached handle once it resolves, so
//! the host sees exactly one registration per key. Failures leave the slot
//! empty; the next call tries again.
//!
//! # Update Signal
//!
//! ```text
//! v1 activated, controlling the page
//!     ↓ host reports v2 installing
//!     ↓ host reports v2 installed, has_controller = true
//! UpdateAvailable { version: 2 } broadcast (once)
//! ```
//!
//! Acting on the signal (prompting a reload, skipping the waiting phase) is
//! left to the hosting application.

// Rust guideline compliant 2026-02

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc, watch};

use crate::capability::CapabilityProbe;
use crate::error::{HostError, PushError, PushResult};
use crate::host::{HostRegistration, RegistrationId, WorkerHost, WorkerPhase, WorkerStateChange};

/// Capacity of the update broadcast channel.
const UPDATE_CHANNEL_CAPACITY: usize = 16;

/// Identity of a registration request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationKey {
    /// Worker script path, e.g. `/sw.js`.
    pub script: String,
    /// Registration scope, e.g. `/`.
    pub scope: String,
}

impl RegistrationKey {
    /// Build a key from script path and scope.
    pub fn new(script: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            scope: scope.into(),
        }
    }
}

impl std::fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.script, self.scope)
    }
}

/// A newer worker version is installed and waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAvailable {
    /// Registration the waiting worker belongs to.
    pub registration: RegistrationId,
    /// Version of the waiting worker.
    pub version: u64,
}

/// Shared, read-only handle to a registered worker.
///
/// Clones observe the same phase; only [`WorkerRegistrar`] advances it.
#[derive(Debug, Clone)]
pub struct WorkerRegistration {
    id: RegistrationId,
    script: String,
    scope: String,
    phase: watch::Receiver<WorkerPhase>,
}

impl WorkerRegistration {
    /// Host-assigned identity.
    pub fn id(&self) -> &RegistrationId {
        &self.id
    }

    /// Script path this registration was created for.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Scope granted by the host.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> WorkerPhase {
        *self.phase.borrow()
    }

    /// Whether a worker is active for this registration.
    pub fn is_activated(&self) -> bool {
        self.phase() == WorkerPhase::Activated
    }

    /// Suspend until the registration has an activated worker.
    ///
    /// There is no timeout; wrap the call in `tokio::time::timeout` if one
    /// is needed.
    pub async fn wait_activated(&self) -> PushResult<()> {
        if self.is_activated() {
            return Ok(());
        }
        let mut phase = self.phase.clone();
        let activated = phase
            .wait_for(|p| *p == WorkerPhase::Activated)
            .await
            .map(|_| ());
        activated.map_err(|e| PushError::Registration {
            script: self.script.clone(),
            scope: self.scope.clone(),
            reason: HostError::new(format!("lifecycle ended before activation: {e}")),
        })
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<WorkerRegistration>>>;

/// Registers background workers and watches their lifecycle.
pub struct WorkerRegistrar {
    host: Arc<dyn WorkerHost>,
    capability: CapabilityProbe,
    slots: Mutex<HashMap<RegistrationKey, Slot>>,
    updates: broadcast::Sender<UpdateAvailable>,
}

impl std::fmt::Debug for WorkerRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistrar")
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}

impl WorkerRegistrar {
    /// Create a registrar over the host's worker primitive.
    pub fn new(host: Arc<dyn WorkerHost>, capability: CapabilityProbe) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            host,
            capability,
            slots: Mutex::new(HashMap::new()),
            updates,
        }
    }

    fn slot(&self, key: &RegistrationKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Register `script` for `scope`, or return the cached registration.
    ///
    /// # Errors
    ///
    /// - [`PushError::CapabilityUnsupported`] if the host lacks workers or push
    /// - [`PushError::Registration`] if the host rejects the script or scope
    pub async fn register(&self, script: &str, scope: &str) -> PushResult<WorkerRegistration> {
        self.capability.require()?;

        let key = RegistrationKey::new(script, scope);
        let slot = self.slot(&key);
        let mut cached = slot.lock().await;
        if let Some(registration) = cached.as_ref() {
            log::debug!("[Worker] Reusing registration {} for {key}", registration.id);
            return Ok(registration.clone());
        }

        log::info!("[Worker] Registering {key}");
        let host_registration = self.host.register(script, scope).await.map_err(|reason| {
            log::warn!("[Worker] Registration of {key} refused: {reason}");
            PushError::Registration {
                script: script.to_string(),
                scope: scope.to_string(),
                reason,
            }
        })?;

        let registration = self.track(script, host_registration);
        log::info!(
            "[Worker] Registered {} ({}) for {key}",
            registration.id,
            registration.phase()
        );
        *cached = Some(registration.clone());
        Ok(registration)
    }

    /// The registration for (script, scope) without registering anything.
    ///
    /// Checks this session's cache first, then asks the host for a
    /// registration left by an earlier session and adopts it. Waits for a
    /// registration already in flight for the same key.
    ///
    /// # Errors
    ///
    /// - [`PushError::CapabilityUnsupported`] if the host lacks workers or push
    /// - [`PushError::Registration`] if the host lookup fails
    pub async fn existing(
        &self,
        script: &str,
        scope: &str,
    ) -> PushResult<Option<WorkerRegistration>> {
        self.capability.require()?;

        let key = RegistrationKey::new(script, scope);
        let slot = self.slot(&key);
        let mut cached = slot.lock().await;
        if let Some(registration) = cached.as_ref() {
            return Ok(Some(registration.clone()));
        }

        let found = self.host.registration(scope).await.map_err(|reason| {
            log::warn!("[Worker] Lookup of {key} failed: {reason}");
            PushError::Registration {
                script: script.to_string(),
                scope: scope.to_string(),
                reason,
            }
        })?;
        let Some(host_registration) = found else {
            return Ok(None);
        };

        let registration = self.track(script, host_registration);
        log::info!(
            "[Worker] Adopted existing registration {} ({}) for {key}",
            registration.id,
            registration.phase()
        );
        *cached = Some(registration.clone());
        Ok(Some(registration))
    }

    /// Start observing a host registration and wrap it in a handle.
    fn track(&self, script: &str, host_registration: HostRegistration) -> WorkerRegistration {
        let (phase_tx, phase_rx) = watch::channel(host_registration.phase);
        tokio::spawn(observe_lifecycle(
            host_registration.id.clone(),
            host_registration.events,
            phase_tx,
            self.updates.clone(),
        ));

        WorkerRegistration {
            id: host_registration.id,
            script: script.to_string(),
            scope: host_registration.scope,
            phase: phase_rx,
        }
    }

    /// The cached registration for (script, scope), if one has resolved.
    ///
    /// Never contacts the host, so a registration from an earlier session
    /// is not visible here; use [`Self::existing`] for that. Returns `None`
    /// while a registration for the key is still in flight.
    pub fn registration(&self, script: &str, scope: &str) -> Option<WorkerRegistration> {
        let slot = self.slot(&RegistrationKey::new(script, scope));
        let cached = slot.try_lock().ok()?;
        cached.clone()
    }

    /// Subscribe to update-available signals for every registration.
    pub fn updates(&self) -> broadcast::Receiver<UpdateAvailable> {
        self.updates.subscribe()
    }
}

/// Track one registration's phase and raise update signals.
async fn observe_lifecycle(
    id: RegistrationId,
    mut events: mpsc::UnboundedReceiver<WorkerStateChange>,
    phase: watch::Sender<WorkerPhase>,
    updates: broadcast::Sender<UpdateAvailable>,
) {
    let mut signaled: HashSet<u64> = HashSet::new();

    while let Some(change) = events.recv().await {
        log::debug!(
            "[Worker] {id}: v{} -> {} (controller: {})",
            change.version,
            change.phase,
            change.has_controller
        );

        if change.phase == WorkerPhase::Installed
            && change.has_controller
            && signaled.insert(change.version)
        {
            log::info!("[Worker] {id}: update v{} is waiting", change.version);
            // No receivers is fine; the signal is advisory.
            let _ = updates.send(UpdateAvailable {
                registration: id.clone(),
                version: change.version,
            });
        }

        // A waiting update does not take the registration out of activated:
        // the old worker keeps controlling until the new one activates.
        let current = *phase.borrow();
        if current != WorkerPhase::Activated || change.phase == WorkerPhase::Activated {
            phase.send_replace(change.phase);
        }
    }

    log::debug!("[Worker] {id}: lifecycle stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::{FailurePlan, MemoryHost};
    use crate::host::HostCapabilities;
    use std::time::Duration;

    fn registrar(host: &Arc<MemoryHost>) -> WorkerRegistrar {
        WorkerRegistrar::new(
            Arc::clone(host) as Arc<dyn WorkerHost>,
            CapabilityProbe::new(HostCapabilities::full()),
        )
    }

    #[tokio::test]
    async fn test_repeat_register_uses_cache() {
        let host = Arc::new(MemoryHost::new());
        let registrar = registrar(&host);

        let first = registrar.register("/sw.js", "/").await.expect("register");
        let second = registrar.register("/sw.js", "/").await.expect("register");

        assert_eq!(first.id(), second.id());
        assert_eq!(host.calls().register, 1);
        assert!(first.is_activated());
    }

    #[tokio::test]
    async fn test_concurrent_register_hits_host_once() {
        let host = Arc::new(MemoryHost::new());
        host.set_latency(Duration::from_millis(20));
        let registrar = registrar(&host);

        let (a, b) = tokio::join!(
            registrar.register("/sw.js", "/"),
            registrar.register("/sw.js", "/")
        );

        assert_eq!(a.expect("first").id(), b.expect("second").id());
        assert_eq!(host.calls().register, 1);
    }

    #[tokio::test]
    async fn test_distinct_scopes_register_separately() {
        let host = Arc::new(MemoryHost::new());
        let registrar = registrar(&host);

        let root = registrar.register("/sw.js", "/").await.expect("root");
        let app = registrar.register("/sw.js", "/app/").await.expect("app");

        assert_ne!(root.id(), app.id());
        assert_eq!(host.calls().register, 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let host = Arc::new(MemoryHost::new());
        host.set_failures(FailurePlan {
            register: Some("TypeError: failed to fetch script".into()),
            ..FailurePlan::default()
        });
        let registrar = registrar(&host);

        let err = registrar
            .register("/sw.js", "/")
            .await
            .expect_err("host refused");
        assert!(matches!(err, PushError::Registration { .. }));
        assert!(registrar.registration("/sw.js", "/").is_none());

        host.set_failures(FailurePlan::default());
        registrar.register("/sw.js", "/").await.expect("retry succeeds");
        assert_eq!(host.calls().register, 2);
    }

    #[tokio::test]
    async fn test_existing_adopts_earlier_registration() {
        let host = Arc::new(MemoryHost::new());
        let earlier = registrar(&host);
        let first = earlier.register("/sw.js", "/").await.expect("register");

        let reloaded = registrar(&host);
        assert!(reloaded.registration("/sw.js", "/").is_none());
        let adopted = reloaded
            .existing("/sw.js", "/")
            .await
            .expect("lookup")
            .expect("host still holds it");

        assert_eq!(adopted.id(), first.id());
        assert!(adopted.is_activated());
        assert_eq!(host.calls().register, 1);

        // Adopted handles are cached like registered ones.
        reloaded.existing("/sw.js", "/").await.expect("lookup");
        reloaded.register("/sw.js", "/").await.expect("register");
        assert_eq!(host.calls().lookup, 1);
        assert_eq!(host.calls().register, 1);
    }

    #[tokio::test]
    async fn test_existing_never_registers() {
        let host = Arc::new(MemoryHost::new());
        let registrar = registrar(&host);

        assert!(registrar
            .existing("/sw.js", "/")
            .await
            .expect("lookup")
            .is_none());
        assert_eq!(host.calls().register, 0);
        assert_eq!(host.calls().lookup, 1);
    }

    #[tokio::test]
    async fn test_unsupported_host_is_never_contacted() {
        let host = Arc::new(MemoryHost::new());
        let registrar = WorkerRegistrar::new(
            Arc::clone(&host) as Arc<dyn WorkerHost>,
            CapabilityProbe::new(HostCapabilities::default()),
        );

        let err = registrar.register("/sw.js", "/").await.expect_err("unsupported");
        assert_eq!(err, PushError::CapabilityUnsupported);
        assert!(matches!(
            registrar.existing("/sw.js", "/").await,
            Err(PushError::CapabilityUnsupported)
        ));
        assert_eq!(host.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_wait_activated_follows_lifecycle() {
        let host = Arc::new(MemoryHost::new());
        host.set_initial_phase(WorkerPhase::Installing);
        let registrar = registrar(&host);

        let registration = registrar.register("/sw.js", "/").await.expect("register");
        assert_eq!(registration.phase(), WorkerPhase::Installing);

        for phase in [
            WorkerPhase::Installed,
            WorkerPhase::Activating,
            WorkerPhase::Activated,
        ] {
            assert!(host.emit_worker_state(
                registration.id(),
                WorkerStateChange {
                    version: 1,
                    phase,
                    has_controller: false,
                },
            ));
        }

        tokio::time::timeout(Duration::from_secs(1), registration.wait_activated())
            .await
            .expect("activated in time")
            .expect("activated");
        assert!(registration.is_activated());
    }

    #[tokio::test]
    async fn test_update_signal_fires_once_per_version() {
        let host = Arc::new(MemoryHost::new());
        let registrar = registrar(&host);
        let mut updates = registrar.updates();
        let registration = registrar.register("/sw.js", "/").await.expect("register");

        let installed = |version| WorkerStateChange {
            version,
            phase: WorkerPhase::Installed,
            has_controller: true,
        };
        host.emit_worker_state(registration.id(), installed(2));
        host.emit_worker_state(registration.id(), installed(2));
        host.emit_worker_state(registration.id(), installed(3));

        let first = tokio::time::timeout(Duration::from_secs(1), updates.recv())
            .await
            .expect("signal in time")
            .expect("signal");
        assert_eq!(first.version, 2);
        assert_eq!(&first.registration, registration.id());

        // The duplicate v2 was swallowed; next is v3.
        let second = tokio::time::timeout(Duration::from_secs(1), updates.recv())
            .await
            .expect("signal in time")
            .expect("signal");
        assert_eq!(second.version, 3);

        // The waiting workers did not demote the active one.
        assert!(registration.is_activated());
    }

    #[tokio::test]
    async fn test_first_install_without_controller_is_not_an_update() {
        let host = Arc::new(MemoryHost::new());
        host.set_initial_phase(WorkerPhase::Installing);
        let registrar = registrar(&host);
        let mut updates = registrar.updates();
        let registration = registrar.register("/sw.js", "/").await.expect("register");

        host.emit_worker_state(
            registration.id(),
            WorkerStateChange {
                version: 1,
                phase: WorkerPhase::Installed,
                has_controller: false,
            },
        );
        host.emit_worker_state(
            registration.id(),
            WorkerStateChange {
                version: 1,
                phase: WorkerPhase::Activated,
                has_controller: false,
            },
        );
        tokio::time::timeout(Duration::from_secs(1), registration.wait_activated())
            .await
            .expect("activated in time")
            .expect("activated");

        assert!(matches!(
            updates.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
