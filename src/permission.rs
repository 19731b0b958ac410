//! Notification permission negotiation.
//!
//! # Prompt Ownership
//!
//! A host permission prompt cannot be withdrawn once shown. The prompt
//! therefore runs in its own task, detached from whoever asked for it:
//!
//! ```text
//! request() ──► start prompt task (or join the one in flight)
//!     │              │
//!     │ await        ├── host.request() ... user decides
//!     │              ├── cache decision (status() sees it)
//!     ▼              └── publish result to every waiter
//! Ok(Granted) / Err(PermissionDenied)
//! ```
//!
//! A caller that stops waiting only stops waiting; the decision still lands
//! in the cache for later callers.
//!
//! # Sticky Denial
//!
//! Once the host answers `denied`, the coordinator never asks again for the
//! rest of the session. A dismissed prompt (host answers `default`) fails the
//! request but leaves the door open for another prompt later.

// Rust guideline compliant 2026-02

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::capability::CapabilityProbe;
use crate::error::{HostError, PushError, PushResult};
use crate::host::{HostPermission, PermissionHost};

/// Permission as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    /// The host cannot do push notifications at all.
    Unsupported,
    /// Not decided yet; a prompt may be shown.
    Default,
    /// Notifications allowed.
    Granted,
    /// Notifications blocked for the session.
    Denied,
}

impl From<HostPermission> for PermissionStatus {
    fn from(permission: HostPermission) -> Self {
        match permission {
            HostPermission::Default => Self::Default,
            HostPermission::Granted => Self::Granted,
            HostPermission::Denied => Self::Denied,
        }
    }
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unsupported => "unsupported",
            Self::Default => "default",
            Self::Granted => "granted",
            Self::Denied => "denied",
        };
        write!(f, "{s}")
    }
}

type PromptOutcome = Option<Result<HostPermission, HostError>>;

struct Inner {
    host: Arc<dyn PermissionHost>,
    last_known: RwLock<Option<HostPermission>>,
    in_flight: Mutex<Option<watch::Receiver<PromptOutcome>>>,
}

impl Inner {
    fn cached(&self) -> Option<HostPermission> {
        *self.last_known.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember(&self, permission: HostPermission) {
        let mut last_known = self.last_known.write().unwrap_or_else(PoisonError::into_inner);
        // Denied is sticky; nothing overwrites it.
        if *last_known != Some(HostPermission::Denied) {
            *last_known = Some(permission);
        }
    }
}

/// Reads and requests notification permission.
#[derive(Clone)]
pub struct PermissionCoordinator {
    capability: CapabilityProbe,
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PermissionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCoordinator")
            .field("capability", &self.capability)
            .field("last_known", &self.inner.cached())
            .finish_non_exhaustive()
    }
}

impl PermissionCoordinator {
    /// Create a coordinator over the host's permission primitive.
    pub fn new(host: Arc<dyn PermissionHost>, capability: CapabilityProbe) -> Self {
        Self {
            capability,
            inner: Arc::new(Inner {
                host,
                last_known: RwLock::new(None),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Current permission. Synchronous; never prompts.
    ///
    /// Returns [`PermissionStatus::Unsupported`] without touching the host
    /// when push is unavailable, and [`PermissionStatus::Denied`] from cache
    /// once the host has denied.
    pub fn status(&self) -> PermissionStatus {
        if !self.capability.supported() {
            return PermissionStatus::Unsupported;
        }
        if self.inner.cached() == Some(HostPermission::Denied) {
            return PermissionStatus::Denied;
        }
        let current = self.inner.host.status();
        self.inner.remember(current);
        current.into()
    }

    /// Whether the session has been denied. Reads the cache only.
    pub fn is_denied(&self) -> bool {
        self.inner.cached() == Some(HostPermission::Denied)
    }

    /// Ask for permission, prompting the user if still undecided.
    ///
    /// # Errors
    ///
    /// - [`PushError::CapabilityUnsupported`] if the host lacks push
    /// - [`PushError::PermissionDenied`] if the user denied or dismissed the
    ///   prompt, or if the session was denied earlier (no prompt is shown)
    pub async fn request(&self) -> PushResult<PermissionStatus> {
        self.capability.require()?;

        match self.status() {
            PermissionStatus::Granted => return Ok(PermissionStatus::Granted),
            PermissionStatus::Denied => {
                log::debug!("[Permission] Denied earlier this session; not prompting");
                return Err(PushError::PermissionDenied);
            }
            PermissionStatus::Default | PermissionStatus::Unsupported => {}
        }

        let mut outcome = self.prompt();
        let result = outcome.wait_for(Option::is_some).await.map(|r| r.clone());

        match result {
            Ok(Some(Ok(HostPermission::Granted))) => Ok(PermissionStatus::Granted),
            Ok(Some(Ok(answer))) => {
                log::info!("[Permission] Prompt answered {:?}", answer);
                Err(PushError::PermissionDenied)
            }
            Ok(Some(Err(e))) => {
                log::warn!("[Permission] Prompt failed: {e}");
                Err(PushError::PermissionDenied)
            }
            Ok(None) | Err(_) => Err(PushError::PermissionDenied),
        }
    }

    /// Join the prompt in flight, or start one.
    fn prompt(&self) -> watch::Receiver<PromptOutcome> {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(outcome) = in_flight.as_ref() {
            log::debug!("[Permission] Joining prompt already in flight");
            return outcome.clone();
        }

        let (tx, rx) = watch::channel(None);
        *in_flight = Some(rx.clone());

        let inner = Arc::clone(&self.inner);
        log::info!("[Permission] Prompting for notification permission");
        tokio::spawn(async move {
            let result = inner.host.request().await;
            if let Ok(answer) = &result {
                inner.remember(*answer);
            }
            *inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
            tx.send_replace(Some(result));
        });

        rx
    }
}
