//! Error taxonomy for the push lifecycle.
//!
//! Every public operation returns [`PushError`]. Host primitives report
//! failures as [`HostError`]; each component maps those into the variant
//! that names its own boundary, so callers can tell a refused worker
//! registration apart from a refused subscription.

// Rust guideline compliant 2026-02

use thiserror::Error;

use crate::key::DecodeError;

/// Convenience alias for results returned by the coordinator.
pub type PushResult<T> = Result<T, PushError>;

/// Failure reported by a host primitive.
///
/// The host surface is abstract, so the only thing carried across is a
/// human-readable reason (e.g. `"SecurityError: cross-origin script"`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    /// Build a host error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors surfaced by the push lifecycle coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The host lacks worker hosting or push messaging.
    ///
    /// Non-fatal: every operation short-circuits with this error and no host
    /// primitive is touched.
    #[error("push notifications are not supported by this host")]
    CapabilityUnsupported,

    /// The host refused to register the background worker.
    #[error("worker registration failed for {script} (scope {scope}): {reason}")]
    Registration {
        /// Script path passed to the host.
        script: String,
        /// Scope passed to the host.
        scope: String,
        /// Host-supplied reason.
        reason: HostError,
    },

    /// Notification permission is not granted.
    ///
    /// When the host answered `denied` this is terminal for the session.
    #[error("notification permission denied")]
    PermissionDenied,

    /// The application server key is malformed.
    #[error("invalid application server key: {0}")]
    Decode(#[from] DecodeError),

    /// The host rejected a subscribe or unsubscribe request.
    #[error("push subscription failed: {0}")]
    Subscription(HostError),

    /// A notification could not be displayed.
    #[error("notification display failed: {0}")]
    Notify(String),
}

impl PushError {
    /// Whether retrying the same call later can succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Subscription(_) | Self::Notify(_))
    }

    /// Whether the error ends the push lifecycle for the rest of the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CapabilityUnsupported | Self::PermissionDenied)
    }
}
