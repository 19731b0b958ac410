//! Host capability detection.

use crate::error::{PushError, PushResult};
use crate::host::HostCapabilities;

/// Snapshot of whether push notifications can work on this host.
///
/// Computed once when the coordinator is built and never re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityProbe {
    flags: HostCapabilities,
}

impl CapabilityProbe {
    /// Probe the host's capability flags.
    pub fn new(flags: HostCapabilities) -> Self {
        if !(flags.workers && flags.push) {
            log::info!(
                "[Push] Host lacks push support (workers={}, push={})",
                flags.workers,
                flags.push
            );
        }
        Self { flags }
    }

    /// Whether the host exposes both worker hosting and push messaging.
    pub fn supported(&self) -> bool {
        self.flags.workers && self.flags.push
    }

    /// Names of the missing primitives, for diagnostics.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.flags.workers {
            missing.push("workers");
        }
        if !self.flags.push {
            missing.push("push");
        }
        missing
    }

    /// Fail with [`PushError::CapabilityUnsupported`] unless supported.
    pub(crate) fn require(&self) -> PushResult<()> {
        if self.supported() {
            Ok(())
        } else {
            Err(PushError::CapabilityUnsupported)
        }
    }
}
