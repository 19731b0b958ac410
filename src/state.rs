//! Permission × subscription lifecycle state.
//!
//! ```text
//! NoPermission ──► RequestingPermission ──► PermissionGranted ──► Subscribing
//!      ▲                  │    │                                   │     │
//!      └──── dismissed ───┘    ▼                                   ▼     ▼
//!                        PermissionDenied (terminal)        Subscribed  SubscribeFailed
//!                                                                │          │ retry
//!                                                                ▼          ▼
//!                                          NotSubscribed ◄── Unsubscribing  Subscribing
//! ```

use serde::{Deserialize, Serialize};

/// Where the push lifecycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Host cannot do push; nothing ever changes.
    Unsupported,
    /// Permission undecided.
    NoPermission,
    /// Prompt on screen.
    RequestingPermission,
    /// Permission granted, no subscription attempted yet.
    PermissionGranted,
    /// Permission denied; terminal for the session.
    PermissionDenied,
    /// Subscription request in flight.
    Subscribing,
    /// Push channel established.
    Subscribed,
    /// Last subscribe attempt failed; may be retried.
    SubscribeFailed,
    /// Removal in flight.
    Unsubscribing,
    /// Subscription removed.
    NotSubscribed,
}

impl LifecycleState {
    /// Whether no further transition is permitted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unsupported | Self::PermissionDenied)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState::{
            NoPermission, NotSubscribed, PermissionDenied, PermissionGranted,
            RequestingPermission, SubscribeFailed, Subscribed, Subscribing, Unsubscribing,
        };

        if self.is_terminal() {
            return false;
        }
        // Permission can be revoked from anywhere that is not terminal.
        if next == PermissionDenied {
            return true;
        }
        matches!(
            (self, next),
            (NoPermission, RequestingPermission | PermissionGranted)
                | (RequestingPermission, PermissionGranted | NoPermission)
                | (
                    PermissionGranted | SubscribeFailed | NotSubscribed | Subscribed,
                    Subscribing
                )
                | (Subscribing, Subscribed | SubscribeFailed)
                | (Subscribed, Unsubscribing)
                | (Unsubscribing, NotSubscribed | Subscribed)
                | (NoPermission | PermissionGranted, NotSubscribed)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unsupported => "unsupported",
            Self::NoPermission => "no_permission",
            Self::RequestingPermission => "requesting_permission",
            Self::PermissionGranted => "permission_granted",
            Self::PermissionDenied => "permission_denied",
            Self::Subscribing => "subscribing",
            Self::Subscribed => "subscribed",
            Self::SubscribeFailed => "subscribe_failed",
            Self::Unsubscribing => "unsubscribing",
            Self::NotSubscribed => "not_subscribed",
        };
        write!(f, "{s}")
    }
}
