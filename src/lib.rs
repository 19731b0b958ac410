//! Taskboard Push - push-notification lifecycle for the task dashboard.
//!
//! This crate takes the dashboard from "push might work here" to "a push
//! channel exists and notifications can be shown", against an abstract host
//! that provides background workers, a permission prompt, push messaging and
//! notification display.
//!
//! # Architecture
//!
//! One [`PushCoordinator`] owns every component:
//!
//! - **CapabilityProbe** - does the host have workers and push at all
//! - **WorkerRegistrar** - idempotent worker registration and update signals
//! - **PermissionCoordinator** - permission status and the one-at-a-time prompt
//! - **KeyCodec** - base64url application server key decoding
//! - **SubscriptionManager** - idempotent subscribe / unsubscribe
//! - **LocalNotifier** - notification display with worker-first fallback
//!
//! # Modules
//!
//! - [`host`] - host primitives as traits, plus the in-memory host
//! - [`coordinator`] - the owning coordinator and lifecycle state
//! - [`config`] - configuration loading

// Library modules
pub mod capability;
pub mod coordinator;
pub mod host;
pub mod key;
pub mod notifier;
pub mod permission;
pub mod subscription;
pub mod worker;

pub mod config;
pub mod env;
pub mod error;
pub mod state;

// Re-export commonly used types
pub use capability::CapabilityProbe;
pub use config::{ConfigError, PushConfig};
pub use coordinator::PushCoordinator;
pub use error::{HostError, PushError, PushResult};
pub use host::{HostBindings, HostCapabilities};
pub use key::{decode, ApplicationServerKey, DecodeError};
pub use notifier::{LocalNotifier, Notification, NotificationOptions};
pub use permission::{PermissionCoordinator, PermissionStatus};
pub use state::LifecycleState;
pub use subscription::{Subscription, SubscriptionManager};
pub use worker::{UpdateAvailable, WorkerRegistrar, WorkerRegistration};
