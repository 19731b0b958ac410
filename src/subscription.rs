//! Push subscription establishment and teardown.
//!
//! # Subscribe Flow
//!
//! ```text
//! subscribe(key)
//!     ├── capability?            no  → CapabilityUnsupported
//!     ├── denied this session?   yes → PermissionDenied (registrar untouched)
//!     ├── [request lock for (script, scope)]
//!     ├── registrar.register()   → Registration error, verbatim
//!     ├── wait until activated
//!     ├── host.get()             some → return it (key ignored, no re-keying)
//!     ├── permission granted?    no  → PermissionDenied
//!     ├── decode key             bad → Decode error
//!     └── host.subscribe(user_visible_only = true)
//! ```
//!
//! The request lock serializes overlapping `subscribe()` / `unsubscribe()`
//! calls, so a second caller waits for the first one's subscription and then
//! finds it through `host.get()` instead of creating another.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityProbe;
use crate::error::{PushError, PushResult};
use crate::host::{HostSubscription, PushHost, RegistrationId, SubscribeOptions, SubscriptionKeys};
use crate::key::ApplicationServerKey;
use crate::permission::{PermissionCoordinator, PermissionStatus};
use crate::worker::{RegistrationKey, WorkerRegistrar};

/// Identity of a subscription: its push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An established push channel for one worker registration.
///
/// Serializes to the JSON shape a push backend stores (`endpoint` plus
/// `keys.p256dh` / `keys.auth`), so the application can hand it to its
/// dispatcher unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    /// Registration holding this subscription.
    #[serde(skip_serializing, default = "unknown_registration")]
    pub registration: RegistrationId,
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Client encryption keys.
    pub keys: SubscriptionKeys,
}

fn unknown_registration() -> RegistrationId {
    RegistrationId(String::new())
}

impl Subscription {
    fn from_host(registration: &RegistrationId, host: HostSubscription) -> Self {
        Self {
            registration: registration.clone(),
            endpoint: host.endpoint,
            keys: host.keys,
        }
    }

    /// Stable identity of the subscription.
    pub fn id(&self) -> SubscriptionId {
        SubscriptionId(self.endpoint.clone())
    }

    /// JSON payload for the application's backend.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "endpoint": self.endpoint,
            "keys": {
                "p256dh": self.keys.p256dh,
                "auth": self.keys.auth,
            },
        })
    }
}

/// Creates and removes the push subscription for one (script, scope).
pub struct SubscriptionManager {
    capability: CapabilityProbe,
    registrar: Arc<WorkerRegistrar>,
    permissions: PermissionCoordinator,
    push: Arc<dyn PushHost>,
    key: RegistrationKey,
    request_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    /// Create a manager for the worker identified by `key`.
    pub fn new(
        capability: CapabilityProbe,
        registrar: Arc<WorkerRegistrar>,
        permissions: PermissionCoordinator,
        push: Arc<dyn PushHost>,
        key: RegistrationKey,
    ) -> Self {
        Self {
            capability,
            registrar,
            permissions,
            push,
            key,
            request_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Worker script and scope this manager subscribes through.
    pub fn key(&self) -> &RegistrationKey {
        &self.key
    }

    /// Establish the push subscription, or return the existing one.
    ///
    /// `server_key` is the application server's VAPID public key in
    /// unpadded base64url. It is ignored when a subscription already exists.
    ///
    /// # Errors
    ///
    /// - [`PushError::CapabilityUnsupported`] if the host lacks push
    /// - [`PushError::PermissionDenied`] if permission is not granted
    /// - [`PushError::Registration`] if the worker cannot be registered
    /// - [`PushError::Decode`] if `server_key` is malformed
    /// - [`PushError::Subscription`] if the host rejects the request
    pub async fn subscribe(&self, server_key: &str) -> PushResult<Subscription> {
        self.capability.require()?;
        if self.permissions.status() == PermissionStatus::Denied {
            log::debug!("[Push] Permission denied this session; not subscribing");
            return Err(PushError::PermissionDenied);
        }

        let _guard = self.request_lock.lock().await;

        let registration = self
            .registrar
            .register(&self.key.script, &self.key.scope)
            .await?;
        registration.wait_activated().await?;

        if let Some(existing) = self
            .push
            .get(registration.id())
            .await
            .map_err(PushError::Subscription)?
        {
            log::debug!("[Push] Reusing subscription on {}", registration.id());
            return Ok(Subscription::from_host(registration.id(), existing));
        }

        let status = self.permissions.status();
        if status != PermissionStatus::Granted {
            log::info!("[Push] Cannot subscribe, permission is {status}");
            return Err(PushError::PermissionDenied);
        }

        let key = ApplicationServerKey::from_base64url(server_key)?;
        if !key.is_p256_point() {
            log::warn!(
                "[Push] Application server key is not an uncompressed P-256 point ({} bytes); \
                 push services will likely reject it",
                key.len()
            );
        }

        let created = self
            .push
            .subscribe(
                registration.id(),
                SubscribeOptions {
                    user_visible_only: true,
                    application_server_key: key.as_bytes().to_vec(),
                },
            )
            .await
            .map_err(|e| {
                log::warn!("[Push] Subscribe rejected: {e}");
                PushError::Subscription(e)
            })?;

        let subscription = Subscription::from_host(registration.id(), created);
        log::info!(
            "[Push] Subscribed {} ({}...)",
            registration.id(),
            subscription.endpoint.chars().take(48).collect::<String>()
        );
        Ok(subscription)
    }

    /// Remove the push subscription, if there is one.
    ///
    /// A registration left by an earlier session counts: its subscription is
    /// removed too. Succeeds as a no-op only when the host holds no
    /// registration or no subscription.
    ///
    /// # Errors
    ///
    /// - [`PushError::CapabilityUnsupported`] if the host lacks push
    /// - [`PushError::Registration`] if the registration lookup fails
    /// - [`PushError::Subscription`] if the host fails to remove it
    pub async fn unsubscribe(&self) -> PushResult<()> {
        self.capability.require()?;
        let _guard = self.request_lock.lock().await;

        let Some(registration) = self
            .registrar
            .existing(&self.key.script, &self.key.scope)
            .await?
        else {
            log::debug!("[Push] No registration; nothing to unsubscribe");
            return Ok(());
        };

        let removed = self
            .push
            .unsubscribe(registration.id())
            .await
            .map_err(|e| {
                log::warn!("[Push] Unsubscribe failed: {e}");
                PushError::Subscription(e)
            })?;
        if removed {
            log::info!("[Push] Unsubscribed {}", registration.id());
        } else {
            log::debug!("[Push] No subscription on {}", registration.id());
        }
        Ok(())
    }

    /// The current subscription, without creating one.
    pub async fn current(&self) -> PushResult<Option<Subscription>> {
        self.capability.require()?;
        let Some(registration) = self
            .registrar
            .existing(&self.key.script, &self.key.scope)
            .await?
        else {
            return Ok(None);
        };
        let existing = self
            .push
            .get(registration.id())
            .await
            .map_err(PushError::Subscription)?;
        Ok(existing.map(|s| Subscription::from_host(registration.id(), s)))
    }

    /// Whether a subscription currently exists.
    pub async fn is_subscribed(&self) -> PushResult<bool> {
        Ok(self.current().await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::{FailurePlan, MemoryHost};
    use crate::host::{HostCapabilities, HostPermission, PermissionHost, WorkerHost, WorkerPhase};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
    use base64::Engine;
    use p256::ecdsa::SigningKey;
    use p256::elliptic_curve::rand_core::OsRng;
    use std::time::Duration;

    fn server_key() -> String {
        let signing_key = SigningKey::random(&mut OsRng);
        BASE64URL.encode(signing_key.verifying_key().to_encoded_point(false).as_bytes())
    }

    fn manager(host: &Arc<MemoryHost>) -> SubscriptionManager {
        let capability = CapabilityProbe::new(HostCapabilities::full());
        let registrar = Arc::new(WorkerRegistrar::new(
            Arc::clone(host) as Arc<dyn WorkerHost>,
            capability,
        ));
        let permissions =
            PermissionCoordinator::new(Arc::clone(host) as Arc<dyn PermissionHost>, capability);
        SubscriptionManager::new(
            capability,
            registrar,
            permissions,
            Arc::clone(host) as Arc<dyn PushHost>,
            RegistrationKey::new("/sw.js", "/"),
        )
    }

    #[tokio::test]
    async fn test_subscribe_forces_visible_push() {
        let host = Arc::new(MemoryHost::new());
        host.set_permission(HostPermission::Granted);
        let manager = manager(&host);
        let key = server_key();

        let subscription = manager.subscribe(&key).await.expect("subscribe");

        let options = host.last_subscribe_options().expect("subscribe called");
        assert!(options.user_visible_only);
        assert_eq!(options.application_server_key, BASE64URL.decode(&key).expect("key"));
        assert!(subscription.endpoint.starts_with("https://"));
    }

    #[tokio::test]
    async fn test_second_subscribe_returns_same_identity() {
        let host = Arc::new(MemoryHost::new());
        host.set_permission(HostPermission::Granted);
        let manager = manager(&host);

        let first = manager.subscribe(&server_key()).await.expect("first");
        // A different key must not re-key the live subscription.
        let second = manager.subscribe(&server_key()).await.expect("second");

        assert_eq!(first.id(), second.id());
        assert_eq!(first, second);
        assert_eq!(host.calls().push_subscribe, 1);
        assert_eq!(host.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_creates_one_subscription() {
        let host = Arc::new(MemoryHost::new());
        host.set_permission(HostPermission::Granted);
        host.set_latency(Duration::from_millis(10));
        let manager = manager(&host);
        let key = server_key();

        let (a, b) = tokio::join!(manager.subscribe(&key), manager.subscribe(&key));

        assert_eq!(a.expect("a").id(), b.expect("b").id());
        assert_eq!(host.calls().register, 1);
        assert_eq!(host.calls().push_subscribe, 1);
    }

    #[tokio::test]
    async fn test_denied_short_circuits_before_registration() {
        let host = Arc::new(MemoryHost::new());
        host.set_permission(HostPermission::Denied);
        let manager = manager(&host);
        let err = manager.subscribe(&server_key()).await.expect_err("denied");
        assert_eq!(err, PushError::PermissionDenied);
        assert_eq!(host.calls().register, 0);
        assert_eq!(host.calls().push_subscribe, 0);
    }

    #[tokio::test]
    async fn test_undecided_permission_fails_after_lookup() {
        let host = Arc::new(MemoryHost::new());
        let manager = manager(&host);

        let err = manager.subscribe(&server_key()).await.expect_err("default");
        assert_eq!(err, PushError::PermissionDenied);
        assert_eq!(host.calls().push_subscribe, 0);
    }

    #[tokio::test]
    async fn test_bad_key_fails_only_this_call() {
        let host = Arc::new(MemoryHost::new());
        host.set_permission(HostPermission::Granted);
        let manager = manager(&host);

        let err = manager.subscribe("not+a+key").await.expect_err("bad key");
        assert!(matches!(err, PushError::Decode(_)));
        assert_eq!(host.calls().push_subscribe, 0);

        manager.subscribe(&server_key()).await.expect("good key works");
    }

    #[tokio::test]
    async fn test_registration_error_propagates() {
        let host = Arc::new(MemoryHost::new());
        host.set_permission(HostPermission::Granted);
        host.set_failures(FailurePlan {
            register: Some("TypeError: script 404".into()),
            ..FailurePlan::default()
        });
        let manager = manager(&host);

        match manager.subscribe(&server_key()).await {
            Err(PushError::Registration { reason, .. }) => {
                assert_eq!(reason.0, "TypeError: script 404");
            }
            other => panic!("expected registration error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_host_rejection_is_subscription_error() {
        let host = Arc::new(MemoryHost::new());
        host.set_permission(HostPermission::Granted);
        host.set_failures(FailurePlan {
            subscribe: Some("AbortError: push service unavailable".into()),
            ..FailurePlan::default()
        });
        let manager = manager(&host);

        let err = manager.subscribe(&server_key()).await.expect_err("rejected");
        assert!(matches!(err, PushError::Subscription(_)));
        assert!(err.is_retryable());

        host.set_failures(FailurePlan::default());
        manager.subscribe(&server_key()).await.expect("retry works");
    }

    #[tokio::test]
    async fn test_subscribe_waits_for_activation() {
        let host = Arc::new(MemoryHost::new());
        host.set_permission(HostPermission::Granted);
        host.set_initial_phase(WorkerPhase::Installing);
        let manager = Arc::new(manager(&host));

        let pending = tokio::spawn({
            let manager = Arc::clone(&manager);
            let key = server_key();
            async move { manager.subscribe(&key).await }
        });

        let registration = loop {
            if let Some(r) = manager.registrar.registration("/sw.js", "/") {
                break r;
            }
            tokio::task::yield_now().await;
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(host.calls().push_get, 0, "no push call before activation");

        host.emit_worker_state(
            registration.id(),
            crate::host::WorkerStateChange {
                version: 1,
                phase: WorkerPhase::Activated,
                has_controller: false,
            },
        );
        pending.await.expect("join").expect("subscribed");
        assert_eq!(host.calls().push_subscribe, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_subscription_from_earlier_session() {
        let host = Arc::new(MemoryHost::new());
        host.set_permission(HostPermission::Granted);
        let earlier = manager(&host);
        let subscription = earlier.subscribe(&server_key()).await.expect("subscribe");

        let reloaded = manager(&host);
        assert_eq!(reloaded.current().await.expect("current"), Some(subscription));

        reloaded.unsubscribe().await.expect("unsubscribe");
        assert_eq!(host.subscription_count(), 0);
        assert_eq!(host.calls().push_unsubscribe, 1);
        assert!(!reloaded.is_subscribed().await.expect("is_subscribed"));
    }

    #[tokio::test]
    async fn test_unsubscribe_without_subscription_is_noop() {
        let host = Arc::new(MemoryHost::new());
        let manager = manager(&host);

        manager.unsubscribe().await.expect("no-op");
        assert_eq!(host.calls().push_unsubscribe, 0);

        // With a registration but no subscription, still fine.
        manager
            .registrar
            .register("/sw.js", "/")
            .await
            .expect("register");
        manager.unsubscribe().await.expect("no-op");
    }

    #[tokio::test]
    async fn test_unsubscribe_then_subscribe_creates_new_identity() {
        let host = Arc::new(MemoryHost::new());
        host.set_permission(HostPermission::Granted);
        let manager = manager(&host);
        let key = server_key();

        let first = manager.subscribe(&key).await.expect("subscribe");
        assert!(manager.is_subscribed().await.expect("query"));

        manager.unsubscribe().await.expect("unsubscribe");
        assert!(!manager.is_subscribed().await.expect("query"));

        let second = manager.subscribe(&key).await.expect("resubscribe");
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_unsubscribe_failure_is_subscription_error() {
        let host = Arc::new(MemoryHost::new());
        host.set_permission(HostPermission::Granted);
        let manager = manager(&host);
        manager.subscribe(&server_key()).await.expect("subscribe");

        host.set_failures(FailurePlan {
            unsubscribe: Some("NetworkError".into()),
            ..FailurePlan::default()
        });
        let err = manager.unsubscribe().await.expect_err("host failed");
        assert!(matches!(err, PushError::Subscription(_)));
        assert!(manager.is_subscribed().await.expect("query"));
    }

    #[test]
    fn test_subscription_json_shape() {
        let subscription = Subscription {
            registration: RegistrationId("reg-1".into()),
            endpoint: "https://push.example.test/send/abc".into(),
            keys: SubscriptionKeys {
                p256dh: "BPk".into(),
                auth: "xyz".into(),
            },
        };

        let json = subscription.to_json();
        assert_eq!(json["endpoint"], "https://push.example.test/send/abc");
        assert_eq!(json["keys"]["p256dh"], "BPk");
        assert_eq!(json["keys"]["auth"], "xyz");

        let serialized = serde_json::to_value(&subscription).expect("serialize");
        assert_eq!(serialized, json);
    }
}
