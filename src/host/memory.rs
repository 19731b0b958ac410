//! In-process host implementing every primitive.
//!
//! `MemoryHost` behaves like a well-behaved browser: registrations are keyed
//! by (script, scope), subscriptions require granted permission and
//! `user_visible_only`, and notifications require permission. On top of that
//! it counts every primitive call, can inject failures, and lets a test
//! script the user's answer to the permission prompt or hold the prompt open
//! until [`MemoryHost::resolve_prompt`] is called.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
use base64::Engine;
use p256::elliptic_curve::rand_core::OsRng;
use p256::SecretKey;
use tokio::sync::{mpsc, oneshot};

use super::{
    HostPermission, HostRegistration, HostSubscription, NotificationHost, PermissionHost,
    PushHost, RegistrationId, SubscribeOptions, SubscriptionKeys, WorkerHost, WorkerPhase,
    WorkerStateChange,
};
use crate::error::HostError;
use crate::notifier::Notification;

/// How the simulated user answers the permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptBehavior {
    /// Answer immediately.
    Answer(HostPermission),
    /// Keep the prompt open until [`MemoryHost::resolve_prompt`].
    Pending,
}

/// Which path displayed a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayPath {
    /// Through the background worker.
    Worker,
    /// Directly from the page.
    Direct,
}

/// Primitive call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `WorkerHost::register`
    pub register: usize,
    /// `WorkerHost::registration`
    pub lookup: usize,
    /// `PermissionHost::status`
    pub permission_status: usize,
    /// `PermissionHost::request`
    pub permission_request: usize,
    /// `PushHost::get`
    pub push_get: usize,
    /// `PushHost::subscribe`
    pub push_subscribe: usize,
    /// `PushHost::unsubscribe`
    pub push_unsubscribe: usize,
    /// `NotificationHost::show_via_worker`
    pub show_via_worker: usize,
    /// `NotificationHost::show_direct`
    pub show_direct: usize,
}

impl CallCounts {
    /// Sum of every counter.
    pub fn total(&self) -> usize {
        self.register
            + self.lookup
            + self.permission_status
            + self.permission_request
            + self.push_get
            + self.push_subscribe
            + self.push_unsubscribe
            + self.show_via_worker
            + self.show_direct
    }
}

/// Failures a test can arm.
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    /// Reject `register` with this reason.
    pub register: Option<String>,
    /// Reject `subscribe` with this reason.
    pub subscribe: Option<String>,
    /// Reject `unsubscribe` with this reason.
    pub unsubscribe: Option<String>,
    /// Reject `show_via_worker` with this reason.
    pub show_via_worker: Option<String>,
    /// Reject `show_direct` with this reason.
    pub show_direct: Option<String>,
}

#[derive(Debug)]
struct MemoryRegistration {
    id: RegistrationId,
    phase: WorkerPhase,
    events: mpsc::UnboundedSender<WorkerStateChange>,
}

#[derive(Debug)]
struct State {
    registrations: HashMap<(String, String), MemoryRegistration>,
    initial_phase: WorkerPhase,
    permission: HostPermission,
    prompt: PromptBehavior,
    prompt_waiters: Vec<oneshot::Sender<HostPermission>>,
    subscriptions: HashMap<RegistrationId, HostSubscription>,
    last_subscribe: Option<SubscribeOptions>,
    shown: Vec<(DisplayPath, Notification)>,
    failures: FailurePlan,
    latency: Duration,
    calls: CallCounts,
    next_registration: u64,
}

/// Simulated host. See the module docs.
#[derive(Debug)]
pub struct MemoryHost {
    state: Mutex<State>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// A host with permission `default`, a prompt that grants, and workers
    /// that register already activated.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                registrations: HashMap::new(),
                initial_phase: WorkerPhase::Activated,
                permission: HostPermission::Default,
                prompt: PromptBehavior::Answer(HostPermission::Granted),
                prompt_waiters: Vec::new(),
                subscriptions: HashMap::new(),
                last_subscribe: None,
                shown: Vec::new(),
                failures: FailurePlan::default(),
                latency: Duration::ZERO,
                calls: CallCounts::default(),
                next_registration: 1,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the current permission without prompting.
    pub fn set_permission(&self, permission: HostPermission) {
        self.state().permission = permission;
    }

    /// Choose how the next prompts are answered.
    pub fn set_prompt(&self, behavior: PromptBehavior) {
        self.state().prompt = behavior;
    }

    /// Answer every open prompt and record the decision.
    ///
    /// Returns how many prompts were waiting.
    pub fn resolve_prompt(&self, answer: HostPermission) -> usize {
        let waiters = {
            let mut state = self.state();
            state.permission = answer;
            std::mem::take(&mut state.prompt_waiters)
        };
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(answer);
        }
        count
    }

    /// Number of prompts currently open.
    pub fn open_prompts(&self) -> usize {
        self.state().prompt_waiters.len()
    }

    /// Phase new registrations start in.
    pub fn set_initial_phase(&self, phase: WorkerPhase) {
        self.state().initial_phase = phase;
    }

    /// Delay applied to every async primitive.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Replace the armed failures.
    pub fn set_failures(&self, failures: FailurePlan) {
        self.state().failures = failures;
    }

    /// Push a lifecycle change to the registration with `id`.
    ///
    /// Returns `false` if no such registration exists or nobody listens.
    pub fn emit_worker_state(&self, id: &RegistrationId, change: WorkerStateChange) -> bool {
        let mut state = self.state();
        let Some(registration) = state.registrations.values_mut().find(|r| &r.id == id) else {
            return false;
        };
        // A waiting version leaves the active worker in charge.
        if registration.phase != WorkerPhase::Activated || change.phase == WorkerPhase::Activated {
            registration.phase = change.phase;
        }
        registration.events.send(change).is_ok()
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// Options passed to the most recent `subscribe`.
    pub fn last_subscribe_options(&self) -> Option<SubscribeOptions> {
        self.state().last_subscribe.clone()
    }

    /// Every notification displayed so far, in order.
    pub fn shown(&self) -> Vec<(DisplayPath, Notification)> {
        self.state().shown.clone()
    }

    /// Number of live subscriptions across all registrations.
    pub fn subscription_count(&self) -> usize {
        self.state().subscriptions.len()
    }

    async fn simulate_latency(&self) {
        let latency = self.state().latency;
        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(latency).await;
        }
    }

    fn new_subscription() -> HostSubscription {
        let client_key = SecretKey::random(&mut OsRng).public_key();
        let p256dh = BASE64URL.encode(client_key.to_sec1_bytes());
        let auth = BASE64URL.encode(uuid::Uuid::new_v4().as_bytes());
        HostSubscription {
            endpoint: format!("https://push.example.test/send/{}", uuid::Uuid::new_v4()),
            keys: SubscriptionKeys { p256dh, auth },
        }
    }
}

#[async_trait]
impl WorkerHost for MemoryHost {
    async fn register(&self, script: &str, scope: &str) -> Result<HostRegistration, HostError> {
        self.state().calls.register += 1;
        self.simulate_latency().await;

        let mut state = self.state();
        if let Some(reason) = state.failures.register.clone() {
            return Err(HostError::new(reason));
        }
        if !script.starts_with('/') || !scope.starts_with('/') {
            return Err(HostError::new(format!(
                "SecurityError: {script} is not same-origin with scope {scope}"
            )));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let key = (script.to_string(), scope.to_string());
        let initial_phase = state.initial_phase;
        let (id, phase) = if let Some(existing) = state.registrations.get_mut(&key) {
            existing.events = events_tx;
            (existing.id.clone(), existing.phase)
        } else {
            let id = RegistrationId(format!("reg-{}", state.next_registration));
            state.next_registration += 1;
            state.registrations.insert(
                key,
                MemoryRegistration {
                    id: id.clone(),
                    phase: initial_phase,
                    events: events_tx,
                },
            );
            (id, initial_phase)
        };

        Ok(HostRegistration {
            id,
            scope: scope.to_string(),
            phase,
            events: events_rx,
        })
    }

    async fn registration(&self, scope: &str) -> Result<Option<HostRegistration>, HostError> {
        self.state().calls.lookup += 1;
        self.simulate_latency().await;

        let mut state = self.state();
        let Some(existing) = state
            .registrations
            .iter_mut()
            .find_map(|((_, s), r)| (s == scope).then_some(r))
        else {
            return Ok(None);
        };

        // Fresh channel: the previous listener belonged to another session.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        existing.events = events_tx;
        Ok(Some(HostRegistration {
            id: existing.id.clone(),
            scope: scope.to_string(),
            phase: existing.phase,
            events: events_rx,
        }))
    }
}

#[async_trait]
impl PermissionHost for MemoryHost {
    fn status(&self) -> HostPermission {
        let mut state = self.state();
        state.calls.permission_status += 1;
        state.permission
    }

    async fn request(&self) -> Result<HostPermission, HostError> {
        let waiter = {
            let mut state = self.state();
            state.calls.permission_request += 1;
            if state.permission != HostPermission::Default {
                return Ok(state.permission);
            }
            match state.prompt {
                PromptBehavior::Answer(answer) => {
                    state.permission = answer;
                    return Ok(answer);
                }
                PromptBehavior::Pending => {
                    let (tx, rx) = oneshot::channel();
                    state.prompt_waiters.push(tx);
                    rx
                }
            }
        };

        waiter
            .await
            .map_err(|e| HostError::new(format!("prompt abandoned: {e}")))
    }
}

#[async_trait]
impl PushHost for MemoryHost {
    async fn get(&self, registration: &RegistrationId) -> Result<Option<HostSubscription>, HostError> {
        self.state().calls.push_get += 1;
        self.simulate_latency().await;
        Ok(self.state().subscriptions.get(registration).cloned())
    }

    async fn subscribe(
        &self,
        registration: &RegistrationId,
        options: SubscribeOptions,
    ) -> Result<HostSubscription, HostError> {
        self.state().calls.push_subscribe += 1;
        self.simulate_latency().await;

        let mut state = self.state();
        state.last_subscribe = Some(options.clone());
        if let Some(reason) = state.failures.subscribe.clone() {
            return Err(HostError::new(reason));
        }
        if !options.user_visible_only {
            return Err(HostError::new(
                "NotAllowedError: userVisibleOnly must be true",
            ));
        }
        if options.application_server_key.is_empty() {
            return Err(HostError::new(
                "InvalidAccessError: applicationServerKey is empty",
            ));
        }
        if state.permission != HostPermission::Granted {
            return Err(HostError::new("NotAllowedError: permission not granted"));
        }

        let subscription = state
            .subscriptions
            .entry(registration.clone())
            .or_insert_with(Self::new_subscription)
            .clone();
        Ok(subscription)
    }

    async fn unsubscribe(&self, registration: &RegistrationId) -> Result<bool, HostError> {
        self.state().calls.push_unsubscribe += 1;
        self.simulate_latency().await;

        let mut state = self.state();
        if let Some(reason) = state.failures.unsubscribe.clone() {
            return Err(HostError::new(reason));
        }
        Ok(state.subscriptions.remove(registration).is_some())
    }
}

#[async_trait]
impl NotificationHost for MemoryHost {
    async fn show_via_worker(
        &self,
        registration: &RegistrationId,
        notification: &Notification,
    ) -> Result<(), HostError> {
        self.state().calls.show_via_worker += 1;
        self.simulate_latency().await;

        let mut state = self.state();
        if let Some(reason) = state.failures.show_via_worker.clone() {
            return Err(HostError::new(reason));
        }
        if !state.registrations.values().any(|r| &r.id == registration) {
            return Err(HostError::new(format!(
                "InvalidStateError: no registration {registration}"
            )));
        }
        if state.permission != HostPermission::Granted {
            return Err(HostError::new("TypeError: no notification permission"));
        }
        state.shown.push((DisplayPath::Worker, notification.clone()));
        Ok(())
    }

    async fn show_direct(&self, notification: &Notification) -> Result<(), HostError> {
        self.state().calls.show_direct += 1;
        self.simulate_latency().await;

        let mut state = self.state();
        if let Some(reason) = state.failures.show_direct.clone() {
            return Err(HostError::new(reason));
        }
        if state.permission != HostPermission::Granted {
            return Err(HostError::new("TypeError: no notification permission"));
        }
        state.shown.push((DisplayPath::Direct, notification.clone()));
        Ok(())
    }
}
