//! Session lifecycle: provisioning at startup, serving, and teardown on exit.
//!
//! ```text
//! Idle -> Provisioning -> Serving -> Draining -> Terminated
//!              |                                     ^
//!              +------------- failure ---------------+
//! ```
//!
//! One [`Controller`] owns all session state for the process. Provisioning,
//! teardown and phone-number rebinding are serialized on an internal lock;
//! teardown runs at most once no matter how many shutdown signals arrive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dev_phone_core::{
    PhoneNumber, PhoneNumberBinding, PluginSettings, Session, SessionToken, WebhookUrls,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Profile;
use crate::credential::obtain_credential;
use crate::error::{Error, Result};
use crate::provisioner::{ProvisionedResources, Provisioner, TeardownReport};
use crate::remote::{OutboundMessage, TelephonyApi};
use crate::token::{self, SigningCredential};
use crate::webhook::WebhookBinder;

/// How long a fetched phone-number list is served from cache.
pub const PHONE_NUMBER_CACHE_TTL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Provisioning,
    Serving,
    Draining,
    Terminated,
}

#[derive(Default)]
struct SessionState {
    credential: Option<SigningCredential>,
    resources: Option<ProvisionedResources>,
    binding: Option<PhoneNumberBinding>,
    token: Option<SessionToken>,
    numbers: Option<(Instant, Vec<PhoneNumber>)>,
}

pub struct Controller {
    api: Arc<dyn TelephonyApi>,
    profile: Profile,
    provisioner: Provisioner,
    binder: WebhookBinder,
    /// Overwrite existing webhooks when binding.
    force: bool,
    lifecycle: Mutex<LifecycleState>,
    drain_started: AtomicBool,
    work: tokio::sync::Mutex<()>,
    state: RwLock<SessionState>,
}

impl Controller {
    pub fn new(api: Arc<dyn TelephonyApi>, profile: Profile, session: Session, force: bool) -> Self {
        Self {
            provisioner: Provisioner::new(api.clone(), session),
            binder: WebhookBinder::new(api.clone()),
            api,
            profile,
            force,
            lifecycle: Mutex::new(LifecycleState::Idle),
            drain_started: AtomicBool::new(false),
            work: tokio::sync::Mutex::new(()),
            state: RwLock::new(SessionState::default()),
        }
    }

    pub fn session(&self) -> &Session {
        self.provisioner.session()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle.lock().expect("lifecycle lock poisoned")
    }

    fn set_state(&self, to: LifecycleState) {
        let mut state = self.lifecycle.lock().expect("lifecycle lock poisoned");
        info!(from = ?*state, to = ?to, session = %self.session(), "Lifecycle transition");
        *state = to;
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let current = self.lifecycle_state();
        if current != from {
            return Err(Error::State(format!(
                "cannot move to {to:?} from {current:?}; expected {from:?}"
            )));
        }
        self.set_state(to);
        Ok(())
    }

    /// Remove every session's resources. Only allowed before [`start`].
    ///
    /// [`start`]: Controller::start
    pub async fn clear_all(&self) -> Result<TeardownReport> {
        let _work = self.work.lock().await;
        let current = self.lifecycle_state();
        if current != LifecycleState::Idle {
            return Err(Error::State(format!(
                "clearing all sessions is only allowed before provisioning, not while {current:?}"
            )));
        }
        Ok(self.provisioner.destroy_family().await)
    }

    /// Provision every resource, optionally bind `phone_number`, and issue
    /// the first token.
    ///
    /// Failure is fatal: the controller moves to `Terminated` and nothing is
    /// torn down. Rerunning with the same session name removes the leftovers.
    pub async fn start(&self, phone_number: Option<&str>) -> Result<()> {
        let _work = self.work.lock().await;
        self.transition(LifecycleState::Idle, LifecycleState::Provisioning)?;
        if let Err(e) = self.provision(phone_number).await {
            error!(
                session = %self.session(),
                error = %e,
                "Provisioning failed; rerun with --session-name {} to remove partial resources",
                self.session()
            );
            self.set_state(LifecycleState::Terminated);
            return Err(e);
        }
        Ok(())
    }

    /// [`start`](Controller::start), unless `shutdown` was already cancelled,
    /// in which case nothing is provisioned and the controller terminates.
    /// Returns whether provisioning ran.
    pub async fn start_unless_cancelled(
        &self,
        phone_number: Option<&str>,
        shutdown: &CancellationToken,
    ) -> Result<bool> {
        if shutdown.is_cancelled() {
            info!(session = %self.session(), "Shutdown requested before provisioning; skipping");
            let _work = self.work.lock().await;
            self.transition(LifecycleState::Idle, LifecycleState::Terminated)?;
            return Ok(false);
        }
        self.start(phone_number).await?;
        Ok(true)
    }

    async fn provision(&self, phone_number: Option<&str>) -> Result<()> {
        let credential =
            obtain_credential(&self.provisioner, self.api.account_sid(), &self.profile).await?;
        self.state.write().await.credential = Some(credential);

        let resources = self.provisioner.provision_all().await?;
        self.state.write().await.resources = Some(resources);

        if let Some(phone_number) = phone_number {
            self.rebind(phone_number).await?;
        }

        let mut state = self.state.write().await;
        let targets = state
            .resources
            .as_ref()
            .map(ProvisionedResources::grant_targets)
            .unwrap_or_default();
        state.token = Some(token::issue(
            self.session(),
            state.credential.as_ref(),
            &targets,
        )?);
        Ok(())
    }

    /// Record that the Gateway is accepting requests.
    pub fn mark_serving(&self) -> Result<()> {
        self.transition(LifecycleState::Provisioning, LifecycleState::Serving)
    }

    /// Unbind the phone number and remove this session's resources.
    ///
    /// Runs at most once; later calls return `None` immediately. Failures are
    /// logged and recorded in the report, never returned.
    pub async fn drain(&self) -> Option<TeardownReport> {
        if self.drain_started.swap(true, Ordering::SeqCst) {
            info!("Teardown already started; ignoring");
            return None;
        }
        let _work = self.work.lock().await;

        let current = self.lifecycle_state();
        if matches!(current, LifecycleState::Idle | LifecycleState::Terminated) {
            self.set_state(LifecycleState::Terminated);
            return None;
        }
        self.set_state(LifecycleState::Draining);

        let mut report = TeardownReport::default();
        let binding = self.state.write().await.binding.take();
        if let Some(binding) = binding {
            match self.binder.unbind(&binding).await {
                Ok(()) => report.numbers_reset.push(binding.phone_number),
                Err(e) => {
                    warn!(phone_number = %binding.phone_number, error = %e, "Failed to unbind");
                    report.numbers_failed.push((binding.phone_number, e.to_string()));
                }
            }
        }
        report.merge(self.provisioner.destroy_session().await);

        *self.state.write().await = SessionState::default();
        self.set_state(LifecycleState::Terminated);
        Some(report)
    }

    pub async fn plugin_settings(&self) -> PluginSettings {
        let state = self.state.read().await;
        let resources = state.resources.as_ref();
        PluginSettings {
            dev_phone_name: self.session().name.clone(),
            account_sid: self.api.account_sid().to_string(),
            phone_number: state.binding.clone(),
            conversation_service_sid: resources.map(|r| r.conversation.remote_id().to_string()),
            conversation_sid: resources
                .and_then(|r| r.conversation.conversation_id())
                .map(str::to_string),
            call_history_store_sid: resources
                .map(|r| r.call_history_store.remote_id().to_string()),
            voice_app_sid: resources.map(|r| r.voice_app.remote_id().to_string()),
            serverless_domain: resources.and_then(|r| r.domain()).map(str::to_string),
        }
    }

    /// Account phone numbers, cached for [`PHONE_NUMBER_CACHE_TTL`].
    pub async fn phone_numbers(&self) -> Result<Vec<PhoneNumber>> {
        if let Some((fetched_at, numbers)) = &self.state.read().await.numbers {
            if fetched_at.elapsed() < PHONE_NUMBER_CACHE_TTL {
                return Ok(numbers.clone());
            }
        }
        let numbers = self.api.list_phone_numbers().await?;
        self.state.write().await.numbers = Some((Instant::now(), numbers.clone()));
        Ok(numbers)
    }

    /// Move the webhook binding to `phone_number`.
    pub async fn choose_phone_number(&self, phone_number: &str) -> Result<PhoneNumberBinding> {
        let _work = self.work.lock().await;
        let current = self.lifecycle_state();
        if !matches!(
            current,
            LifecycleState::Provisioning | LifecycleState::Serving
        ) {
            return Err(Error::State(format!(
                "cannot choose a phone number while {current:?}"
            )));
        }
        self.rebind(phone_number).await
    }

    /// Validate the new number, unbind the old one, bind the new one.
    ///
    /// Validation failures leave the previous binding untouched. Callers hold
    /// the work lock.
    async fn rebind(&self, phone_number: &str) -> Result<PhoneNumberBinding> {
        let (domain, current) = {
            let state = self.state.read().await;
            let domain = state
                .resources
                .as_ref()
                .and_then(|r| r.domain())
                .map(str::to_string)
                .ok_or_else(|| Error::State("webhook backend is not deployed".to_string()))?;
            (domain, state.binding.clone())
        };
        let urls = WebhookUrls::for_domain(&domain);

        let number = self.binder.find_number(phone_number).await?;
        if let Some(current) = &current {
            if current.sid == number.sid {
                return Ok(current.clone());
            }
        }
        let owner = self.session().name.as_str();
        WebhookBinder::check(&number, &urls, owner, self.force)?;

        if let Some(current) = &current {
            self.binder.unbind(current).await?;
            self.state.write().await.binding = None;
        }
        let binding = match self.binder.bind(&number, urls, owner, self.force).await {
            Ok(binding) => binding,
            Err(e) => {
                if let Some(current) = current {
                    self.restore(current).await;
                }
                return Err(e);
            }
        };

        let mut state = self.state.write().await;
        state.binding = Some(binding.clone());
        state.numbers = None;
        Ok(binding)
    }

    /// Put `previous` back after a failed rebind.
    async fn restore(&self, previous: PhoneNumberBinding) {
        match self.binder.restore(&previous).await {
            Ok(()) => self.state.write().await.binding = Some(previous),
            Err(e) => error!(
                phone_number = %previous.phone_number,
                error = %e,
                "Rebind failed and the previous number could not be restored; it is now unbound"
            ),
        }
    }

    /// The current token, issuing a new one if none exists or it expired.
    pub async fn client_token(&self) -> Result<SessionToken> {
        if let Some(token) = &self.state.read().await.token {
            if !token.is_expired() {
                return Ok(token.clone());
            }
        }
        let mut state = self.state.write().await;
        if let Some(token) = &state.token {
            if !token.is_expired() {
                return Ok(token.clone());
            }
        }
        let targets = state
            .resources
            .as_ref()
            .map(ProvisionedResources::grant_targets)
            .unwrap_or_default();
        let token = token::issue(self.session(), state.credential.as_ref(), &targets)?;
        state.token = Some(token.clone());
        Ok(token)
    }

    pub async fn send_sms(&self, message: &OutboundMessage) -> Result<serde_json::Value> {
        Ok(self.api.send_message(message).await?)
    }
}

/// Cancel `shutdown` on the first SIGINT or SIGTERM. Later signals are
/// logged and ignored so teardown is never interrupted or re-entered.
pub fn watch_signals(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(signal) = next_signal().await {
            if shutdown.is_cancelled() {
                info!(signal, "Shutdown already in progress; ignoring");
            } else {
                info!(signal, "Received signal, shutting down");
                shutdown.cancel();
            }
        }
    })
}

async fn next_signal() -> Option<&'static str> {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok().map(|_| "SIGINT") };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => sigterm.recv().await.map(|_| "SIGTERM"),
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<&'static str>>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::Operation;
    use crate::remote::InMemoryTelephonyApi;
    use dev_phone_core::ResourceKind;

    fn controller() -> (Arc<InMemoryTelephonyApi>, Controller) {
        let api = Arc::new(InMemoryTelephonyApi::new());
        let profile = Profile {
            account_sid: api.account_sid().to_string(),
            auth_token: Some("token".to_string()),
            ..Default::default()
        };
        let controller = Controller::new(api.clone(), profile, Session::generate(), false);
        (api, controller)
    }

    #[tokio::test]
    async fn starts_idle() {
        let (_, controller) = controller();
        assert_eq!(controller.lifecycle_state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn start_then_serve() {
        let (_, controller) = controller();
        controller.start(None).await.unwrap();
        assert_eq!(controller.lifecycle_state(), LifecycleState::Provisioning);
        controller.mark_serving().unwrap();
        assert_eq!(controller.lifecycle_state(), LifecycleState::Serving);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let (_, controller) = controller();
        controller.start(None).await.unwrap();
        assert!(matches!(controller.start(None).await, Err(Error::State(_))));
    }

    #[tokio::test]
    async fn provisioning_failure_terminates_without_teardown() {
        let (api, controller) = controller();
        api.fail(Operation::Create(ResourceKind::WebhookBackend));

        let err = controller.start(None).await.unwrap_err();

        assert!(matches!(err, Error::Provision { .. }));
        assert_eq!(controller.lifecycle_state(), LifecycleState::Terminated);
        assert!(!api.resources_labeled(&controller.session().name).is_empty());
        assert!(controller.drain().await.is_none());
    }

    #[tokio::test]
    async fn drain_runs_once() {
        let (_, controller) = controller();
        controller.start(None).await.unwrap();
        controller.mark_serving().unwrap();

        assert!(controller.drain().await.is_some());
        assert!(controller.drain().await.is_none());
        assert_eq!(controller.lifecycle_state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn concurrent_drains_tear_down_once() {
        let (_, controller) = controller();
        let controller = Arc::new(controller);
        controller.start(None).await.unwrap();
        controller.mark_serving().unwrap();

        let a = tokio::spawn({
            let controller = controller.clone();
            async move { controller.drain().await }
        });
        let b = tokio::spawn({
            let controller = controller.clone();
            async move { controller.drain().await }
        });
        let reports = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(reports.iter().filter(|r| r.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_provisions_nothing() {
        let (api, controller) = controller();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let started = controller
            .start_unless_cancelled(None, &shutdown)
            .await
            .unwrap();

        assert!(!started);
        assert!(api.resources().is_empty());
        assert_eq!(controller.lifecycle_state(), LifecycleState::Terminated);
        assert!(controller.drain().await.is_none());
    }

    #[tokio::test]
    async fn uncancelled_start_provisions() {
        let (api, controller) = controller();

        let started = controller
            .start_unless_cancelled(None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(started);
        assert_eq!(api.resources_labeled(&controller.session().name).len(), 5);
    }

    #[tokio::test]
    async fn clear_all_refused_after_start() {
        let (_, controller) = controller();
        controller.start(None).await.unwrap();
        assert!(matches!(controller.clear_all().await, Err(Error::State(_))));
    }

    #[tokio::test]
    async fn phone_numbers_are_cached() {
        let (api, controller) = controller();
        api.add_phone_number("+15551234567", "", "");
        assert_eq!(controller.phone_numbers().await.unwrap().len(), 1);

        api.add_phone_number("+15557654321", "", "");
        assert_eq!(controller.phone_numbers().await.unwrap().len(), 1);
    }
}
