//! Resource provisioning and label-based teardown.
//!
//! Nothing about created resources is stored locally. Every kind is found
//! again by listing it remotely and matching labels, which makes provisioning
//! idempotent per session name: each step first removes whatever the same
//! session left behind, then creates a fresh resource.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use dev_phone_core::{
    outbound_call_url, GrantTargets, LabelFilter, ManagedResource, ResourceKind, Session,
};
use tracing::{debug, info, warn};

use crate::error::{Error, RemoteError, Result};
use crate::remote::TelephonyApi;
use crate::webhook::WebhookBinder;

/// Environment variable names bound into the webhook backend.
pub mod env {
    pub const CALL_HISTORY_STORE_SID: &str = "CALL_HISTORY_STORE_SID";
    pub const CONVERSATION_SERVICE_SID: &str = "CONVERSATION_SERVICE_SID";
    pub const CONVERSATION_SID: &str = "CONVERSATION_SID";
    pub const DEV_PHONE_NAME: &str = "DEV_PHONE_NAME";
}

/// Everything a session provisions besides its signing credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedResources {
    pub call_history_store: ManagedResource,
    pub conversation: ManagedResource,
    pub backend: ManagedResource,
    pub voice_app: ManagedResource,
}

impl ProvisionedResources {
    /// Ids the session token grants access to.
    pub fn grant_targets(&self) -> GrantTargets {
        GrantTargets {
            messaging: self.conversation.remote_id().to_string(),
            voice: self.voice_app.remote_id().to_string(),
            call_history: self.call_history_store.remote_id().to_string(),
        }
    }

    /// Domain the backend was deployed to.
    pub fn domain(&self) -> Option<&str> {
        self.backend.domain()
    }
}

/// Outcome of a best-effort sweep.
#[derive(Debug, Default, Clone)]
pub struct TeardownReport {
    pub removed: Vec<(ResourceKind, String)>,
    /// `(kind, remote_id or "*" for a failed listing, error)`
    pub failed: Vec<(ResourceKind, String, String)>,
    /// Phone numbers whose webhooks were reset.
    pub numbers_reset: Vec<String>,
    /// `(phone_number, error)` for numbers that could not be reset.
    pub numbers_failed: Vec<(String, String)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.numbers_failed.is_empty()
    }

    pub(crate) fn merge(&mut self, other: TeardownReport) {
        self.removed.extend(other.removed);
        self.failed.extend(other.failed);
        self.numbers_reset.extend(other.numbers_reset);
        self.numbers_failed.extend(other.numbers_failed);
    }
}

pub struct Provisioner {
    api: Arc<dyn TelephonyApi>,
    session: Session,
}

impl Provisioner {
    pub fn new(api: Arc<dyn TelephonyApi>, session: Session) -> Self {
        Self { api, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn api(&self) -> &Arc<dyn TelephonyApi> {
        &self.api
    }

    /// Remove every `kind` resource matching `filter`, stopping at the first
    /// failure.
    async fn destroy_matching(&self, kind: ResourceKind, filter: &LabelFilter) -> Result<usize> {
        let listed = self
            .api
            .list(kind)
            .await
            .map_err(|e| Error::provision(kind, "list", e))?;
        let matching = filter.apply(listed);
        for resource in &matching {
            debug!(kind = %kind, id = %resource.remote_id(), label = %resource.label(), "Removing leftover");
            self.api
                .remove(resource)
                .await
                .map_err(|e| Error::provision(kind, "remove", e))?;
        }
        Ok(matching.len())
    }

    /// Remove this session's leftovers of `kind`, then create a new one.
    ///
    /// Guarantees at most one live resource of `kind` per session once it
    /// returns successfully.
    pub async fn ensure_fresh<T, F, Fut>(&self, kind: ResourceKind, create: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        let removed = self.destroy_matching(kind, &self.session.filter()).await?;
        if removed > 0 {
            info!(kind = %kind, removed, session = %self.session, "Removed leftovers from a previous run");
        }
        info!(kind = %kind, session = %self.session, "Creating");
        create()
            .await
            .map_err(|e| Error::provision(kind, "create", e))
    }

    pub async fn provision_call_history_store(&self) -> Result<ManagedResource> {
        let label = self.session.name.as_str();
        self.ensure_fresh(ResourceKind::CallHistoryStore, || {
            self.api.create_call_history_store(label)
        })
        .await
    }

    /// Conversations service, one conversation in it, and the session as its
    /// sole participant.
    pub async fn provision_conversation(&self) -> Result<ManagedResource> {
        let label = self.session.name.as_str();
        let api = &self.api;
        self.ensure_fresh(ResourceKind::Conversation, || async move {
            let service = api.create_conversation_service(label).await?;
            let service_id = service.remote_id().to_string();
            let conversation_id = api.create_conversation(&service_id, label).await?;
            api.add_participant(&service_id, &conversation_id, label)
                .await?;
            Ok::<_, RemoteError>(ManagedResource::Conversation {
                service_id,
                label: service.label().to_string(),
                conversation_id: Some(conversation_id),
            })
        })
        .await
    }

    /// Deploy the webhook backend bound to the store and conversation.
    pub async fn provision_backend(
        &self,
        call_history_store: &ManagedResource,
        conversation: &ManagedResource,
    ) -> Result<ManagedResource> {
        let label = self.session.name.as_str();
        let mut environment = BTreeMap::new();
        environment.insert(
            env::CALL_HISTORY_STORE_SID.to_string(),
            call_history_store.remote_id().to_string(),
        );
        environment.insert(
            env::CONVERSATION_SERVICE_SID.to_string(),
            conversation.remote_id().to_string(),
        );
        environment.insert(
            env::CONVERSATION_SID.to_string(),
            conversation.conversation_id().unwrap_or_default().to_string(),
        );
        environment.insert(env::DEV_PHONE_NAME.to_string(), label.to_string());

        let deployment = self
            .ensure_fresh(ResourceKind::WebhookBackend, || {
                self.api.deploy_backend(label, &environment)
            })
            .await?;
        for event in &deployment.events {
            info!(session = %self.session, "Backend: {}", event);
        }
        if deployment.backend.domain().is_none() {
            return Err(Error::provision(
                ResourceKind::WebhookBackend,
                "deploy",
                RemoteError::new(None, "deployment reported no domain"),
            ));
        }
        Ok(deployment.backend)
    }

    /// Voice app whose voice URL is the backend's outbound-call handler.
    pub async fn provision_voice_app(&self, backend: &ManagedResource) -> Result<ManagedResource> {
        let label = self.session.name.as_str();
        let domain = backend.domain().ok_or_else(|| {
            Error::provision(
                ResourceKind::VoiceApp,
                "create",
                RemoteError::new(None, "webhook backend has no domain"),
            )
        })?;
        let voice_url = outbound_call_url(domain);
        self.ensure_fresh(ResourceKind::VoiceApp, || {
            self.api.create_voice_app(label, &voice_url)
        })
        .await
    }

    /// Create every non-credential resource in dependency order.
    pub async fn provision_all(&self) -> Result<ProvisionedResources> {
        let call_history_store = self.provision_call_history_store().await?;
        let conversation = self.provision_conversation().await?;
        let backend = self
            .provision_backend(&call_history_store, &conversation)
            .await?;
        let voice_app = self.provision_voice_app(&backend).await?;
        info!(session = %self.session, "All resources provisioned");
        Ok(ProvisionedResources {
            call_history_store,
            conversation,
            backend,
            voice_app,
        })
    }

    /// Best-effort removal of this session's resources.
    pub async fn destroy_session(&self) -> TeardownReport {
        info!(session = %self.session, "Removing session resources");
        sweep(&self.api, &self.session.filter()).await
    }

    /// Best-effort removal of every session's resources.
    pub async fn destroy_family(&self) -> TeardownReport {
        info!("Removing resources of all sessions");
        sweep(&self.api, &LabelFilter::Family).await
    }
}

/// Reset phone numbers pointing at matching backends, then remove matching
/// resources in teardown order. Individual failures are logged and recorded.
async fn sweep(api: &Arc<dyn TelephonyApi>, filter: &LabelFilter) -> TeardownReport {
    let mut report = TeardownReport::default();

    let binder = WebhookBinder::new(api.clone());
    report.merge(binder.reset_numbers_pointing_at(filter.prefix()).await);

    for kind in ResourceKind::teardown_order() {
        let listed = match api.list(kind).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Failed to list; skipping kind");
                report.failed.push((kind, "*".to_string(), e.to_string()));
                continue;
            }
        };
        for resource in filter.apply(listed) {
            match api.remove(&resource).await {
                Ok(()) => {
                    info!(kind = %kind, id = %resource.remote_id(), label = %resource.label(), "Removed");
                    report
                        .removed
                        .push((kind, resource.remote_id().to_string()));
                }
                Err(e) => {
                    warn!(kind = %kind, id = %resource.remote_id(), error = %e, "Failed to remove");
                    report
                        .failed
                        .push((kind, resource.remote_id().to_string(), e.to_string()));
                }
            }
        }
    }

    info!(
        removed = report.removed.len(),
        failed = report.failed.len(),
        numbers_reset = report.numbers_reset.len(),
        prefix = %filter.prefix(),
        "Sweep finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::Operation;
    use crate::remote::InMemoryTelephonyApi;

    fn setup() -> (Arc<InMemoryTelephonyApi>, Provisioner) {
        let api = Arc::new(InMemoryTelephonyApi::new());
        let provisioner = Provisioner::new(api.clone(), Session::generate());
        (api, provisioner)
    }

    #[tokio::test]
    async fn provisions_in_dependency_order_with_wired_ids() {
        let (api, provisioner) = setup();
        let resources = provisioner.provision_all().await.unwrap();

        let environment = api.environment(resources.backend.remote_id()).unwrap();
        assert_eq!(
            environment[env::CALL_HISTORY_STORE_SID],
            resources.call_history_store.remote_id()
        );
        assert_eq!(
            environment[env::CONVERSATION_SERVICE_SID],
            resources.conversation.remote_id()
        );
        assert_eq!(
            environment[env::CONVERSATION_SID],
            resources.conversation.conversation_id().unwrap()
        );
        assert_eq!(
            environment[env::DEV_PHONE_NAME],
            provisioner.session().name
        );

        let domain = resources.domain().unwrap();
        match &resources.voice_app {
            ManagedResource::VoiceApp { voice_url, .. } => {
                assert_eq!(voice_url.as_deref(), Some(outbound_call_url(domain).as_str()));
            }
            other => panic!("expected voice app, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_is_sole_conversation_participant() {
        let (api, provisioner) = setup();
        let conversation = provisioner.provision_conversation().await.unwrap();

        let participants = api.participants();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].0, conversation.remote_id());
        assert_eq!(participants[0].2, provisioner.session().name);
    }

    #[tokio::test]
    async fn ensure_fresh_leaves_other_sessions_alone() {
        let (api, provisioner) = setup();
        api.seed(ManagedResource::CallHistoryStore {
            remote_id: "IS-other".to_string(),
            label: "dev-phone-000000000000".to_string(),
        });

        provisioner.provision_call_history_store().await.unwrap();

        assert!(api
            .resources()
            .iter()
            .any(|r| r.remote_id() == "IS-other"));
    }

    #[tokio::test]
    async fn list_failure_during_provisioning_is_a_provision_error() {
        let (api, provisioner) = setup();
        api.fail(Operation::List(ResourceKind::CallHistoryStore));

        let err = provisioner.provision_call_history_store().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provision {
                kind: ResourceKind::CallHistoryStore,
                action: "list",
                ..
            }
        ));
        assert_eq!(err.remote_status(), Some(500));
    }

    #[tokio::test]
    async fn sweep_continues_past_failures() {
        let (api, provisioner) = setup();
        provisioner.provision_all().await.unwrap();
        api.fail(Operation::Remove(ResourceKind::WebhookBackend));

        let report = provisioner.destroy_session().await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, ResourceKind::WebhookBackend);
        let left = api.resources_labeled(&provisioner.session().name);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].kind(), ResourceKind::WebhookBackend);
    }

    #[tokio::test]
    async fn sweep_skips_kind_whose_listing_fails() {
        let (api, provisioner) = setup();
        provisioner.provision_all().await.unwrap();
        api.fail(Operation::List(ResourceKind::VoiceApp));

        let report = provisioner.destroy_session().await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, ResourceKind::VoiceApp);
        assert_eq!(report.failed[0].1, "*");
        assert_eq!(report.removed.len(), 3);
    }
}
