//! In-process stand-in for the provider, used by tests.
//!
//! Keeps every created resource in memory, assigns provider-style ids, and can
//! be told to fail specific operations.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use dev_phone_core::{ManagedResource, PhoneNumber, ResourceKind, WebhookUrls};

use super::{BackendDeployment, MintedCredential, OutboundMessage, RemoteResult, TelephonyApi};
use crate::error::RemoteError;

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List(ResourceKind),
    Create(ResourceKind),
    Remove(ResourceKind),
    ListPhoneNumbers,
    UpdatePhoneNumber,
    SendMessage,
}

#[derive(Default)]
struct State {
    resources: Vec<ManagedResource>,
    participants: Vec<(String, String, String)>,
    environments: BTreeMap<String, BTreeMap<String, String>>,
    numbers: Vec<PhoneNumber>,
    messages: Vec<serde_json::Value>,
    failures: HashSet<Operation>,
    /// Phone numbers whose updates fail.
    frozen_numbers: HashSet<String>,
    next_id: u64,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:030x}", self.next_id)
    }

    fn check(&self, op: Operation) -> RemoteResult<()> {
        if self.failures.contains(&op) {
            Err(RemoteError::new(Some(500), format!("injected failure: {op:?}")))
        } else {
            Ok(())
        }
    }
}

pub struct InMemoryTelephonyApi {
    account_sid: String,
    state: Mutex<State>,
}

impl Default for InMemoryTelephonyApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTelephonyApi {
    pub fn new() -> Self {
        Self {
            account_sid: "AC00000000000000000000000000000000".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("in-memory api lock poisoned")
    }

    /// Add a phone number to the account.
    pub fn add_phone_number(&self, phone_number: &str, sms_url: &str, voice_url: &str) {
        let mut state = self.state();
        let sid = state.id("PN");
        state.numbers.push(PhoneNumber {
            sid,
            phone_number: phone_number.to_string(),
            friendly_name: phone_number.to_string(),
            sms_url: sms_url.to_string(),
            voice_url: voice_url.to_string(),
            status_callback: String::new(),
        });
    }

    /// Insert a resource as if a previous run had created it.
    pub fn seed(&self, resource: ManagedResource) {
        self.state().resources.push(resource);
    }

    pub fn fail(&self, op: Operation) {
        self.state().failures.insert(op);
    }

    /// Make updates to `phone_number` fail while other numbers still update.
    pub fn freeze_phone_number(&self, phone_number: &str) {
        self.state().frozen_numbers.insert(phone_number.to_string());
    }

    pub fn recover(&self, op: Operation) {
        self.state().failures.remove(&op);
    }

    pub fn resources(&self) -> Vec<ManagedResource> {
        self.state().resources.clone()
    }

    /// Resources whose label starts with `prefix`.
    pub fn resources_labeled(&self, prefix: &str) -> Vec<ManagedResource> {
        self.state()
            .resources
            .iter()
            .filter(|r| r.label().starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn phone_number(&self, phone_number: &str) -> Option<PhoneNumber> {
        self.state()
            .numbers
            .iter()
            .find(|n| n.phone_number == phone_number)
            .cloned()
    }

    /// Environment bindings the backend `remote_id` was deployed with.
    pub fn environment(&self, remote_id: &str) -> Option<BTreeMap<String, String>> {
        self.state().environments.get(remote_id).cloned()
    }

    /// `(service_id, conversation_id, identity)` for every participant added.
    pub fn participants(&self) -> Vec<(String, String, String)> {
        self.state().participants.clone()
    }

    pub fn sent_messages(&self) -> Vec<serde_json::Value> {
        self.state().messages.clone()
    }
}

fn prefix_for(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Credential => "SK",
        ResourceKind::CallHistoryStore => "IS",
        ResourceKind::Conversation => "SV",
        ResourceKind::WebhookBackend => "ZS",
        ResourceKind::VoiceApp => "AP",
    }
}

#[async_trait]
impl TelephonyApi for InMemoryTelephonyApi {
    fn account_sid(&self) -> &str {
        &self.account_sid
    }

    async fn list(&self, kind: ResourceKind) -> RemoteResult<Vec<ManagedResource>> {
        let state = self.state();
        state.check(Operation::List(kind))?;
        Ok(state
            .resources
            .iter()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect())
    }

    async fn remove(&self, resource: &ManagedResource) -> RemoteResult<()> {
        let mut state = self.state();
        state.check(Operation::Remove(resource.kind()))?;
        state
            .resources
            .retain(|r| !(r.kind() == resource.kind() && r.remote_id() == resource.remote_id()));
        state.environments.remove(resource.remote_id());
        Ok(())
    }

    async fn create_credential(&self, label: &str) -> RemoteResult<MintedCredential> {
        let mut state = self.state();
        state.check(Operation::Create(ResourceKind::Credential))?;
        let resource = ManagedResource::Credential {
            remote_id: state.id(prefix_for(ResourceKind::Credential)),
            label: label.to_string(),
        };
        state.resources.push(resource.clone());
        let secret = state.id("secret-");
        Ok(MintedCredential { resource, secret })
    }

    async fn create_call_history_store(&self, label: &str) -> RemoteResult<ManagedResource> {
        let mut state = self.state();
        state.check(Operation::Create(ResourceKind::CallHistoryStore))?;
        let resource = ManagedResource::CallHistoryStore {
            remote_id: state.id(prefix_for(ResourceKind::CallHistoryStore)),
            label: label.to_string(),
        };
        state.resources.push(resource.clone());
        Ok(resource)
    }

    async fn create_conversation_service(&self, label: &str) -> RemoteResult<ManagedResource> {
        let mut state = self.state();
        state.check(Operation::Create(ResourceKind::Conversation))?;
        let resource = ManagedResource::Conversation {
            service_id: state.id(prefix_for(ResourceKind::Conversation)),
            label: label.to_string(),
            conversation_id: None,
        };
        state.resources.push(resource.clone());
        Ok(resource)
    }

    async fn create_conversation(&self, service_id: &str, _label: &str) -> RemoteResult<String> {
        let mut state = self.state();
        state.check(Operation::Create(ResourceKind::Conversation))?;
        if !state.resources.iter().any(|r| r.remote_id() == service_id) {
            return Err(RemoteError::new(Some(404), format!("no service {service_id}")));
        }
        Ok(state.id("CH"))
    }

    async fn add_participant(
        &self,
        service_id: &str,
        conversation_id: &str,
        identity: &str,
    ) -> RemoteResult<()> {
        let mut state = self.state();
        state.check(Operation::Create(ResourceKind::Conversation))?;
        state.participants.push((
            service_id.to_string(),
            conversation_id.to_string(),
            identity.to_string(),
        ));
        Ok(())
    }

    async fn deploy_backend(
        &self,
        label: &str,
        environment: &BTreeMap<String, String>,
    ) -> RemoteResult<BackendDeployment> {
        let mut state = self.state();
        state.check(Operation::Create(ResourceKind::WebhookBackend))?;
        let remote_id = state.id(prefix_for(ResourceKind::WebhookBackend));
        let domain = format!("{label}-{:04}-dev.twil.io", state.next_id % 10_000);
        let backend = ManagedResource::WebhookBackend {
            remote_id: remote_id.clone(),
            label: label.to_string(),
            domain: Some(domain.clone()),
        };
        state.resources.push(backend.clone());
        state.environments.insert(remote_id.clone(), environment.clone());
        Ok(BackendDeployment {
            backend,
            events: vec![
                format!("created service {remote_id}"),
                format!("deployed to {domain}"),
            ],
        })
    }

    async fn create_voice_app(
        &self,
        label: &str,
        voice_url: &str,
    ) -> RemoteResult<ManagedResource> {
        let mut state = self.state();
        state.check(Operation::Create(ResourceKind::VoiceApp))?;
        let resource = ManagedResource::VoiceApp {
            remote_id: state.id(prefix_for(ResourceKind::VoiceApp)),
            label: label.to_string(),
            voice_url: Some(voice_url.to_string()),
        };
        state.resources.push(resource.clone());
        Ok(resource)
    }

    async fn list_phone_numbers(&self) -> RemoteResult<Vec<PhoneNumber>> {
        let state = self.state();
        state.check(Operation::ListPhoneNumbers)?;
        Ok(state.numbers.clone())
    }

    async fn update_phone_number(
        &self,
        sid: &str,
        urls: &WebhookUrls,
    ) -> RemoteResult<PhoneNumber> {
        let mut state = self.state();
        state.check(Operation::UpdatePhoneNumber)?;
        let State {
            numbers,
            frozen_numbers,
            ..
        } = &mut *state;
        let number = numbers
            .iter_mut()
            .find(|n| n.sid == sid)
            .ok_or_else(|| RemoteError::new(Some(404), format!("no phone number {sid}")))?;
        if frozen_numbers.contains(&number.phone_number) {
            return Err(RemoteError::new(
                Some(500),
                format!("injected failure: update {}", number.phone_number),
            ));
        }
        number.sms_url = urls.sms_url.clone();
        number.voice_url = urls.voice_url.clone();
        number.status_callback = urls.status_callback.clone();
        Ok(number.clone())
    }

    async fn send_message(&self, message: &OutboundMessage) -> RemoteResult<serde_json::Value> {
        let mut state = self.state();
        state.check(Operation::SendMessage)?;
        if !state.numbers.iter().any(|n| n.phone_number == message.from) {
            return Err(RemoteError::new(
                Some(400),
                format!("'From' {} is not a number on this account", message.from),
            ));
        }
        let sent = serde_json::json!({
            "sid": state.id("SM"),
            "from": message.from,
            "to": message.to,
            "body": message.body,
            "status": "queued",
        });
        state.messages.push(sent.clone());
        Ok(sent)
    }
}
