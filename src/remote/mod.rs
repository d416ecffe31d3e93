//! Remote telephony API surface.
//!
//! Everything the orchestrator needs from the provider goes through
//! [`TelephonyApi`]. The HTTP implementation talks to the real REST API; the
//! in-memory implementation backs tests.

mod client;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use dev_phone_core::{ManagedResource, PhoneNumber, ResourceKind, WebhookUrls};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

pub use client::{Endpoints, HttpTelephonyApi};
pub use memory::InMemoryTelephonyApi;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// A freshly minted API key. The secret is only returned at creation time.
#[derive(Clone)]
pub struct MintedCredential {
    pub resource: ManagedResource,
    pub secret: String,
}

impl std::fmt::Debug for MintedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintedCredential")
            .field("resource", &self.resource)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Result of deploying the webhook backend.
#[derive(Debug, Clone)]
pub struct BackendDeployment {
    /// A [`ManagedResource::WebhookBackend`] with its domain set.
    pub backend: ManagedResource,
    /// Human-readable status events, in order.
    pub events: Vec<String>,
}

/// Body of `POST /send-sms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub body: String,
    pub from: String,
    pub to: String,
}

/// Provider operations used by the orchestrator.
///
/// `list` and `remove` are uniform across kinds so that label-based discovery
/// and teardown need no per-kind code.
#[async_trait]
pub trait TelephonyApi: Send + Sync {
    /// Account the calls are made against.
    fn account_sid(&self) -> &str;

    /// Every resource of `kind` in the account, regardless of label.
    async fn list(&self, kind: ResourceKind) -> RemoteResult<Vec<ManagedResource>>;

    /// Remove a resource. Removing one that no longer exists succeeds.
    async fn remove(&self, resource: &ManagedResource) -> RemoteResult<()>;

    async fn create_credential(&self, label: &str) -> RemoteResult<MintedCredential>;

    async fn create_call_history_store(&self, label: &str) -> RemoteResult<ManagedResource>;

    /// Create a conversations service. The returned resource has no
    /// conversation yet.
    async fn create_conversation_service(&self, label: &str) -> RemoteResult<ManagedResource>;

    /// Create a conversation inside `service_id`, returning its id.
    async fn create_conversation(&self, service_id: &str, label: &str) -> RemoteResult<String>;

    async fn add_participant(
        &self,
        service_id: &str,
        conversation_id: &str,
        identity: &str,
    ) -> RemoteResult<()>;

    /// Deploy the webhook backend with the given environment bindings.
    async fn deploy_backend(
        &self,
        label: &str,
        environment: &BTreeMap<String, String>,
    ) -> RemoteResult<BackendDeployment>;

    async fn create_voice_app(&self, label: &str, voice_url: &str)
        -> RemoteResult<ManagedResource>;

    async fn list_phone_numbers(&self) -> RemoteResult<Vec<PhoneNumber>>;

    /// Overwrite the webhook fields of a phone number.
    async fn update_phone_number(&self, sid: &str, urls: &WebhookUrls)
        -> RemoteResult<PhoneNumber>;

    /// Send an SMS, returning the created message as reported by the remote.
    async fn send_message(&self, message: &OutboundMessage) -> RemoteResult<serde_json::Value>;
}
