//! HTTP client for the provider's REST API.
//!
//! Writes are form-encoded, reads are JSON. Authentication is HTTP basic with
//! either an API key/secret pair or the account SID and auth token.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use dev_phone_core::{ManagedResource, PhoneNumber, ResourceKind, WebhookUrls};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{BackendDeployment, MintedCredential, OutboundMessage, RemoteResult, TelephonyApi};
use crate::config::Profile;
use crate::error::RemoteError;

/// Base URLs of the provider's API hosts.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api: String,
    pub sync: String,
    pub conversations: String,
    pub serverless: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api: "https://api.twilio.com".to_string(),
            sync: "https://sync.twilio.com".to_string(),
            conversations: "https://conversations.twilio.com".to_string(),
            serverless: "https://serverless.twilio.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Route every host to one base URL, e.g. a local stub server.
    pub fn single(base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        Self {
            api: base.clone(),
            sync: base.clone(),
            conversations: base.clone(),
            serverless: base,
        }
    }
}

/// Page size requested on every list call.
const PAGE_SIZE: &str = "1000";

/// How often, and how many times, a backend build is polled.
const BUILD_POLL_INTERVAL: Duration = Duration::from_secs(2);
const BUILD_POLL_ATTEMPTS: u32 = 90;

#[derive(Debug, Clone)]
pub struct HttpTelephonyApi {
    account_sid: String,
    username: String,
    password: String,
    endpoints: Endpoints,
    client: Client,
}

// ============================================================
// Wire types
// ============================================================

#[derive(Debug, Deserialize)]
struct Named {
    sid: String,
    #[serde(default)]
    friendly_name: Option<String>,
    #[serde(default)]
    unique_name: Option<String>,
}

impl Named {
    fn label(self) -> (String, String) {
        let label = self.friendly_name.or(self.unique_name).unwrap_or_default();
        (self.sid, label)
    }
}

#[derive(Debug, Deserialize)]
struct KeyList {
    keys: Vec<Named>,
}

#[derive(Debug, Deserialize)]
struct NewKey {
    sid: String,
    secret: String,
    #[serde(default)]
    friendly_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceList {
    services: Vec<Named>,
}

#[derive(Debug, Deserialize)]
struct Application {
    sid: String,
    #[serde(default)]
    friendly_name: Option<String>,
    #[serde(default)]
    voice_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApplicationList {
    applications: Vec<Application>,
}

#[derive(Debug, Deserialize)]
struct Environment {
    sid: String,
    domain_name: String,
}

#[derive(Debug, Deserialize)]
struct Build {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct BuildStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct IncomingNumber {
    sid: String,
    phone_number: String,
    #[serde(default)]
    friendly_name: Option<String>,
    #[serde(default)]
    sms_url: Option<String>,
    #[serde(default)]
    voice_url: Option<String>,
    #[serde(default)]
    status_callback: Option<String>,
}

impl From<IncomingNumber> for PhoneNumber {
    fn from(n: IncomingNumber) -> Self {
        Self {
            sid: n.sid,
            friendly_name: n.friendly_name.unwrap_or_else(|| n.phone_number.clone()),
            phone_number: n.phone_number,
            sms_url: n.sms_url.unwrap_or_default(),
            voice_url: n.voice_url.unwrap_or_default(),
            status_callback: n.status_callback.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IncomingNumberList {
    incoming_phone_numbers: Vec<IncomingNumber>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl HttpTelephonyApi {
    /// Create a client authenticated with `profile`.
    pub fn new(profile: &Profile, endpoints: Endpoints, timeout: Duration) -> RemoteResult<Self> {
        let (username, password) = profile
            .basic_auth()
            .ok_or_else(|| RemoteError::new(None, "profile has no usable credentials"))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            account_sid: profile.account_sid.clone(),
            username,
            password,
            endpoints,
            client,
        })
    }

    fn account_url(&self, path: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}{}",
            self.endpoints.api, self.account_sid, path
        )
    }

    /// Build a request with basic auth.
    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> RemoteResult<T> {
        let response = self
            .request(Method::GET, url)
            .query(&[("PageSize", PAGE_SIZE)])
            .send()
            .await?;
        handle_response(response).await
    }

    async fn post<T: DeserializeOwned>(&self, url: &str, form: &[(&str, &str)]) -> RemoteResult<T> {
        let response = self.request(Method::POST, url).form(form).send().await?;
        handle_response(response).await
    }

    /// DELETE, treating 404 as already removed.
    async fn delete(&self, url: &str) -> RemoteResult<()> {
        let response = self.request(Method::DELETE, url).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(error_from(status, &body))
        }
    }

    fn kind_url(&self, kind: ResourceKind) -> String {
        match kind {
            ResourceKind::Credential => self.account_url("/Keys.json"),
            ResourceKind::CallHistoryStore => format!("{}/v1/Services", self.endpoints.sync),
            ResourceKind::Conversation => {
                format!("{}/v1/Services", self.endpoints.conversations)
            }
            ResourceKind::WebhookBackend => format!("{}/v1/Services", self.endpoints.serverless),
            ResourceKind::VoiceApp => self.account_url("/Applications.json"),
        }
    }

    fn resource_url(&self, resource: &ManagedResource) -> String {
        let id = resource.remote_id();
        match resource.kind() {
            ResourceKind::Credential => self.account_url(&format!("/Keys/{id}.json")),
            ResourceKind::VoiceApp => self.account_url(&format!("/Applications/{id}.json")),
            kind => format!("{}/{id}", self.kind_url(kind)),
        }
    }

    async fn wait_for_build(&self, service_id: &str, build_id: &str) -> RemoteResult<()> {
        let url = format!(
            "{}/v1/Services/{service_id}/Builds/{build_id}/Status",
            self.endpoints.serverless
        );
        for attempt in 1..=BUILD_POLL_ATTEMPTS {
            let status: BuildStatus = self.get(&url).await?;
            match status.status.as_str() {
                "completed" => return Ok(()),
                "failed" => {
                    return Err(RemoteError::new(
                        None,
                        format!("backend build {build_id} failed"),
                    ))
                }
                other => {
                    tracing::debug!(build = %build_id, status = %other, attempt, "Waiting for build");
                    tokio::time::sleep(BUILD_POLL_INTERVAL).await;
                }
            }
        }
        Err(RemoteError::new(
            None,
            format!("backend build {build_id} did not complete"),
        ))
    }
}

/// Convert a non-success response into a [`RemoteError`], preferring the
/// provider's own message.
fn error_from(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.to_string()
            }
        });
    RemoteError::new(Some(status.as_u16()), message)
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> RemoteResult<T> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(error_from(status, &body))
    }
}

#[async_trait]
impl TelephonyApi for HttpTelephonyApi {
    fn account_sid(&self) -> &str {
        &self.account_sid
    }

    async fn list(&self, kind: ResourceKind) -> RemoteResult<Vec<ManagedResource>> {
        let url = self.kind_url(kind);
        let resources = match kind {
            ResourceKind::Credential => {
                let list: KeyList = self.get(&url).await?;
                list.keys
                    .into_iter()
                    .map(Named::label)
                    .map(|(remote_id, label)| ManagedResource::Credential { remote_id, label })
                    .collect()
            }
            ResourceKind::VoiceApp => {
                let list: ApplicationList = self.get(&url).await?;
                list.applications
                    .into_iter()
                    .map(|app| ManagedResource::VoiceApp {
                        remote_id: app.sid,
                        label: app.friendly_name.unwrap_or_default(),
                        voice_url: app.voice_url,
                    })
                    .collect()
            }
            ResourceKind::CallHistoryStore
            | ResourceKind::Conversation
            | ResourceKind::WebhookBackend => {
                let list: ServiceList = self.get(&url).await?;
                list.services
                    .into_iter()
                    .map(Named::label)
                    .map(|(remote_id, label)| match kind {
                        ResourceKind::CallHistoryStore => {
                            ManagedResource::CallHistoryStore { remote_id, label }
                        }
                        ResourceKind::Conversation => ManagedResource::Conversation {
                            service_id: remote_id,
                            label,
                            conversation_id: None,
                        },
                        _ => ManagedResource::WebhookBackend {
                            remote_id,
                            label,
                            domain: None,
                        },
                    })
                    .collect()
            }
        };
        Ok(resources)
    }

    async fn remove(&self, resource: &ManagedResource) -> RemoteResult<()> {
        self.delete(&self.resource_url(resource)).await
    }

    async fn create_credential(&self, label: &str) -> RemoteResult<MintedCredential> {
        let key: NewKey = self
            .post(&self.account_url("/Keys.json"), &[("FriendlyName", label)])
            .await?;
        Ok(MintedCredential {
            resource: ManagedResource::Credential {
                remote_id: key.sid,
                label: key.friendly_name.unwrap_or_else(|| label.to_string()),
            },
            secret: key.secret,
        })
    }

    async fn create_call_history_store(&self, label: &str) -> RemoteResult<ManagedResource> {
        let url = self.kind_url(ResourceKind::CallHistoryStore);
        let (remote_id, label) = self
            .post::<Named>(&url, &[("FriendlyName", label)])
            .await?
            .label();
        Ok(ManagedResource::CallHistoryStore { remote_id, label })
    }

    async fn create_conversation_service(&self, label: &str) -> RemoteResult<ManagedResource> {
        let url = self.kind_url(ResourceKind::Conversation);
        let (service_id, label) = self
            .post::<Named>(&url, &[("FriendlyName", label)])
            .await?
            .label();
        Ok(ManagedResource::Conversation {
            service_id,
            label,
            conversation_id: None,
        })
    }

    async fn create_conversation(&self, service_id: &str, label: &str) -> RemoteResult<String> {
        let url = format!(
            "{}/v1/Services/{service_id}/Conversations",
            self.endpoints.conversations
        );
        let conversation: Named = self
            .post(&url, &[("FriendlyName", label), ("UniqueName", label)])
            .await?;
        Ok(conversation.sid)
    }

    async fn add_participant(
        &self,
        service_id: &str,
        conversation_id: &str,
        identity: &str,
    ) -> RemoteResult<()> {
        let url = format!(
            "{}/v1/Services/{service_id}/Conversations/{conversation_id}/Participants",
            self.endpoints.conversations
        );
        let _: serde_json::Value = self.post(&url, &[("Identity", identity)]).await?;
        Ok(())
    }

    async fn deploy_backend(
        &self,
        label: &str,
        environment: &BTreeMap<String, String>,
    ) -> RemoteResult<BackendDeployment> {
        let base = format!("{}/v1/Services", self.endpoints.serverless);
        let mut events = Vec::new();

        let service: Named = self
            .post(
                &base,
                &[
                    ("UniqueName", label),
                    ("FriendlyName", label),
                    ("IncludeCredentials", "true"),
                ],
            )
            .await?;
        events.push(format!("created service {}", service.sid));

        let env: Environment = self
            .post(
                &format!("{base}/{}/Environments", service.sid),
                &[("UniqueName", "dev"), ("DomainSuffix", "dev")],
            )
            .await?;
        events.push(format!("created environment {} at {}", env.sid, env.domain_name));

        let variables_url = format!("{base}/{}/Environments/{}/Variables", service.sid, env.sid);
        for (key, value) in environment {
            let _: serde_json::Value = self
                .post(&variables_url, &[("Key", key.as_str()), ("Value", value.as_str())])
                .await?;
        }
        events.push(format!("set {} environment variables", environment.len()));

        let build: Build = self
            .post(&format!("{base}/{}/Builds", service.sid), &[])
            .await?;
        events.push(format!("started build {}", build.sid));
        self.wait_for_build(&service.sid, &build.sid).await?;
        events.push(format!("build {} completed", build.sid));

        let deployment: Deployment = self
            .post(
                &format!("{base}/{}/Environments/{}/Deployments", service.sid, env.sid),
                &[("BuildSid", build.sid.as_str())],
            )
            .await?;
        events.push(format!("deployed {} to {}", deployment.sid, env.domain_name));

        let (remote_id, label) = service.label();
        Ok(BackendDeployment {
            backend: ManagedResource::WebhookBackend {
                remote_id,
                label,
                domain: Some(env.domain_name),
            },
            events,
        })
    }

    async fn create_voice_app(
        &self,
        label: &str,
        voice_url: &str,
    ) -> RemoteResult<ManagedResource> {
        let app: Application = self
            .post(
                &self.account_url("/Applications.json"),
                &[
                    ("FriendlyName", label),
                    ("VoiceUrl", voice_url),
                    ("VoiceMethod", "POST"),
                ],
            )
            .await?;
        Ok(ManagedResource::VoiceApp {
            remote_id: app.sid,
            label: app.friendly_name.unwrap_or_else(|| label.to_string()),
            voice_url: app.voice_url.or_else(|| Some(voice_url.to_string())),
        })
    }

    async fn list_phone_numbers(&self) -> RemoteResult<Vec<PhoneNumber>> {
        let list: IncomingNumberList = self
            .get(&self.account_url("/IncomingPhoneNumbers.json"))
            .await?;
        Ok(list
            .incoming_phone_numbers
            .into_iter()
            .map(PhoneNumber::from)
            .collect())
    }

    async fn update_phone_number(
        &self,
        sid: &str,
        urls: &WebhookUrls,
    ) -> RemoteResult<PhoneNumber> {
        let number: IncomingNumber = self
            .post(
                &self.account_url(&format!("/IncomingPhoneNumbers/{sid}.json")),
                &[
                    ("SmsUrl", urls.sms_url.as_str()),
                    ("VoiceUrl", urls.voice_url.as_str()),
                    ("StatusCallback", urls.status_callback.as_str()),
                ],
            )
            .await?;
        Ok(number.into())
    }

    async fn send_message(&self, message: &OutboundMessage) -> RemoteResult<serde_json::Value> {
        self.post(
            &self.account_url("/Messages.json"),
            &[
                ("From", message.from.as_str()),
                ("To", message.to.as_str()),
                ("Body", message.body.as_str()),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_from_prefers_provider_message() {
        let err = error_from(
            StatusCode::BAD_REQUEST,
            r#"{"code": 21211, "message": "Invalid 'To' Phone Number", "status": 400}"#,
        );
        assert_eq!(err.status, Some(400));
        assert_eq!(err.message, "Invalid 'To' Phone Number");
    }

    #[test]
    fn error_from_falls_back_to_status_text() {
        let err = error_from(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(err.status, Some(503));
        assert!(err.message.contains("503"));
    }

    #[test]
    fn incoming_numbers_default_missing_urls_to_empty() {
        let raw: IncomingNumber = serde_json::from_str(
            r#"{"sid": "PN1", "phone_number": "+15551234567", "sms_url": null}"#,
        )
        .unwrap();
        let number = PhoneNumber::from(raw);
        assert_eq!(number.sms_url, "");
        assert_eq!(number.voice_url, "");
        assert_eq!(number.friendly_name, "+15551234567");
    }

    #[test]
    fn resource_urls_follow_kind() {
        let profile = Profile {
            account_sid: "AC123".to_string(),
            auth_token: Some("token".to_string()),
            ..Default::default()
        };
        let api = HttpTelephonyApi::new(
            &profile,
            Endpoints::single("http://stub"),
            Duration::from_secs(1),
        )
        .unwrap();

        let key = ManagedResource::Credential {
            remote_id: "SK1".to_string(),
            label: "dev-phone-aaaaaaaaaaaa".to_string(),
        };
        assert_eq!(
            api.resource_url(&key),
            "http://stub/2010-04-01/Accounts/AC123/Keys/SK1.json"
        );

        let store = ManagedResource::CallHistoryStore {
            remote_id: "IS1".to_string(),
            label: "dev-phone-aaaaaaaaaaaa".to_string(),
        };
        assert_eq!(api.resource_url(&store), "http://stub/v1/Services/IS1");
    }
}
