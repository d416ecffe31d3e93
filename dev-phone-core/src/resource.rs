use serde::{Deserialize, Serialize};

use super::session::FAMILY_PREFIX;

/// Remote resource kinds owned by a session.
///
/// Phone numbers are not listed here: they are never created or removed,
/// only bound and unbound (see [`crate::PhoneNumberBinding`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// API key used to sign client tokens
    Credential,
    /// Sync service holding call history
    CallHistoryStore,
    /// Conversations service plus the session's conversation
    Conversation,
    /// Serverless service handling inbound webhooks
    WebhookBackend,
    /// TwiML application routing outbound calls to the backend
    VoiceApp,
}

impl ResourceKind {
    /// Creation order. Later kinds embed identifiers of earlier ones.
    pub const PROVISION_ORDER: [ResourceKind; 5] = [
        ResourceKind::Credential,
        ResourceKind::CallHistoryStore,
        ResourceKind::Conversation,
        ResourceKind::WebhookBackend,
        ResourceKind::VoiceApp,
    ];

    /// Removal order: reverse of creation, so nothing outlives a dependency.
    pub fn teardown_order() -> impl Iterator<Item = ResourceKind> {
        Self::PROVISION_ORDER.into_iter().rev()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::CallHistoryStore => "call-history store",
            Self::Conversation => "conversation service",
            Self::WebhookBackend => "webhook backend",
            Self::VoiceApp => "voice app",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label matching rule used for discovery.
///
/// Matching is a case-sensitive prefix test on the remote friendly name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelFilter {
    /// Resources belonging to exactly one session.
    Session(String),
    /// Every resource any session ever created.
    Family,
}

impl LabelFilter {
    pub fn prefix(&self) -> &str {
        match self {
            Self::Session(name) => name,
            Self::Family => FAMILY_PREFIX,
        }
    }

    pub fn matches(&self, label: &str) -> bool {
        label.starts_with(self.prefix())
    }

    /// Keep only resources whose label matches.
    pub fn apply(&self, resources: Vec<ManagedResource>) -> Vec<ManagedResource> {
        resources
            .into_iter()
            .filter(|r| self.matches(r.label()))
            .collect()
    }
}

/// A remote resource owned by some session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManagedResource {
    Credential {
        remote_id: String,
        label: String,
    },
    CallHistoryStore {
        remote_id: String,
        label: String,
    },
    Conversation {
        service_id: String,
        label: String,
        /// Unknown when the service was discovered by listing.
        conversation_id: Option<String>,
    },
    WebhookBackend {
        remote_id: String,
        label: String,
        /// Unknown until an environment has been deployed.
        domain: Option<String>,
    },
    VoiceApp {
        remote_id: String,
        label: String,
        voice_url: Option<String>,
    },
}

impl ManagedResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Credential { .. } => ResourceKind::Credential,
            Self::CallHistoryStore { .. } => ResourceKind::CallHistoryStore,
            Self::Conversation { .. } => ResourceKind::Conversation,
            Self::WebhookBackend { .. } => ResourceKind::WebhookBackend,
            Self::VoiceApp { .. } => ResourceKind::VoiceApp,
        }
    }

    pub fn remote_id(&self) -> &str {
        match self {
            Self::Credential { remote_id, .. }
            | Self::CallHistoryStore { remote_id, .. }
            | Self::WebhookBackend { remote_id, .. }
            | Self::VoiceApp { remote_id, .. } => remote_id,
            Self::Conversation { service_id, .. } => service_id,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Credential { label, .. }
            | Self::CallHistoryStore { label, .. }
            | Self::Conversation { label, .. }
            | Self::WebhookBackend { label, .. }
            | Self::VoiceApp { label, .. } => label,
        }
    }

    /// Deployed domain, for webhook backends.
    pub fn domain(&self) -> Option<&str> {
        match self {
            Self::WebhookBackend { domain, .. } => domain.as_deref(),
            _ => None,
        }
    }

    /// Conversation id, for conversation services created this run.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::Conversation {
                conversation_id, ..
            } => conversation_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(label: &str) -> ManagedResource {
        ManagedResource::CallHistoryStore {
            remote_id: format!("IS-{label}"),
            label: label.to_string(),
        }
    }

    #[test]
    fn teardown_is_reverse_of_provisioning() {
        let teardown: Vec<_> = ResourceKind::teardown_order().collect();
        let mut expected = ResourceKind::PROVISION_ORDER.to_vec();
        expected.reverse();
        assert_eq!(teardown, expected);
    }

    #[test]
    fn backend_is_created_before_voice_app() {
        let order = ResourceKind::PROVISION_ORDER;
        let backend = order.iter().position(|k| *k == ResourceKind::WebhookBackend);
        let voice = order.iter().position(|k| *k == ResourceKind::VoiceApp);
        assert!(backend < voice);
    }

    #[test]
    fn session_filter_matches_only_its_own_labels() {
        let filter = LabelFilter::Session("dev-phone-aaaaaaaaaaaa".to_string());
        let kept = filter.apply(vec![
            store("dev-phone-aaaaaaaaaaaa"),
            store("dev-phone-bbbbbbbbbbbb"),
            store("production-sync"),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label(), "dev-phone-aaaaaaaaaaaa");
    }

    #[test]
    fn family_filter_matches_every_session() {
        let kept = LabelFilter::Family.apply(vec![
            store("dev-phone-aaaaaaaaaaaa"),
            store("dev-phone-bbbbbbbbbbbb"),
            store("production-sync"),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn label_matching_is_case_sensitive() {
        assert!(!LabelFilter::Family.matches("Dev-Phone-aaaaaaaaaaaa"));
    }

    #[test]
    fn conversation_remote_id_is_service_id() {
        let conversation = ManagedResource::Conversation {
            service_id: "IS123".to_string(),
            label: "dev-phone-aaaaaaaaaaaa".to_string(),
            conversation_id: Some("CH456".to_string()),
        };
        assert_eq!(conversation.remote_id(), "IS123");
        assert_eq!(conversation.conversation_id(), Some("CH456"));
        assert_eq!(conversation.kind(), ResourceKind::Conversation);
    }
}
