use serde::{Deserialize, Serialize};

/// A phone number as reported by the remote account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumber {
    pub sid: String,
    pub phone_number: String,
    pub friendly_name: String,
    #[serde(default)]
    pub sms_url: String,
    #[serde(default)]
    pub voice_url: String,
    #[serde(default)]
    pub status_callback: String,
}

impl PhoneNumber {
    /// Webhook URLs currently configured on this number.
    pub fn urls(&self) -> WebhookUrls {
        WebhookUrls {
            sms_url: self.sms_url.clone(),
            voice_url: self.voice_url.clone(),
            status_callback: self.status_callback.clone(),
        }
    }

    /// Which of the inbound webhooks are already set.
    pub fn configured_fields(&self) -> Vec<WebhookField> {
        let mut fields = Vec::new();
        if !self.sms_url.is_empty() {
            fields.push(WebhookField::Sms);
        }
        if !self.voice_url.is_empty() {
            fields.push(WebhookField::Voice);
        }
        fields
    }

    /// Whether either inbound webhook points at a backend whose host name
    /// starts with `prefix`.
    ///
    /// Deployed backend domains begin with the backend's unique name, which is
    /// its session label, so this finds numbers bound by a session.
    pub fn points_at_prefix(&self, prefix: &str) -> bool {
        [&self.sms_url, &self.voice_url]
            .iter()
            .filter_map(|url| url_host(url))
            .any(|host| host.starts_with(prefix))
    }
}

fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    rest.split(['/', ':', '?']).next()
}

/// Webhook fields that make a number count as "already configured".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookField {
    Sms,
    Voice,
}

impl std::fmt::Display for WebhookField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sms => f.write_str("SMS webhook"),
            Self::Voice => f.write_str("Voice webhook"),
        }
    }
}

/// The three URLs the provider calls for inbound events on a number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookUrls {
    pub sms_url: String,
    pub voice_url: String,
    pub status_callback: String,
}

impl WebhookUrls {
    /// URLs served by a backend deployed at `domain`.
    pub fn for_domain(domain: &str) -> Self {
        Self {
            sms_url: format!("https://{domain}/incoming-message"),
            voice_url: format!("https://{domain}/incoming-call"),
            status_callback: format!("https://{domain}/message-status"),
        }
    }

    /// All fields cleared.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sms_url.is_empty() && self.voice_url.is_empty() && self.status_callback.is_empty()
    }
}

/// Voice URL a voice app uses to hand outbound calls to the backend.
pub fn outbound_call_url(domain: &str) -> String {
    format!("https://{domain}/outbound-call")
}

/// Webhook configuration this session placed on a phone number.
///
/// The `prior_*` fields hold whatever was configured before binding. They are
/// empty unless the bind was forced over an existing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumberBinding {
    pub sid: String,
    pub phone_number: String,
    pub friendly_name: String,
    pub prior_sms_url: String,
    pub prior_voice_url: String,
    pub prior_status_callback: String,
    pub urls: WebhookUrls,
}

impl PhoneNumberBinding {
    /// Record a binding of `urls` onto `number`, capturing its prior state.
    pub fn capture(number: &PhoneNumber, urls: WebhookUrls) -> Self {
        Self {
            sid: number.sid.clone(),
            phone_number: number.phone_number.clone(),
            friendly_name: number.friendly_name.clone(),
            prior_sms_url: number.sms_url.clone(),
            prior_voice_url: number.voice_url.clone(),
            prior_status_callback: number.status_callback.clone(),
            urls,
        }
    }

    /// Configuration that was overwritten by this binding.
    pub fn prior_urls(&self) -> WebhookUrls {
        WebhookUrls {
            sms_url: self.prior_sms_url.clone(),
            voice_url: self.prior_voice_url.clone(),
            status_callback: self.prior_status_callback.clone(),
        }
    }
}
