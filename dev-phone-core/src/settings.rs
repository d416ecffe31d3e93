use serde::{Deserialize, Serialize};

use super::binding::PhoneNumberBinding;

/// Read model served to the local UI.
///
/// Assembled on request from the controller's cached state; never a source
/// of truth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSettings {
    pub dev_phone_name: String,
    pub account_sid: String,
    pub phone_number: Option<PhoneNumberBinding>,
    pub conversation_service_sid: Option<String>,
    pub conversation_sid: Option<String>,
    pub call_history_store_sid: Option<String>,
    pub voice_app_sid: Option<String>,
    pub serverless_domain: Option<String>,
}
