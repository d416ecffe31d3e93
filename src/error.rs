//! Error taxonomy for provisioning, binding, signing and the gateway.

use axum::http::StatusCode;
use dev_phone_core::{ResourceKind, WebhookField};
use thiserror::Error;

/// A failed call to the remote telephony API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    /// HTTP status reported by the remote, if the call got that far.
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        let message = if e.is_timeout() {
            format!("request timed out: {e}")
        } else {
            e.to_string()
        };
        Self { status, message }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Remote create/list/remove failed for a session resource.
    #[error("failed to {action} {kind}: {source}")]
    Provision {
        kind: ResourceKind,
        action: &'static str,
        #[source]
        source: RemoteError,
    },

    /// Target phone number already has webhooks and force was not given.
    #[error("{phone_number} is already configured ({}); rerun with force to overwrite", join_fields(.configured))]
    Conflict {
        phone_number: String,
        configured: Vec<WebhookField>,
    },

    /// Phone number lookup matched zero or several numbers.
    #[error("expected exactly one phone number matching {phone_number}, found {matches}")]
    NotFound { phone_number: String, matches: usize },

    /// Token issuance attempted without credential or grant targets.
    #[error("cannot sign session token: {0}")]
    Signing(String),

    /// Any other remote failure (listing numbers, sending messages).
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Operation not allowed in the controller's current lifecycle state.
    #[error("{0}")]
    State(String),

    #[error("configuration error: {0}")]
    Config(String),
}

fn join_fields(fields: &[WebhookField]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    pub fn provision(kind: ResourceKind, action: &'static str, source: RemoteError) -> Self {
        Self::Provision {
            kind,
            action,
            source,
        }
    }

    /// Status reported by the remote, if this error came from one.
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            Self::Provision { source, .. } | Self::Remote(source) => source.status,
            _ => None,
        }
    }

    /// Status used for gateway responses: the remote's, or 400.
    pub fn status_code(&self) -> StatusCode {
        self.remote_status()
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::BAD_REQUEST)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_lists_configured_fields() {
        let err = Error::Conflict {
            phone_number: "+15551234567".to_string(),
            configured: vec![WebhookField::Sms, WebhookField::Voice],
        };
        let msg = err.to_string();
        assert!(msg.contains("SMS webhook, Voice webhook"), "{msg}");
    }

    #[test]
    fn status_code_prefers_remote_status() {
        let err = Error::Remote(RemoteError::new(Some(429), "slow down"));
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn status_code_defaults_to_bad_request() {
        let err = Error::NotFound {
            phone_number: "+1".to_string(),
            matches: 0,
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::Remote(RemoteError::new(None, "connection refused")).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
