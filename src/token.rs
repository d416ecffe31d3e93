//! Session token issuance.
//!
//! Tokens are HS256 JWTs in the provider's access-token format: the issuer is
//! the API key, the subject the account, and `grants` carries the identity
//! plus one grant per resource.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dev_phone_core::{token_ttl, GrantTargets, ManagedResource, Session, SessionToken};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Key material used to sign session tokens.
///
/// The secret is never persisted or logged.
#[derive(Clone)]
pub struct SigningCredential {
    pub account_sid: String,
    pub key_id: String,
    secret: String,
    /// The remote key, when it was minted for this session.
    pub minted: Option<ManagedResource>,
}

impl std::fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredential")
            .field("account_sid", &self.account_sid)
            .field("key_id", &self.key_id)
            .field("minted", &self.minted.is_some())
            .finish_non_exhaustive()
    }
}

impl SigningCredential {
    pub fn new(
        account_sid: impl Into<String>,
        key_id: impl Into<String>,
        secret: impl Into<String>,
        minted: Option<ManagedResource>,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            key_id: key_id.into(),
            secret: secret.into(),
            minted,
        }
    }
}

/// Issue a token valid from now.
pub fn issue(
    session: &Session,
    credential: Option<&SigningCredential>,
    targets: &GrantTargets,
) -> Result<SessionToken> {
    issue_at(session, credential, targets, Utc::now())
}

/// Issue a token valid from `now` for [`token_ttl`].
pub fn issue_at(
    session: &Session,
    credential: Option<&SigningCredential>,
    targets: &GrantTargets,
    now: DateTime<Utc>,
) -> Result<SessionToken> {
    let credential =
        credential.ok_or_else(|| Error::Signing("no signing credential".to_string()))?;
    let missing = targets.missing();
    if !missing.is_empty() {
        return Err(Error::Signing(format!(
            "missing grant targets: {}",
            missing.join(", ")
        )));
    }

    let expires_at = now + token_ttl();
    let header = json!({
        "typ": "JWT",
        "alg": "HS256",
        "cty": "twilio-fpa;v=1",
    });
    let claims = json!({
        "jti": format!("{}-{}", credential.key_id, now.timestamp()),
        "iss": credential.key_id,
        "sub": credential.account_sid,
        "iat": now.timestamp(),
        "nbf": now.timestamp(),
        "exp": expires_at.timestamp(),
        "grants": {
            "identity": session.name,
            "chat": { "service_sid": targets.messaging },
            "voice": {
                "incoming": { "allow": true },
                "outgoing": { "application_sid": targets.voice },
            },
            "data_sync": { "service_sid": targets.call_history },
        },
    });

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );
    let signature = sign(&credential.secret, &signing_input)?;

    Ok(SessionToken {
        value: format!("{signing_input}.{signature}"),
        identity: session.name.clone(),
        issued_at: now,
        expires_at,
        grants: targets.clone(),
    })
}

fn sign(secret: &str, input: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Signing(format!("invalid signing key: {e}")))?;
    mac.update(input.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Decode the claims of a token without checking its signature.
pub fn decode_claims(token: &str) -> Option<serde_json::Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Check a token's signature against `secret`.
pub fn verify(token: &str, secret: &str) -> bool {
    match token.rsplit_once('.') {
        Some((input, signature)) => {
            let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
                return false;
            };
            mac.update(input.as_bytes());
            match URL_SAFE_NO_PAD.decode(signature) {
                Ok(sig) => mac.verify_slice(&sig).is_ok(),
                Err(_) => false,
            }
        }
        None => false,
    }
}
