//! Obtaining the credential that signs session tokens.

use dev_phone_core::ResourceKind;
use tracing::info;

use crate::config::Profile;
use crate::error::Result;
use crate::provisioner::Provisioner;
use crate::token::SigningCredential;

/// Reuse the profile's own API key if it has one, otherwise mint a key
/// labeled with the session name.
///
/// Minting first removes any key the same session minted earlier, so a
/// session never holds more than one live key.
pub async fn obtain_credential(
    provisioner: &Provisioner,
    account_sid: &str,
    profile: &Profile,
) -> Result<SigningCredential> {
    if let Some(stored) = profile.stored_credential() {
        info!(key = %stored.id, "Reusing API key from profile");
        return Ok(SigningCredential::new(
            account_sid,
            stored.id,
            stored.secret,
            None,
        ));
    }

    let label = provisioner.session().name.clone();
    let minted = provisioner
        .ensure_fresh(ResourceKind::Credential, || {
            provisioner.api().create_credential(&label)
        })
        .await?;
    let key_id = minted.resource.remote_id().to_string();
    info!(key = %key_id, "Minted API key for session");
    Ok(SigningCredential::new(
        account_sid,
        key_id,
        minted.secret,
        Some(minted.resource),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{InMemoryTelephonyApi, TelephonyApi};
    use dev_phone_core::{ManagedResource, Session};
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryTelephonyApi>, Provisioner) {
        let api = Arc::new(InMemoryTelephonyApi::new());
        let provisioner = Provisioner::new(api.clone(), Session::generate());
        (api, provisioner)
    }

    #[tokio::test]
    async fn reuses_profile_api_key_without_remote_calls() {
        let (api, provisioner) = setup();
        let profile = Profile {
            account_sid: api.account_sid().to_string(),
            api_key: Some("SK_profile".to_string()),
            api_secret: Some("secret".to_string()),
            ..Default::default()
        };

        let credential = obtain_credential(&provisioner, api.account_sid(), &profile)
            .await
            .unwrap();

        assert_eq!(credential.key_id, "SK_profile");
        assert!(credential.minted.is_none());
        assert!(api.resources().is_empty());
    }

    #[tokio::test]
    async fn mints_one_key_per_session() {
        let (api, provisioner) = setup();
        let profile = Profile {
            account_sid: api.account_sid().to_string(),
            auth_token: Some("token".to_string()),
            ..Default::default()
        };
        api.seed(ManagedResource::Credential {
            remote_id: "SK_stale".to_string(),
            label: provisioner.session().name.clone(),
        });

        let credential = obtain_credential(&provisioner, api.account_sid(), &profile)
            .await
            .unwrap();

        let keys = api.resources_labeled(&provisioner.session().name);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].remote_id(), credential.key_id);
        assert_ne!(credential.key_id, "SK_stale");
        assert!(credential.minted.is_some());
    }
}
