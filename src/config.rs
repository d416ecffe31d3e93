//! Runtime configuration: provider profile, listening address, timeouts.
//!
//! Environment variables:
//! - `DEV_PHONE_PORT` - Gateway port (default: 1337, `--port` wins)
//! - `DEV_PHONE_TIMEOUT_SECS` - Per-request timeout for remote calls (default: 30)
//! - `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_API_KEY`,
//!   `TWILIO_API_SECRET` - Provider credentials
//!
//! Without credentials in the environment, the active profile of the
//! provider CLI (`~/.twilio-cli/config.json`) is used.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default Gateway port.
pub const DEFAULT_PORT: u16 = 1337;

/// Default per-request timeout for remote calls.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Identifier prefix of long-lived API keys.
pub const API_KEY_PREFIX: &str = "SK";

/// Provider account and credentials.
#[derive(Clone, Default)]
pub struct Profile {
    /// Profile name in the CLI config, if loaded from there.
    pub name: Option<String>,
    pub account_sid: String,
    pub auth_token: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("account_sid", &self.account_sid)
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

/// A stored API key that can sign tokens without minting a new one.
#[derive(Clone)]
pub struct StoredCredential {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliConfig {
    #[serde(default)]
    profiles: HashMap<String, CliProfile>,
    #[serde(default)]
    active_project: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliProfile {
    account_sid: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    api_secret: Option<String>,
}

impl Profile {
    /// Load from the environment, falling back to the CLI config file.
    pub fn load() -> Result<Self> {
        if let Some(profile) = Self::from_env() {
            return Ok(profile);
        }
        let path = Self::default_cli_config_path().ok_or_else(|| {
            Error::Config("no credentials in environment and no home directory".to_string())
        })?;
        Self::from_cli_config(&path)
    }

    pub fn from_env() -> Option<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a profile from a variable lookup. Requires an account SID and
    /// either an auth token or an API key/secret pair.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let account_sid = lookup("TWILIO_ACCOUNT_SID")?;
        let profile = Self {
            name: None,
            account_sid,
            auth_token: lookup("TWILIO_AUTH_TOKEN"),
            api_key: lookup("TWILIO_API_KEY"),
            api_secret: lookup("TWILIO_API_SECRET"),
        };
        profile.basic_auth().map(|_| profile)
    }

    pub fn default_cli_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".twilio-cli").join("config.json"))
    }

    /// Read the active profile from a provider CLI config file.
    pub fn from_cli_config(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: CliConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;

        let name = match config.active_project.take() {
            Some(name) => name,
            None if config.profiles.len() == 1 => {
                config.profiles.keys().next().cloned().unwrap_or_default()
            }
            None => {
                return Err(Error::Config(
                    "no active profile; set one with the provider CLI".to_string(),
                ))
            }
        };
        let profile = config
            .profiles
            .remove(&name)
            .ok_or_else(|| Error::Config(format!("active profile '{name}' not found")))?;

        let profile = Self {
            name: Some(name),
            account_sid: profile.account_sid,
            auth_token: None,
            api_key: profile.api_key,
            api_secret: profile.api_secret,
        };
        if profile.basic_auth().is_none() {
            return Err(Error::Config(format!(
                "profile '{}' has no API secret; set TWILIO_API_SECRET",
                profile.name.as_deref().unwrap_or_default()
            )));
        }
        Ok(profile)
    }

    /// Username and password for HTTP basic auth.
    pub fn basic_auth(&self) -> Option<(String, String)> {
        match (&self.api_key, &self.api_secret, &self.auth_token) {
            (Some(key), Some(secret), _) => Some((key.clone(), secret.clone())),
            (_, _, Some(token)) => Some((self.account_sid.clone(), token.clone())),
            _ => None,
        }
    }

    /// The profile's own API key, if it is a long-lived one usable for
    /// signing.
    pub fn stored_credential(&self) -> Option<StoredCredential> {
        match (&self.api_key, &self.api_secret) {
            (Some(id), Some(secret)) if id.starts_with(API_KEY_PREFIX) => Some(StoredCredential {
                id: id.clone(),
                secret: secret.clone(),
            }),
            _ => None,
        }
    }
}

/// Pick the Gateway port: CLI flag, then `DEV_PHONE_PORT`, then the default.
pub fn resolve_port(cli: Option<u16>, env: Option<&str>) -> u16 {
    cli.or_else(|| env.and_then(|v| v.trim().parse().ok()))
        .unwrap_or(DEFAULT_PORT)
}

/// Per-request timeout for remote calls.
pub fn request_timeout() -> Duration {
    let secs = std::env::var("DEV_PHONE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}
