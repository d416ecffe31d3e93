use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::resource::LabelFilter;

/// Label prefix shared by every session. Used by the family sweep.
pub const FAMILY_PREFIX: &str = "dev-phone-";

/// Length of the random suffix appended to [`FAMILY_PREFIX`].
///
/// Fixed-length suffixes keep one session name from being a prefix of
/// another, so a session-scoped label match never reaches a sibling session.
pub const SUFFIX_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionNameError {
    #[error("session name must start with 'dev-phone-': {0}")]
    MissingPrefix(String),
    #[error("session name suffix must be 12 lowercase hex characters: {0}")]
    BadSuffix(String),
}

/// One run of the orchestrator.
///
/// The name is stable for the process lifetime and is the only link between
/// the process and the remote resources it owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Generate a fresh `dev-phone-<suffix>` session.
    pub fn generate() -> Self {
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(SUFFIX_LEN)
            .collect();
        Self {
            name: format!("{FAMILY_PREFIX}{suffix}"),
            created_at: Utc::now(),
        }
    }

    /// Reuse an existing session identity, e.g. to clean up after a crash.
    pub fn with_name(name: impl Into<String>) -> Result<Self, SessionNameError> {
        let name = name.into();
        let suffix = name
            .strip_prefix(FAMILY_PREFIX)
            .ok_or_else(|| SessionNameError::MissingPrefix(name.clone()))?;
        let valid = suffix.len() == SUFFIX_LEN
            && suffix
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !valid {
            return Err(SessionNameError::BadSuffix(name));
        }
        Ok(Self {
            name,
            created_at: Utc::now(),
        })
    }

    /// Filter matching only this session's resources.
    pub fn filter(&self) -> LabelFilter {
        LabelFilter::Session(self.name.clone())
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_carry_family_prefix() {
        let session = Session::generate();
        assert!(session.name.starts_with(FAMILY_PREFIX));
        assert_eq!(session.name.len(), FAMILY_PREFIX.len() + SUFFIX_LEN);
    }

    #[test]
    fn generated_names_are_unique() {
        let a = Session::generate();
        let b = Session::generate();
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn generated_names_round_trip_through_with_name() {
        let generated = Session::generate();
        let reused = Session::with_name(generated.name.clone()).unwrap();
        assert_eq!(reused.name, generated.name);
    }

    #[test]
    fn with_name_rejects_foreign_prefix() {
        assert_eq!(
            Session::with_name("my-phone-0123456789ab"),
            Err(SessionNameError::MissingPrefix(
                "my-phone-0123456789ab".to_string()
            ))
        );
    }

    #[test]
    fn with_name_rejects_short_suffix() {
        assert!(matches!(
            Session::with_name("dev-phone-abc"),
            Err(SessionNameError::BadSuffix(_))
        ));
    }
}
