//! Strongly-typed identifiers and keys used across the pipeline.
//!
//! Job ids and object keys travel on the wire as plain strings, so both are
//! string newtypes that reject empty values at every construction site
//! (including deserialization).

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a job, stable across every redelivery of that job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

/// Reference into the object store. Opaque: no hierarchy is assumed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

macro_rules! impl_string_newtype {
    ($t:ident, $name:literal, $err:path) => {
        impl $t {
            /// Validate and wrap a string value.
            pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err($err(format!("{}: must not be empty", $name)));
                }
                if value.contains('\0') {
                    return Err($err(format!("{}: must not contain NUL", $name)));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl TryFrom<&str> for $t {
            type Error = DomainError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_string_newtype!(JobId, "JobId", DomainError::InvalidId);
impl_string_newtype!(ObjectKey, "ObjectKey", DomainError::InvalidKey);

impl JobId {
    /// Generate a fresh identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing ids explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// Token identifying one specific delivery (lease) of a job.
///
/// A redelivery of the same job always gets a new token, which is how stale
/// handles are told apart from the live one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryToken(Uuid);

impl DeliveryToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeliveryToken {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for DeliveryToken {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::invalid_id(format!("DeliveryToken: {e}")))?;
        Ok(Self(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_rejects_empty_values() {
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("   ").is_err());
        assert_eq!(JobId::parse("a1").unwrap().as_str(), "a1");
    }

    #[test]
    fn generated_job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn object_key_round_trips_through_json_as_plain_string() {
        let key = ObjectKey::parse("in/a1.png").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"in/a1.png\"");
        let back: ObjectKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn deserializing_empty_key_fails() {
        let err = serde_json::from_str::<ObjectKey>("\"\"");
        assert!(err.is_err());
    }

    #[test]
    fn validation_failures_name_the_offending_kind() {
        assert!(matches!(ObjectKey::parse(""), Err(DomainError::InvalidKey(_))));
        assert!(matches!(JobId::parse("a\0b"), Err(DomainError::InvalidId(_))));
        assert!(matches!(
            "not-a-uuid".parse::<DeliveryToken>(),
            Err(DomainError::InvalidId(_))
        ));
    }

    #[test]
    fn delivery_token_parses_its_display_form() {
        let token = DeliveryToken::new();
        let parsed: DeliveryToken = token.to_string().parse().unwrap();
        assert_eq!(parsed, token);
    }

    proptest::proptest! {
        #[test]
        fn parsed_keys_display_as_given(raw in "[a-z0-9/._-]{0,8}[a-z0-9][a-z0-9/._-]{0,8}") {
            let key = ObjectKey::parse(raw.clone()).unwrap();
            proptest::prop_assert_eq!(key.to_string(), raw.clone());
            proptest::prop_assert_eq!(key.into_inner(), raw);
        }

        #[test]
        fn whitespace_only_ids_are_rejected(raw in "[ \t\n]{0,6}") {
            proptest::prop_assert!(JobId::parse(raw).is_err());
        }
    }
}
