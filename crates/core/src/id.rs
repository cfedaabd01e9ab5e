//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Prefix carried by every provisional (client-issued) item identifier.
pub const PROVISIONAL_ID_PREFIX: &str = "temp-";

/// Identifier of an organization (multi-tenant boundary).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(Uuid);

/// Identifier of a registered external sync provider.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(Uuid);

/// Identifier of a persisted sync conflict.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

/// Identifier of a stored work-order template.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(OrganizationId, "OrganizationId");
impl_uuid_newtype!(ProviderId, "ProviderId");
impl_uuid_newtype!(ConflictId, "ConflictId");
impl_uuid_newtype!(TemplateId, "TemplateId");

/// Identifier of an item inside a tracked collection.
///
/// Server-issued identifiers are opaque strings (`"mat_991"`). Identifiers
/// minted on the client before the remote call returns start with
/// [`PROVISIONAL_ID_PREFIX`] and are never accepted from a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Wrap a server-issued identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build a provisional identifier from a generator-supplied suffix.
    pub fn provisional(suffix: impl core::fmt::Display) -> Self {
        Self(format!("{PROVISIONAL_ID_PREFIX}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id was minted locally and still awaits a permanent one.
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_ID_PREFIX)
    }

    /// Accept an identifier returned by a remote collaborator.
    ///
    /// Empty ids and ids in the provisional namespace are rejected so a
    /// confirmed snapshot can never contain a `temp-` id.
    pub fn parse_authoritative(raw: &str) -> Result<Self, DomainError> {
        if raw.trim().is_empty() {
            return Err(DomainError::invalid_id("ItemId: empty"));
        }
        if raw.starts_with(PROVISIONAL_ID_PREFIX) {
            return Err(DomainError::invalid_id(format!(
                "ItemId: '{raw}' uses the provisional prefix"
            )));
        }
        Ok(Self(raw.to_string()))
    }
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Scope identifier for a tracked collection (e.g. `"work-order-42-materials"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisional_ids_are_recognised() {
        let id = ItemId::provisional(7);
        assert_eq!(id.as_str(), "temp-7");
        assert!(id.is_provisional());
        assert!(!ItemId::new("mat_991").is_provisional());
    }

    #[test]
    fn authoritative_ids_reject_provisional_namespace() {
        assert!(ItemId::parse_authoritative("mat_991").is_ok());
        assert!(matches!(
            ItemId::parse_authoritative("temp-3"),
            Err(DomainError::InvalidId(_))
        ));
        assert!(ItemId::parse_authoritative("  ").is_err());
    }

    #[test]
    fn uuid_newtypes_round_trip_through_strings() {
        let id = ProviderId::new();
        let parsed: ProviderId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<OrganizationId>().is_err());
    }
}
