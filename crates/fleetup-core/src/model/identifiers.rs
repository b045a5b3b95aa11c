// crates/fleetup-core/src/model/identifiers.rs
// ============================================================================
// Module: Fleetup Identifiers
// Description: Canonical opaque identifiers for artifacts, deployments, and devices.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout Fleetup.
//! Row identities (artifacts, deployments, device-deployments) are UUIDv4
//! and serialize as their hyphenated string form. Device and tenant
//! identifiers are opaque strings supplied by the upstream gateway and the
//! inventory service; the core applies no normalization to them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// SECTION: Row Identifiers
// ============================================================================

/// Declares a UUIDv4-backed identifier newtype.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID value.
            #[must_use]
            pub const fn from_uuid(value: Uuid) -> Self {
                Self(value)
            }

            /// Returns the underlying UUID value.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parses the identifier from its hyphenated string form.
            #[must_use]
            pub fn parse(value: &str) -> Option<Self> {
                Uuid::parse_str(value).ok().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id! {
    /// Artifact row identifier.
    ///
    /// # Invariants
    /// - UUIDv4; serializes as the hyphenated string form.
    ArtifactId
}

uuid_id! {
    /// Deployment row identifier.
    ///
    /// # Invariants
    /// - UUIDv4; serializes as the hyphenated string form.
    DeploymentId
}

uuid_id! {
    /// Device-deployment row identifier.
    ///
    /// # Invariants
    /// - UUIDv4; serializes as the hyphenated string form.
    DeviceDeploymentId
}

// ============================================================================
// SECTION: Opaque Identifiers
// ============================================================================

/// Device identifier assigned by the device-auth/inventory services.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a new device identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Tenant identifier attached by the upstream gateway.
///
/// # Invariants
/// - The empty string denotes the default (single-tenant) tenant; object
///   keys omit the tenant path segment for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant identifier from a gateway-supplied value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the default (single-tenant) tenant.
    #[must_use]
    pub fn default_tenant() -> Self {
        Self(String::new())
    }

    /// Returns true for the default (single-tenant) tenant.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Request identifier used for log correlation.
///
/// # Invariants
/// - Opaque UTF-8 string from the `X-MEN-RequestID` header, or generated
///   when the gateway omits it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a request identifier from a header value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random request identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::ArtifactId;
    use super::TenantId;

    #[test]
    fn artifact_id_round_trips_through_string() {
        let id = ArtifactId::random();
        let parsed = ArtifactId::parse(&id.to_string()).expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn artifact_id_rejects_malformed_input() {
        assert!(ArtifactId::parse("not-a-uuid").is_none());
    }

    #[test]
    fn default_tenant_is_empty() {
        assert!(TenantId::default_tenant().is_default());
        assert!(!TenantId::new("acme").is_default());
    }
}
