// crates/fleetup-core/src/ports/object_store.rs
// ============================================================================
// Module: Object Store Port
// Description: Blob upload/download/presign/delete operations for artifacts.
// Purpose: Abstract the storage backend behind a tenant-scoped capability set.
// Dependencies: async-trait, serde, thiserror, time, tokio
// ============================================================================

//! ## Overview
//! The object store port moves opaque artifact blobs. Keys are derived from
//! the tenant and the artifact id; single-tenant installations omit the
//! tenant segment. Presigned URLs are bounded to the 1 minute..7 day TTL
//! window. `put` consumes a streaming reader of unknown final length;
//! implementations pick single-part or multipart internally.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::io::AsyncRead;

use crate::model::artifact::Artifact;
use crate::model::identifiers::ArtifactId;
use crate::model::identifiers::TenantId;
use crate::scope::RequestScope;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimum accepted presign TTL.
pub const MIN_PRESIGN_TTL: Duration = Duration::from_secs(60);
/// Maximum accepted presign TTL.
pub const MAX_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Object store errors.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),
    /// Presign TTL outside the accepted window.
    #[error("invalid presign duration: {0:?}")]
    InvalidDuration(Duration),
    /// Tenant storage quota exhausted.
    #[error("storage quota exceeded")]
    QuotaExceeded,
    /// Backend rejected or failed the operation.
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    /// Local I/O failure while streaming.
    #[error("object store io error: {0}")]
    Io(String),
}

/// Validates a presign TTL against the accepted window.
///
/// # Errors
///
/// Returns [`ObjectStoreError::InvalidDuration`] outside 1 minute..7 days.
pub fn validate_presign_ttl(ttl: Duration) -> Result<(), ObjectStoreError> {
    if ttl < MIN_PRESIGN_TTL || ttl > MAX_PRESIGN_TTL {
        return Err(ObjectStoreError::InvalidDuration(ttl));
    }
    Ok(())
}

// ============================================================================
// SECTION: Keys
// ============================================================================

/// Tenant-scoped object key of an artifact blob.
///
/// # Invariants
/// - `<tenant>/<artifact-id>` for named tenants; `<artifact-id>` for the
///   default tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Derives the key for an artifact blob.
    #[must_use]
    pub fn for_artifact(tenant: &TenantId, artifact_id: ArtifactId) -> Self {
        if tenant.is_default() {
            Self(artifact_id.to_string())
        } else {
            Self(format!("{tenant}/{artifact_id}"))
        }
    }

    /// Wraps a raw key previously produced by [`ObjectKey::for_artifact`].
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Result Types
// ============================================================================

/// Boxed streaming reader handed to and returned by the port.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Metadata of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: OffsetDateTime,
}

/// A vended time-limited download link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    /// The signed URL.
    pub uri: String,
    /// Absolute expiry of the link.
    #[serde(with = "time::serde::rfc3339")]
    pub expire: OffsetDateTime,
}

/// A presigned direct-upload request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedRequest {
    /// The signed URL the client must PUT to.
    pub uri: String,
    /// Absolute expiry of the link.
    #[serde(with = "time::serde::rfc3339")]
    pub expire: OffsetDateTime,
    /// Headers the client is required to send.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

// ============================================================================
// SECTION: Port
// ============================================================================

/// Tenant-scoped blob storage capability set.
///
/// All operations honour cancellation by future drop. Every operation is
/// idempotent on retry except `put`, which must be fully re-run.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Streams an object of unknown final length into storage.
    ///
    /// Returns the number of bytes committed.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError`] when the upload cannot be committed.
    async fn put(
        &self,
        scope: &RequestScope,
        key: &ObjectKey,
        reader: ObjectReader,
    ) -> Result<u64, ObjectStoreError>;

    /// Opens a streaming reader over a stored object.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::NotFound`] when the object is missing.
    async fn get(
        &self,
        scope: &RequestScope,
        key: &ObjectKey,
    ) -> Result<(ObjectReader, u64), ObjectStoreError>;

    /// Returns size and modification time of a stored object.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::NotFound`] when the object is missing.
    async fn stat(
        &self,
        scope: &RequestScope,
        key: &ObjectKey,
    ) -> Result<ObjectStat, ObjectStoreError>;

    /// Deletes a stored object; succeeds when already absent.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError`] on backend failure.
    async fn delete(&self, scope: &RequestScope, key: &ObjectKey)
    -> Result<(), ObjectStoreError>;

    /// Vends a presigned GET URL.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::InvalidDuration`] outside the TTL window.
    async fn presign_get(
        &self,
        scope: &RequestScope,
        key: &ObjectKey,
        ttl: Duration,
        content_disposition: Option<&str>,
    ) -> Result<DownloadLink, ObjectStoreError>;

    /// Vends a presigned PUT URL for direct client upload.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::InvalidDuration`] outside the TTL window.
    async fn presign_put(
        &self,
        scope: &RequestScope,
        key: &ObjectKey,
        ttl: Duration,
    ) -> Result<PresignedRequest, ObjectStoreError>;

    /// Vends a presigned DELETE URL.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::InvalidDuration`] outside the TTL window.
    async fn presign_delete(
        &self,
        scope: &RequestScope,
        key: &ObjectKey,
        ttl: Duration,
    ) -> Result<DownloadLink, ObjectStoreError>;

    /// Probes backend reachability.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::Unavailable`] when the backend is down.
    async fn health_check(&self) -> Result<(), ObjectStoreError>;
}

// ============================================================================
// SECTION: Download URL Vendor
// ============================================================================

/// Produces device-facing download links for artifact blobs.
///
/// Implementations either pass the backend-signed URL through or wrap it
/// behind a gateway-relayed HMAC URL.
#[async_trait]
pub trait DownloadUrlVendor: Send + Sync {
    /// Vends a download link for the given artifact.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError`] when the link cannot be produced.
    async fn download_url(
        &self,
        scope: &RequestScope,
        artifact: &Artifact,
        ttl: Duration,
    ) -> Result<DownloadLink, ObjectStoreError>;
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ObjectKey;
    use super::validate_presign_ttl;
    use crate::model::identifiers::ArtifactId;
    use crate::model::identifiers::TenantId;

    #[test]
    fn ttl_bounds_are_inclusive() {
        assert!(validate_presign_ttl(Duration::from_secs(60)).is_ok());
        assert!(validate_presign_ttl(Duration::from_secs(7 * 24 * 3600)).is_ok());
        assert!(validate_presign_ttl(Duration::from_secs(59)).is_err());
        assert!(validate_presign_ttl(Duration::from_secs(7 * 24 * 3600 + 1)).is_err());
    }

    #[test]
    fn keys_prefix_named_tenants_only() {
        let artifact = ArtifactId::random();
        let default_key = ObjectKey::for_artifact(&TenantId::default_tenant(), artifact);
        assert_eq!(default_key.as_str(), artifact.to_string());
        let tenant_key = ObjectKey::for_artifact(&TenantId::new("acme"), artifact);
        assert_eq!(tenant_key.as_str(), format!("acme/{artifact}"));
    }
}
