// crates/fleetup-server/src/presign.rs
// ============================================================================
// Module: Presigned URL Vendor
// Description: Direct and gateway-wrapped download link vending.
// Purpose: Hide the storage backend behind HMAC-signed relay URLs.
// Dependencies: base64, hmac, rand, sha2
// ============================================================================

//! ## Overview
//! Two vending modes exist. Direct mode returns the backend-signed URL
//! as-is. Gateway mode returns an internal URL of the form
//! `/<api>/download/<signature>?key=…&tenant=…&expire=…` where the
//! signature is an HMAC-SHA256 over key, expiry, and tenant; a companion
//! endpoint validates the signature at request time and redirects to a
//! freshly backend-signed URL. The HMAC secret comes from configuration
//! or a CSPRNG at startup, and is read-only for the process lifetime.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::Hmac;
use hmac::Mac;
use rand::RngCore;
use sha2::Sha256;
use time::OffsetDateTime;

use fleetup_core::Artifact;
use fleetup_core::DownloadLink;
use fleetup_core::DownloadUrlVendor;
use fleetup_core::ObjectKey;
use fleetup_core::ObjectStore;
use fleetup_core::ObjectStoreError;
use fleetup_core::RequestScope;
use fleetup_core::validate_presign_ttl;

use crate::config::PresignConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Path prefix of the gateway-wrapped download endpoint.
pub const DOWNLOAD_PATH: &str = "/api/devices/v1/deployments/download";
/// Generated secret length in bytes.
const SECRET_BYTES: usize = 32;

/// HMAC type alias.
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gateway-wrapped link validation errors.
#[derive(Debug, thiserror::Error)]
pub enum RedeemError {
    /// The signature does not match the parameters.
    #[error("invalid download signature")]
    InvalidSignature,
    /// The link expired.
    #[error("download link expired")]
    Expired,
}

// ============================================================================
// SECTION: Vendor
// ============================================================================

/// Download URL vendor over an object store.
pub struct PresignVendor {
    /// Object store vending the backend-signed URLs.
    store: Arc<dyn ObjectStore>,
    /// Process-wide signing secret.
    secret: Vec<u8>,
    /// Gateway hostname; empty means direct mode.
    hostname: String,
    /// Gateway scheme.
    scheme: String,
}

impl PresignVendor {
    /// Builds the vendor from configuration, generating a secret if unset.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, config: &PresignConfig) -> Self {
        let secret = if config.secret.is_empty() {
            let mut bytes = vec![0u8; SECRET_BYTES];
            rand::thread_rng().fill_bytes(&mut bytes);
            bytes
        } else {
            BASE64
                .decode(&config.secret)
                .unwrap_or_else(|_| config.secret.as_bytes().to_vec())
        };
        Self {
            store,
            secret,
            hostname: config.url_hostname.clone(),
            scheme: config.url_scheme.clone(),
        }
    }

    /// True when links are wrapped behind the gateway.
    #[must_use]
    pub fn gateway_mode(&self) -> bool {
        !self.hostname.is_empty()
    }

    /// Computes the URL-safe signature over key, expiry, and tenant.
    fn signature(&self, key: &str, expire_unix: i64, tenant: &str) -> String {
        // HMAC accepts keys of any length; an empty signature fails closed
        // against the equality check if that ever changes.
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return String::new();
        };
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expire_unix.to_string().as_bytes());
        mac.update(b"\n");
        mac.update(tenant.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Builds the gateway-wrapped link for an object key.
    fn wrap(&self, scope: &RequestScope, key: &ObjectKey, ttl: Duration) -> DownloadLink {
        let expire = OffsetDateTime::now_utc() + ttl;
        let expire_unix = expire.unix_timestamp();
        let tenant = scope.tenant.as_str();
        let signature = self.signature(key.as_str(), expire_unix, tenant);
        let encoded_key = URL_SAFE_NO_PAD.encode(key.as_str().as_bytes());
        DownloadLink {
            uri: format!(
                "{}://{}{DOWNLOAD_PATH}/{signature}?key={encoded_key}&tenant={tenant}&expire={expire_unix}",
                self.scheme, self.hostname
            ),
            expire,
        }
    }

    /// Validates a wrapped link and resolves the backend-signed URL.
    ///
    /// # Errors
    ///
    /// Returns [`RedeemError`] for bad signatures or expired links, and
    /// [`ObjectStoreError`] when the backend presign fails.
    pub async fn redeem(
        &self,
        signature: &str,
        encoded_key: &str,
        tenant: &str,
        expire_unix: i64,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<DownloadLink, RedeemReject> {
        let key_bytes = URL_SAFE_NO_PAD
            .decode(encoded_key)
            .map_err(|_| RedeemReject::Redeem(RedeemError::InvalidSignature))?;
        let key = String::from_utf8(key_bytes)
            .map_err(|_| RedeemReject::Redeem(RedeemError::InvalidSignature))?;
        let expected = self.signature(&key, expire_unix, tenant);
        if expected.is_empty() || expected != signature {
            return Err(RedeemReject::Redeem(RedeemError::InvalidSignature));
        }
        if now.unix_timestamp() > expire_unix {
            return Err(RedeemReject::Redeem(RedeemError::Expired));
        }
        let scope = RequestScope::new(
            fleetup_core::TenantId::new(tenant),
            fleetup_core::RequestId::random(),
        );
        self.store
            .presign_get(&scope, &ObjectKey::from_raw(key), ttl, None)
            .await
            .map_err(RedeemReject::Store)
    }
}

/// Redeem failure: either validation or the backend presign.
#[derive(Debug, thiserror::Error)]
pub enum RedeemReject {
    /// Signature or expiry validation failed.
    #[error(transparent)]
    Redeem(#[from] RedeemError),
    /// Backend presign failed.
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

#[async_trait]
impl DownloadUrlVendor for PresignVendor {
    async fn download_url(
        &self,
        scope: &RequestScope,
        artifact: &Artifact,
        ttl: Duration,
    ) -> Result<DownloadLink, ObjectStoreError> {
        validate_presign_ttl(ttl)?;
        let key = ObjectKey::for_artifact(&scope.tenant, artifact.id);
        if self.gateway_mode() {
            return Ok(self.wrap(scope, &key, ttl));
        }
        self.store.presign_get(scope, &key, ttl, Some(&artifact.filename())).await
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use time::OffsetDateTime;

    use super::PresignVendor;
    use super::RedeemError;
    use super::RedeemReject;
    use crate::config::PresignConfig;
    use fleetup_core::Artifact;
    use fleetup_core::ArtifactId;
    use fleetup_core::ArtifactInfo;
    use fleetup_core::DownloadUrlVendor;
    use fleetup_core::InMemoryObjectStore;
    use fleetup_core::RequestId;
    use fleetup_core::RequestScope;
    use fleetup_core::TenantId;

    fn artifact() -> Artifact {
        Artifact {
            id: ArtifactId::random(),
            name: "release-1".to_string(),
            description: None,
            device_types_compatible: vec!["qemu".to_string()],
            updates: Vec::new(),
            signed: true,
            info: ArtifactInfo {
                format: "fleetup-artifact".to_string(),
                version: 1,
            },
            size: 1024,
            modified: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn scope() -> RequestScope {
        RequestScope::new(TenantId::new("acme"), RequestId::new("req"))
    }

    fn gateway_vendor() -> PresignVendor {
        let config = PresignConfig {
            secret: String::new(),
            expire_seconds: 900,
            url_hostname: "gateway.example.com".to_string(),
            url_scheme: "https".to_string(),
        };
        PresignVendor::new(Arc::new(InMemoryObjectStore::new()), &config)
    }

    #[tokio::test]
    async fn direct_mode_passes_backend_url_through() {
        let config = PresignConfig::default();
        let vendor = PresignVendor::new(Arc::new(InMemoryObjectStore::new()), &config);
        let link = vendor
            .download_url(&scope(), &artifact(), Duration::from_secs(900))
            .await
            .expect("link");
        assert!(link.uri.starts_with("memory://objects/"));
    }

    #[tokio::test]
    async fn gateway_mode_wraps_and_redeems() {
        let vendor = gateway_vendor();
        let link = vendor
            .download_url(&scope(), &artifact(), Duration::from_secs(900))
            .await
            .expect("link");
        assert!(link.uri.starts_with("https://gateway.example.com/api/devices/v1/deployments/download/"));

        let url = url::Url::parse(&link.uri).expect("url");
        let signature = url.path_segments().and_then(Iterator::last).expect("signature").to_string();
        let mut key = String::new();
        let mut tenant = String::new();
        let mut expire = 0i64;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "key" => key = value.to_string(),
                "tenant" => tenant = value.to_string(),
                "expire" => expire = value.parse().expect("expire"),
                _ => {}
            }
        }
        let redeemed = vendor
            .redeem(
                &signature,
                &key,
                &tenant,
                expire,
                Duration::from_secs(900),
                OffsetDateTime::now_utc(),
            )
            .await
            .expect("redeem");
        assert!(redeemed.uri.starts_with("memory://objects/acme/"));
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let vendor = gateway_vendor();
        let encoded_key = URL_SAFE_NO_PAD.encode(b"acme/some-key");
        let err = vendor
            .redeem(
                "bad-signature",
                &encoded_key,
                "acme",
                OffsetDateTime::now_utc().unix_timestamp() + 600,
                Duration::from_secs(900),
                OffsetDateTime::now_utc(),
            )
            .await
            .expect_err("tampered");
        assert!(matches!(err, RedeemReject::Redeem(RedeemError::InvalidSignature)));
    }

    #[tokio::test]
    async fn expired_link_is_rejected() {
        let vendor = gateway_vendor();
        let scope = scope();
        let artifact = artifact();
        let link = vendor
            .download_url(&scope, &artifact, Duration::from_secs(900))
            .await
            .expect("link");
        let url = url::Url::parse(&link.uri).expect("url");
        let signature = url.path_segments().and_then(Iterator::last).expect("signature").to_string();
        let (mut key, mut expire) = (String::new(), 0i64);
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "key" => key = value.to_string(),
                "expire" => expire = value.parse().expect("expire"),
                _ => {}
            }
        }
        let err = vendor
            .redeem(
                &signature,
                &key,
                "acme",
                expire,
                Duration::from_secs(900),
                OffsetDateTime::now_utc() + Duration::from_secs(3_600),
            )
            .await
            .expect_err("expired");
        assert!(matches!(err, RedeemReject::Redeem(RedeemError::Expired)));
    }

    #[tokio::test]
    async fn ttl_bounds_apply_in_both_modes() {
        let vendor = gateway_vendor();
        let err = vendor
            .download_url(&scope(), &artifact(), Duration::from_secs(5))
            .await
            .expect_err("short ttl");
        assert!(matches!(err, fleetup_core::ObjectStoreError::InvalidDuration(_)));
    }
}
