// crates/fleetup-server/src/identity.rs
// ============================================================================
// Module: Request Identity
// Description: Tenant and request-id extraction from gateway headers.
// Purpose: Build the request scope every port call carries.
// Dependencies: axum, base64, serde_json
// ============================================================================

//! ## Overview
//! Authentication happens upstream: the gateway attaches a bearer token
//! whose `mender.tenant` claim names the tenant, and a `X-MEN-RequestID`
//! header for correlation. The token is decoded, never verified; a
//! missing claim or header falls back to the default tenant and a fresh
//! request id. Extraction cannot fail, which keeps identity handling out
//! of every handler signature.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use fleetup_core::RequestId;
use fleetup_core::RequestScope;
use fleetup_core::TenantId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "X-MEN-RequestID";
/// JWT claim naming the tenant.
const TENANT_CLAIM: &str = "mender.tenant";
/// Upper bound on accepted authorization header size.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

// ============================================================================
// SECTION: Extraction
// ============================================================================

/// Builds the request scope from trusted gateway headers.
#[must_use]
pub fn scope_from_headers(headers: &HeaderMap) -> RequestScope {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map_or_else(RequestId::random, RequestId::new);
    let tenant = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(tenant_from_bearer)
        .map_or_else(TenantId::default_tenant, TenantId::new);
    RequestScope::new(tenant, request_id)
}

/// Decodes the tenant claim out of a bearer JWT without verifying it.
fn tenant_from_bearer(header: &str) -> Option<String> {
    claim_from_bearer(header, TENANT_CLAIM)
}

/// Extracts the device identity (`sub` claim) from the device token.
#[must_use]
pub fn device_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|header| claim_from_bearer(header, "sub"))
}

/// Decodes one string claim out of a bearer JWT without verifying it.
fn claim_from_bearer(header: &str, claim: &str) -> Option<String> {
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return None;
    }
    let token = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer "))?;
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get(claim).and_then(|value| value.as_str()).map(ToString::to_string)
}

/// Axum extractor wrapper around [`scope_from_headers`].
#[derive(Debug, Clone)]
pub struct Scoped(pub RequestScope);

impl<S: Send + Sync> FromRequestParts<S> for Scoped {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(scope_from_headers(&parts.headers)))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;
    use axum::http::HeaderValue;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::scope_from_headers;

    fn bearer_with_claims(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("Bearer {header}.{payload}.")
    }

    #[test]
    fn request_id_header_is_honoured() {
        let mut headers = HeaderMap::new();
        headers.insert("X-MEN-RequestID", HeaderValue::from_static("req-42"));
        let scope = scope_from_headers(&headers);
        assert_eq!(scope.request_id.as_str(), "req-42");
        assert!(scope.tenant.is_default());
    }

    #[test]
    fn missing_request_id_generates_one() {
        let scope = scope_from_headers(&HeaderMap::new());
        assert!(!scope.request_id.as_str().is_empty());
    }

    #[test]
    fn tenant_claim_is_decoded_without_verification() {
        let token = bearer_with_claims(&serde_json::json!({ "mender.tenant": "acme" }));
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&token).expect("header"),
        );
        let scope = scope_from_headers(&headers);
        assert_eq!(scope.tenant.as_str(), "acme");
    }

    #[test]
    fn device_identity_comes_from_the_sub_claim() {
        let token = bearer_with_claims(&serde_json::json!({ "sub": "device-7" }));
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&token).expect("header"),
        );
        assert_eq!(super::device_from_headers(&headers).as_deref(), Some("device-7"));
        assert!(super::device_from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn malformed_tokens_fall_back_to_default_tenant() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer not-a-jwt"),
        );
        let scope = scope_from_headers(&headers);
        assert!(scope.tenant.is_default());
    }
}
