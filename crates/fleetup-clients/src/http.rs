// crates/fleetup-clients/src/http.rs
// ============================================================================
// Module: Shared HTTP Client Plumbing
// Description: Client construction and base-URL handling for all ports.
// Purpose: One place for transport policy: TLS, timeouts, user agent.
// Dependencies: reqwest, url
// ============================================================================

//! ## Overview
//! All three service clients share one `reqwest` client shape: rustls TLS,
//! a connect timeout, no redirects, and a stable user agent. Per-request
//! deadlines come from the request scope at call time, not from the client.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use url::Url;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Connect timeout applied to every outbound connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// User agent attached to outbound requests.
const USER_AGENT: &str = concat!("fleetup/", env!("CARGO_PKG_VERSION"));

/// Configuration of one service client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the service (scheme + authority, no trailing slash needed).
    pub base_url: Url,
}

impl ClientConfig {
    /// Parses a base URL string into a client configuration.
    ///
    /// # Errors
    ///
    /// Returns a description when the URL is not absolute http(s).
    pub fn parse(base_url: &str) -> Result<Self, String> {
        let url = Url::parse(base_url).map_err(|err| format!("invalid base url: {err}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err("base url must be http or https".to_string());
        }
        Ok(Self {
            base_url: url,
        })
    }

    /// Joins a path onto the base URL.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}{path}")
    }
}

// ============================================================================
// SECTION: Client Construction
// ============================================================================

/// Builds the shared `reqwest` client for service calls.
///
/// # Errors
///
/// Returns a description when the TLS stack cannot be initialized.
pub fn build_http_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(USER_AGENT)
        .build()
        .map_err(|err| format!("http client init failed: {err}"))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
