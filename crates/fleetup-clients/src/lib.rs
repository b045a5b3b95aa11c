// crates/fleetup-clients/src/lib.rs
// ============================================================================
// Module: Fleetup External Clients
// Description: HTTP implementations of the inventory/workflows/reporting ports.
// Purpose: Tenant-aware RPC clients with strict deadlines and error mapping.
// Dependencies: fleetup-core, reqwest, serde_json, tracing
// ============================================================================

//! ## Overview
//! These clients implement the external-service ports of `fleetup-core`
//! over HTTP. Every outbound request carries the request id in
//! `X-MEN-RequestID`, addresses the tenant through the internal API path,
//! and inherits the caller's deadline (5 s when the request carries none).
//! Transient upstream failures surface as `Unavailable`; callers do not
//! retry inside the request.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod http;
mod inventory;
mod reporting;
mod workflows;

pub use http::ClientConfig;
pub use http::build_http_client;
pub use inventory::InventoryHttpClient;
pub use reporting::ReportingHttpClient;
pub use workflows::WorkflowsHttpClient;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "X-MEN-RequestID";
/// Tenant path segment used for the default (single-tenant) tenant.
pub const DEFAULT_TENANT_SEGMENT: &str = "default";

/// Returns the tenant path segment for internal API routes.
#[must_use]
pub fn tenant_segment(tenant: &fleetup_core::TenantId) -> &str {
    if tenant.is_default() { DEFAULT_TENANT_SEGMENT } else { tenant.as_str() }
}
