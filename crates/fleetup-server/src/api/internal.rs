// crates/fleetup-server/src/api/internal.rs
// ============================================================================
// Module: Internal API
// Description: Tenant provisioning, decommission, limits, and health.
// Purpose: Serve the cross-service surface behind the gateway.
// Dependencies: axum, fleetup-core
// ============================================================================

//! ## Overview
//! The internal surface is called only by sibling services: tenant
//! provisioning at signup, per-tenant artifact upload, device
//! decommission from device-auth, storage limit provisioning, and the
//! liveness/readiness probes. Tenant identity arrives in the path, not
//! the token.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::Router;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use serde::Deserialize;
use time::OffsetDateTime;

use fleetup_core::DeviceControl;
use fleetup_core::DeviceId;
use fleetup_core::Limit;
use fleetup_core::RequestId;
use fleetup_core::RequestScope;
use fleetup_core::TenantId;
use fleetup_core::model::limits::STORAGE_LIMIT;

use crate::api::management::try_upload_artifact;
use crate::error::ApiError;
use crate::identity::Scoped;
use crate::state::AppState;

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the internal router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tenants", post(provision_tenant))
        .route("/tenants/{tid}/artifacts", post(upload_tenant_artifact))
        .route("/tenants/{tid}/limits/storage", put(set_storage_limit))
        .route("/tenants/{tid}/devices/{device_id}", delete(decommission_device))
        .route("/health", get(health))
        .route("/alive", get(alive))
}

/// Builds a scope for a path-addressed tenant, keeping the request id.
fn tenant_scope(scope: &RequestScope, tid: &str) -> RequestScope {
    let tenant =
        if tid == "default" { TenantId::default_tenant() } else { TenantId::new(tid) };
    RequestScope::new(tenant, RequestId::new(scope.request_id.as_str()))
}

// ============================================================================
// SECTION: Tenants
// ============================================================================

/// Body of the tenant provisioning endpoint.
#[derive(Debug, Deserialize)]
struct NewTenant {
    /// Tenant identifier.
    tenant_id: String,
}

/// Handles `POST /tenants`.
async fn provision_tenant(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Json(body): Json<NewTenant>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome = async {
        if body.tenant_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("tenant_id must be set".to_string()));
        }
        let scope = tenant_scope(&scope, &body.tenant_id);
        state.store.migrate(&scope).await?;
        Ok(StatusCode::CREATED)
    }
    .await;
    match outcome {
        Ok(status) => status.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Handles `POST /tenants/{tid}/artifacts` (multipart upload).
async fn upload_tenant_artifact(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(tid): Path<String>,
    multipart: Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let scope = tenant_scope(&scope, &tid);
    match try_upload_artifact(&state, &scope, multipart).await {
        Ok(outcome) => {
            (StatusCode::CREATED, Json(serde_json::json!({ "id": outcome.artifact_id })))
                .into_response()
        }
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Body of the storage limit endpoint.
#[derive(Debug, Deserialize)]
struct StorageLimitBody {
    /// Limit value in bytes; 0 means unlimited.
    limit: u64,
}

/// Handles `PUT /tenants/{tid}/limits/storage`.
async fn set_storage_limit(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(tid): Path<String>,
    Json(body): Json<StorageLimitBody>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let scope = tenant_scope(&scope, &tid);
    let limit = Limit {
        name: STORAGE_LIMIT.to_string(),
        value: body.limit,
    };
    match state.store.upsert_limit(&scope, &limit).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => ApiError::from(error).into_response_with_request_id(&request_id),
    }
}

/// Handles `DELETE /tenants/{tid}/devices/{device_id}`.
async fn decommission_device(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path((tid, device_id)): Path<(String, String)>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let scope = tenant_scope(&scope, &tid);
    let control = DeviceControl::new(state.store.as_ref());
    match control
        .decommission_device(&scope, &DeviceId::new(device_id), OffsetDateTime::now_utc())
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => ApiError::from(error).into_response_with_request_id(&request_id),
    }
}

// ============================================================================
// SECTION: Probes
// ============================================================================

/// Handles `GET /health`: readiness across the store and collaborators.
async fn health(State(state): State<AppState>, Scoped(scope): Scoped) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    if let Err(error) = state.store.readiness().await {
        return ApiError::UpstreamUnavailable(format!("store: {error}"))
            .into_response_with_request_id(&request_id);
    }
    if let Err(error) = state.objects.health_check().await {
        return ApiError::UpstreamUnavailable(format!("object store: {error}"))
            .into_response_with_request_id(&request_id);
    }
    if let Err(error) = state.inventory.check_health().await {
        return ApiError::UpstreamUnavailable(format!("inventory: {error}"))
            .into_response_with_request_id(&request_id);
    }
    if let Err(error) = state.workflows.check_health().await {
        return ApiError::UpstreamUnavailable(format!("workflows: {error}"))
            .into_response_with_request_id(&request_id);
    }
    if let Some(reporting) = &state.reporting
        && let Err(error) = reporting.check_health().await
    {
        return ApiError::UpstreamUnavailable(format!("reporting: {error}"))
            .into_response_with_request_id(&request_id);
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Handles `GET /alive`: unconditional liveness.
async fn alive() -> StatusCode {
    StatusCode::NO_CONTENT
}
