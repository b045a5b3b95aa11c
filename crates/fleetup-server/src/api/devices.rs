// crates/fleetup-server/src/api/devices.rs
// ============================================================================
// Module: Devices API
// Description: Device-facing dispatch, status, log, and download endpoints.
// Purpose: Serve the long-poll control channel of the update agents.
// Dependencies: axum, fleetup-core, crate::presign
// ============================================================================

//! ## Overview
//! Devices authenticate upstream; their identity arrives as the `sub`
//! claim of the gateway-attached token. `POST /device/deployments/next`
//! returns either the one due update instruction or 204; status callbacks
//! and the one-shot log upload address the device-deployment id returned
//! with the instruction. The wrapped download endpoint redeems HMAC links
//! vended in gateway mode.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Redirect;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use serde::Deserialize;
use time::OffsetDateTime;

use fleetup_core::DeviceControl;
use fleetup_core::DeviceDeploymentId;
use fleetup_core::DeviceDeploymentLog;
use fleetup_core::DeviceDeploymentStatus;
use fleetup_core::DeviceId;
use fleetup_core::LogMessage;
use fleetup_core::NextRequest;

use crate::error::ApiError;
use crate::identity::Scoped;
use crate::identity::device_from_headers;
use crate::presign::RedeemError;
use crate::presign::RedeemReject;
use crate::state::AppState;

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the devices router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/device/deployments/next", post(next_deployment))
        .route("/device/deployments/{id}/status", put(update_status))
        .route("/device/deployments/{id}/log", put(upload_log))
        .route("/download/{signature}", get(redeem_download))
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Body of the `/next` poll.
#[derive(Debug, Deserialize)]
struct NextBody {
    /// Device type reported by the agent.
    device_type: String,
    /// Artifact name the device currently runs.
    #[serde(default)]
    artifact_name: Option<String>,
}

/// Handles `POST /device/deployments/next`.
async fn next_deployment(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    headers: HeaderMap,
    Json(body): Json<NextBody>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome = async {
        let device_id = device_from_headers(&headers)
            .ok_or_else(|| ApiError::InvalidInput("device identity missing".to_string()))?;
        if body.device_type.trim().is_empty() {
            return Err(ApiError::InvalidInput("device_type must be set".to_string()));
        }
        let request = NextRequest {
            device_id: DeviceId::new(device_id),
            device_type: body.device_type,
            installed_artifact_name: body.artifact_name,
        };
        let control = DeviceControl::new(state.store.as_ref());
        let instructions = control
            .next_update(
                &scope,
                &request,
                state.vendor.as_ref(),
                state.config.storage.download_ttl(),
                OffsetDateTime::now_utc(),
            )
            .await?;
        Ok(instructions)
    }
    .await;
    match outcome {
        Ok(Some(instructions)) => Json(instructions).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

// ============================================================================
// SECTION: Status & Log Callbacks
// ============================================================================

/// Body of the device status callback.
#[derive(Debug, Deserialize)]
struct StatusBody {
    /// Reported status label.
    status: String,
    /// Optional free-form sub-state.
    #[serde(default)]
    substate: Option<String>,
}

/// Handles `PUT /device/deployments/{id}/status`.
async fn update_status(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome: Result<_, ApiError> = async {
        let id = parse_device_deployment_id(&id)?;
        let status = DeviceDeploymentStatus::parse(&body.status)
            .ok_or_else(|| ApiError::InvalidInput(format!("unknown status: {}", body.status)))?;
        let control = DeviceControl::new(state.store.as_ref());
        control
            .update_status(&scope, id, status, body.substate, OffsetDateTime::now_utc())
            .await?;
        Ok(StatusCode::NO_CONTENT)
    }
    .await;
    match outcome {
        Ok(status) => status.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Body of the device log upload.
#[derive(Debug, Deserialize)]
struct LogBody {
    /// Timestamped log lines.
    messages: Vec<LogMessage>,
}

/// Handles `PUT /device/deployments/{id}/log`.
async fn upload_log(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(id): Path<String>,
    Json(body): Json<LogBody>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome: Result<_, ApiError> = async {
        let id = parse_device_deployment_id(&id)?;
        let log = DeviceDeploymentLog {
            device_deployment_id: id,
            messages: body.messages,
        };
        let control = DeviceControl::new(state.store.as_ref());
        control.save_log(&scope, &log).await?;
        Ok(StatusCode::NO_CONTENT)
    }
    .await;
    match outcome {
        Ok(status) => status.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

// ============================================================================
// SECTION: Wrapped Download
// ============================================================================

/// Query parameters of the wrapped download link.
#[derive(Debug, Deserialize)]
struct DownloadQuery {
    /// URL-safe encoded object key.
    key: String,
    /// Tenant the link was vended for.
    #[serde(default)]
    tenant: String,
    /// Unix expiry of the link.
    expire: i64,
}

/// Handles `GET /download/{signature}`: validates and redirects.
async fn redeem_download(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(signature): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome = state
        .vendor
        .redeem(
            &signature,
            &query.key,
            &query.tenant,
            query.expire,
            state.config.storage.download_ttl(),
            OffsetDateTime::now_utc(),
        )
        .await;
    match outcome {
        Ok(link) => Redirect::temporary(&link.uri).into_response(),
        Err(RedeemReject::Redeem(RedeemError::Expired)) => {
            ApiError::InvalidInput("download link expired".to_string())
                .into_response_with_request_id(&request_id)
        }
        Err(RedeemReject::Redeem(RedeemError::InvalidSignature)) => {
            ApiError::InvalidInput("invalid download signature".to_string())
                .into_response_with_request_id(&request_id)
        }
        Err(RedeemReject::Store(error)) => {
            ApiError::from(error).into_response_with_request_id(&request_id)
        }
    }
}

/// Parses a device-deployment id path segment.
fn parse_device_deployment_id(raw: &str) -> Result<DeviceDeploymentId, ApiError> {
    DeviceDeploymentId::parse(raw)
        .ok_or_else(|| ApiError::InvalidInput("deployment id must be a uuid".to_string()))
}
