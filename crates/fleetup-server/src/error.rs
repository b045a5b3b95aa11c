// crates/fleetup-server/src/error.rs
// ============================================================================
// Module: API Error Envelope
// Description: Error kinds, HTTP status mapping, and wire bodies.
// Purpose: Surface failures as `{ "error", "request_id" }` with stable codes.
// Dependencies: axum, serde, thiserror
// ============================================================================

//! ## Overview
//! Every handler failure funnels through [`ApiError`]. The kind decides
//! the HTTP status per the service error table; internal errors log the
//! full chain and surface only a generic message with the request id, so
//! cause chains never leak to clients.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Serialize;
use tracing::error;

use fleetup_core::ControlError;
use fleetup_core::InventoryError;
use fleetup_core::ObjectStoreError;
use fleetup_core::PlanError;
use fleetup_core::StoreError;
use fleetup_core::WorkflowsError;

// ============================================================================
// SECTION: Error Type
// ============================================================================

/// Handler-level error with its HTTP mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Validation, parse, or selector failure (400).
    #[error("{0}")]
    InvalidInput(String),
    /// Missing entity (404).
    #[error("not found")]
    NotFound,
    /// Unique-index or state-predicate failure (409).
    #[error("{0}")]
    Conflict(String),
    /// Artifact uniqueness invariant violated (422).
    #[error("artifact with the same name and device type already exists")]
    ArtifactNotUnique,
    /// Ingestion size cap exceeded (413).
    #[error("artifact exceeds the maximum image size")]
    ArtifactTooLarge,
    /// Wrong media type where multipart is required (415).
    #[error("unsupported media type")]
    UnsupportedMediaType,
    /// Upstream service or object store transient failure (502).
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    /// Anything unexpected (500); the chain is logged, not surfaced.
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    /// HTTP status of the error kind.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ArtifactNotUnique => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ArtifactTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Renders the error with the request id attached.
    #[must_use]
    pub fn into_response_with_request_id(self, request_id: &str) -> Response {
        if let Self::Internal(chain) = &self {
            error!(request_id, error = chain.as_str(), "internal error");
        }
        let body = ErrorBody {
            error: self.to_string(),
            request_id: request_id.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Wire body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Human-readable message; generic for internal errors.
    error: String,
    /// Request correlation id.
    request_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_response_with_request_id("")
    }
}

// ============================================================================
// SECTION: Conversions
// ============================================================================

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::NotFound => Self::NotFound,
            StoreError::Invalid(message) => Self::InvalidInput(message),
            StoreError::Internal(message) => Self::Internal(message),
        }
    }
}

impl From<ObjectStoreError> for ApiError {
    fn from(error: ObjectStoreError) -> Self {
        match error {
            ObjectStoreError::NotFound(_) => Self::NotFound,
            ObjectStoreError::InvalidDuration(_) => {
                Self::InvalidInput("presign duration out of range".to_string())
            }
            ObjectStoreError::QuotaExceeded => {
                Self::InvalidInput("storage quota exceeded".to_string())
            }
            ObjectStoreError::Unavailable(message) => Self::UpstreamUnavailable(message),
            ObjectStoreError::Io(message) => Self::Internal(message),
        }
    }
}

impl From<PlanError> for ApiError {
    fn from(error: PlanError) -> Self {
        match error {
            PlanError::InvalidConstructor(message) => Self::InvalidInput(message),
            PlanError::NoDevicesInSelector => {
                Self::InvalidInput("no devices in selector".to_string())
            }
            PlanError::Store(inner) => inner.into(),
            PlanError::Inventory(inner) => inner.into(),
        }
    }
}

impl From<InventoryError> for ApiError {
    fn from(error: InventoryError) -> Self {
        match error {
            InventoryError::DeviceTypeUnknown(device) => {
                Self::InvalidInput(format!("device type unknown for device {device}"))
            }
            InventoryError::Unavailable(message) => Self::UpstreamUnavailable(message),
        }
    }
}

impl From<WorkflowsError> for ApiError {
    fn from(error: WorkflowsError) -> Self {
        match error {
            WorkflowsError::WorkflowUndefined(name) => {
                Self::UpstreamUnavailable(format!("workflow not defined: {name}"))
            }
            WorkflowsError::Unavailable(message) => Self::UpstreamUnavailable(message),
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(error: ControlError) -> Self {
        match error {
            ControlError::NotFound => Self::NotFound,
            ControlError::ConflictingState {
                current,
            } => Self::Conflict(format!("conflicting device deployment state: {current}")),
            ControlError::InvalidStatus(status) => {
                Self::InvalidInput(format!("status not allowed from devices: {status}"))
            }
            ControlError::LogAlreadyExists => {
                Self::Conflict("deployment log already exists".to_string())
            }
            ControlError::LogTooLarge => Self::InvalidInput("deployment log too large".to_string()),
            ControlError::Store(inner) => inner.into(),
            ControlError::Url(inner) => inner.into(),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::ApiError;
    use fleetup_core::ControlError;
    use fleetup_core::DeviceDeploymentStatus;
    use fleetup_core::StoreError;

    #[test]
    fn kinds_map_to_the_error_table() {
        assert_eq!(ApiError::InvalidInput(String::new()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict(String::new()).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::ArtifactNotUnique.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::ArtifactTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            ApiError::UnsupportedMediaType.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            ApiError::UpstreamUnavailable(String::new()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ApiError::Internal(String::new()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn conflicting_state_maps_to_409() {
        let error: ApiError = ControlError::ConflictingState {
            current: DeviceDeploymentStatus::Aborted,
        }
        .into();
        assert_eq!(error.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn internal_message_never_leaks() {
        let error: ApiError = StoreError::Internal("secret chain".to_string()).into();
        assert_eq!(error.to_string(), "internal error");
    }
}
