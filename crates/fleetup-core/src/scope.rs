// crates/fleetup-core/src/scope.rs
// ============================================================================
// Module: Request Scope
// Description: Per-request tenant, correlation, and deadline context.
// Purpose: Thread identity and cancellation data through every port call.
// Dependencies: time
// ============================================================================

//! ## Overview
//! Every port operation receives a [`RequestScope`]: the trusted tenant
//! identity attached by the gateway, the request id used for log
//! correlation, and an optional deadline. Background jobs build their own
//! scopes per iteration. Cancellation itself rides on future drop; the
//! deadline is advisory for outbound clients that attach timeouts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use crate::model::identifiers::RequestId;
use crate::model::identifiers::TenantId;

// ============================================================================
// SECTION: Request Scope
// ============================================================================

/// Default deadline attached to outbound calls when the request has none.
pub const DEFAULT_CALL_DEADLINE: Duration = Duration::from_secs(5);

/// Per-request context threaded through all ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestScope {
    /// Trusted tenant identity.
    pub tenant: TenantId,
    /// Correlation id for logs and outbound headers.
    pub request_id: RequestId,
    /// Remaining time budget for outbound calls.
    pub deadline: Option<Duration>,
}

impl RequestScope {
    /// Builds a scope for an incoming request.
    #[must_use]
    pub const fn new(tenant: TenantId, request_id: RequestId) -> Self {
        Self {
            tenant,
            request_id,
            deadline: None,
        }
    }

    /// Builds a scope for a background job iteration.
    #[must_use]
    pub fn background(tenant: TenantId) -> Self {
        Self {
            tenant,
            request_id: RequestId::random(),
            deadline: None,
        }
    }

    /// Returns a copy with an explicit deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Effective deadline for outbound calls.
    #[must_use]
    pub fn call_deadline(&self) -> Duration {
        self.deadline.unwrap_or(DEFAULT_CALL_DEADLINE)
    }
}
