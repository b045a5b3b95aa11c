// crates/fleetup-core/src/ports/data_store.rs
// ============================================================================
// Module: Metadata Store Port
// Description: Persistence operations for every Fleetup entity family.
// Purpose: Abstract the metadata backend behind indexed, single-row writes.
// Dependencies: async-trait, serde, thiserror, time
// ============================================================================

//! ## Overview
//! The metadata store persists artifacts, deployments, device-deployments,
//! logs, limits, and upload intents. There are no cross-row transactions in
//! the contract: every multi-step invariant is maintained through
//! status-predicated conditional updates, and uniqueness through unique
//! indexes. Per-deployment counters move in the same statement as each
//! device-deployment transition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::model::artifact::Artifact;
use crate::model::artifact::Release;
use crate::model::deployment::Deployment;
use crate::model::device::DeviceDeployment;
use crate::model::device::DeviceDeploymentLog;
use crate::model::device::DeviceDeploymentStatus;
use crate::model::identifiers::ArtifactId;
use crate::model::identifiers::DeploymentId;
use crate::model::identifiers::DeviceDeploymentId;
use crate::model::identifiers::DeviceId;
use crate::model::limits::Limit;
use crate::model::upload::UploadIntent;
use crate::scope::RequestScope;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Metadata store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique index rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The referenced row does not exist.
    #[error("not found")]
    NotFound,
    /// Invalid query or entity shape.
    #[error("invalid store input: {0}")]
    Invalid(String),
    /// Backend failure.
    #[error("store internal error: {0}")]
    Internal(String),
}

// ============================================================================
// SECTION: Query Types
// ============================================================================

/// Sort direction for listing queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Oldest first.
    Ascending,
    /// Newest first.
    #[default]
    Descending,
}

/// Page selector for listing queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl Pagination {
    /// Rows to skip before the page starts.
    #[must_use]
    pub const fn skip(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * (self.per_page as u64)
    }

    /// Maximum rows on the page.
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.per_page as u64
    }
}

/// Filter for artifact listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFilter {
    /// Exact release-name match when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Filter for deployment listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFilter {
    /// Substring match on the deployment name when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Restrict to unfinished deployments.
    #[serde(default)]
    pub unfinished_only: bool,
}

/// Paginator over device-deployments.
///
/// # Invariants
/// - Results are ordered by `(created, id)` ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDeploymentQuery {
    /// Rows to skip.
    pub skip: u64,
    /// Maximum rows to return; 0 means no limit.
    pub limit: u64,
    /// Restrict to one deployment.
    pub deployment_id: Option<DeploymentId>,
    /// Restrict to active (non-terminal) rows.
    pub active_only: bool,
    /// Include rows of finished deployments.
    pub include_finished: bool,
}

/// Conditional device-deployment transition request.
///
/// The store applies the transition only when the current status is in
/// `from`; counters, finish timestamps, and phase dispatch counts move in
/// the same statement/transaction.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    /// Row to transition.
    pub id: DeviceDeploymentId,
    /// Accepted current statuses (the predicate).
    pub from: Vec<DeviceDeploymentStatus>,
    /// Target status.
    pub to: DeviceDeploymentStatus,
    /// Sub-state to record, when reported.
    pub substate: Option<String>,
    /// Transition timestamp.
    pub now: OffsetDateTime,
    /// Phase whose dispatch counter grows when the row leaves `pending`.
    pub phase_index: Option<usize>,
    /// Consume one failure retry: the row returns to `pending` without
    /// finishing and its phase dispatch slot is handed back.
    pub increment_retries: bool,
}

impl TransitionRequest {
    /// Builds a plain transition predicated on a single current status.
    #[must_use]
    pub fn new(
        id: DeviceDeploymentId,
        from: DeviceDeploymentStatus,
        to: DeviceDeploymentStatus,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            from: vec![from],
            to,
            substate: None,
            now,
            phase_index: None,
            increment_retries: false,
        }
    }
}

// ============================================================================
// SECTION: Port
// ============================================================================

/// Metadata persistence capability set.
///
/// Implementations must enforce the unique indexes on artifact
/// `(name, device_type)` pairs and on device-deployment
/// `(device_id, deployment_id)` pairs, and must keep deployment counters
/// consistent with every transition they apply.
#[allow(clippy::too_many_arguments, reason = "port surface mirrors the query catalogue")]
#[async_trait]
pub trait DataStore: Send + Sync {
    // ------------------------------------------------------------------
    // Artifacts
    // ------------------------------------------------------------------

    /// Inserts an artifact row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when any `(name, device_type)` pair
    /// collides with an existing artifact.
    async fn insert_artifact(
        &self,
        scope: &RequestScope,
        artifact: &Artifact,
    ) -> Result<(), StoreError>;

    /// Fetches an artifact by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn artifact(
        &self,
        scope: &RequestScope,
        id: ArtifactId,
    ) -> Result<Option<Artifact>, StoreError>;

    /// Fetches the artifact serving `name` for `device_type`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn artifact_by_name_and_device_type(
        &self,
        scope: &RequestScope,
        name: &str,
        device_type: &str,
    ) -> Result<Option<Artifact>, StoreError>;

    /// Fetches the newest of `ids` compatible with `device_type`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn artifact_by_ids_and_device_type(
        &self,
        scope: &RequestScope,
        ids: &[ArtifactId],
        device_type: &str,
    ) -> Result<Option<Artifact>, StoreError>;

    /// Replaces the description of an artifact.
    ///
    /// Returns false when the artifact does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn update_artifact_description(
        &self,
        scope: &RequestScope,
        id: ArtifactId,
        description: Option<String>,
    ) -> Result<bool, StoreError>;

    /// Deletes an artifact row; returns false when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn delete_artifact(
        &self,
        scope: &RequestScope,
        id: ArtifactId,
    ) -> Result<bool, StoreError>;

    /// Lists artifacts with a total count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn list_artifacts(
        &self,
        scope: &RequestScope,
        filter: &ArtifactFilter,
        page: Pagination,
        sort: SortOrder,
    ) -> Result<(Vec<Artifact>, u64), StoreError>;

    /// Lists releases (artifacts grouped by name, newest first) with a total count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn list_releases(
        &self,
        scope: &RequestScope,
        filter: &ArtifactFilter,
        page: Pagination,
    ) -> Result<(Vec<Release>, u64), StoreError>;

    /// Sums stored artifact sizes for the tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn storage_usage(&self, scope: &RequestScope) -> Result<u64, StoreError>;

    // ------------------------------------------------------------------
    // Deployments
    // ------------------------------------------------------------------

    /// Inserts a deployment row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn insert_deployment(
        &self,
        scope: &RequestScope,
        deployment: &Deployment,
    ) -> Result<(), StoreError>;

    /// Fetches a deployment by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn deployment(
        &self,
        scope: &RequestScope,
        id: DeploymentId,
    ) -> Result<Option<Deployment>, StoreError>;

    /// Fetches several deployments by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn deployments_by_ids(
        &self,
        scope: &RequestScope,
        ids: &[DeploymentId],
    ) -> Result<Vec<Deployment>, StoreError>;

    /// Lists deployments newest-first with a total count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn list_deployments(
        &self,
        scope: &RequestScope,
        filter: &DeploymentFilter,
        page: Pagination,
    ) -> Result<(Vec<Deployment>, u64), StoreError>;

    /// Fetches a deployment only when it is unfinished.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn find_unfinished_by_id(
        &self,
        scope: &RequestScope,
        id: DeploymentId,
    ) -> Result<Option<Deployment>, StoreError>;

    /// Returns true when any unfinished deployment references the artifact.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn exist_unfinished_by_artifact_id(
        &self,
        scope: &RequestScope,
        artifact_id: ArtifactId,
    ) -> Result<bool, StoreError>;

    /// Sets or clears the paused flag; returns false when the deployment is
    /// missing or already finished.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn set_deployment_paused(
        &self,
        scope: &RequestScope,
        id: DeploymentId,
        paused: bool,
    ) -> Result<bool, StoreError>;

    // ------------------------------------------------------------------
    // Device-deployments
    // ------------------------------------------------------------------

    /// Inserts device-deployment rows, skipping `(device, deployment)`
    /// duplicates. Returns the number of rows actually inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn insert_device_deployments(
        &self,
        scope: &RequestScope,
        rows: &[DeviceDeployment],
    ) -> Result<u64, StoreError>;

    /// Fetches a device-deployment by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn device_deployment(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<Option<DeviceDeployment>, StoreError>;

    /// Walks device-deployments ordered by `(created, id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn device_deployments(
        &self,
        scope: &RequestScope,
        query: &DeviceDeploymentQuery,
    ) -> Result<Vec<DeviceDeployment>, StoreError>;

    /// Finds the oldest active (non-terminal) row for a device.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn find_oldest_active(
        &self,
        scope: &RequestScope,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceDeployment>, StoreError>;

    /// Applies a status-predicated transition.
    ///
    /// Returns the updated row, or `None` when the predicate did not match
    /// (the caller maps this to a state conflict). Reaching a terminal
    /// state sets the row's `finished` timestamp, adjusts the deployment
    /// counters, and finishes the deployment when its last active child
    /// terminates.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row does not exist.
    async fn transition_device_deployment(
        &self,
        scope: &RequestScope,
        request: &TransitionRequest,
    ) -> Result<Option<DeviceDeployment>, StoreError>;

    /// Counts one more delivery of the assignment over `/next`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn increment_deliveries(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<(), StoreError>;

    /// Transitions every active child of a deployment to `aborted`.
    ///
    /// Returns the number of rows aborted; finishes the deployment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn abort_device_deployments(
        &self,
        scope: &RequestScope,
        deployment_id: DeploymentId,
        now: OffsetDateTime,
    ) -> Result<u64, StoreError>;

    /// Transitions every active row of a device to `decommissioned`.
    ///
    /// Returns the number of rows affected; finishes deployments whose last
    /// active child terminated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn decommission_device(
        &self,
        scope: &RequestScope,
        device_id: &DeviceId,
        now: OffsetDateTime,
    ) -> Result<u64, StoreError>;

    /// Marks the device log as available.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row does not exist.
    async fn set_log_available(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------

    /// Stores the one-shot device log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when a log already exists.
    async fn save_log(
        &self,
        scope: &RequestScope,
        log: &DeviceDeploymentLog,
    ) -> Result<(), StoreError>;

    /// Fetches the device log of a device-deployment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn log(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<Option<DeviceDeploymentLog>, StoreError>;

    // ------------------------------------------------------------------
    // Limits
    // ------------------------------------------------------------------

    /// Fetches a named limit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn limit(&self, scope: &RequestScope, name: &str)
    -> Result<Option<Limit>, StoreError>;

    /// Creates or replaces a named limit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn upsert_limit(&self, scope: &RequestScope, limit: &Limit) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Upload intents
    // ------------------------------------------------------------------

    /// Records a direct-upload intent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the artifact id is taken.
    async fn insert_upload_intent(
        &self,
        scope: &RequestScope,
        intent: &UploadIntent,
    ) -> Result<(), StoreError>;

    /// Lists expired intents across all tenants, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn expired_upload_intents(
        &self,
        before: OffsetDateTime,
        limit: u64,
    ) -> Result<Vec<UploadIntent>, StoreError>;

    /// Removes an upload intent; succeeds when already absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn delete_upload_intent(
        &self,
        scope: &RequestScope,
        artifact_id: ArtifactId,
    ) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Prepares tenant storage (schema/index provisioning); idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn migrate(&self, scope: &RequestScope) -> Result<(), StoreError>;

    /// Probes backend reachability.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend is down.
    async fn readiness(&self) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::Pagination;

    #[test]
    fn pagination_computes_skip_and_limit() {
        let page = Pagination {
            page: 3,
            per_page: 25,
        };
        assert_eq!(page.skip(), 50);
        assert_eq!(page.limit(), 25);
        assert_eq!(Pagination::default().skip(), 0);
    }
}
