// crates/fleetup-core/src/control.rs
// ============================================================================
// Module: Device Control
// Description: `/next` dispatch, status callbacks, logs, abort, decommission.
// Purpose: Drive the per-device state machine against the metadata store.
// Dependencies: crate::ports, crate::model, crate::rollout
// ============================================================================

//! ## Overview
//! Device control owns the interactive half of the deployment lifecycle.
//! Dispatch is idempotent: an already-dispatched assignment is returned
//! unchanged on every poll, and a pending row is promoted with a single
//! status-predicated update, so concurrent polls converge on one winner.
//! Status callbacks accept only the directed edges of the device state
//! machine and serialize through the same predicated updates.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;

use crate::model::artifact::Artifact;
use crate::model::deployment::Deployment;
use crate::model::device::DeviceDeployment;
use crate::model::device::DeviceDeploymentLog;
use crate::model::device::DeviceDeploymentStatus;
use crate::model::identifiers::DeploymentId;
use crate::model::identifiers::DeviceDeploymentId;
use crate::model::identifiers::DeviceId;
use crate::ports::data_store::DataStore;
use crate::ports::data_store::StoreError;
use crate::ports::data_store::TransitionRequest;
use crate::ports::object_store::DownloadLink;
use crate::ports::object_store::DownloadUrlVendor;
use crate::ports::object_store::ObjectStoreError;
use crate::rollout;
use crate::rollout::Admission;
use crate::rollout::DenyReason;
use crate::scope::RequestScope;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum log lines accepted in one device log upload.
pub const MAX_LOG_MESSAGES: usize = 10_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Device-control errors.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The referenced row does not exist.
    #[error("not found")]
    NotFound,
    /// The requested transition is not an edge of the state machine, or a
    /// concurrent transition won the race.
    #[error("conflicting device deployment state: {current}")]
    ConflictingState {
        /// Status observed when the transition was rejected.
        current: DeviceDeploymentStatus,
    },
    /// The reported status is not a device-reportable state.
    #[error("status not allowed from devices: {0}")]
    InvalidStatus(DeviceDeploymentStatus),
    /// The device log was already uploaded.
    #[error("deployment log already exists")]
    LogAlreadyExists,
    /// The log payload exceeds accepted bounds.
    #[error("deployment log too large")]
    LogTooLarge,
    /// Metadata store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Download URL vending failure.
    #[error(transparent)]
    Url(#[from] ObjectStoreError),
}

// ============================================================================
// SECTION: Dispatch Types
// ============================================================================

/// Device-supplied context of a `/next` poll.
#[derive(Debug, Clone)]
pub struct NextRequest {
    /// Polling device.
    pub device_id: DeviceId,
    /// Device type reported by the device.
    pub device_type: String,
    /// Artifact name the device currently runs, when reported.
    pub installed_artifact_name: Option<String>,
}

/// Artifact payload returned to a device.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactPayload {
    /// Release name of the artifact.
    pub artifact_name: String,
    /// Download source for the blob.
    pub source: DownloadLink,
    /// Device types the artifact is compatible with.
    pub device_types_compatible: Vec<String>,
    /// Blob size in bytes.
    pub size: u64,
}

/// The update instruction handed to a polling device.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateInstructions {
    /// Device-deployment identifier; devices report status against it.
    pub id: DeviceDeploymentId,
    /// Artifact payload with the signed download source.
    pub artifact: ArtifactPayload,
    /// Opaque update control map, when the deployment carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_control_map: Option<serde_json::Value>,
}

// ============================================================================
// SECTION: Device Control
// ============================================================================

/// Device-facing control surface over the metadata store.
pub struct DeviceControl<'a> {
    /// Metadata store.
    store: &'a dyn DataStore,
}

impl<'a> DeviceControl<'a> {
    /// Builds a control surface over the store.
    #[must_use]
    pub const fn new(store: &'a dyn DataStore) -> Self {
        Self {
            store,
        }
    }

    /// Resolves a `/next` poll into at most one update instruction.
    ///
    /// Returns `Ok(None)` when no update is due. Idempotent under
    /// concurrent polls: the same assignment is returned until it reaches
    /// a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] on store or URL-vendor failure.
    pub async fn next_update(
        &self,
        scope: &RequestScope,
        request: &NextRequest,
        vendor: &dyn DownloadUrlVendor,
        download_ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<Option<UpdateInstructions>, ControlError> {
        loop {
            let Some(row) = self.store.find_oldest_active(scope, &request.device_id).await?
            else {
                return Ok(None);
            };
            let deployment = self
                .store
                .deployment(scope, row.deployment_id)
                .await?
                .ok_or_else(|| {
                    StoreError::Internal("device deployment references missing deployment".into())
                })?;

            if row.status != DeviceDeploymentStatus::Pending {
                return Ok(Some(
                    self.repeat_assignment(scope, &deployment, &row, vendor, download_ttl).await?,
                ));
            }

            match rollout::admit(&deployment, now) {
                Admission::Deny(DenyReason::Aborted) => {
                    // The abort batch races with planner inserts; sweep the
                    // straggler row and look for older work.
                    self.terminate_pending(scope, row.id, DeviceDeploymentStatus::Aborted, now)
                        .await?;
                    continue;
                }
                Admission::Deny(DenyReason::MaxDevicesReached) => {
                    self.abort_remaining_pending(scope, deployment.id, now).await?;
                    continue;
                }
                Admission::Deny(_) => return Ok(None),
                Admission::Admit {
                    phase_index,
                } => {
                    if let Some(instructions) = self
                        .dispatch_pending(
                            scope,
                            request,
                            &deployment,
                            &row,
                            vendor,
                            download_ttl,
                            phase_index,
                            now,
                        )
                        .await?
                    {
                        return Ok(Some(instructions));
                    }
                    // Lost a race or terminalized the row; re-evaluate.
                }
            }
        }
    }

    /// Returns the existing assignment without mutating its state.
    async fn repeat_assignment(
        &self,
        scope: &RequestScope,
        deployment: &Deployment,
        row: &DeviceDeployment,
        vendor: &dyn DownloadUrlVendor,
        download_ttl: Duration,
    ) -> Result<UpdateInstructions, ControlError> {
        let artifact_id = row.artifact_id.ok_or(ControlError::NotFound)?;
        let artifact =
            self.store.artifact(scope, artifact_id).await?.ok_or(ControlError::NotFound)?;
        let instructions =
            self.build_instructions(scope, deployment, row, &artifact, vendor, download_ttl).await?;
        self.store.increment_deliveries(scope, row.id).await?;
        Ok(instructions)
    }

    /// Promotes one pending row; `None` means the caller must re-evaluate.
    #[allow(clippy::too_many_arguments, reason = "dispatch threads every decision input")]
    async fn dispatch_pending(
        &self,
        scope: &RequestScope,
        request: &NextRequest,
        deployment: &Deployment,
        row: &DeviceDeployment,
        vendor: &dyn DownloadUrlVendor,
        download_ttl: Duration,
        phase_index: Option<usize>,
        now: OffsetDateTime,
    ) -> Result<Option<UpdateInstructions>, ControlError> {
        // Short-circuit devices that already run the target artifact.
        if !deployment.force_installation
            && request.installed_artifact_name.as_deref() == Some(deployment.artifact_name.as_str())
        {
            let transition = TransitionRequest {
                id: row.id,
                from: vec![DeviceDeploymentStatus::Pending],
                to: DeviceDeploymentStatus::AlreadyInstalled,
                substate: None,
                now,
                phase_index,
                increment_retries: false,
            };
            self.store.transition_device_deployment(scope, &transition).await?;
            return Ok(None);
        }

        // Re-select against the device type the device reports now.
        let artifact = if deployment.artifacts.is_empty() {
            self.store
                .artifact_by_name_and_device_type(
                    scope,
                    &deployment.artifact_name,
                    &request.device_type,
                )
                .await?
        } else {
            self.store
                .artifact_by_ids_and_device_type(
                    scope,
                    &deployment.artifacts,
                    &request.device_type,
                )
                .await?
        };
        let Some(artifact) = artifact else {
            self.terminate_pending(scope, row.id, DeviceDeploymentStatus::Noartifact, now).await?;
            return Ok(None);
        };

        let instructions =
            self.build_instructions(scope, deployment, row, &artifact, vendor, download_ttl).await?;
        let transition = TransitionRequest {
            id: row.id,
            from: vec![DeviceDeploymentStatus::Pending],
            to: DeviceDeploymentStatus::Downloading,
            substate: None,
            now,
            phase_index,
            increment_retries: false,
        };
        if self.store.transition_device_deployment(scope, &transition).await?.is_none() {
            // A concurrent poll won; the next iteration repeats its assignment.
            return Ok(None);
        }
        self.store.increment_deliveries(scope, row.id).await?;
        Ok(Some(instructions))
    }

    /// Builds the wire payload for one assignment.
    async fn build_instructions(
        &self,
        scope: &RequestScope,
        deployment: &Deployment,
        row: &DeviceDeployment,
        artifact: &Artifact,
        vendor: &dyn DownloadUrlVendor,
        download_ttl: Duration,
    ) -> Result<UpdateInstructions, ControlError> {
        let source = vendor.download_url(scope, artifact, download_ttl).await?;
        Ok(UpdateInstructions {
            id: row.id,
            artifact: ArtifactPayload {
                artifact_name: artifact.name.clone(),
                source,
                device_types_compatible: artifact.device_types_compatible.clone(),
                size: artifact.size,
            },
            update_control_map: deployment.update_control_map.clone(),
        })
    }

    /// Terminates one pending row with a server-set outcome.
    async fn terminate_pending(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
        outcome: DeviceDeploymentStatus,
        now: OffsetDateTime,
    ) -> Result<(), ControlError> {
        let transition = TransitionRequest {
            id,
            from: vec![DeviceDeploymentStatus::Pending],
            to: outcome,
            substate: None,
            now,
            phase_index: None,
            increment_retries: false,
        };
        self.store.transition_device_deployment(scope, &transition).await?;
        Ok(())
    }

    /// Aborts every remaining pending row once the max-devices cap is hit.
    async fn abort_remaining_pending(
        &self,
        scope: &RequestScope,
        deployment_id: DeploymentId,
        now: OffsetDateTime,
    ) -> Result<(), ControlError> {
        let query = crate::ports::data_store::DeviceDeploymentQuery {
            skip: 0,
            limit: 0,
            deployment_id: Some(deployment_id),
            active_only: true,
            include_finished: true,
        };
        let rows = self.store.device_deployments(scope, &query).await?;
        for row in rows {
            if row.status == DeviceDeploymentStatus::Pending {
                self.terminate_pending(scope, row.id, DeviceDeploymentStatus::Aborted, now)
                    .await?;
            }
        }
        Ok(())
    }

    /// Applies a device-reported status callback.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::ConflictingState`] when the reported status
    /// is not a legal edge from the current state, and
    /// [`ControlError::InvalidStatus`] for server-only statuses.
    pub async fn update_status(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
        reported: DeviceDeploymentStatus,
        substate: Option<String>,
        now: OffsetDateTime,
    ) -> Result<DeviceDeployment, ControlError> {
        if matches!(
            reported,
            DeviceDeploymentStatus::Pending
                | DeviceDeploymentStatus::Noartifact
                | DeviceDeploymentStatus::Aborted
                | DeviceDeploymentStatus::Decommissioned
        ) {
            return Err(ControlError::InvalidStatus(reported));
        }
        let row =
            self.store.device_deployment(scope, id).await?.ok_or(ControlError::NotFound)?;
        if !row.status.can_transition(reported) {
            return Err(ControlError::ConflictingState {
                current: row.status,
            });
        }

        let mut target = reported;
        let mut increment_retries = false;
        if reported == DeviceDeploymentStatus::Failure {
            let deployment = self.store.deployment(scope, row.deployment_id).await?;
            if let Some(deployment) = deployment
                && !deployment.aborted
                && deployment.retries > row.retries_used
            {
                target = DeviceDeploymentStatus::Pending;
                increment_retries = true;
            }
        }

        let transition = TransitionRequest {
            id,
            from: vec![row.status],
            to: target,
            substate,
            now,
            phase_index: None,
            increment_retries,
        };
        match self.store.transition_device_deployment(scope, &transition).await? {
            Some(updated) => Ok(updated),
            None => {
                let current = self
                    .store
                    .device_deployment(scope, id)
                    .await?
                    .map_or(row.status, |fresh| fresh.status);
                Err(ControlError::ConflictingState {
                    current,
                })
            }
        }
    }

    /// Stores the one-shot device log of a device-deployment.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::LogAlreadyExists`] on a second upload and
    /// [`ControlError::LogTooLarge`] beyond [`MAX_LOG_MESSAGES`] lines.
    pub async fn save_log(
        &self,
        scope: &RequestScope,
        log: &DeviceDeploymentLog,
    ) -> Result<(), ControlError> {
        if log.messages.len() > MAX_LOG_MESSAGES {
            return Err(ControlError::LogTooLarge);
        }
        let exists =
            self.store.device_deployment(scope, log.device_deployment_id).await?.is_some();
        if !exists {
            return Err(ControlError::NotFound);
        }
        match self.store.save_log(scope, log).await {
            Ok(()) => {
                self.store.set_log_available(scope, log.device_deployment_id).await?;
                Ok(())
            }
            Err(StoreError::Conflict(_)) => Err(ControlError::LogAlreadyExists),
            Err(err) => Err(err.into()),
        }
    }

    /// Fetches the device log of a device-deployment.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotFound`] when no log was uploaded.
    pub async fn log(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<DeviceDeploymentLog, ControlError> {
        self.store.log(scope, id).await?.ok_or(ControlError::NotFound)
    }

    /// Aborts an unfinished deployment, terminating every active child.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotFound`] when the deployment is missing
    /// or already finished.
    pub async fn abort_deployment(
        &self,
        scope: &RequestScope,
        deployment_id: DeploymentId,
        now: OffsetDateTime,
    ) -> Result<u64, ControlError> {
        let unfinished = self.store.find_unfinished_by_id(scope, deployment_id).await?;
        if unfinished.is_none() {
            return Err(ControlError::NotFound);
        }
        Ok(self.store.abort_device_deployments(scope, deployment_id, now).await?)
    }

    /// Pauses or resumes dispatch of an unfinished deployment.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotFound`] when the deployment is missing
    /// or already finished.
    pub async fn set_paused(
        &self,
        scope: &RequestScope,
        deployment_id: DeploymentId,
        paused: bool,
    ) -> Result<(), ControlError> {
        if self.store.set_deployment_paused(scope, deployment_id, paused).await? {
            Ok(())
        } else {
            Err(ControlError::NotFound)
        }
    }

    /// Terminates every active row of a decommissioned device.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] on store failure.
    pub async fn decommission_device(
        &self,
        scope: &RequestScope,
        device_id: &DeviceId,
        now: OffsetDateTime,
    ) -> Result<u64, ControlError> {
        Ok(self.store.decommission_device(scope, device_id, now).await?)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
