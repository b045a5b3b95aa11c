// crates/fleetup-core/src/memstore/data.rs
// ============================================================================
// Module: In-Memory Metadata Store
// Description: DataStore implementation over tenant-keyed hash maps.
// Purpose: Reference semantics for indexes, transitions, and counters.
// Dependencies: crate::ports::data_store, crate::model
// ============================================================================

//! ## Overview
//! Every tenant owns an isolated bucket of rows behind one process-wide
//! mutex. Writes are applied atomically under the lock, which makes the
//! conditional-transition semantics trivially linearizable per row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
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
use crate::ports::data_store::ArtifactFilter;
use crate::ports::data_store::DataStore;
use crate::ports::data_store::DeploymentFilter;
use crate::ports::data_store::DeviceDeploymentQuery;
use crate::ports::data_store::Pagination;
use crate::ports::data_store::SortOrder;
use crate::ports::data_store::StoreError;
use crate::ports::data_store::TransitionRequest;
use crate::scope::RequestScope;

// ============================================================================
// SECTION: State
// ============================================================================

/// Rows of a single tenant.
#[derive(Debug, Default)]
struct TenantState {
    /// Artifact rows.
    artifacts: Vec<Artifact>,
    /// Deployment rows.
    deployments: HashMap<DeploymentId, Deployment>,
    /// Device-deployment rows in insertion order.
    device_deployments: Vec<DeviceDeployment>,
    /// One-shot device logs.
    logs: HashMap<DeviceDeploymentId, DeviceDeploymentLog>,
    /// Named limits.
    limits: HashMap<String, Limit>,
    /// Direct-upload intents.
    uploads: Vec<UploadIntent>,
}

/// In-memory [`DataStore`] backend.
#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    /// Tenant buckets behind one lock.
    inner: Mutex<HashMap<String, TenantState>>,
}

impl InMemoryDataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the tenant bucket of `scope`, creating it on first use.
    fn with_tenant<T>(
        &self,
        scope: &RequestScope,
        f: impl FnOnce(&mut TenantState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| StoreError::Internal("store lock poisoned".to_string()))?;
        let state = guard.entry(scope.tenant.as_str().to_string()).or_default();
        f(state)
    }
}

// ============================================================================
// SECTION: Transition Core
// ============================================================================

/// Applies a predicated transition inside one tenant bucket.
///
/// Mirrors exactly what the durable backend performs in one transaction:
/// the row update, the counter moves, the phase dispatch count, and the
/// deployment finish aggregation.
fn apply_transition(
    state: &mut TenantState,
    request: &TransitionRequest,
) -> Result<Option<DeviceDeployment>, StoreError> {
    let row = state
        .device_deployments
        .iter_mut()
        .find(|row| row.id == request.id)
        .ok_or(StoreError::NotFound)?;
    if !request.from.contains(&row.status) {
        return Ok(None);
    }
    let previous = row.status;
    row.status = request.to;
    if let Some(substate) = &request.substate {
        row.substate = Some(substate.clone());
    }
    if request.increment_retries {
        row.retries_used = row.retries_used.saturating_add(1);
    }
    if request.to.is_terminal() {
        row.finished = Some(request.now);
    } else {
        row.finished = None;
    }
    let updated = row.clone();
    if let Some(deployment) = state.deployments.get_mut(&updated.deployment_id) {
        deployment.stats.decrement(previous);
        deployment.stats.increment(request.to);
        if let Some(index) = request.phase_index
            && previous == DeviceDeploymentStatus::Pending
            && let Some(phase) = deployment.phases.get_mut(index)
        {
            phase.device_count = phase.device_count.saturating_add(1);
        }
        // A failure retry hands its phase slot back before the row
        // re-enters `pending`; the re-dispatch consumes the same slot.
        if request.increment_retries
            && let Some(phase) =
                deployment.phases.iter_mut().rev().find(|phase| phase.device_count > 0)
        {
            phase.device_count = phase.device_count.saturating_sub(1);
        }
        if request.to.is_terminal() && deployment.stats.active_total() == 0 {
            deployment.finished = Some(request.now);
        }
    }
    Ok(Some(updated))
}

// ============================================================================
// SECTION: DataStore Implementation
// ============================================================================

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn insert_artifact(
        &self,
        scope: &RequestScope,
        artifact: &Artifact,
    ) -> Result<(), StoreError> {
        self.with_tenant(scope, |state| {
            if state.artifacts.iter().any(|existing| existing.conflicts_with(artifact)) {
                return Err(StoreError::Conflict(format!(
                    "artifact {} shares a device type with an existing artifact",
                    artifact.name
                )));
            }
            if state.artifacts.iter().any(|existing| existing.id == artifact.id) {
                return Err(StoreError::Conflict("artifact id already exists".to_string()));
            }
            state.artifacts.push(artifact.clone());
            Ok(())
        })
    }

    async fn artifact(
        &self,
        scope: &RequestScope,
        id: ArtifactId,
    ) -> Result<Option<Artifact>, StoreError> {
        self.with_tenant(scope, |state| {
            Ok(state.artifacts.iter().find(|a| a.id == id).cloned())
        })
    }

    async fn artifact_by_name_and_device_type(
        &self,
        scope: &RequestScope,
        name: &str,
        device_type: &str,
    ) -> Result<Option<Artifact>, StoreError> {
        self.with_tenant(scope, |state| {
            Ok(state
                .artifacts
                .iter()
                .find(|a| a.name == name && a.supports(device_type))
                .cloned())
        })
    }

    async fn artifact_by_ids_and_device_type(
        &self,
        scope: &RequestScope,
        ids: &[ArtifactId],
        device_type: &str,
    ) -> Result<Option<Artifact>, StoreError> {
        self.with_tenant(scope, |state| {
            let mut matches: Vec<&Artifact> = state
                .artifacts
                .iter()
                .filter(|a| ids.contains(&a.id) && a.supports(device_type))
                .collect();
            matches.sort_by(|a, b| b.modified.cmp(&a.modified));
            Ok(matches.first().map(|a| (*a).clone()))
        })
    }

    async fn update_artifact_description(
        &self,
        scope: &RequestScope,
        id: ArtifactId,
        description: Option<String>,
    ) -> Result<bool, StoreError> {
        self.with_tenant(scope, |state| {
            match state.artifacts.iter_mut().find(|a| a.id == id) {
                Some(artifact) => {
                    artifact.description = description;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    async fn delete_artifact(
        &self,
        scope: &RequestScope,
        id: ArtifactId,
    ) -> Result<bool, StoreError> {
        self.with_tenant(scope, |state| {
            let before = state.artifacts.len();
            state.artifacts.retain(|a| a.id != id);
            Ok(state.artifacts.len() != before)
        })
    }

    async fn list_artifacts(
        &self,
        scope: &RequestScope,
        filter: &ArtifactFilter,
        page: Pagination,
        sort: SortOrder,
    ) -> Result<(Vec<Artifact>, u64), StoreError> {
        self.with_tenant(scope, |state| {
            let mut rows: Vec<Artifact> = state
                .artifacts
                .iter()
                .filter(|a| filter.name.as_ref().is_none_or(|name| &a.name == name))
                .cloned()
                .collect();
            rows.sort_by(|a, b| match sort {
                SortOrder::Ascending => a.modified.cmp(&b.modified),
                SortOrder::Descending => b.modified.cmp(&a.modified),
            });
            let total = rows.len() as u64;
            let rows = paginate(rows, page);
            Ok((rows, total))
        })
    }

    async fn list_releases(
        &self,
        scope: &RequestScope,
        filter: &ArtifactFilter,
        page: Pagination,
    ) -> Result<(Vec<Release>, u64), StoreError> {
        self.with_tenant(scope, |state| {
            let members: Vec<Artifact> = state
                .artifacts
                .iter()
                .filter(|a| filter.name.as_ref().is_none_or(|name| &a.name == name))
                .cloned()
                .collect();
            let releases = Release::group(members);
            let total = releases.len() as u64;
            Ok((paginate(releases, page), total))
        })
    }

    async fn storage_usage(&self, scope: &RequestScope) -> Result<u64, StoreError> {
        self.with_tenant(scope, |state| {
            Ok(state.artifacts.iter().map(|a| a.size).sum())
        })
    }

    async fn insert_deployment(
        &self,
        scope: &RequestScope,
        deployment: &Deployment,
    ) -> Result<(), StoreError> {
        self.with_tenant(scope, |state| {
            if state.deployments.contains_key(&deployment.id) {
                return Err(StoreError::Conflict("deployment id already exists".to_string()));
            }
            state.deployments.insert(deployment.id, deployment.clone());
            Ok(())
        })
    }

    async fn deployment(
        &self,
        scope: &RequestScope,
        id: DeploymentId,
    ) -> Result<Option<Deployment>, StoreError> {
        self.with_tenant(scope, |state| Ok(state.deployments.get(&id).cloned()))
    }

    async fn deployments_by_ids(
        &self,
        scope: &RequestScope,
        ids: &[DeploymentId],
    ) -> Result<Vec<Deployment>, StoreError> {
        self.with_tenant(scope, |state| {
            Ok(ids.iter().filter_map(|id| state.deployments.get(id).cloned()).collect())
        })
    }

    async fn list_deployments(
        &self,
        scope: &RequestScope,
        filter: &DeploymentFilter,
        page: Pagination,
    ) -> Result<(Vec<Deployment>, u64), StoreError> {
        self.with_tenant(scope, |state| {
            let mut rows: Vec<Deployment> = state
                .deployments
                .values()
                .filter(|d| {
                    filter.name.as_ref().is_none_or(|name| d.name.contains(name.as_str()))
                        && (!filter.unfinished_only || d.finished.is_none())
                })
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.created.cmp(&a.created));
            let total = rows.len() as u64;
            Ok((paginate(rows, page), total))
        })
    }

    async fn find_unfinished_by_id(
        &self,
        scope: &RequestScope,
        id: DeploymentId,
    ) -> Result<Option<Deployment>, StoreError> {
        self.with_tenant(scope, |state| {
            Ok(state.deployments.get(&id).filter(|d| d.finished.is_none()).cloned())
        })
    }

    async fn exist_unfinished_by_artifact_id(
        &self,
        scope: &RequestScope,
        artifact_id: ArtifactId,
    ) -> Result<bool, StoreError> {
        self.with_tenant(scope, |state| {
            Ok(state.device_deployments.iter().any(|row| {
                row.artifact_id == Some(artifact_id)
                    && state
                        .deployments
                        .get(&row.deployment_id)
                        .is_some_and(|d| d.finished.is_none())
            }))
        })
    }

    async fn set_deployment_paused(
        &self,
        scope: &RequestScope,
        id: DeploymentId,
        paused: bool,
    ) -> Result<bool, StoreError> {
        self.with_tenant(scope, |state| {
            match state.deployments.get_mut(&id).filter(|d| d.finished.is_none()) {
                Some(deployment) => {
                    deployment.paused = paused;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    async fn insert_device_deployments(
        &self,
        scope: &RequestScope,
        rows: &[DeviceDeployment],
    ) -> Result<u64, StoreError> {
        self.with_tenant(scope, |state| {
            let mut inserted = 0u64;
            for row in rows {
                let duplicate = state.device_deployments.iter().any(|existing| {
                    existing.device_id == row.device_id
                        && existing.deployment_id == row.deployment_id
                });
                if duplicate {
                    continue;
                }
                state.device_deployments.push(row.clone());
                inserted += 1;
            }
            Ok(inserted)
        })
    }

    async fn device_deployment(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<Option<DeviceDeployment>, StoreError> {
        self.with_tenant(scope, |state| {
            Ok(state.device_deployments.iter().find(|row| row.id == id).cloned())
        })
    }

    async fn device_deployments(
        &self,
        scope: &RequestScope,
        query: &DeviceDeploymentQuery,
    ) -> Result<Vec<DeviceDeployment>, StoreError> {
        self.with_tenant(scope, |state| {
            let mut rows: Vec<DeviceDeployment> = state
                .device_deployments
                .iter()
                .filter(|row| {
                    query.deployment_id.is_none_or(|id| row.deployment_id == id)
                        && (!query.active_only || row.status.is_active())
                        && (query.include_finished
                            || state
                                .deployments
                                .get(&row.deployment_id)
                                .is_none_or(|d| d.finished.is_none()))
                })
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
            let skipped = rows.into_iter().skip(usize::try_from(query.skip).unwrap_or(0));
            let rows: Vec<DeviceDeployment> = if query.limit == 0 {
                skipped.collect()
            } else {
                skipped.take(usize::try_from(query.limit).unwrap_or(usize::MAX)).collect()
            };
            Ok(rows)
        })
    }

    async fn find_oldest_active(
        &self,
        scope: &RequestScope,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceDeployment>, StoreError> {
        self.with_tenant(scope, |state| {
            let mut rows: Vec<&DeviceDeployment> = state
                .device_deployments
                .iter()
                .filter(|row| &row.device_id == device_id && row.status.is_active())
                .collect();
            rows.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
            Ok(rows.first().map(|row| (*row).clone()))
        })
    }

    async fn transition_device_deployment(
        &self,
        scope: &RequestScope,
        request: &TransitionRequest,
    ) -> Result<Option<DeviceDeployment>, StoreError> {
        self.with_tenant(scope, |state| apply_transition(state, request))
    }

    async fn increment_deliveries(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<(), StoreError> {
        self.with_tenant(scope, |state| {
            let row = state
                .device_deployments
                .iter_mut()
                .find(|row| row.id == id)
                .ok_or(StoreError::NotFound)?;
            row.deliveries = row.deliveries.saturating_add(1);
            Ok(())
        })
    }

    async fn abort_device_deployments(
        &self,
        scope: &RequestScope,
        deployment_id: DeploymentId,
        now: OffsetDateTime,
    ) -> Result<u64, StoreError> {
        self.with_tenant(scope, |state| {
            if let Some(deployment) = state.deployments.get_mut(&deployment_id) {
                deployment.aborted = true;
                deployment.paused = false;
            }
            let active: Vec<DeviceDeploymentId> = state
                .device_deployments
                .iter()
                .filter(|row| row.deployment_id == deployment_id && row.status.is_active())
                .map(|row| row.id)
                .collect();
            let mut aborted = 0u64;
            for id in active {
                let request = TransitionRequest {
                    id,
                    from: DeviceDeploymentStatus::ACTIVE.to_vec(),
                    to: DeviceDeploymentStatus::Aborted,
                    substate: None,
                    now,
                    phase_index: None,
                    increment_retries: false,
                };
                if apply_transition(state, &request)?.is_some() {
                    aborted += 1;
                }
            }
            Ok(aborted)
        })
    }

    async fn decommission_device(
        &self,
        scope: &RequestScope,
        device_id: &DeviceId,
        now: OffsetDateTime,
    ) -> Result<u64, StoreError> {
        self.with_tenant(scope, |state| {
            let active: Vec<DeviceDeploymentId> = state
                .device_deployments
                .iter()
                .filter(|row| &row.device_id == device_id && row.status.is_active())
                .map(|row| row.id)
                .collect();
            let mut affected = 0u64;
            for id in active {
                let request = TransitionRequest {
                    id,
                    from: DeviceDeploymentStatus::ACTIVE.to_vec(),
                    to: DeviceDeploymentStatus::Decommissioned,
                    substate: None,
                    now,
                    phase_index: None,
                    increment_retries: false,
                };
                if apply_transition(state, &request)?.is_some() {
                    affected += 1;
                }
            }
            Ok(affected)
        })
    }

    async fn set_log_available(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<(), StoreError> {
        self.with_tenant(scope, |state| {
            let row = state
                .device_deployments
                .iter_mut()
                .find(|row| row.id == id)
                .ok_or(StoreError::NotFound)?;
            row.is_log_available = true;
            Ok(())
        })
    }

    async fn save_log(
        &self,
        scope: &RequestScope,
        log: &DeviceDeploymentLog,
    ) -> Result<(), StoreError> {
        self.with_tenant(scope, |state| {
            if state.logs.contains_key(&log.device_deployment_id) {
                return Err(StoreError::Conflict("log already exists".to_string()));
            }
            state.logs.insert(log.device_deployment_id, log.clone());
            Ok(())
        })
    }

    async fn log(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<Option<DeviceDeploymentLog>, StoreError> {
        self.with_tenant(scope, |state| Ok(state.logs.get(&id).cloned()))
    }

    async fn limit(
        &self,
        scope: &RequestScope,
        name: &str,
    ) -> Result<Option<Limit>, StoreError> {
        self.with_tenant(scope, |state| Ok(state.limits.get(name).cloned()))
    }

    async fn upsert_limit(&self, scope: &RequestScope, limit: &Limit) -> Result<(), StoreError> {
        self.with_tenant(scope, |state| {
            state.limits.insert(limit.name.clone(), limit.clone());
            Ok(())
        })
    }

    async fn insert_upload_intent(
        &self,
        scope: &RequestScope,
        intent: &UploadIntent,
    ) -> Result<(), StoreError> {
        self.with_tenant(scope, |state| {
            if state.uploads.iter().any(|u| u.artifact_id == intent.artifact_id) {
                return Err(StoreError::Conflict("upload intent already exists".to_string()));
            }
            state.uploads.push(intent.clone());
            Ok(())
        })
    }

    async fn expired_upload_intents(
        &self,
        before: OffsetDateTime,
        limit: u64,
    ) -> Result<Vec<UploadIntent>, StoreError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| StoreError::Internal("store lock poisoned".to_string()))?;
        let mut expired: Vec<UploadIntent> = guard
            .values()
            .flat_map(|state| state.uploads.iter())
            .filter(|intent| intent.expire < before)
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.expire.cmp(&b.expire));
        if limit > 0 {
            expired.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(expired)
    }

    async fn delete_upload_intent(
        &self,
        scope: &RequestScope,
        artifact_id: ArtifactId,
    ) -> Result<(), StoreError> {
        self.with_tenant(scope, |state| {
            state.uploads.retain(|u| u.artifact_id != artifact_id);
            Ok(())
        })
    }

    async fn migrate(&self, scope: &RequestScope) -> Result<(), StoreError> {
        self.with_tenant(scope, |_state| Ok(()))
    }

    async fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Slices one page out of a fully-sorted row set.
fn paginate<T>(rows: Vec<T>, page: Pagination) -> Vec<T> {
    rows.into_iter()
        .skip(usize::try_from(page.skip()).unwrap_or(0))
        .take(usize::try_from(page.limit()).unwrap_or(usize::MAX))
        .collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
