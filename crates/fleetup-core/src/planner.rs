// crates/fleetup-core/src/planner.rs
// ============================================================================
// Module: Deployment Planner
// Description: Resolves a deployment constructor into per-device rows.
// Purpose: Expand selectors, match artifacts, and materialise deployments.
// Dependencies: crate::ports, crate::model
// ============================================================================

//! ## Overview
//! The planner turns an abstract deployment specification into stored
//! rows: it resolves the target device set (explicit ids, inventory group,
//! or dynamic filter), looks up device types in batches, selects the
//! matching artifact per device, and writes one device-deployment per
//! device. Devices without a compatible artifact get a synthetic terminal
//! `noartifact` row; a deployment whose every row is terminal at creation
//! is finished immediately.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;

use time::OffsetDateTime;

use crate::model::artifact::Artifact;
use crate::model::deployment::Deployment;
use crate::model::deployment::DeploymentConstructor;
use crate::model::deployment::DeploymentStats;
use crate::model::deployment::DeviceSelector;
use crate::model::device::DeviceDeployment;
use crate::model::identifiers::DeploymentId;
use crate::model::identifiers::DeviceId;
use crate::ports::clients::DeviceSearch;
use crate::ports::clients::InventoryClient;
use crate::ports::clients::InventoryError;
use crate::ports::clients::ReportingClient;
use crate::ports::data_store::DataStore;
use crate::ports::data_store::StoreError;
use crate::scope::RequestScope;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Page size used when expanding group and filter selectors.
const SEARCH_PAGE_SIZE: u32 = 500;
/// Upper bound on selector expansion pages, as a runaway guard.
const MAX_SEARCH_PAGES: u32 = 10_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Deployment planning errors.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The constructor failed validation.
    #[error("invalid deployment: {0}")]
    InvalidConstructor(String),
    /// The selector resolved to zero devices.
    #[error("no devices in selector")]
    NoDevicesInSelector,
    /// Metadata store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Inventory or reporting failure.
    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

// ============================================================================
// SECTION: Planner
// ============================================================================

/// Resolved target of one device before row construction.
struct DeviceTarget {
    /// Device identifier.
    device_id: DeviceId,
    /// Device type, when inventory knows it.
    device_type: Option<String>,
}

/// Deployment planner over the store and the device-facing services.
pub struct Planner<'a> {
    /// Metadata store.
    store: &'a dyn DataStore,
    /// Inventory client for device types and search fallback.
    inventory: &'a dyn InventoryClient,
    /// Reporting client, preferred for selector search when configured.
    reporting: Option<&'a dyn ReportingClient>,
}

impl<'a> Planner<'a> {
    /// Builds a planner over the given ports.
    #[must_use]
    pub const fn new(
        store: &'a dyn DataStore,
        inventory: &'a dyn InventoryClient,
        reporting: Option<&'a dyn ReportingClient>,
    ) -> Self {
        Self {
            store,
            inventory,
            reporting,
        }
    }

    /// Creates a deployment and its device-deployment rows.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] when validation, selector resolution, or
    /// persistence fails.
    pub async fn create_deployment(
        &self,
        scope: &RequestScope,
        constructor: &DeploymentConstructor,
        now: OffsetDateTime,
    ) -> Result<Deployment, PlanError> {
        constructor.validate().map_err(PlanError::InvalidConstructor)?;

        let targets = self.resolve_targets(scope, constructor).await?;
        if targets.is_empty() {
            return Err(PlanError::NoDevicesInSelector);
        }

        let deployment_id = DeploymentId::random();
        let mut artifact_cache: HashMap<String, Option<Artifact>> = HashMap::new();
        let mut rows = Vec::with_capacity(targets.len());
        let mut stats = DeploymentStats::default();
        for target in &targets {
            let artifact = match &target.device_type {
                Some(device_type) => {
                    self.artifact_for_type(scope, constructor, device_type, &mut artifact_cache)
                        .await?
                }
                None => None,
            };
            let row = match artifact {
                Some(artifact) => DeviceDeployment::pending(
                    deployment_id,
                    target.device_id.clone(),
                    artifact.id,
                    target.device_type.clone(),
                    Some(artifact.size),
                    now,
                ),
                None => DeviceDeployment::no_artifact(
                    deployment_id,
                    target.device_id.clone(),
                    target.device_type.clone(),
                    now,
                ),
            };
            stats.increment(row.status);
            rows.push(row);
        }

        let device_count = u32::try_from(rows.len()).unwrap_or(u32::MAX);
        let all_terminal = rows.iter().all(|row| row.status.is_terminal());
        let deployment = Deployment {
            id: deployment_id,
            name: constructor.name.clone(),
            artifact_name: constructor.artifact_name.clone(),
            artifacts: constructor.artifacts.clone(),
            selector: constructor.selector.clone(),
            created: now,
            finished: all_terminal.then_some(now),
            device_count,
            max_devices: constructor.max_devices,
            retries: constructor.retries,
            force_installation: constructor.force_installation,
            phases: constructor.resolve_phases(device_count, now),
            stats,
            paused: false,
            aborted: false,
            deployment_type: constructor.deployment_type,
            update_control_map: constructor.update_control_map.clone(),
        };

        self.store.insert_deployment(scope, &deployment).await?;
        self.store.insert_device_deployments(scope, &rows).await?;
        Ok(deployment)
    }

    /// Resolves the selector into device targets with de-duplicated ids.
    async fn resolve_targets(
        &self,
        scope: &RequestScope,
        constructor: &DeploymentConstructor,
    ) -> Result<Vec<DeviceTarget>, PlanError> {
        match &constructor.selector {
            DeviceSelector::Devices(ids) => self.resolve_explicit(scope, ids).await,
            DeviceSelector::Group(group) => {
                self.resolve_search(
                    scope,
                    DeviceSearch {
                        page: 1,
                        per_page: SEARCH_PAGE_SIZE,
                        filters: Vec::new(),
                        group: Some(group.clone()),
                        device_ids: Vec::new(),
                    },
                )
                .await
            }
            DeviceSelector::Filter(filters) => {
                self.resolve_search(
                    scope,
                    DeviceSearch {
                        page: 1,
                        per_page: SEARCH_PAGE_SIZE,
                        filters: filters.clone(),
                        group: None,
                        device_ids: Vec::new(),
                    },
                )
                .await
            }
        }
    }

    /// Resolves an explicit id list via batched device-type lookups.
    async fn resolve_explicit(
        &self,
        scope: &RequestScope,
        ids: &[DeviceId],
    ) -> Result<Vec<DeviceTarget>, PlanError> {
        let mut unique: Vec<DeviceId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(id) {
                unique.push(id.clone());
            }
        }
        let types = self.inventory.get_device_types(scope, &unique).await?;
        Ok(unique
            .into_iter()
            .map(|device_id| {
                let device_type = types.get(&device_id).cloned();
                DeviceTarget {
                    device_id,
                    device_type,
                }
            })
            .collect())
    }

    /// Expands a group or filter selector through paged search.
    async fn resolve_search(
        &self,
        scope: &RequestScope,
        mut search: DeviceSearch,
    ) -> Result<Vec<DeviceTarget>, PlanError> {
        let mut targets: Vec<DeviceTarget> = Vec::new();
        loop {
            let (items, total) = match self.reporting {
                Some(reporting) => reporting.search(scope, &search).await?,
                None => self.inventory.search_devices(scope, &search).await?,
            };
            let empty_page = items.is_empty();
            for item in items {
                if targets.iter().any(|t| t.device_id == item.id) {
                    continue;
                }
                targets.push(DeviceTarget {
                    device_id: item.id,
                    device_type: item.device_type,
                });
            }
            if empty_page
                || targets.len() as u64 >= total
                || search.page >= MAX_SEARCH_PAGES
            {
                break;
            }
            search.page += 1;
        }
        self.fill_missing_types(scope, &mut targets).await?;
        Ok(targets)
    }

    /// Batched device-type lookup for devices the search did not annotate.
    async fn fill_missing_types(
        &self,
        scope: &RequestScope,
        targets: &mut [DeviceTarget],
    ) -> Result<(), PlanError> {
        let missing: Vec<DeviceId> = targets
            .iter()
            .filter(|t| t.device_type.is_none())
            .map(|t| t.device_id.clone())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let types = self.inventory.get_device_types(scope, &missing).await?;
        for target in targets.iter_mut() {
            if target.device_type.is_none() {
                target.device_type = types.get(&target.device_id).cloned();
            }
        }
        Ok(())
    }

    /// Selects the artifact serving `device_type`, with memoisation.
    async fn artifact_for_type(
        &self,
        scope: &RequestScope,
        constructor: &DeploymentConstructor,
        device_type: &str,
        cache: &mut HashMap<String, Option<Artifact>>,
    ) -> Result<Option<Artifact>, PlanError> {
        if let Some(cached) = cache.get(device_type) {
            return Ok(cached.clone());
        }
        let artifact = if constructor.artifacts.is_empty() {
            self.store
                .artifact_by_name_and_device_type(scope, &constructor.artifact_name, device_type)
                .await?
        } else {
            self.store
                .artifact_by_ids_and_device_type(scope, &constructor.artifacts, device_type)
                .await?
        };
        cache.insert(device_type.to_string(), artifact.clone());
        Ok(artifact)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
