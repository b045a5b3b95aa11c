// crates/fleetup-core/src/ports/clients.rs
// ============================================================================
// Module: External Service Ports
// Description: Typed clients for inventory, workflows, and reporting.
// Purpose: Abstract the sibling microservices behind tenant-aware traits.
// Dependencies: async-trait, serde, thiserror
// ============================================================================

//! ## Overview
//! The deployment service consults three collaborators: inventory (device
//! attributes and search), workflows (asynchronous job triggers), and
//! reporting (search mirror, preferred when configured). Only their RPC
//! contracts are modelled here; transport lives with the implementations.
//! Every call carries the tenant identity and request id from the request
//! scope.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::model::deployment::DeviceFilter;
use crate::model::identifiers::DeploymentId;
use crate::model::identifiers::DeviceDeploymentId;
use crate::model::identifiers::DeviceId;
use crate::scope::RequestScope;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Device-type lookups are batched at most this many ids per call.
pub const DEVICE_TYPE_BATCH: usize = 50;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Inventory client errors.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    /// The device exists but carries no `device_type` attribute.
    #[error("device type unknown for device {0}")]
    DeviceTypeUnknown(DeviceId),
    /// Transport or upstream failure.
    #[error("inventory unavailable: {0}")]
    Unavailable(String),
}

/// Workflows client errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowsError {
    /// The named workflow is not defined upstream (HTTP 404).
    #[error("workflow not defined: {0}")]
    WorkflowUndefined(String),
    /// Transport or upstream failure.
    #[error("workflows unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// SECTION: Search Types
// ============================================================================

/// Device search request shared by inventory and reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSearch {
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub per_page: u32,
    /// Attribute predicates; all must match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<DeviceFilter>,
    /// Restrict to members of this inventory group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Restrict to these device ids (batched attribute lookups).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_ids: Vec<DeviceId>,
}

/// One device row of a search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceListItem {
    /// Device identifier.
    pub id: DeviceId,
    /// Device type attribute when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
}

// ============================================================================
// SECTION: Workflow Jobs
// ============================================================================

/// Remote artifact-generation job payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateArtifactJob {
    /// Reserved artifact id the generator must commit to.
    pub artifact_id: String,
    /// Release name of the generated artifact.
    pub name: String,
    /// Device types the generated artifact will be compatible with.
    pub device_types_compatible: Vec<String>,
    /// Generator type tag.
    #[serde(rename = "type")]
    pub generator: String,
    /// Opaque generator arguments.
    #[serde(default)]
    pub args: String,
}

/// Reindex job for one device-deployment pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexDeploymentJob {
    /// Device identifier.
    pub device_id: DeviceId,
    /// Deployment identifier.
    pub deployment_id: DeploymentId,
    /// Device-deployment row identifier.
    pub id: DeviceDeploymentId,
}

// ============================================================================
// SECTION: Ports
// ============================================================================

/// Inventory service capability set.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Looks up the `device_type` attribute of one device.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::DeviceTypeUnknown`] when the attribute is
    /// absent.
    async fn get_device_type(
        &self,
        scope: &RequestScope,
        device_id: &DeviceId,
    ) -> Result<String, InventoryError>;

    /// Looks up device types for many devices, batched internally.
    ///
    /// Devices without the attribute are absent from the result map.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Unavailable`] on transport failure.
    async fn get_device_types(
        &self,
        scope: &RequestScope,
        device_ids: &[DeviceId],
    ) -> Result<HashMap<DeviceId, String>, InventoryError>;

    /// Searches devices by group or filter, paged.
    ///
    /// Returns the page of devices and the total match count.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Unavailable`] on transport failure.
    async fn search_devices(
        &self,
        scope: &RequestScope,
        search: &DeviceSearch,
    ) -> Result<(Vec<DeviceListItem>, u64), InventoryError>;

    /// Probes service reachability.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Unavailable`] when the service is down.
    async fn check_health(&self) -> Result<(), InventoryError>;
}

/// Workflows service capability set.
#[async_trait]
pub trait WorkflowsClient: Send + Sync {
    /// Starts the remote artifact-generation workflow.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowsError`] when the workflow cannot be started.
    async fn start_generate_artifact(
        &self,
        scope: &RequestScope,
        job: &GenerateArtifactJob,
    ) -> Result<(), WorkflowsError>;

    /// Triggers a reporting reindex for one device.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowsError`] when the workflow cannot be started.
    async fn start_reindex_reporting(
        &self,
        scope: &RequestScope,
        device_id: &DeviceId,
    ) -> Result<(), WorkflowsError>;

    /// Triggers a reporting reindex for one device-deployment pair.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowsError`] when the workflow cannot be started.
    async fn start_reindex_reporting_deployment(
        &self,
        scope: &RequestScope,
        job: &ReindexDeploymentJob,
    ) -> Result<(), WorkflowsError>;

    /// Batch variant of the device-deployment reindex trigger.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowsError`] when the workflow cannot be started.
    async fn start_reindex_reporting_deployment_batch(
        &self,
        scope: &RequestScope,
        jobs: &[ReindexDeploymentJob],
    ) -> Result<(), WorkflowsError>;

    /// Probes service reachability.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowsError::Unavailable`] when the service is down.
    async fn check_health(&self) -> Result<(), WorkflowsError>;
}

/// Reporting service capability set.
///
/// Mirrors the inventory search; preferred over inventory for selector
/// resolution when configured.
#[async_trait]
pub trait ReportingClient: Send + Sync {
    /// Searches devices by group or filter, paged.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Unavailable`] on transport failure.
    async fn search(
        &self,
        scope: &RequestScope,
        search: &DeviceSearch,
    ) -> Result<(Vec<DeviceListItem>, u64), InventoryError>;

    /// Probes service reachability.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Unavailable`] when the service is down.
    async fn check_health(&self) -> Result<(), InventoryError>;
}
