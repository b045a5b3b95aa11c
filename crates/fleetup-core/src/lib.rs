// crates/fleetup-core/src/lib.rs
// ============================================================================
// Module: Fleetup Core
// Description: Domain model, ports, and orchestration logic for OTA rollouts.
// Purpose: Define the backend-agnostic heart of the deployment service.
// Dependencies: async-trait, serde, thiserror, time, uuid
// ============================================================================

//! ## Overview
//! `fleetup-core` holds everything the deployment service knows that is not
//! tied to a concrete backend: the domain model (artifacts, releases,
//! deployments, device-deployments), the device/deployment state machines,
//! the ports for object storage, metadata storage, and external services,
//! and the planner, device-control, and rollout subsystems that operate on
//! those ports. In-memory port implementations live here so every higher
//! layer can be tested without infrastructure.
//!
//! The core never reads wall-clock time; callers pass explicit `now` values
//! into every time-dependent operation.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod control;
pub mod memstore;
pub mod model;
pub mod planner;
pub mod ports;
pub mod rollout;
pub mod scope;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use control::ArtifactPayload;
pub use control::ControlError;
pub use control::DeviceControl;
pub use control::NextRequest;
pub use control::UpdateInstructions;
pub use memstore::InMemoryDataStore;
pub use memstore::InMemoryObjectStore;
pub use model::artifact::Artifact;
pub use model::artifact::ArtifactInfo;
pub use model::artifact::Release;
pub use model::artifact::Update;
pub use model::artifact::UpdateFile;
pub use model::deployment::Deployment;
pub use model::deployment::DeploymentConstructor;
pub use model::deployment::DeploymentStats;
pub use model::deployment::DeploymentStatus;
pub use model::deployment::DeploymentType;
pub use model::deployment::DeviceFilter;
pub use model::deployment::DeviceSelector;
pub use model::deployment::Phase;
pub use model::deployment::PhaseCap;
pub use model::deployment::PhaseSpec;
pub use model::device::DeviceDeployment;
pub use model::device::DeviceDeploymentLog;
pub use model::device::DeviceDeploymentStatus;
pub use model::device::LogMessage;
pub use model::identifiers::ArtifactId;
pub use model::identifiers::DeploymentId;
pub use model::identifiers::DeviceDeploymentId;
pub use model::identifiers::DeviceId;
pub use model::identifiers::RequestId;
pub use model::identifiers::TenantId;
pub use model::limits::Limit;
pub use model::limits::StorageUsage;
pub use model::upload::UploadIntent;
pub use planner::PlanError;
pub use planner::Planner;
pub use ports::clients::DeviceListItem;
pub use ports::clients::DeviceSearch;
pub use ports::clients::GenerateArtifactJob;
pub use ports::clients::InventoryClient;
pub use ports::clients::InventoryError;
pub use ports::clients::ReindexDeploymentJob;
pub use ports::clients::ReportingClient;
pub use ports::clients::WorkflowsClient;
pub use ports::clients::WorkflowsError;
pub use ports::data_store::ArtifactFilter;
pub use ports::data_store::DataStore;
pub use ports::data_store::DeploymentFilter;
pub use ports::data_store::DeviceDeploymentQuery;
pub use ports::data_store::Pagination;
pub use ports::data_store::SortOrder;
pub use ports::data_store::StoreError;
pub use ports::data_store::TransitionRequest;
pub use ports::object_store::DownloadLink;
pub use ports::object_store::DownloadUrlVendor;
pub use ports::object_store::ObjectKey;
pub use ports::object_store::ObjectReader;
pub use ports::object_store::ObjectStat;
pub use ports::object_store::ObjectStore;
pub use ports::object_store::ObjectStoreError;
pub use ports::object_store::PresignedRequest;
pub use ports::object_store::validate_presign_ttl;
pub use rollout::Admission;
pub use rollout::DenyReason;
pub use scope::RequestScope;
