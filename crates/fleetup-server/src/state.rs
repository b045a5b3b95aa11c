// crates/fleetup-server/src/state.rs
// ============================================================================
// Module: Application State
// Description: Shared capability set handed to every handler.
// Purpose: Wire the ports, the vendor, and the config snapshot together.
// Dependencies: fleetup-core, crate::presign, crate::config
// ============================================================================

//! ## Overview
//! The application state is the only thing handlers receive besides the
//! request itself: the metadata store, the object store, the external
//! service clients, the download-URL vendor, and the immutable config
//! snapshot. Everything inside is behind an `Arc`, read-only after
//! startup, and safe to clone per request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use fleetup_core::DataStore;
use fleetup_core::InventoryClient;
use fleetup_core::ObjectStore;
use fleetup_core::ReportingClient;
use fleetup_core::WorkflowsClient;

use crate::config::FleetupConfig;
use crate::presign::PresignVendor;

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// Metadata store.
    pub store: Arc<dyn DataStore>,
    /// Object store for artifact blobs.
    pub objects: Arc<dyn ObjectStore>,
    /// Inventory client.
    pub inventory: Arc<dyn InventoryClient>,
    /// Workflows client.
    pub workflows: Arc<dyn WorkflowsClient>,
    /// Reporting client, preferred for search when configured.
    pub reporting: Option<Arc<dyn ReportingClient>>,
    /// Download URL vendor.
    pub vendor: Arc<PresignVendor>,
    /// Configuration snapshot, read-only after startup.
    pub config: Arc<FleetupConfig>,
}
