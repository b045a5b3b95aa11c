// crates/fleetup-core/src/model/limits.rs
// ============================================================================
// Module: Limits Model
// Description: Named tenant limits and derived storage usage.
// Purpose: Expose per-tenant quota scalars to the management API.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Limits are named scalars provisioned per tenant (currently only
//! `storage`). Usage is derived from stored artifact sizes and reported
//! next to the limit, never persisted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Canonical name of the storage limit.
pub const STORAGE_LIMIT: &str = "storage";

/// Named per-tenant limit scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    /// Limit name.
    pub name: String,
    /// Limit value; 0 means unlimited.
    pub value: u64,
}

/// Storage limit together with its derived usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    /// Configured storage limit in bytes; 0 means unlimited.
    pub limit: u64,
    /// Bytes currently consumed by stored artifacts.
    pub usage: u64,
}
