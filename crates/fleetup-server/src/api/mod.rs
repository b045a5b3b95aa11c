// crates/fleetup-server/src/api/mod.rs
// ============================================================================
// Module: HTTP Facade
// Description: Management, device, and internal API routers.
// Purpose: Thin adapters between the wire protocol and the core subsystems.
// Dependencies: crate submodules
// ============================================================================

//! ## Overview
//! The facade stays thin: handlers extract the request scope, decode the
//! wire shapes, call into the planner/control/ingestion subsystems, and
//! map errors through the shared envelope. No business rules live here.

pub mod devices;
pub mod internal;
pub mod management;

use serde::Deserialize;

use fleetup_core::Pagination;

/// Shared pagination query parameters.
///
/// Listing-specific query structs repeat these two fields instead of
/// flattening this one: the urlencoded deserializer cannot drive numeric
/// fields through `serde(flatten)`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Page size, capped at 500.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl PageQuery {
    /// Converts into the store pagination type.
    #[must_use]
    pub fn pagination(self) -> Pagination {
        clamp_pagination(self.page, self.per_page)
    }
}

/// Clamps raw page parameters into the store pagination type.
#[must_use]
pub fn clamp_pagination(page: u32, per_page: u32) -> Pagination {
    Pagination {
        page: page.max(1),
        per_page: per_page.clamp(1, 500),
    }
}

pub(crate) const fn default_page() -> u32 {
    1
}

pub(crate) const fn default_per_page() -> u32 {
    20
}
