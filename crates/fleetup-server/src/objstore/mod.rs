// crates/fleetup-server/src/objstore/mod.rs
// ============================================================================
// Module: Object Store Backends
// Description: Production implementations of the object-store port.
// Purpose: House the S3 backend behind the backend-agnostic trait.
// Dependencies: crate submodules
// ============================================================================

//! ## Overview
//! Only the S3 backend ships today; S3-compatible stores are reached via a
//! custom endpoint with path-style addressing. The in-memory backend used
//! by tests lives in `fleetup-core` next to the port definition.

mod s3;

pub use s3::S3ObjectStore;
