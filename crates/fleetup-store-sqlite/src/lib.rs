// crates/fleetup-store-sqlite/src/lib.rs
// ============================================================================
// Module: Fleetup SQLite Store
// Description: Durable DataStore backend over SQLite WAL.
// Purpose: Persist deployment metadata with indexed, predicated writes.
// Dependencies: fleetup-core, rusqlite, serde_json, tokio
// ============================================================================

//! ## Overview
//! The SQLite backend stores each entity as a canonical JSON document next
//! to the columns the query catalogue sorts and filters on. Uniqueness is
//! enforced by unique indexes (artifact `(name, device_type)` pairs,
//! device-deployment `(deployment, device)` pairs); every status
//! transition runs in one transaction that also moves the deployment
//! counters and finish timestamp, which gives the same linearizable
//! per-row semantics the in-memory reference store provides.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod store;

pub use store::SqliteDataStore;
pub use store::SqliteStoreConfig;
