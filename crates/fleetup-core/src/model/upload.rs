// crates/fleetup-core/src/model/upload.rs
// ============================================================================
// Module: Upload Intent Model
// Description: Transient rows gating direct-upload blob cleanup.
// Purpose: Track presigned uploads until a matching artifact row commits.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! A direct upload hands the client a presigned PUT URL before any artifact
//! row exists. The upload intent records the reserved artifact id and an
//! expiry; the storage daemon reaps blobs whose intent expired without a
//! matching artifact insert.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::model::identifiers::ArtifactId;
use crate::model::identifiers::TenantId;

// ============================================================================
// SECTION: Upload Intent
// ============================================================================

/// Transient record of an in-flight direct upload.
///
/// # Invariants
/// - `artifact_id` is unique across intents and reserves the object key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadIntent {
    /// Reserved artifact id; determines the object key.
    pub artifact_id: ArtifactId,
    /// Tenant that requested the upload.
    pub tenant: TenantId,
    /// Wall-clock expiry after which the blob becomes reapable.
    #[serde(with = "time::serde::rfc3339")]
    pub expire: OffsetDateTime,
}
