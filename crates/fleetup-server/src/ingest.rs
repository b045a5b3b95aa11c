// crates/fleetup-server/src/ingest.rs
// ============================================================================
// Module: Ingestion Pipeline
// Description: Single-pass multipart ingestion: tee → parse ∥ upload.
// Purpose: Persist an artifact blob and its parsed metadata atomically.
// Dependencies: fleetup-artifact, fleetup-core, bytes, tokio
// ============================================================================

//! ## Overview
//! One upstream read drives two consumers: the artifact parser and the
//! object-store upload, each fed through a bounded in-process pipe so
//! back-pressure propagates naturally and the payload never accumulates
//! in memory. When either consumer fails, or the metadata violates the
//! uniqueness invariant, the partially-written object is deleted
//! best-effort and the first error wins. The uniqueness race between
//! concurrent ingestions is decided by the store's unique index, not by
//! any lock here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing::warn;

use fleetup_artifact::ArtifactMeta;
use fleetup_artifact::ParseError;
use fleetup_core::Artifact;
use fleetup_core::ArtifactId;
use fleetup_core::DataStore;
use fleetup_core::ObjectKey;
use fleetup_core::ObjectStore;
use fleetup_core::PresignedRequest;
use fleetup_core::RequestScope;
use fleetup_core::StoreError;
use fleetup_core::UploadIntent;

use crate::error::ApiError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Capacity of each in-process pipe feeding a consumer.
const PIPE_CAPACITY: usize = 256 * 1024;

// ============================================================================
// SECTION: Input Types
// ============================================================================

/// Chunked byte source of the artifact part.
#[async_trait]
pub trait UploadSource: Send {
    /// Pulls the next chunk; `None` means end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error description when the upstream read fails.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, String>;
}

/// Metadata fields accepted alongside the artifact part.
#[derive(Debug, Clone, Default)]
pub struct UploadMeta {
    /// Operator-reserved artifact id, when provided.
    pub artifact_id: Option<ArtifactId>,
    /// Operator description.
    pub description: Option<String>,
    /// Declared payload size, rejected early when over the cap.
    pub declared_size: Option<u64>,
    /// Declared release name; must match the parsed header when set.
    pub declared_name: Option<String>,
    /// Declared compatibility; must match the parsed header when set.
    pub declared_device_types: Vec<String>,
}

/// Result of a completed ingestion.
#[derive(Debug, Clone, Copy)]
pub struct IngestOutcome {
    /// The new artifact id.
    pub artifact_id: ArtifactId,
    /// Stored blob size in bytes.
    pub size: u64,
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Ingests one artifact stream end to end.
///
/// # Errors
///
/// Returns [`ApiError::ArtifactTooLarge`] over the size cap,
/// [`ApiError::InvalidInput`] on parse or declaration mismatches, and
/// [`ApiError::ArtifactNotUnique`] when the uniqueness invariant fails.
pub async fn ingest_artifact(
    store: &dyn DataStore,
    objects: Arc<dyn ObjectStore>,
    scope: &RequestScope,
    meta: UploadMeta,
    source: &mut dyn UploadSource,
    max_image_size: u64,
    now: OffsetDateTime,
) -> Result<IngestOutcome, ApiError> {
    if let Some(declared) = meta.declared_size
        && declared > max_image_size
    {
        return Err(ApiError::ArtifactTooLarge);
    }

    let artifact_id = meta.artifact_id.unwrap_or_else(ArtifactId::random);
    let key = ObjectKey::for_artifact(&scope.tenant, artifact_id);

    // Tee the single upstream read into both consumers.
    let (mut parser_pipe, parser_end) = tokio::io::duplex(PIPE_CAPACITY);
    let (mut store_pipe, store_end) = tokio::io::duplex(PIPE_CAPACITY);
    let parse_task = tokio::spawn(fleetup_artifact::parse(parser_end));
    let put_task = {
        let objects = Arc::clone(&objects);
        let scope = scope.clone();
        let key = key.clone();
        tokio::spawn(async move { objects.put(&scope, &key, Box::new(store_end)).await })
    };

    let mut total: u64 = 0;
    let mut pump_error: Option<ApiError> = None;
    loop {
        let chunk = match source.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(message) => {
                pump_error = Some(ApiError::InvalidInput(format!("upload read failed: {message}")));
                break;
            }
        };
        total += chunk.len() as u64;
        if total > max_image_size {
            pump_error = Some(ApiError::ArtifactTooLarge);
            break;
        }
        // A write failure means the consumer already failed; its own error
        // is more precise, so just stop pumping.
        if parser_pipe.write_all(&chunk).await.is_err() {
            break;
        }
        if store_pipe.write_all(&chunk).await.is_err() {
            break;
        }
    }
    drop(parser_pipe);
    drop(store_pipe);

    let parsed = parse_task
        .await
        .map_err(|err| ApiError::Internal(format!("parse task failed: {err}")));
    let stored = put_task
        .await
        .map_err(|err| ApiError::Internal(format!("upload task failed: {err}")));

    let failure = pump_error.or_else(|| match &parsed {
        Ok(Err(err)) => Some(parse_error(err)),
        Err(join) => Some(ApiError::Internal(join.to_string())),
        Ok(Ok(_)) => match &stored {
            Ok(Err(err)) => Some(ApiError::Internal(format!("object upload failed: {err}"))),
            Err(join) => Some(ApiError::Internal(join.to_string())),
            Ok(Ok(_)) => None,
        },
    });
    if let Some(error) = failure {
        cleanup_object(&objects, scope, &key).await;
        return Err(error);
    }
    let Ok(Ok(parsed)) = parsed else {
        cleanup_object(&objects, scope, &key).await;
        return Err(ApiError::Internal("parse outcome unavailable".to_string()));
    };
    let Ok(Ok(size)) = stored else {
        cleanup_object(&objects, scope, &key).await;
        return Err(ApiError::Internal("upload outcome unavailable".to_string()));
    };

    if let Err(error) = validate_declarations(&meta, &parsed) {
        cleanup_object(&objects, scope, &key).await;
        return Err(error);
    }

    let artifact = Artifact {
        id: artifact_id,
        name: parsed.name,
        description: meta.description,
        device_types_compatible: parsed.device_types_compatible,
        updates: parsed.updates,
        signed: parsed.signed,
        info: parsed.info,
        size,
        modified: now,
    };
    match store.insert_artifact(scope, &artifact).await {
        Ok(()) => {
            debug!(
                request_id = scope.request_id.as_str(),
                artifact = %artifact_id,
                size,
                "artifact ingested"
            );
            Ok(IngestOutcome {
                artifact_id,
                size,
            })
        }
        Err(StoreError::Conflict(_)) => {
            cleanup_object(&objects, scope, &key).await;
            Err(ApiError::ArtifactNotUnique)
        }
        Err(error) => {
            cleanup_object(&objects, scope, &key).await;
            Err(error.into())
        }
    }
}

/// Maps parser failures onto the API error kinds.
fn parse_error(error: &ParseError) -> ApiError {
    match error {
        ParseError::Malformed(message) => {
            ApiError::InvalidInput(format!("artifact invalid: {message}"))
        }
        ParseError::UnsupportedVersion(version) => {
            ApiError::InvalidInput(format!("unsupported artifact version {version}"))
        }
        ParseError::Io(inner) => ApiError::InvalidInput(format!("artifact read failed: {inner}")),
    }
}

/// Cross-checks declared form fields against the parsed header.
fn validate_declarations(meta: &UploadMeta, parsed: &ArtifactMeta) -> Result<(), ApiError> {
    if let Some(declared) = &meta.declared_name
        && declared != &parsed.name
    {
        return Err(ApiError::InvalidInput(format!(
            "declared name {declared} does not match artifact header {}",
            parsed.name
        )));
    }
    if !meta.declared_device_types.is_empty() {
        let mut declared = meta.declared_device_types.clone();
        let mut parsed_types = parsed.device_types_compatible.clone();
        declared.sort();
        parsed_types.sort();
        if declared != parsed_types {
            return Err(ApiError::InvalidInput(
                "declared device types do not match artifact header".to_string(),
            ));
        }
    }
    Ok(())
}

/// Deletes a partially-written object, logging on failure.
async fn cleanup_object(objects: &Arc<dyn ObjectStore>, scope: &RequestScope, key: &ObjectKey) {
    if let Err(error) = objects.delete(scope, key).await {
        warn!(
            request_id = scope.request_id.as_str(),
            key = key.as_str(),
            error = %error,
            "orphaned object cleanup failed"
        );
    }
}

// ============================================================================
// SECTION: Direct Upload
// ============================================================================

/// Reserves an artifact id and vends a presigned direct-upload link.
///
/// The upload intent gates the storage daemon: when it expires without a
/// matching artifact row, the blob is reaped.
///
/// # Errors
///
/// Returns [`ApiError`] when the intent insert or the presign fails.
pub async fn create_direct_upload(
    store: &dyn DataStore,
    objects: &dyn ObjectStore,
    scope: &RequestScope,
    ttl: Duration,
    now: OffsetDateTime,
) -> Result<(ArtifactId, PresignedRequest), ApiError> {
    let artifact_id = ArtifactId::random();
    let intent = UploadIntent {
        artifact_id,
        tenant: scope.tenant.clone(),
        expire: now + ttl,
    };
    store.insert_upload_intent(scope, &intent).await?;
    let key = ObjectKey::for_artifact(&scope.tenant, artifact_id);
    let link = objects.presign_put(scope, &key, ttl).await?;
    Ok((artifact_id, link))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
