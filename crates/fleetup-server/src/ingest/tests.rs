// crates/fleetup-server/src/ingest/tests.rs
// ============================================================================
// Module: Ingestion Pipeline Tests
// Description: Tee, cleanup, and uniqueness coverage over in-memory ports.
// Purpose: Pin the single-pass ingestion semantics.
// Dependencies: fleetup-core, tokio
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

use super::IngestOutcome;
use super::UploadMeta;
use super::UploadSource;
use super::ingest_artifact;
use crate::error::ApiError;
use fleetup_artifact::ArtifactBuilder;
use fleetup_artifact::PayloadFile;
use fleetup_artifact::UpdateBuilder;
use fleetup_core::DataStore;
use fleetup_core::InMemoryDataStore;
use fleetup_core::InMemoryObjectStore;
use fleetup_core::ObjectKey;
use fleetup_core::ObjectStore;
use fleetup_core::RequestId;
use fleetup_core::RequestScope;
use fleetup_core::TenantId;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Chunked source over a byte vector.
struct VecSource {
    /// Remaining chunks.
    chunks: Vec<Bytes>,
}

impl VecSource {
    fn new(bytes: Vec<u8>) -> Self {
        let chunks = bytes.chunks(1024).map(Bytes::copy_from_slice).rev().collect();
        Self {
            chunks,
        }
    }
}

#[async_trait]
impl UploadSource for VecSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, String> {
        Ok(self.chunks.pop())
    }
}

fn scope() -> RequestScope {
    RequestScope::new(TenantId::default_tenant(), RequestId::new("test"))
}

fn ts(unix: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix).expect("timestamp")
}

fn container(name: &str, types: &[&str]) -> Vec<u8> {
    ArtifactBuilder::new(name, types)
        .update(UpdateBuilder {
            type_info: "rootfs-image".to_string(),
            files: vec![PayloadFile {
                name: "rootfs.ext4".to_string(),
                date: ts(1_700_000_000),
                bytes: vec![0x5C; 8_192],
            }],
        })
        .signed_with(vec![0x01; 64])
        .into_bytes()
        .expect("serialize")
}

async fn ingest(
    store: &InMemoryDataStore,
    objects: &Arc<InMemoryObjectStore>,
    bytes: Vec<u8>,
    max: u64,
) -> Result<IngestOutcome, ApiError> {
    let mut source = VecSource::new(bytes);
    ingest_artifact(
        store,
        Arc::clone(objects) as Arc<dyn ObjectStore>,
        &scope(),
        UploadMeta::default(),
        &mut source,
        max,
        ts(100),
    )
    .await
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test]
async fn ingest_stores_blob_and_metadata() {
    let store = InMemoryDataStore::new();
    let objects = Arc::new(InMemoryObjectStore::new());
    let bytes = container("release-1", &["qemu", "rpi3"]);
    let expected_size = bytes.len() as u64;

    let outcome = ingest(&store, &objects, bytes, 1 << 30).await.expect("ingest");
    assert_eq!(outcome.size, expected_size);

    let scope = scope();
    let artifact = store
        .artifact_by_name_and_device_type(&scope, "release-1", "qemu")
        .await
        .expect("query")
        .expect("artifact row");
    assert_eq!(artifact.id, outcome.artifact_id);
    assert!(artifact.signed);
    assert_eq!(artifact.size, expected_size);
    assert_eq!(artifact.updates[0].files[0].size, 8_192);

    let key = ObjectKey::for_artifact(&scope.tenant, outcome.artifact_id);
    let stored = objects.bytes_of(&key).expect("blob");
    assert_eq!(stored.len(), expected_size as usize);
}

#[tokio::test]
async fn uniqueness_collision_deletes_blob_and_keeps_first() {
    let store = InMemoryDataStore::new();
    let objects = Arc::new(InMemoryObjectStore::new());
    ingest(&store, &objects, container("release-1", &["qemu", "rpi3"]), 1 << 30)
        .await
        .expect("first upload");
    assert_eq!(objects.len(), 1);

    let err = ingest(&store, &objects, container("release-1", &["rpi3"]), 1 << 30)
        .await
        .expect_err("overlapping device type");
    assert!(matches!(err, ApiError::ArtifactNotUnique));
    // The losing blob is gone; the first artifact is untouched.
    assert_eq!(objects.len(), 1);
    let survivor = store
        .artifact_by_name_and_device_type(&scope(), "release-1", "qemu")
        .await
        .expect("query");
    assert!(survivor.is_some());
}

#[tokio::test]
async fn oversized_upload_is_rejected_and_cleaned() {
    let store = InMemoryDataStore::new();
    let objects = Arc::new(InMemoryObjectStore::new());
    let err = ingest(&store, &objects, container("release-1", &["qemu"]), 64)
        .await
        .expect_err("size cap");
    assert!(matches!(err, ApiError::ArtifactTooLarge));
    assert!(objects.is_empty());
}

#[tokio::test]
async fn declared_size_over_cap_rejects_before_reading() {
    let store = InMemoryDataStore::new();
    let objects = Arc::new(InMemoryObjectStore::new());
    let mut source = VecSource::new(container("release-1", &["qemu"]));
    let meta = UploadMeta {
        declared_size: Some(1 << 40),
        ..UploadMeta::default()
    };
    let err = ingest_artifact(
        &store,
        Arc::clone(&objects) as Arc<dyn fleetup_core::ObjectStore>,
        &scope(),
        meta,
        &mut source,
        1 << 30,
        ts(100),
    )
    .await
    .expect_err("declared size");
    assert!(matches!(err, ApiError::ArtifactTooLarge));
}

#[tokio::test]
async fn garbage_stream_is_invalid_input_and_cleaned() {
    let store = InMemoryDataStore::new();
    let objects = Arc::new(InMemoryObjectStore::new());
    let err = ingest(&store, &objects, vec![0xFF; 4_096], 1 << 30)
        .await
        .expect_err("not an artifact");
    assert!(matches!(err, ApiError::InvalidInput(_)));
    assert!(objects.is_empty());
}

#[tokio::test]
async fn declared_name_mismatch_is_rejected() {
    let store = InMemoryDataStore::new();
    let objects = Arc::new(InMemoryObjectStore::new());
    let mut source = VecSource::new(container("release-1", &["qemu"]));
    let meta = UploadMeta {
        declared_name: Some("release-2".to_string()),
        ..UploadMeta::default()
    };
    let err = ingest_artifact(
        &store,
        Arc::clone(&objects) as Arc<dyn fleetup_core::ObjectStore>,
        &scope(),
        meta,
        &mut source,
        1 << 30,
        ts(100),
    )
    .await
    .expect_err("name mismatch");
    assert!(matches!(err, ApiError::InvalidInput(_)));
    assert!(objects.is_empty());
}
