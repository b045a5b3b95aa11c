// crates/fleetup-core/src/memstore/object.rs
// ============================================================================
// Module: In-Memory Object Store
// Description: ObjectStore implementation over a mutex-protected map.
// Purpose: Infrastructure-free blob storage for tests.
// Dependencies: crate::ports::object_store, tokio
// ============================================================================

//! ## Overview
//! Blobs live in a `BTreeMap` behind a mutex. Presigned URLs use the
//! `memory://` scheme and carry their expiry as a query parameter so tests
//! can assert on TTL handling without a real backend.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;

use crate::ports::object_store::DownloadLink;
use crate::ports::object_store::ObjectKey;
use crate::ports::object_store::ObjectReader;
use crate::ports::object_store::ObjectStat;
use crate::ports::object_store::ObjectStore;
use crate::ports::object_store::ObjectStoreError;
use crate::ports::object_store::PresignedRequest;
use crate::ports::object_store::validate_presign_ttl;
use crate::scope::RequestScope;

// ============================================================================
// SECTION: Store
// ============================================================================

/// One stored blob with its metadata.
#[derive(Debug, Clone)]
struct StoredObject {
    /// Blob bytes.
    bytes: Vec<u8>,
    /// Last modification time.
    modified: OffsetDateTime,
}

/// In-memory [`ObjectStore`] backend.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    /// Stored blobs by key.
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored bytes of a key, for test assertions.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::NotFound`] when the key is absent.
    pub fn bytes_of(&self, key: &ObjectKey) -> Result<Vec<u8>, ObjectStoreError> {
        let guard = self
            .objects
            .lock()
            .map_err(|_| ObjectStoreError::Io("object store lock poisoned".to_string()))?;
        guard
            .get(key.as_str())
            .map(|object| object.bytes.clone())
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Returns true when no objects are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
        mut reader: ObjectReader,
    ) -> Result<u64, ObjectStoreError> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|err| ObjectStoreError::Io(err.to_string()))?;
        let size = bytes.len() as u64;
        let mut guard = self
            .objects
            .lock()
            .map_err(|_| ObjectStoreError::Io("object store lock poisoned".to_string()))?;
        guard.insert(
            key.as_str().to_string(),
            StoredObject {
                bytes,
                modified: OffsetDateTime::now_utc(),
            },
        );
        Ok(size)
    }

    async fn get(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
    ) -> Result<(ObjectReader, u64), ObjectStoreError> {
        let object = {
            let guard = self
                .objects
                .lock()
                .map_err(|_| ObjectStoreError::Io("object store lock poisoned".to_string()))?;
            guard
                .get(key.as_str())
                .cloned()
                .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?
        };
        let size = object.bytes.len() as u64;
        Ok((Box::new(Cursor::new(object.bytes)), size))
    }

    async fn stat(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
    ) -> Result<ObjectStat, ObjectStoreError> {
        let guard = self
            .objects
            .lock()
            .map_err(|_| ObjectStoreError::Io("object store lock poisoned".to_string()))?;
        guard
            .get(key.as_str())
            .map(|object| ObjectStat {
                size: object.bytes.len() as u64,
                last_modified: object.modified,
            })
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn delete(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
    ) -> Result<(), ObjectStoreError> {
        let mut guard = self
            .objects
            .lock()
            .map_err(|_| ObjectStoreError::Io("object store lock poisoned".to_string()))?;
        guard.remove(key.as_str());
        Ok(())
    }

    async fn presign_get(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
        ttl: Duration,
        _content_disposition: Option<&str>,
    ) -> Result<DownloadLink, ObjectStoreError> {
        validate_presign_ttl(ttl)?;
        let expire = OffsetDateTime::now_utc() + ttl;
        Ok(DownloadLink {
            uri: format!("memory://objects/{key}?expire={}", expire.unix_timestamp()),
            expire,
        })
    }

    async fn presign_put(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
        ttl: Duration,
    ) -> Result<PresignedRequest, ObjectStoreError> {
        validate_presign_ttl(ttl)?;
        let expire = OffsetDateTime::now_utc() + ttl;
        Ok(PresignedRequest {
            uri: format!("memory://objects/{key}?expire={}", expire.unix_timestamp()),
            expire,
            headers: Vec::new(),
        })
    }

    async fn presign_delete(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
        ttl: Duration,
    ) -> Result<DownloadLink, ObjectStoreError> {
        validate_presign_ttl(ttl)?;
        let expire = OffsetDateTime::now_utc() + ttl;
        Ok(DownloadLink {
            uri: format!("memory://objects/{key}?expire={}&delete=1", expire.unix_timestamp()),
            expire,
        })
    }

    async fn health_check(&self) -> Result<(), ObjectStoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
