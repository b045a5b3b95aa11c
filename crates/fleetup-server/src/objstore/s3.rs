// crates/fleetup-server/src/objstore/s3.rs
// ============================================================================
// Module: S3 Object Store
// Description: Async S3 implementation of the object-store port.
// Purpose: Stream blobs of unknown length and vend presigned URLs.
// Dependencies: aws-config, aws-sdk-s3, tokio
// ============================================================================

//! ## Overview
//! Uploads buffer at most one part (10 MiB) in memory: a stream that ends
//! inside the first buffer becomes a single `PutObject`; anything longer
//! becomes a multipart upload with one buffered part in flight at a time,
//! aborted on any failure. Presigned URLs ride the SDK presigning config
//! after the port-level TTL bounds check.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::CompletedMultipartUpload;
use aws_sdk_s3::types::CompletedPart;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;

use fleetup_core::DownloadLink;
use fleetup_core::ObjectKey;
use fleetup_core::ObjectReader;
use fleetup_core::ObjectStat;
use fleetup_core::ObjectStore;
use fleetup_core::ObjectStoreError;
use fleetup_core::PresignedRequest;
use fleetup_core::RequestScope;
use fleetup_core::validate_presign_ttl;

use crate::config::AwsConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Upload buffer and multipart part size.
pub const UPLOAD_BUFFER_BYTES: usize = 10 * 1024 * 1024;

// ============================================================================
// SECTION: Store
// ============================================================================

/// S3-backed [`ObjectStore`].
pub struct S3ObjectStore {
    /// SDK client.
    client: Client,
    /// Bucket name.
    bucket: String,
}

impl S3ObjectStore {
    /// Builds the store from backend configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError`] when the bucket is unset.
    pub async fn connect(
        bucket: impl Into<String>,
        config: &AwsConfig,
    ) -> Result<Self, ObjectStoreError> {
        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            return Err(ObjectStoreError::Unavailable("bucket must be configured".to_string()));
        }
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "fleetup-config",
            ));
        }
        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
        })
    }

    /// Wraps an existing client, for tests against S3-compatible stores.
    #[must_use]
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Fills `buffer` from the reader until full or EOF; returns bytes read.
    async fn fill_buffer(
        reader: &mut ObjectReader,
        buffer: &mut Vec<u8>,
    ) -> Result<usize, ObjectStoreError> {
        buffer.clear();
        while buffer.len() < UPLOAD_BUFFER_BYTES {
            let mut chunk = [0u8; 64 * 1024];
            let want = chunk.len().min(UPLOAD_BUFFER_BYTES - buffer.len());
            let read = reader
                .read(&mut chunk[.. want])
                .await
                .map_err(|err| ObjectStoreError::Io(err.to_string()))?;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[.. read]);
        }
        Ok(buffer.len())
    }

    /// Continues an upload as multipart once the first buffer overflowed.
    async fn put_multipart(
        &self,
        key: &str,
        first_part: Vec<u8>,
        reader: &mut ObjectReader,
    ) -> Result<u64, ObjectStoreError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| ObjectStoreError::Unavailable(err.to_string()))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| ObjectStoreError::Unavailable("missing upload id".to_string()))?
            .to_string();

        let outcome = self.upload_parts(key, &upload_id, first_part, reader).await;
        match outcome {
            Ok(total) => Ok(total),
            Err(err) => {
                let _ = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                Err(err)
            }
        }
    }

    /// Streams parts and completes the multipart upload.
    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first_part: Vec<u8>,
        reader: &mut ObjectReader,
    ) -> Result<u64, ObjectStoreError> {
        let mut parts = Vec::new();
        let mut part_number = 1i32;
        let mut total = 0u64;
        let mut buffer = first_part;
        loop {
            if buffer.is_empty() {
                break;
            }
            total += buffer.len() as u64;
            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(std::mem::take(&mut buffer)))
                .send()
                .await
                .map_err(|err| ObjectStoreError::Unavailable(err.to_string()))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(ToString::to_string))
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;
            buffer = Vec::with_capacity(UPLOAD_BUFFER_BYTES);
            Self::fill_buffer(reader, &mut buffer).await?;
        }
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder().set_parts(Some(parts)).build(),
            )
            .send()
            .await
            .map_err(|err| ObjectStoreError::Unavailable(err.to_string()))?;
        Ok(total)
    }
}

// ============================================================================
// SECTION: Port Implementation
// ============================================================================

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
        mut reader: ObjectReader,
    ) -> Result<u64, ObjectStoreError> {
        let mut buffer = Vec::with_capacity(UPLOAD_BUFFER_BYTES);
        let read = Self::fill_buffer(&mut reader, &mut buffer).await?;
        if read < UPLOAD_BUFFER_BYTES {
            // The whole stream fits the buffer: one plain put suffices.
            let size = buffer.len() as u64;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key.as_str())
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(|err| ObjectStoreError::Unavailable(err.to_string()))?;
            return Ok(size);
        }
        self.put_multipart(key.as_str(), buffer, &mut reader).await
    }

    async fn get(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
    ) -> Result<(ObjectReader, u64), ObjectStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|err| match &err {
                SdkError::ServiceError(service)
                    if matches!(service.err(), GetObjectError::NoSuchKey(_)) =>
                {
                    ObjectStoreError::NotFound(key.to_string())
                }
                _ => ObjectStoreError::Unavailable(err.to_string()),
            })?;
        let size = output
            .content_length()
            .and_then(|length| u64::try_from(length).ok())
            .unwrap_or(0);
        Ok((Box::new(output.body.into_async_read()), size))
    }

    async fn stat(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
    ) -> Result<ObjectStat, ObjectStoreError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|err| match &err {
                SdkError::ServiceError(service)
                    if matches!(service.err(), HeadObjectError::NotFound(_)) =>
                {
                    ObjectStoreError::NotFound(key.to_string())
                }
                _ => ObjectStoreError::Unavailable(err.to_string()),
            })?;
        let size = output
            .content_length()
            .and_then(|length| u64::try_from(length).ok())
            .unwrap_or(0);
        let last_modified = output
            .last_modified()
            .and_then(|value| OffsetDateTime::from_unix_timestamp(value.secs()).ok())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Ok(ObjectStat {
            size,
            last_modified,
        })
    }

    async fn delete(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
    ) -> Result<(), ObjectStoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|err| ObjectStoreError::Unavailable(err.to_string()))?;
        Ok(())
    }

    async fn presign_get(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
        ttl: Duration,
        content_disposition: Option<&str>,
    ) -> Result<DownloadLink, ObjectStoreError> {
        validate_presign_ttl(ttl)?;
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|err| ObjectStoreError::Io(err.to_string()))?;
        let mut request = self.client.get_object().bucket(&self.bucket).key(key.as_str());
        if let Some(disposition) = content_disposition {
            request = request
                .response_content_disposition(format!("attachment; filename=\"{disposition}\""));
        }
        let presigned = request
            .presigned(config)
            .await
            .map_err(|err| ObjectStoreError::Unavailable(err.to_string()))?;
        Ok(DownloadLink {
            uri: presigned.uri().to_string(),
            expire: OffsetDateTime::now_utc() + ttl,
        })
    }

    async fn presign_put(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
        ttl: Duration,
    ) -> Result<PresignedRequest, ObjectStoreError> {
        validate_presign_ttl(ttl)?;
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|err| ObjectStoreError::Io(err.to_string()))?;
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .presigned(config)
            .await
            .map_err(|err| ObjectStoreError::Unavailable(err.to_string()))?;
        let headers = presigned
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Ok(PresignedRequest {
            uri: presigned.uri().to_string(),
            expire: OffsetDateTime::now_utc() + ttl,
            headers,
        })
    }

    async fn presign_delete(
        &self,
        _scope: &RequestScope,
        key: &ObjectKey,
        ttl: Duration,
    ) -> Result<DownloadLink, ObjectStoreError> {
        validate_presign_ttl(ttl)?;
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|err| ObjectStoreError::Io(err.to_string()))?;
        let presigned = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .presigned(config)
            .await
            .map_err(|err| ObjectStoreError::Unavailable(err.to_string()))?;
        Ok(DownloadLink {
            uri: presigned.uri().to_string(),
            expire: OffsetDateTime::now_utc() + ttl,
        })
    }

    async fn health_check(&self) -> Result<(), ObjectStoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| ObjectStoreError::Unavailable(err.to_string()))?;
        Ok(())
    }
}
