// crates/fleetup-artifact/src/writer.rs
// ============================================================================
// Module: Artifact Container Writer
// Description: Builder producing framed artifact containers.
// Purpose: Serialize metadata and payloads for tests and generation flows.
// Dependencies: fleetup-core, serde_json, sha2
// ============================================================================

//! ## Overview
//! The builder assembles a complete container in memory: header, update
//! descriptors, file metadata with computed sizes and checksums, payload
//! bytes, and an optional opaque signature block. It is the write-side
//! counterpart of [`crate::parse`] and the anchor of the parse/serialize
//! round-trip property.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::FORMAT_VERSION;
use crate::MAGIC;
use crate::TAG_FILE;
use crate::TAG_HEADER;
use crate::TAG_PAYLOAD;
use crate::TAG_SIGNATURE;
use crate::TAG_UPDATE;
use crate::reader::hex_encode;

// ============================================================================
// SECTION: Builder Types
// ============================================================================

/// One payload file of an update under construction.
#[derive(Debug, Clone)]
pub struct PayloadFile {
    /// File name inside the payload.
    pub name: String,
    /// Build date recorded in the metadata.
    pub date: OffsetDateTime,
    /// Payload bytes; size and checksum derive from them.
    pub bytes: Vec<u8>,
}

/// One update entry under construction.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    /// Update module type tag.
    pub type_info: String,
    /// Payload files of the update.
    pub files: Vec<PayloadFile>,
}

/// Artifact container builder.
#[derive(Debug, Clone)]
pub struct ArtifactBuilder {
    /// Release name.
    pub name: String,
    /// Compatible device types.
    pub device_types_compatible: Vec<String>,
    /// Update entries.
    pub updates: Vec<UpdateBuilder>,
    /// Opaque signature block appended at the end, when present.
    pub signature: Option<Vec<u8>>,
}

/// Header section wire shape.
#[derive(Debug, Serialize)]
struct HeaderSection<'a> {
    /// Release name.
    name: &'a str,
    /// Compatible device types.
    device_types_compatible: &'a [String],
}

/// Update section wire shape.
#[derive(Debug, Serialize)]
struct UpdateSection<'a> {
    /// Update module type tag.
    type_info: &'a str,
}

/// File section wire shape.
#[derive(Debug, Serialize)]
struct FileSection<'a> {
    /// File name inside the payload.
    name: &'a str,
    /// Payload size in bytes.
    size: u64,
    /// Hex-encoded SHA-256 of the payload bytes.
    checksum: String,
    /// Build date of the file.
    #[serde(with = "time::serde::rfc3339")]
    date: OffsetDateTime,
}

// ============================================================================
// SECTION: Builder
// ============================================================================

impl ArtifactBuilder {
    /// Starts a builder for the given release and compatibility set.
    #[must_use]
    pub fn new(name: impl Into<String>, device_types: &[&str]) -> Self {
        Self {
            name: name.into(),
            device_types_compatible: device_types.iter().map(ToString::to_string).collect(),
            updates: Vec::new(),
            signature: None,
        }
    }

    /// Appends an update entry.
    #[must_use]
    pub fn update(mut self, update: UpdateBuilder) -> Self {
        self.updates.push(update);
        self
    }

    /// Attaches an opaque signature block.
    #[must_use]
    pub fn signed_with(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Serializes the container into its framed byte form.
    ///
    /// # Errors
    ///
    /// Returns an error string when a metadata section cannot be encoded.
    pub fn into_bytes(self) -> Result<Vec<u8>, String> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        write_meta_section(
            &mut out,
            TAG_HEADER,
            &HeaderSection {
                name: &self.name,
                device_types_compatible: &self.device_types_compatible,
            },
        )?;
        for update in &self.updates {
            write_meta_section(
                &mut out,
                TAG_UPDATE,
                &UpdateSection {
                    type_info: &update.type_info,
                },
            )?;
            for file in &update.files {
                let mut hasher = Sha256::new();
                hasher.update(&file.bytes);
                write_meta_section(
                    &mut out,
                    TAG_FILE,
                    &FileSection {
                        name: &file.name,
                        size: file.bytes.len() as u64,
                        checksum: hex_encode(&hasher.finalize()),
                        date: file.date,
                    },
                )?;
                write_raw_section(&mut out, TAG_PAYLOAD, &file.bytes);
            }
        }
        if let Some(signature) = &self.signature {
            write_raw_section(&mut out, TAG_SIGNATURE, signature);
        }
        Ok(out)
    }
}

/// Writes one JSON metadata section.
fn write_meta_section<T: Serialize>(
    out: &mut Vec<u8>,
    tag: u8,
    payload: &T,
) -> Result<(), String> {
    let bytes = serde_json::to_vec(payload).map_err(|err| err.to_string())?;
    write_raw_section(out, tag, &bytes);
    Ok(())
}

/// Writes one framed section with raw payload bytes.
fn write_raw_section(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
}
