// crates/fleetup-artifact/src/lib.rs
// ============================================================================
// Module: Fleetup Artifact Container
// Description: Streaming parser and writer for the artifact container format.
// Purpose: Extract artifact metadata in one bounded pass over the byte stream.
// Dependencies: fleetup-core, serde_json, sha2, tokio
// ============================================================================

//! ## Overview
//! Update bundles travel as a framed container: a fixed magic and format
//! version followed by tagged sections carrying the artifact header, the
//! update descriptors, per-file metadata, raw payload bytes, and an
//! optional signature block. The parser consumes the stream exactly once
//! head to end, buffers only individual metadata sections (capped at
//! 1 MiB), streams payload bytes through a checksum, and records whether a
//! signature block was observed without verifying it.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod reader;
mod writer;

pub use reader::ArtifactMeta;
pub use reader::ParseError;
pub use reader::parse;
pub use writer::ArtifactBuilder;
pub use writer::PayloadFile;
pub use writer::UpdateBuilder;

// ============================================================================
// SECTION: Format Constants
// ============================================================================

/// Container magic at stream offset zero.
pub const MAGIC: [u8; 4] = *b"FUPA";
/// Canonical format name reported in parsed metadata.
pub const FORMAT_NAME: &str = "fleetup-artifact";
/// Container format version this crate reads and writes.
pub const FORMAT_VERSION: u32 = 1;

/// Section tag: artifact header (JSON), exactly once, first.
pub(crate) const TAG_HEADER: u8 = 0x01;
/// Section tag: update descriptor (JSON), opens a new update entry.
pub(crate) const TAG_UPDATE: u8 = 0x02;
/// Section tag: file metadata (JSON), belongs to the open update.
pub(crate) const TAG_FILE: u8 = 0x03;
/// Section tag: raw payload bytes of the preceding file section.
pub(crate) const TAG_PAYLOAD: u8 = 0x04;
/// Section tag: signature block; observed but never verified here.
pub(crate) const TAG_SIGNATURE: u8 = 0x05;

/// Maximum size of a buffered metadata section.
pub(crate) const MAX_META_SECTION_BYTES: u64 = 1024 * 1024;
/// Maximum number of update entries per artifact.
pub(crate) const MAX_UPDATES: usize = 100;
/// Maximum number of files per update entry.
pub(crate) const MAX_FILES_PER_UPDATE: usize = 1_000;
