// crates/fleetup-artifact/src/reader.rs
// ============================================================================
// Module: Artifact Stream Parser
// Description: Single-pass bounded parser over the artifact container.
// Purpose: Yield header metadata, update descriptors, and the signed flag.
// Dependencies: fleetup-core, serde_json, sha2, tokio
// ============================================================================

//! ## Overview
//! The parser walks the framed sections in order, validating structure as
//! it goes: the header must come first and exactly once, files belong to
//! the most recent update, and a payload section must match the declared
//! size and checksum of the file it follows. Payload bytes never
//! accumulate in memory.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use sha2::Digest;
use sha2::Sha256;
use time::OffsetDateTime;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

use fleetup_core::ArtifactInfo;
use fleetup_core::Update;
use fleetup_core::UpdateFile;

use crate::FORMAT_NAME;
use crate::FORMAT_VERSION;
use crate::MAGIC;
use crate::MAX_FILES_PER_UPDATE;
use crate::MAX_META_SECTION_BYTES;
use crate::MAX_UPDATES;
use crate::TAG_FILE;
use crate::TAG_HEADER;
use crate::TAG_PAYLOAD;
use crate::TAG_SIGNATURE;
use crate::TAG_UPDATE;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Artifact parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Structurally invalid container.
    #[error("malformed artifact: {0}")]
    Malformed(String),
    /// Container version this parser does not understand.
    #[error("unsupported artifact version {0}")]
    UnsupportedVersion(u32),
    /// Underlying stream error, surfaced unchanged.
    #[error("artifact read error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// SECTION: Parsed Metadata
// ============================================================================

/// Metadata extracted from one pass over an artifact stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMeta {
    /// Container format descriptor.
    pub info: ArtifactInfo,
    /// Release name from the header section.
    pub name: String,
    /// Compatible device types from the header section; non-empty.
    pub device_types_compatible: Vec<String>,
    /// Update descriptors in stream order.
    pub updates: Vec<Update>,
    /// True iff a signature section was observed.
    pub signed: bool,
}

/// Header section payload.
#[derive(Debug, Deserialize)]
struct HeaderSection {
    /// Release name.
    name: String,
    /// Compatible device types.
    device_types_compatible: Vec<String>,
}

/// Update section payload.
#[derive(Debug, Deserialize)]
struct UpdateSection {
    /// Update module type tag.
    type_info: String,
}

/// File section payload.
#[derive(Debug, Deserialize)]
struct FileSection {
    /// File name inside the payload.
    name: String,
    /// Declared payload size in bytes.
    size: u64,
    /// Hex-encoded SHA-256 of the payload bytes.
    checksum: String,
    /// Build date of the file.
    #[serde(with = "time::serde::rfc3339")]
    date: OffsetDateTime,
}

// ============================================================================
// SECTION: Parser
// ============================================================================

/// Parses an artifact container from a byte stream in a single pass.
///
/// # Errors
///
/// Returns [`ParseError`] on malformed framing, an unsupported version, a
/// payload/checksum mismatch, or an underlying read error.
pub async fn parse<R>(mut reader: R) -> Result<ArtifactMeta, ParseError>
where
    R: AsyncRead + Unpin,
{
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).await?;
    if magic != MAGIC {
        return Err(ParseError::Malformed("bad magic".to_string()));
    }
    let version = reader.read_u32_le().await?;
    if version != FORMAT_VERSION {
        return Err(ParseError::UnsupportedVersion(version));
    }

    let mut header: Option<HeaderSection> = None;
    let mut updates: Vec<Update> = Vec::new();
    let mut signed = false;
    // Declared metadata of the file section awaiting its payload bytes.
    let mut open_file: Option<FileSection> = None;

    loop {
        let tag = match reader.read_u8().await {
            Ok(tag) => tag,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        };
        let length = reader.read_u64_le().await?;

        if tag != TAG_PAYLOAD
            && let Some(file) = open_file.take()
        {
            // The file section promised bytes but none followed; accept it
            // as metadata-only when the declared size is zero.
            if file.size != 0 {
                return Err(ParseError::Malformed(format!(
                    "file {} declares {} bytes but carries no payload",
                    file.name, file.size
                )));
            }
            push_file(&mut updates, file)?;
        }

        match tag {
            TAG_HEADER => {
                if header.is_some() {
                    return Err(ParseError::Malformed("duplicate header section".to_string()));
                }
                if !updates.is_empty() {
                    return Err(ParseError::Malformed("header must precede updates".to_string()));
                }
                let section: HeaderSection = read_meta_section(&mut reader, length).await?;
                if section.name.trim().is_empty() {
                    return Err(ParseError::Malformed("artifact name must be set".to_string()));
                }
                if section.device_types_compatible.is_empty() {
                    return Err(ParseError::Malformed(
                        "device_types_compatible must not be empty".to_string(),
                    ));
                }
                header = Some(section);
            }
            TAG_UPDATE => {
                if header.is_none() {
                    return Err(ParseError::Malformed("update before header".to_string()));
                }
                if updates.len() >= MAX_UPDATES {
                    return Err(ParseError::Malformed("too many updates".to_string()));
                }
                let section: UpdateSection = read_meta_section(&mut reader, length).await?;
                updates.push(Update {
                    type_info: section.type_info,
                    files: Vec::new(),
                });
            }
            TAG_FILE => {
                if updates.is_empty() {
                    return Err(ParseError::Malformed("file before update".to_string()));
                }
                let section: FileSection = read_meta_section(&mut reader, length).await?;
                open_file = Some(section);
            }
            TAG_PAYLOAD => {
                let Some(file) = open_file.take() else {
                    return Err(ParseError::Malformed("payload without file".to_string()));
                };
                if length != file.size {
                    return Err(ParseError::Malformed(format!(
                        "payload length {length} does not match declared size {}",
                        file.size
                    )));
                }
                let digest = drain_payload(&mut reader, length).await?;
                if !digest.eq_ignore_ascii_case(&file.checksum) {
                    return Err(ParseError::Malformed(format!(
                        "checksum mismatch for file {}",
                        file.name
                    )));
                }
                push_file(&mut updates, file)?;
            }
            TAG_SIGNATURE => {
                // Probe only: the signature is observed, never verified here.
                drain_payload(&mut reader, length).await?;
                signed = true;
            }
            other => {
                return Err(ParseError::Malformed(format!("unknown section tag {other:#04x}")));
            }
        }
    }

    if let Some(file) = open_file.take() {
        if file.size != 0 {
            return Err(ParseError::Malformed(format!(
                "file {} declares {} bytes but carries no payload",
                file.name, file.size
            )));
        }
        push_file(&mut updates, file)?;
    }

    let Some(header) = header else {
        return Err(ParseError::Malformed("missing header section".to_string()));
    };
    Ok(ArtifactMeta {
        info: ArtifactInfo {
            format: FORMAT_NAME.to_string(),
            version: FORMAT_VERSION,
        },
        name: header.name,
        device_types_compatible: header.device_types_compatible,
        updates,
        signed,
    })
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads and deserializes one bounded metadata section.
async fn read_meta_section<R, T>(reader: &mut R, length: u64) -> Result<T, ParseError>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    if length > MAX_META_SECTION_BYTES {
        return Err(ParseError::Malformed("metadata section exceeds size limit".to_string()));
    }
    let mut bytes = vec![0u8; usize::try_from(length).unwrap_or(0)];
    reader.read_exact(&mut bytes).await?;
    serde_json::from_slice(&bytes)
        .map_err(|err| ParseError::Malformed(format!("invalid section json: {err}")))
}

/// Streams a payload section through a SHA-256 without buffering it.
async fn drain_payload<R>(reader: &mut R, length: u64) -> Result<String, ParseError>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut remaining = length;
    let mut chunk = [0u8; 64 * 1024];
    while remaining > 0 {
        let want = usize::try_from(remaining.min(chunk.len() as u64)).unwrap_or(chunk.len());
        let read = reader.read(&mut chunk[.. want]).await?;
        if read == 0 {
            return Err(ParseError::Malformed("truncated payload section".to_string()));
        }
        hasher.update(&chunk[.. read]);
        remaining -= read as u64;
    }
    Ok(hex_encode(&hasher.finalize()))
}

/// Appends a completed file entry to the newest update.
fn push_file(updates: &mut [Update], file: FileSection) -> Result<(), ParseError> {
    let Some(update) = updates.last_mut() else {
        return Err(ParseError::Malformed("file before update".to_string()));
    };
    if update.files.len() >= MAX_FILES_PER_UPDATE {
        return Err(ParseError::Malformed("too many files in update".to_string()));
    }
    update.files.push(UpdateFile {
        name: file.name,
        size: file.size,
        checksum: file.checksum.to_ascii_lowercase(),
        date: file.date,
    });
    Ok(())
}

/// Hex-encodes a digest.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
