// crates/fleetup-core/src/model/artifact.rs
// ============================================================================
// Module: Artifact Model
// Description: Artifact metadata, update payload descriptors, and releases.
// Purpose: Represent ingested update bundles and their grouped release view.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! An artifact is the metadata extracted from an uploaded update bundle
//! plus a pointer to the stored blob. Artifacts sharing a name form a
//! release, which is a computed view and never stored as its own row.
//!
//! Uniqueness invariant: two artifacts may share a name only when their
//! compatible device-type sets are disjoint.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::model::identifiers::ArtifactId;

// ============================================================================
// SECTION: Update Payloads
// ============================================================================

/// A single data file carried by an update payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFile {
    /// File name inside the payload.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// Hex-encoded payload checksum.
    pub checksum: String,
    /// Build date recorded in the payload metadata.
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
}

/// One update entry of an artifact.
///
/// # Invariants
/// - `type_info` is the updater module tag; `files` may be empty for
///   meta-only updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Update module type tag.
    #[serde(rename = "type_info")]
    pub type_info: String,
    /// Data files shipped with the update.
    #[serde(default)]
    pub files: Vec<UpdateFile>,
}

/// Parsed artifact container format descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Container format name.
    pub format: String,
    /// Container format version.
    pub version: u32,
}

// ============================================================================
// SECTION: Artifact
// ============================================================================

/// Stored artifact metadata.
///
/// # Invariants
/// - `device_types_compatible` is non-empty.
/// - `(name, t)` is unique across the store for every `t` in
///   `device_types_compatible`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact identifier; doubles as the object-store key suffix.
    pub id: ArtifactId,
    /// Release name the artifact belongs to.
    pub name: String,
    /// Optional operator-provided description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Device types this artifact can be installed on.
    pub device_types_compatible: Vec<String>,
    /// Update payloads carried by the artifact.
    #[serde(default)]
    pub updates: Vec<Update>,
    /// Whether a signature block was observed during parsing.
    pub signed: bool,
    /// Container format descriptor.
    pub info: ArtifactInfo,
    /// Stored blob size in bytes.
    pub size: u64,
    /// Upload (modification) timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
}

impl Artifact {
    /// Returns true when the artifact is installable on `device_type`.
    #[must_use]
    pub fn supports(&self, device_type: &str) -> bool {
        self.device_types_compatible.iter().any(|t| t == device_type)
    }

    /// Returns true when this artifact violates uniqueness against `other`.
    ///
    /// Two artifacts conflict when they share a name and at least one
    /// compatible device type.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.id != other.id
            && self.name == other.name
            && self.device_types_compatible.iter().any(|t| other.supports(t))
    }

    /// Returns the suggested download filename for the artifact blob.
    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}.fupa", self.name)
    }
}

// ============================================================================
// SECTION: Release
// ============================================================================

/// Computed release view: all artifacts sharing one name.
///
/// # Invariants
/// - `artifacts` is non-empty and sorted newest-first by `modified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Release name shared by the member artifacts.
    pub name: String,
    /// Member artifacts, newest-first.
    pub artifacts: Vec<Artifact>,
    /// Modification time of the newest member.
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
}

impl Release {
    /// Groups artifacts into releases, newest release first.
    ///
    /// Input artifacts may arrive in any order; members of each release are
    /// sorted newest-first and releases are ordered by their newest member.
    #[must_use]
    pub fn group(artifacts: Vec<Artifact>) -> Vec<Self> {
        let mut by_name: Vec<(String, Vec<Artifact>)> = Vec::new();
        for artifact in artifacts {
            match by_name.iter_mut().find(|(name, _)| *name == artifact.name) {
                Some((_, members)) => members.push(artifact),
                None => by_name.push((artifact.name.clone(), vec![artifact])),
            }
        }
        let mut releases: Vec<Self> = by_name
            .into_iter()
            .map(|(name, mut members)| {
                members.sort_by(|a, b| b.modified.cmp(&a.modified));
                let modified = members.first().map_or(OffsetDateTime::UNIX_EPOCH, |a| a.modified);
                Self {
                    name,
                    artifacts: members,
                    modified,
                }
            })
            .collect();
        releases.sort_by(|a, b| b.modified.cmp(&a.modified));
        releases
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::Artifact;
    use super::ArtifactInfo;
    use super::Release;
    use crate::model::identifiers::ArtifactId;

    fn artifact(name: &str, types: &[&str], modified_unix: i64) -> Artifact {
        Artifact {
            id: ArtifactId::random(),
            name: name.to_string(),
            description: None,
            device_types_compatible: types.iter().map(ToString::to_string).collect(),
            updates: Vec::new(),
            signed: false,
            info: ArtifactInfo {
                format: "fleetup-artifact".to_string(),
                version: 1,
            },
            size: 1024,
            modified: OffsetDateTime::from_unix_timestamp(modified_unix).expect("timestamp"),
        }
    }

    #[test]
    fn conflict_requires_shared_name_and_type() {
        let a = artifact("release-1", &["qemu", "rpi3"], 1);
        let same_name_overlap = artifact("release-1", &["rpi3"], 2);
        let same_name_disjoint = artifact("release-1", &["beagle"], 3);
        let other_name = artifact("release-2", &["qemu"], 4);
        assert!(a.conflicts_with(&same_name_overlap));
        assert!(!a.conflicts_with(&same_name_disjoint));
        assert!(!a.conflicts_with(&other_name));
        assert!(!a.conflicts_with(&a.clone()));
    }

    #[test]
    fn releases_group_newest_first() {
        let old = artifact("release-1", &["qemu"], 100);
        let newer = artifact("release-1", &["rpi3"], 200);
        let other = artifact("release-2", &["qemu"], 150);
        let releases = Release::group(vec![old.clone(), other.clone(), newer.clone()]);
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].name, "release-1");
        assert_eq!(releases[0].artifacts, vec![newer, old]);
        assert_eq!(releases[1].name, "release-2");
    }
}
