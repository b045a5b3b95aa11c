// crates/fleetup-core/src/model/deployment.rs
// ============================================================================
// Module: Deployment Model
// Description: Fleet-scoped deployments, phase plans, and status counters.
// Purpose: Represent operator intent and its aggregated progress.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! A deployment is the operator-issued intent to update a fleet. Its status
//! is never stored directly: it is derived from the per-status counters of
//! its device-deployments, the optional phase plan, the paused flag, and
//! the `finished` timestamp. Phase caps are stored as absolute device
//! counts; percentage input is converted at construction time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::model::device::DeviceDeploymentStatus;
use crate::model::identifiers::ArtifactId;
use crate::model::identifiers::DeploymentId;
use crate::model::identifiers::DeviceId;

// ============================================================================
// SECTION: Selector
// ============================================================================

/// One predicate of a dynamic inventory filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilter {
    /// Inventory attribute name.
    pub attribute: String,
    /// Attribute value to match for equality.
    pub value: String,
    /// Optional attribute scope (inventory namespace).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Target-device selector of a deployment.
///
/// # Invariants
/// - Exactly one selector mode is present per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    /// Explicit device-id list.
    Devices(Vec<DeviceId>),
    /// All current members of an inventory group.
    Group(String),
    /// Devices matched by a dynamic inventory filter.
    Filter(Vec<DeviceFilter>),
}

// ============================================================================
// SECTION: Phases
// ============================================================================

/// Phase cap as supplied on the management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseCap {
    /// Percentage of the resolved device set (1..=100).
    Percent(u8),
    /// Absolute device count.
    Count(u32),
}

/// Phase plan entry as supplied on the management API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Window opening time; the first phase defaults to the creation time.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_ts: Option<OffsetDateTime>,
    /// Device cap of the phase; `None` admits the remainder of the fleet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap: Option<PhaseCap>,
}

/// Stored phase with its cap resolved to an absolute count.
///
/// # Invariants
/// - `start_ts` strictly increases across the stored plan.
/// - The window of the last phase extends to infinity.
/// - `max_devices` is cumulative: the total number of devices allowed to
///   leave `pending` through the end of this phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Window opening time.
    #[serde(with = "time::serde::rfc3339")]
    pub start_ts: OffsetDateTime,
    /// Cumulative device cap through this phase; `None` admits every
    /// remaining device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_devices: Option<u32>,
    /// Devices dispatched (out of `pending`) while this phase was current.
    /// A failure retry returns its slot before the row re-enters
    /// `pending`, so a retried device never consumes a second one.
    pub device_count: u32,
}

// ============================================================================
// SECTION: Status & Counters
// ============================================================================

/// Derived deployment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Phase plan exists and the first window has not opened.
    Scheduled,
    /// No device has started yet.
    Pending,
    /// At least one device has left `pending`.
    InProgress,
    /// Dispatch suspended by an operator; resumable.
    Paused,
    /// Every device-deployment is terminal.
    Finished,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Scheduled => "scheduled",
            Self::Pending => "pending",
            Self::InProgress => "inprogress",
            Self::Paused => "paused",
            Self::Finished => "finished",
        };
        f.write_str(label)
    }
}

/// Per-status device-deployment counters of one deployment.
///
/// # Invariants
/// - At any quiescent point each counter equals the cardinality of the
///   matching children; their sum equals `Deployment::device_count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStats {
    /// Devices not yet dispatched.
    pub pending: u32,
    /// Devices fetching the payload.
    pub downloading: u32,
    /// Devices installing.
    pub installing: u32,
    /// Devices rebooting.
    pub rebooting: u32,
    /// Devices parked in a `pause_before_*` state.
    pub paused: u32,
    /// Devices finished successfully.
    pub success: u32,
    /// Devices finished in failure.
    pub failure: u32,
    /// Devices with no compatible artifact.
    pub noartifact: u32,
    /// Devices that already ran the artifact.
    pub already_installed: u32,
    /// Devices aborted by the operator.
    pub aborted: u32,
    /// Devices decommissioned mid-flight.
    pub decommissioned: u32,
}

impl DeploymentStats {
    /// Returns a mutable reference to the counter tracking `status`.
    fn slot(&mut self, status: DeviceDeploymentStatus) -> &mut u32 {
        match status {
            DeviceDeploymentStatus::Pending => &mut self.pending,
            DeviceDeploymentStatus::Downloading => &mut self.downloading,
            DeviceDeploymentStatus::Installing => &mut self.installing,
            DeviceDeploymentStatus::Rebooting => &mut self.rebooting,
            DeviceDeploymentStatus::PauseBeforeInstalling
            | DeviceDeploymentStatus::PauseBeforeRebooting
            | DeviceDeploymentStatus::PauseBeforeCommitting => &mut self.paused,
            DeviceDeploymentStatus::Success => &mut self.success,
            DeviceDeploymentStatus::Failure => &mut self.failure,
            DeviceDeploymentStatus::Noartifact => &mut self.noartifact,
            DeviceDeploymentStatus::AlreadyInstalled => &mut self.already_installed,
            DeviceDeploymentStatus::Aborted => &mut self.aborted,
            DeviceDeploymentStatus::Decommissioned => &mut self.decommissioned,
        }
    }

    /// Returns the counter value tracking `status`.
    #[must_use]
    pub fn get(&self, status: DeviceDeploymentStatus) -> u32 {
        let mut copy = *self;
        *copy.slot(status)
    }

    /// Records one device entering `status`.
    pub fn increment(&mut self, status: DeviceDeploymentStatus) {
        let slot = self.slot(status);
        *slot = slot.saturating_add(1);
    }

    /// Records one device leaving `status`.
    pub fn decrement(&mut self, status: DeviceDeploymentStatus) {
        let slot = self.slot(status);
        *slot = slot.saturating_sub(1);
    }

    /// Total devices in an active (non-terminal) state.
    #[must_use]
    pub const fn active_total(&self) -> u32 {
        self.pending + self.downloading + self.installing + self.rebooting + self.paused
    }

    /// Total devices counted against the max-devices cap: dispatched now,
    /// or in a terminal outcome that may have held an update slot. The
    /// synthetic outcomes (`noartifact`, `already_installed`) never held
    /// one and are excluded.
    #[must_use]
    pub const fn dispatched_total(&self) -> u32 {
        self.downloading
            + self.installing
            + self.rebooting
            + self.paused
            + self.success
            + self.failure
            + self.aborted
            + self.decommissioned
    }

    /// Total devices in a terminal state.
    #[must_use]
    pub const fn finished_total(&self) -> u32 {
        self.success
            + self.failure
            + self.noartifact
            + self.already_installed
            + self.aborted
            + self.decommissioned
    }
}

// ============================================================================
// SECTION: Deployment
// ============================================================================

/// Kind of payload a deployment rolls out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentType {
    /// Regular software update.
    #[default]
    Regular,
    /// Device configuration push.
    Configuration,
}

/// Fleet-scoped deployment row.
///
/// # Invariants
/// - `finished` is set iff no device-deployment remains active.
/// - Never deleted while any device-deployment references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Deployment identifier.
    pub id: DeploymentId,
    /// Operator-assigned human name.
    pub name: String,
    /// Target release name.
    pub artifact_name: String,
    /// Specific artifact ids to deploy, when restricted by the operator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactId>,
    /// Target-device selector used at planning time.
    pub selector: DeviceSelector,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    /// Timestamp of the last terminal child transition, once all are terminal.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished: Option<OffsetDateTime>,
    /// Resolved size of the target device set.
    pub device_count: u32,
    /// Maximum devices ever admitted; 0 means unlimited.
    pub max_devices: u32,
    /// Failure retries granted to each device.
    pub retries: u32,
    /// Install even when the device already runs the artifact.
    pub force_installation: bool,
    /// Phase plan with absolute caps; empty means a single open window.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<Phase>,
    /// Per-status child counters.
    pub stats: DeploymentStats,
    /// Dispatch suspended by the operator.
    pub paused: bool,
    /// Operator abort recorded; propagation to children is batched.
    pub aborted: bool,
    /// Payload kind.
    #[serde(rename = "type")]
    pub deployment_type: DeploymentType,
    /// Opaque update control map forwarded to devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_control_map: Option<serde_json::Value>,
}

impl Deployment {
    /// Derives the aggregate status at time `now`.
    #[must_use]
    pub fn status(&self, now: OffsetDateTime) -> DeploymentStatus {
        if self.finished.is_some() {
            return DeploymentStatus::Finished;
        }
        if self.paused {
            return DeploymentStatus::Paused;
        }
        if let Some(first) = self.phases.first()
            && now < first.start_ts
        {
            return DeploymentStatus::Scheduled;
        }
        if self.stats.pending == self.device_count {
            DeploymentStatus::Pending
        } else {
            DeploymentStatus::InProgress
        }
    }
}

// ============================================================================
// SECTION: Constructor
// ============================================================================

/// Validated deployment-construction request.
///
/// # Invariants
/// - Exactly one selector mode is set.
/// - Phase percentages are converted to absolute counts during planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConstructor {
    /// Operator-assigned human name.
    pub name: String,
    /// Target release name.
    pub artifact_name: String,
    /// Specific artifact ids, when the operator restricts the release.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactId>,
    /// Target-device selector.
    pub selector: DeviceSelector,
    /// Phase plan as supplied on the API.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PhaseSpec>,
    /// Maximum devices ever admitted; 0 means unlimited.
    #[serde(default)]
    pub max_devices: u32,
    /// Failure retries granted to each device.
    #[serde(default)]
    pub retries: u32,
    /// Install even when the device already runs the artifact.
    #[serde(default)]
    pub force_installation: bool,
    /// Payload kind.
    #[serde(default, rename = "type")]
    pub deployment_type: DeploymentType,
    /// Opaque update control map forwarded to devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_control_map: Option<serde_json::Value>,
}

impl DeploymentConstructor {
    /// Validates the constructor shape.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("deployment name must be set".to_string());
        }
        if self.artifact_name.trim().is_empty() {
            return Err("artifact name must be set".to_string());
        }
        if let DeviceSelector::Devices(devices) = &self.selector
            && devices.is_empty()
        {
            return Err("device list must not be empty".to_string());
        }
        if let DeviceSelector::Group(group) = &self.selector
            && group.trim().is_empty()
        {
            return Err("group name must be set".to_string());
        }
        if let DeviceSelector::Filter(filter) = &self.selector
            && filter.is_empty()
        {
            return Err("filter must contain at least one predicate".to_string());
        }
        self.validate_phases()
    }

    /// Validates the phase plan shape.
    fn validate_phases(&self) -> Result<(), String> {
        let mut percent_total: u32 = 0;
        for (index, phase) in self.phases.iter().enumerate() {
            if index > 0 && phase.start_ts.is_none() {
                return Err("only the first phase may omit start_ts".to_string());
            }
            match phase.cap {
                Some(PhaseCap::Percent(value)) => {
                    if value == 0 || value > 100 {
                        return Err("phase percentage must be within 1..=100".to_string());
                    }
                    percent_total += u32::from(value);
                }
                Some(PhaseCap::Count(0)) => {
                    return Err("phase device count must be positive".to_string());
                }
                Some(PhaseCap::Count(_)) => {}
                None => {
                    if index + 1 != self.phases.len() {
                        return Err("only the last phase may omit its cap".to_string());
                    }
                }
            }
        }
        if percent_total > 100 {
            return Err("phase percentages exceed 100".to_string());
        }
        let mut previous: Option<OffsetDateTime> = None;
        for phase in &self.phases {
            if let Some(start) = phase.start_ts {
                if let Some(prev) = previous
                    && start <= prev
                {
                    return Err("phase start times must strictly increase".to_string());
                }
                previous = Some(start);
            }
        }
        Ok(())
    }

    /// Resolves the phase plan against the final device count.
    ///
    /// Per-phase caps accumulate into running totals: a `10% / 30% / rest`
    /// plan over 100 devices stores cumulative caps `10 / 40 / None`.
    /// Percentages convert rounding down with a minimum of one device; the
    /// first phase opens at `now` when unset.
    #[must_use]
    pub fn resolve_phases(&self, device_count: u32, now: OffsetDateTime) -> Vec<Phase> {
        let mut running: u32 = 0;
        self.phases
            .iter()
            .map(|spec| Phase {
                start_ts: spec.start_ts.unwrap_or(now),
                max_devices: spec.cap.map(|cap| {
                    let share = match cap {
                        PhaseCap::Count(count) => count,
                        PhaseCap::Percent(percent) => {
                            let share = u64::from(device_count) * u64::from(percent) / 100;
                            u32::try_from(share).unwrap_or(u32::MAX).max(1)
                        }
                    };
                    running = running.saturating_add(share);
                    running
                }),
                device_count: 0,
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::DeploymentConstructor;
    use super::DeploymentStats;
    use super::DeviceSelector;
    use super::PhaseCap;
    use super::PhaseSpec;
    use crate::model::device::DeviceDeploymentStatus;
    use crate::model::identifiers::DeviceId;

    fn constructor() -> DeploymentConstructor {
        DeploymentConstructor {
            name: "p".to_string(),
            artifact_name: "release-1".to_string(),
            artifacts: Vec::new(),
            selector: DeviceSelector::Devices(vec![DeviceId::new("d1")]),
            phases: Vec::new(),
            max_devices: 0,
            retries: 0,
            force_installation: false,
            deployment_type: super::DeploymentType::Regular,
            update_control_map: None,
        }
    }

    fn ts(unix: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(unix).expect("timestamp")
    }

    #[test]
    fn constructor_rejects_empty_device_list() {
        let mut ctor = constructor();
        ctor.selector = DeviceSelector::Devices(Vec::new());
        assert!(ctor.validate().is_err());
    }

    #[test]
    fn constructor_rejects_unordered_phases() {
        let mut ctor = constructor();
        ctor.phases = vec![
            PhaseSpec {
                start_ts: Some(ts(2_000)),
                cap: Some(PhaseCap::Count(1)),
            },
            PhaseSpec {
                start_ts: Some(ts(1_000)),
                cap: None,
            },
        ];
        assert!(ctor.validate().is_err());
    }

    #[test]
    fn constructor_rejects_uncapped_middle_phase() {
        let mut ctor = constructor();
        ctor.phases = vec![
            PhaseSpec {
                start_ts: Some(ts(1_000)),
                cap: None,
            },
            PhaseSpec {
                start_ts: Some(ts(2_000)),
                cap: Some(PhaseCap::Count(1)),
            },
        ];
        assert!(ctor.validate().is_err());
    }

    #[test]
    fn percentages_resolve_to_cumulative_counts() {
        let mut ctor = constructor();
        ctor.phases = vec![
            PhaseSpec {
                start_ts: Some(ts(1_000)),
                cap: Some(PhaseCap::Percent(10)),
            },
            PhaseSpec {
                start_ts: Some(ts(2_000)),
                cap: Some(PhaseCap::Count(30)),
            },
            PhaseSpec {
                start_ts: Some(ts(3_000)),
                cap: None,
            },
        ];
        let phases = ctor.resolve_phases(100, ts(500));
        assert_eq!(phases[0].max_devices, Some(10));
        assert_eq!(phases[1].max_devices, Some(40));
        assert_eq!(phases[2].max_devices, None);
    }

    #[test]
    fn tiny_fleet_percentage_admits_at_least_one_device() {
        let mut ctor = constructor();
        ctor.phases = vec![PhaseSpec {
            start_ts: Some(ts(1_000)),
            cap: Some(PhaseCap::Percent(5)),
        }];
        let phases = ctor.resolve_phases(3, ts(500));
        assert_eq!(phases[0].max_devices, Some(1));
    }

    #[test]
    fn stats_track_transitions() {
        let mut stats = DeploymentStats::default();
        stats.increment(DeviceDeploymentStatus::Pending);
        stats.increment(DeviceDeploymentStatus::Pending);
        stats.decrement(DeviceDeploymentStatus::Pending);
        stats.increment(DeviceDeploymentStatus::Downloading);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.downloading, 1);
        assert_eq!(stats.active_total(), 2);
        assert_eq!(stats.finished_total(), 0);
    }
}
