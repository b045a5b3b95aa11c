// crates/fleetup-core/src/model/device.rs
// ============================================================================
// Module: Device-Deployment Model
// Description: Per-device deployment rows, their state machine, and logs.
// Purpose: Capture the lifecycle of one device inside one deployment.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! A device-deployment is the per-device materialisation of a deployment.
//! Its status moves through a forward-only state machine: devices report
//! progress (`downloading` through `success`/`failure`), the server sets
//! the synthetic and administrative outcomes (`noartifact`, `aborted`,
//! `decommissioned`, `already_installed`). Once a terminal state is
//! reached no further transition is accepted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::model::identifiers::ArtifactId;
use crate::model::identifiers::DeploymentId;
use crate::model::identifiers::DeviceDeploymentId;
use crate::model::identifiers::DeviceId;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Device-deployment status.
///
/// # Invariants
/// - Wire names are stable snake_case strings.
/// - `Noartifact`, `Aborted`, `Decommissioned`, and `AlreadyInstalled` are
///   only ever set by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceDeploymentStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Update payload handed out; device is fetching it.
    Downloading,
    /// Parked by an update control map before the install step.
    PauseBeforeInstalling,
    /// Device is installing the update.
    Installing,
    /// Parked by an update control map before the reboot step.
    PauseBeforeRebooting,
    /// Device is rebooting into the new software.
    Rebooting,
    /// Parked by an update control map before the commit step.
    PauseBeforeCommitting,
    /// Update applied and committed.
    Success,
    /// Update failed on the device.
    Failure,
    /// No compatible artifact existed for the device.
    Noartifact,
    /// The device already runs the deployment artifact.
    AlreadyInstalled,
    /// Deployment was aborted by an operator.
    Aborted,
    /// Device was decommissioned while the deployment was active.
    Decommissioned,
}

impl DeviceDeploymentStatus {
    /// All states considered terminal.
    pub const TERMINAL: &'static [Self] = &[
        Self::Success,
        Self::Failure,
        Self::Noartifact,
        Self::AlreadyInstalled,
        Self::Aborted,
        Self::Decommissioned,
    ];

    /// All states considered active (non-terminal).
    pub const ACTIVE: &'static [Self] = &[
        Self::Pending,
        Self::Downloading,
        Self::PauseBeforeInstalling,
        Self::Installing,
        Self::PauseBeforeRebooting,
        Self::Rebooting,
        Self::PauseBeforeCommitting,
    ];

    /// Returns true when no further transition is accepted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::Failure
                | Self::Noartifact
                | Self::AlreadyInstalled
                | Self::Aborted
                | Self::Decommissioned
        )
    }

    /// Returns true when the state counts against the single-active-per-device rule.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Returns true for the parked `pause_before_*` states.
    #[must_use]
    pub const fn is_paused(self) -> bool {
        matches!(
            self,
            Self::PauseBeforeInstalling | Self::PauseBeforeRebooting | Self::PauseBeforeCommitting
        )
    }

    /// Forward-progress rank of an active state.
    ///
    /// Terminal states have no rank; progression among active states must
    /// strictly increase it.
    const fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Downloading => Some(1),
            Self::PauseBeforeInstalling => Some(2),
            Self::Installing => Some(3),
            Self::PauseBeforeRebooting => Some(4),
            Self::Rebooting => Some(5),
            Self::PauseBeforeCommitting => Some(6),
            _ => None,
        }
    }

    /// Returns true when `self → to` is a legal transition.
    ///
    /// Legal moves are the directed edges of the device state machine:
    /// strictly-forward progress among active states, device-reported
    /// outcomes (`success`, `failure`, `already_installed`) from any
    /// dispatched state, and the server-set outcomes (`noartifact`,
    /// `aborted`, `decommissioned`, `already_installed`) from any active
    /// state. Terminal states accept nothing; aborts are monotone.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        if self.is_terminal() || self == to {
            return false;
        }
        match to {
            Self::Success | Self::Failure => self != Self::Pending,
            Self::AlreadyInstalled | Self::Aborted | Self::Decommissioned | Self::Noartifact => {
                true
            }
            _ => match (self.rank(), to.rank()) {
                (Some(from_rank), Some(to_rank)) => to_rank > from_rank,
                _ => false,
            },
        }
    }

    /// Stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::PauseBeforeInstalling => "pause_before_installing",
            Self::Installing => "installing",
            Self::PauseBeforeRebooting => "pause_before_rebooting",
            Self::Rebooting => "rebooting",
            Self::PauseBeforeCommitting => "pause_before_committing",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Noartifact => "noartifact",
            Self::AlreadyInstalled => "already_installed",
            Self::Aborted => "aborted",
            Self::Decommissioned => "decommissioned",
        }
    }

    /// Parses a stable wire label into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ACTIVE
            .iter()
            .chain(Self::TERMINAL.iter())
            .copied()
            .find(|status| status.as_str() == value)
    }
}

impl fmt::Display for DeviceDeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Device-Deployment Row
// ============================================================================

/// Per-device materialisation of a deployment.
///
/// # Invariants
/// - `(device_id, deployment_id)` is unique across the store.
/// - At most one row per device is in an active state at any moment.
/// - `artifact_id` is `None` only for synthetic `noartifact` rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDeployment {
    /// Row identifier.
    pub id: DeviceDeploymentId,
    /// Parent deployment.
    pub deployment_id: DeploymentId,
    /// Target device.
    pub device_id: DeviceId,
    /// Assigned artifact; `None` when no compatible artifact existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<ArtifactId>,
    /// Device type reported by inventory at planning time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// Current status.
    pub status: DeviceDeploymentStatus,
    /// Free-form sub-state reported by the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substate: Option<String>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    /// Timestamp of the terminal transition, when reached.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished: Option<OffsetDateTime>,
    /// Failure retries consumed so far.
    pub retries_used: u32,
    /// Number of times the assignment was handed out over `/next`.
    pub deliveries: u32,
    /// True once the device uploaded its deployment log.
    pub is_log_available: bool,
    /// Size of the assigned artifact blob, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<u64>,
}

impl DeviceDeployment {
    /// Builds a fresh `pending` row for an assigned artifact.
    #[must_use]
    pub fn pending(
        deployment_id: DeploymentId,
        device_id: DeviceId,
        artifact_id: ArtifactId,
        device_type: Option<String>,
        image_size: Option<u64>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: DeviceDeploymentId::random(),
            deployment_id,
            device_id,
            artifact_id: Some(artifact_id),
            device_type,
            status: DeviceDeploymentStatus::Pending,
            substate: None,
            created: now,
            finished: None,
            retries_used: 0,
            deliveries: 0,
            is_log_available: false,
            image_size,
        }
    }

    /// Builds a synthetic terminal `noartifact` row.
    #[must_use]
    pub fn no_artifact(
        deployment_id: DeploymentId,
        device_id: DeviceId,
        device_type: Option<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: DeviceDeploymentId::random(),
            deployment_id,
            device_id,
            artifact_id: None,
            device_type,
            status: DeviceDeploymentStatus::Noartifact,
            substate: None,
            created: now,
            finished: Some(now),
            retries_used: 0,
            deliveries: 0,
            is_log_available: false,
            image_size: None,
        }
    }
}

// ============================================================================
// SECTION: Deployment Log
// ============================================================================

/// A single timestamped log line uploaded by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Log level label reported by the device.
    pub level: String,
    /// Log line text.
    pub message: String,
    /// Device-side timestamp of the line.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// The one-shot deployment log of a device-deployment.
///
/// # Invariants
/// - At most one log exists per device-deployment; a second upload is
///   rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDeploymentLog {
    /// Owning device-deployment row.
    pub device_deployment_id: DeviceDeploymentId,
    /// Uploaded log lines, in device order.
    pub messages: Vec<LogMessage>,
}

// ============================================================================
// SECTION: Tests
// ============================================================================
