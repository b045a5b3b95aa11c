// crates/fleetup-core/src/rollout.rs
// ============================================================================
// Module: Rollout Scheduler
// Description: Phase-window admission and cap evaluation for dispatch.
// Purpose: Decide whether a pending device may receive its update now.
// Dependencies: crate::model
// ============================================================================

//! ## Overview
//! Rollout admission is a pure function over the deployment row and the
//! dispatch time. A deployment without a phase plan admits everything; a
//! phased deployment admits only inside an open window and below the
//! cumulative dispatch cap of the current phase. Paused and aborted
//! deployments never admit. The caller acts on the decision: a denial for
//! the max-devices cap triggers abortion of the remaining pending rows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use time::OffsetDateTime;

use crate::model::deployment::Deployment;

// ============================================================================
// SECTION: Admission
// ============================================================================

/// Why a dispatch was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Operator paused the deployment.
    Paused,
    /// Operator aborted the deployment.
    Aborted,
    /// The first phase window has not opened yet.
    Scheduled,
    /// The cumulative cap of the current phase is exhausted.
    PhaseCapReached,
    /// The deployment-wide max-devices cap is exhausted.
    MaxDevicesReached,
}

/// Dispatch admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Dispatch may proceed; `phase_index` names the open phase, when any.
    Admit {
        /// Index of the currently open phase in the stored plan.
        phase_index: Option<usize>,
    },
    /// Dispatch must not proceed.
    Deny(DenyReason),
}

/// Evaluates dispatch admission for one pending device at time `now`.
#[must_use]
pub fn admit(deployment: &Deployment, now: OffsetDateTime) -> Admission {
    if deployment.aborted {
        return Admission::Deny(DenyReason::Aborted);
    }
    if deployment.paused {
        return Admission::Deny(DenyReason::Paused);
    }
    if deployment.max_devices > 0
        && deployment.stats.dispatched_total() >= deployment.max_devices
    {
        return Admission::Deny(DenyReason::MaxDevicesReached);
    }
    if deployment.phases.is_empty() {
        return Admission::Admit {
            phase_index: None,
        };
    }
    let Some(index) = current_phase(deployment, now) else {
        return Admission::Deny(DenyReason::Scheduled);
    };
    if let Some(cap) = deployment.phases[index].max_devices {
        let dispatched: u32 = deployment.phases[..= index]
            .iter()
            .map(|phase| phase.device_count)
            .sum();
        if dispatched >= cap {
            return Admission::Deny(DenyReason::PhaseCapReached);
        }
    }
    Admission::Admit {
        phase_index: Some(index),
    }
}

/// Finds the phase whose window contains `now`.
///
/// The last phase extends to infinity; `None` means the plan has not
/// opened yet.
#[must_use]
pub fn current_phase(deployment: &Deployment, now: OffsetDateTime) -> Option<usize> {
    let mut current = None;
    for (index, phase) in deployment.phases.iter().enumerate() {
        if phase.start_ts <= now {
            current = Some(index);
        } else {
            break;
        }
    }
    current
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::Admission;
    use super::DenyReason;
    use super::admit;
    use super::current_phase;
    use crate::model::deployment::Deployment;
    use crate::model::deployment::DeploymentStats;
    use crate::model::deployment::DeploymentType;
    use crate::model::deployment::DeviceSelector;
    use crate::model::deployment::Phase;
    use crate::model::identifiers::DeploymentId;
    use crate::model::identifiers::DeviceId;

    fn ts(unix: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(unix).expect("timestamp")
    }

    fn deployment(device_count: u32) -> Deployment {
        Deployment {
            id: DeploymentId::random(),
            name: "test".to_string(),
            artifact_name: "release-1".to_string(),
            artifacts: Vec::new(),
            selector: DeviceSelector::Devices(vec![DeviceId::new("d1")]),
            created: ts(0),
            finished: None,
            device_count,
            max_devices: 0,
            retries: 0,
            force_installation: false,
            phases: Vec::new(),
            stats: DeploymentStats {
                pending: device_count,
                ..DeploymentStats::default()
            },
            paused: false,
            aborted: false,
            deployment_type: DeploymentType::Regular,
            update_control_map: None,
        }
    }

    fn phase(start_unix: i64, cap: Option<u32>, dispatched: u32) -> Phase {
        Phase {
            start_ts: ts(start_unix),
            max_devices: cap,
            device_count: dispatched,
        }
    }

    #[test]
    fn unphased_deployment_admits() {
        let d = deployment(2);
        assert_eq!(
            admit(&d, ts(100)),
            Admission::Admit {
                phase_index: None
            }
        );
    }

    #[test]
    fn paused_and_aborted_deny() {
        let mut d = deployment(2);
        d.paused = true;
        assert_eq!(admit(&d, ts(100)), Admission::Deny(DenyReason::Paused));
        d.paused = false;
        d.aborted = true;
        assert_eq!(admit(&d, ts(100)), Admission::Deny(DenyReason::Aborted));
    }

    #[test]
    fn closed_first_window_means_scheduled() {
        let mut d = deployment(2);
        d.phases = vec![phase(1_000, Some(1), 0)];
        assert_eq!(admit(&d, ts(500)), Admission::Deny(DenyReason::Scheduled));
        assert_eq!(current_phase(&d, ts(500)), None);
    }

    #[test]
    fn phase_cap_denies_until_next_window() {
        let mut d = deployment(2);
        d.phases = vec![phase(1_000, Some(1), 0), phase(4_600, None, 0)];
        assert_eq!(
            admit(&d, ts(1_500)),
            Admission::Admit {
                phase_index: Some(0)
            }
        );
        d.phases[0].device_count = 1;
        assert_eq!(admit(&d, ts(1_500)), Admission::Deny(DenyReason::PhaseCapReached));
        // Second window is uncapped and re-admits the remaining device.
        assert_eq!(
            admit(&d, ts(5_000)),
            Admission::Admit {
                phase_index: Some(1)
            }
        );
    }

    #[test]
    fn phase_caps_count_cumulatively() {
        let mut d = deployment(10);
        d.phases = vec![phase(1_000, Some(2), 2), phase(2_000, Some(5), 2)];
        // Four dispatched across both phases; cumulative cap of phase 2 is 5.
        assert_eq!(
            admit(&d, ts(2_500)),
            Admission::Admit {
                phase_index: Some(1)
            }
        );
        d.phases[1].device_count = 3;
        assert_eq!(admit(&d, ts(2_500)), Admission::Deny(DenyReason::PhaseCapReached));
    }

    #[test]
    fn max_devices_cap_denies() {
        let mut d = deployment(3);
        d.max_devices = 1;
        d.stats.pending = 2;
        d.stats.success = 1;
        assert_eq!(admit(&d, ts(100)), Admission::Deny(DenyReason::MaxDevicesReached));
    }

    #[test]
    fn synthetic_outcomes_do_not_count_against_max_devices() {
        // Ten devices: six had no compatible artifact, four are waiting.
        // None of the six ever consumed an update slot, so the cap of
        // five still admits the waiting devices.
        let mut d = deployment(10);
        d.max_devices = 5;
        d.stats.pending = 4;
        d.stats.noartifact = 6;
        assert_eq!(
            admit(&d, ts(100)),
            Admission::Admit {
                phase_index: None
            }
        );
        d.stats.noartifact = 5;
        d.stats.already_installed = 1;
        assert_eq!(
            admit(&d, ts(100)),
            Admission::Admit {
                phase_index: None
            }
        );
        // Real dispatches still count.
        d.stats.pending = 3;
        d.stats.already_installed = 0;
        d.stats.noartifact = 1;
        d.stats.success = 4;
        d.stats.downloading = 1;
        assert_eq!(admit(&d, ts(100)), Admission::Deny(DenyReason::MaxDevicesReached));
    }
}
