//! Machine types
//!
//! A Machine is a physical server as reported by the inventory service.
//! The engine treats machines as immutable within one reconciliation tick;
//! the inventory service owns their lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Lifecycle state of a machine, owned by the inventory service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    /// Registered but not yet provisioned
    Uninitialized,
    /// Passing all health checks
    Healthy,
    /// Failing health checks
    Unhealthy,
    /// Not responding at all
    Unreachable,
    /// Under administrative maintenance (OS update etc.)
    Updating,
    /// Scheduled for decommissioning
    Retiring,
    /// Decommissioning completed
    Retired,
}

impl MachineState {
    /// True only for `Healthy`. New cluster members are always drawn from
    /// healthy machines.
    pub fn is_healthy(self) -> bool {
        matches!(self, MachineState::Healthy)
    }

    /// Whether an *existing* control-plane member in this state may keep
    /// its seat. Transient states do not force a replacement.
    pub fn is_control_plane_candidate(self) -> bool {
        matches!(
            self,
            MachineState::Healthy | MachineState::Updating | MachineState::Uninitialized
        )
    }

    /// Machines on their way out of the fleet.
    pub fn is_retiring(self) -> bool {
        matches!(self, MachineState::Retiring | MachineState::Retired)
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MachineState::Uninitialized => "uninitialized",
            MachineState::Healthy => "healthy",
            MachineState::Unhealthy => "unhealthy",
            MachineState::Unreachable => "unreachable",
            MachineState::Updating => "updating",
            MachineState::Retiring => "retiring",
            MachineState::Retired => "retired",
        };
        f.write_str(s)
    }
}

/// Static facts about a machine (identity, position, role).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Chassis serial number, the machine identity
    pub serial: String,
    #[serde(default)]
    pub ipv4: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ipv6: Vec<Ipv6Addr>,
    /// Rack number the machine is mounted in
    pub rack: u32,
    /// Position within the rack
    pub index_in_rack: u32,
    /// Role hint from the inventory (e.g. "cs", "ss")
    #[serde(default)]
    pub role: String,
    /// Free-form labels maintained by the inventory operators
    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,
    pub register_date: DateTime<Utc>,
    pub retire_date: DateTime<Utc>,
}

/// Observed machine state from the inventory service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    pub state: MachineState,
    /// Seconds since the last state transition
    #[serde(default)]
    pub duration_secs: f64,
    /// When the current state was entered
    pub timestamp: DateTime<Utc>,
}

/// A physical machine: inventory spec plus observed status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Machine {
    pub spec: MachineSpec,
    pub status: MachineStatus,
}

impl Machine {
    /// Primary address used to reach the machine, if it has one.
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.spec.ipv4.first().copied()
    }

    /// Whole days until the retire date; negative once it has passed.
    pub fn days_before_retire(&self, now: DateTime<Utc>) -> i64 {
        (self.spec.retire_date - now).num_days()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn machine(state: MachineState, retire: DateTime<Utc>) -> Machine {
        Machine {
            spec: MachineSpec {
                serial: "abc123".into(),
                ipv4: vec![Ipv4Addr::new(10, 0, 0, 1)],
                ipv6: vec![],
                rack: 1,
                index_in_rack: 3,
                role: "cs".into(),
                labels: Default::default(),
                register_date: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
                retire_date: retire,
            },
            status: MachineStatus {
                state,
                duration_secs: 0.0,
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            },
        }
    }

    #[test]
    fn state_predicates() {
        assert!(MachineState::Healthy.is_healthy());
        assert!(!MachineState::Updating.is_healthy());
        assert!(MachineState::Updating.is_control_plane_candidate());
        assert!(!MachineState::Unhealthy.is_control_plane_candidate());
        assert!(MachineState::Retired.is_retiring());
    }

    #[test]
    fn days_before_retire_sign() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let future = machine(MachineState::Healthy, now + chrono::Duration::days(300));
        let past = machine(MachineState::Healthy, now - chrono::Duration::days(10));
        assert_eq!(future.days_before_retire(now), 300);
        assert_eq!(past.days_before_retire(now), -10);
    }

    #[test]
    fn machine_state_serde_is_lowercase() {
        let json = serde_json::to_string(&MachineState::Unreachable).unwrap();
        assert_eq!(json, "\"unreachable\"");
    }
}
