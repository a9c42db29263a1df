//! Read-only snapshots for the show/diagnostic boundary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{BridgeId, GuardKind, InstanceId, PortId, PortRole, PortState};
use crate::vector::PriorityVector;

/// Remaining ticks of a port's running timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortTimers {
    pub hello: Option<u32>,
    pub forward_delay: Option<u32>,
    pub message_age: Option<u32>,
    pub topology_change: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub port: u16,
    pub port_id: PortId,
    pub role: PortRole,
    pub state: PortState,
    pub path_cost: u32,
    /// Designated vector of the attached segment: ours when we are
    /// designated, otherwise the one received from the designated bridge.
    pub designated_vector: PriorityVector,
    pub edge: bool,
    pub boundary: bool,
    pub guard: Option<GuardKind>,
    pub timers: PortTimers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    pub instance: InstanceId,
    pub bridge_id: BridgeId,
    pub root_bridge_id: BridgeId,
    pub root_path_cost: u32,
    pub root_port: Option<u16>,
    pub is_root: bool,
    pub remaining_hops: u8,
    pub vlans: String,
    pub topology_change_count: u64,
    pub ticks_since_topology_change: Option<u64>,
    pub hello_time: u16,
    pub forward_delay: u16,
    pub max_age: u16,
    pub tx_hold_count: u8,
    pub ports: Vec<PortSnapshot>,
}

impl InstanceState {
    pub fn port(&self, port: u16) -> Option<&PortSnapshot> {
        self.ports.iter().find(|p| p.port == port)
    }

    pub fn count_in_state(&self, state: PortState) -> usize {
        self.ports.iter().filter(|p| p.role != PortRole::Disabled && p.state == state).count()
    }

    pub fn count_in_role(&self, role: PortRole) -> usize {
        self.ports.iter().filter(|p| p.role == role).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionState {
    pub name: String,
    pub revision: u16,
    pub digest: String,
    /// MSTID to VLAN list, e.g. `{1: "10-20"}`.
    pub instances: BTreeMap<u16, String>,
}

/// Bridge-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BridgeCounters {
    pub bpdus_rx: u64,
    pub bpdus_tx: u64,
    pub decode_errors: u64,
    pub region_mismatches: u64,
    pub guard_violations: u64,
    pub filtered: u64,
    pub reelections: u64,
}
