//! Effects the engine hands back to its collaborators.
//!
//! Nothing here performs I/O. The bridge queues outbound actions and the
//! owner drains them after each event, outside the state machine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{GuardKind, InstanceId, PortState, VlanId};

/// An action for the network, forwarding plane or telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Send a BPDU payload on a port. Fire-and-forget.
    TransmitBpdu { port: u16, bytes: Vec<u8> },
    /// Program a port's forwarding state for an instance.
    PortState {
        port: u16,
        instance: InstanceId,
        state: PortState,
    },
    /// Flush learned addresses of an instance.
    TopologyChange { instance: InstanceId },
    /// An MSTI exists and owns these VLANs.
    InstanceVlans {
        instance: InstanceId,
        vlans: Vec<VlanId>,
    },
    InstanceRemoved { instance: InstanceId },
    GuardViolation { port: u16, kind: GuardKind },
}

/// Effects accumulated while processing one event.
#[derive(Debug, Default)]
pub struct Effects {
    outbound: Vec<Outbound>,
    /// Ports whose BPDU content changed and need a transmission.
    dirty: BTreeSet<u16>,
    guard_violations: u64,
}

impl Effects {
    pub fn push(&mut self, action: Outbound) {
        if matches!(action, Outbound::GuardViolation { .. }) {
            self.guard_violations += 1;
        }
        self.outbound.push(action);
    }

    pub fn mark_dirty(&mut self, port: u16) {
        self.dirty.insert(port);
    }

    pub fn take_dirty(&mut self) -> BTreeSet<u16> {
        std::mem::take(&mut self.dirty)
    }

    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbound)
    }

    pub fn take_guard_violations(&mut self) -> u64 {
        std::mem::take(&mut self.guard_violations)
    }
}
