//! Spanning tree priority vectors.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::types::{BridgeId, PortId};

/// `{root, root path cost, designated bridge, designated port, port}`.
///
/// The derived ordering is lexicographic in field order and lower is better.
/// `port_id` is the local port the vector was received on (or the
/// transmitting port for a designated vector); it is the final tie-break
/// between parallel links to the same neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriorityVector {
    pub root_id: BridgeId,
    pub root_path_cost: u32,
    pub designated_bridge_id: BridgeId,
    pub designated_port_id: PortId,
    pub port_id: PortId,
}

impl PriorityVector {
    /// The vector a bridge generates for itself: own ID, zero cost.
    pub fn bridge(bridge_id: BridgeId) -> Self {
        PriorityVector {
            root_id: bridge_id,
            root_path_cost: 0,
            designated_bridge_id: bridge_id,
            designated_port_id: PortId::default(),
            port_id: PortId::default(),
        }
    }

    /// A message priority vector as carried in a BPDU.
    pub fn message(
        root_id: BridgeId,
        root_path_cost: u32,
        designated_bridge_id: BridgeId,
        designated_port_id: PortId,
    ) -> Self {
        PriorityVector {
            root_id,
            root_path_cost,
            designated_bridge_id,
            designated_port_id,
            port_id: PortId::default(),
        }
    }

    /// Root path priority vector for a message received on `port_id`.
    pub fn root_path(&self, path_cost: u32, port_id: PortId) -> Self {
        PriorityVector {
            root_path_cost: self.root_path_cost.saturating_add(path_cost),
            port_id,
            ..*self
        }
    }

    /// Designated priority vector this bridge offers on `port_id`.
    pub fn designated(&self, bridge_id: BridgeId, port_id: PortId) -> Self {
        PriorityVector {
            root_id: self.root_id,
            root_path_cost: self.root_path_cost,
            designated_bridge_id: bridge_id,
            designated_port_id: port_id,
            port_id,
        }
    }

    /// Compares the four message fields, ignoring the receiving port.
    pub fn cmp_message(&self, other: &Self) -> Ordering {
        (
            self.root_id,
            self.root_path_cost,
            self.designated_bridge_id,
            self.designated_port_id,
        )
            .cmp(&(
                other.root_id,
                other.root_path_cost,
                other.designated_bridge_id,
                other.designated_port_id,
            ))
    }

    /// True when both vectors were sent by the same port of the same bridge.
    ///
    /// Priorities are ignored so that a neighbor re-announcing with changed
    /// priorities still replaces its own earlier information.
    pub fn same_sender(&self, other: &Self) -> bool {
        self.designated_bridge_id.mac() == other.designated_bridge_id.mac()
            && self.designated_port_id.number() == other.designated_port_id.number()
    }
}

impl fmt::Display for PriorityVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{} {} {} {} {}}}",
            self.root_id,
            self.root_path_cost,
            self.designated_bridge_id,
            self.designated_port_id,
            self.port_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstanceId, MacAddress};
    use pretty_assertions::assert_eq;

    fn bid(priority: u16, last: u8) -> BridgeId {
        BridgeId::new(priority, InstanceId::CIST, MacAddress::new([0, 0, 0, 0, 0, last]))
    }

    #[test]
    fn test_lower_root_wins_over_cost() {
        let a = PriorityVector::message(bid(4096, 9), 200_000, bid(32768, 2), PortId::new(128, 1));
        let b = PriorityVector::message(bid(32768, 1), 0, bid(32768, 1), PortId::new(128, 1));
        assert!(a < b);
    }

    #[test]
    fn test_cost_then_designated_bridge() {
        let root = bid(32768, 1);
        let near = PriorityVector::message(root, 20000, bid(32768, 3), PortId::new(128, 1));
        let far = PriorityVector::message(root, 40000, bid(32768, 2), PortId::new(128, 1));
        assert!(near < far);

        let via_low = PriorityVector::message(root, 20000, bid(32768, 2), PortId::new(128, 9));
        assert!(via_low < near);
    }

    #[test]
    fn test_receiving_port_breaks_final_tie() {
        let msg = PriorityVector::message(bid(32768, 1), 0, bid(32768, 1), PortId::new(128, 2));
        let on_port_1 = msg.root_path(20000, PortId::new(128, 1));
        let on_port_2 = msg.root_path(20000, PortId::new(128, 2));
        assert_eq!(on_port_1.cmp_message(&on_port_2), Ordering::Equal);
        assert!(on_port_1 < on_port_2);
    }

    #[test]
    fn test_root_path_adds_cost() {
        let msg = PriorityVector::message(bid(32768, 1), 20000, bid(32768, 2), PortId::new(128, 2));
        let path = msg.root_path(20000, PortId::new(128, 7));
        assert_eq!(path.root_path_cost, 40000);
        assert_eq!(path.port_id, PortId::new(128, 7));

        let max = PriorityVector::message(bid(32768, 1), u32::MAX, bid(32768, 2), PortId::new(128, 2));
        assert_eq!(max.root_path(1, PortId::new(128, 1)).root_path_cost, u32::MAX);
    }

    #[test]
    fn test_same_sender_ignores_priorities() {
        let old = PriorityVector::message(bid(32768, 1), 0, bid(32768, 4), PortId::new(128, 3));
        let new = PriorityVector::message(bid(32768, 4), 0, bid(4096, 4), PortId::new(64, 3));
        assert!(old.same_sender(&new));
        let other = PriorityVector::message(bid(32768, 1), 0, bid(32768, 4), PortId::new(128, 4));
        assert!(!old.same_sender(&other));
    }
}
