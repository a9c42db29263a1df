//! Test fixtures for common MSTP topologies
//!
//! Bridge `n` gets MAC `00:00:00:00:00:0n`, so with equal priorities the
//! lowest-numbered bridge wins the root election.

use sonic_mstp::{
    parse_vlan_list, Bridge, BridgeParams, InstanceId, MacAddress, PortParams, VlanMap,
};

use crate::network::{Endpoint, SimNetwork};

/// Names used by the three-bridge fixtures.
pub const OPS1: &str = "ops1";
pub const OPS2: &str = "ops2";
pub const OPS3: &str = "ops3";

/// Region shared by the ring bridges.
pub const RING_REGION: &str = "ring";

pub fn mac(n: u8) -> MacAddress {
    MacAddress::new([0x00, 0x00, 0x00, 0x00, 0x00, n])
}

pub fn msti(id: u16) -> InstanceId {
    InstanceId::msti(id).expect("valid MSTI id")
}

/// A bridge with default timers and the given ports enabled.
pub fn bridge_with_ports(mac: MacAddress, ports: &[u16]) -> Bridge {
    let mut bridge = Bridge::new(mac, BridgeParams::default()).expect("default parameters are valid");
    for port in ports {
        bridge
            .set_port_admin_state(*port, true)
            .expect("port can be enabled");
    }
    bridge
}

/// Builds a VLAN map from `(instance, "vlan-list")` pairs.
pub fn vlan_map(entries: &[(u16, &str)]) -> VlanMap {
    let mut map = VlanMap::new();
    for (id, list) in entries {
        map.map(msti(*id), parse_vlan_list(list).expect("valid VLAN list"))
            .expect("VLAN lists do not overlap");
    }
    map
}

/// Three bridges in a ring, all in region [`RING_REGION`] with every VLAN
/// on the CIST:
/// ops1:2 - ops2:1, ops2:2 - ops3:1, ops3:2 - ops1:1.
///
/// Ports come up before cabling; their first BPDUs go out on the first
/// [`SimNetwork::settle`].
pub fn triangle() -> SimNetwork {
    triangle_with(|_, _| {})
}

/// Like [`triangle`], with a hook to configure each bridge before cabling.
pub fn triangle_with(mut configure: impl FnMut(&str, &mut Bridge)) -> SimNetwork {
    let mut net = SimNetwork::new();
    for (n, name) in [(1, OPS1), (2, OPS2), (3, OPS3)] {
        let mut bridge = bridge_with_ports(mac(n), &[1, 2]);
        bridge
            .set_region_identity(RING_REGION, 0, VlanMap::new())
            .expect("valid region");
        configure(name, &mut bridge);
        net.add_bridge(name, bridge);
    }
    net.connect(Endpoint::new(OPS1, 2), Endpoint::new(OPS2, 1))
        .expect("fresh ports");
    net.connect(Endpoint::new(OPS2, 2), Endpoint::new(OPS3, 1))
        .expect("fresh ports");
    net.connect(Endpoint::new(OPS3, 2), Endpoint::new(OPS1, 1))
        .expect("fresh ports");
    net
}

/// Two bridges joined port 1 to port 1.
pub fn pair(first: Bridge, second: Bridge) -> SimNetwork {
    let mut net = SimNetwork::new();
    net.add_bridge(OPS1, first);
    net.add_bridge(OPS2, second);
    net.connect(Endpoint::new(OPS1, 1), Endpoint::new(OPS2, 1))
        .expect("fresh ports");
    net
}

/// Port parameters with one guard switched on.
pub fn guarded(configure: impl FnOnce(&mut PortParams)) -> PortParams {
    let mut params = PortParams::default();
    configure(&mut params);
    params
}
