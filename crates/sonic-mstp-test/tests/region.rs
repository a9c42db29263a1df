//! Regions, MSTIs and region boundaries

use pretty_assertions::assert_eq;
use sonic_mstp::{InstanceId, MstpError, Outbound, PortRole, PortState};
use sonic_mstp_test::{
    assert_loop_free, assert_root, bridge_with_ports, count_in_state, instance_state, mac, msti, pair, port_view,
    triangle, triangle_with, vlan_map, OPS1, OPS2, OPS3,
};

const RING: [((&str, u16), (&str, u16)); 3] = [((OPS1, 2), (OPS2, 1)), ((OPS2, 2), (OPS3, 1)), ((OPS3, 2), (OPS1, 1))];

const CIST: InstanceId = InstanceId::CIST;

#[test]
fn test_each_instance_elects_its_own_root() {
    let mut net = triangle_with(|name, bridge| {
        bridge
            .set_region_identity("campus", 1, vlan_map(&[(1, "10-20")]))
            .unwrap();
        if name == OPS3 {
            bridge.set_bridge_priority(msti(1), 4096).unwrap();
        }
    });
    net.run_for(35).unwrap();

    assert_root(&net, CIST, OPS1).unwrap();
    assert_root(&net, msti(1), OPS3).unwrap();
    assert_loop_free(&net, CIST, &RING).unwrap();
    assert_loop_free(&net, msti(1), &RING).unwrap();

    // the blocked link differs per instance
    assert_eq!(port_view(&net, OPS3, CIST, 1).unwrap().map(|v| v.role), Some(PortRole::Alternate));
    assert_eq!(
        port_view(&net, OPS2, msti(1), 1).unwrap().map(|v| v.role),
        Some(PortRole::Alternate)
    );
    assert_eq!(count_in_state(&net, msti(1), PortState::Forwarding).unwrap(), 5);

    let ops1 = instance_state(&net, OPS1, msti(1)).unwrap();
    assert_eq!(ops1.vlans, "10-20");
    assert_eq!(ops1.root_port, Some(1));
    assert_eq!(ops1.remaining_hops, 19);
    assert!(net.errors().is_empty());
}

#[test]
fn test_foreign_region_is_a_boundary() {
    let mut first = bridge_with_ports(mac(1), &[1]);
    first
        .set_region_identity("campus", 1, vlan_map(&[(1, "10")]))
        .unwrap();
    let second = bridge_with_ports(mac(2), &[1]);
    let mut net = pair(first, second);
    net.run_for(35).unwrap();

    assert_root(&net, CIST, OPS1).unwrap();
    assert!(net
        .errors()
        .iter()
        .any(|(name, e)| name == OPS1 && *e == MstpError::RegionMismatch { port: 1 }));
    assert!(net.bridge(OPS1).unwrap().counters().region_mismatches > 0);

    let cist = instance_state(&net, OPS1, CIST).unwrap();
    let port = cist.port(1).unwrap();
    assert!(port.boundary);
    assert_eq!(port.role, PortRole::Designated);
    assert_eq!(port.state, PortState::Forwarding);

    // the MSTI follows the CIST on the boundary port
    let inst = instance_state(&net, OPS1, msti(1)).unwrap();
    assert_eq!(inst.port(1).unwrap().role, PortRole::Designated);
    assert_eq!(inst.port(1).unwrap().state, PortState::Forwarding);

    let downstream = instance_state(&net, OPS2, CIST).unwrap();
    assert_eq!(downstream.root_port, Some(1));
    assert!(downstream.port(1).unwrap().boundary);
}

#[test]
fn test_reconfiguration_reelects_exactly_once() {
    let mut net = triangle();
    net.run_for(4).unwrap();

    for name in [OPS1, OPS2, OPS3] {
        let before = net.bridge(name).unwrap().counters().reelections;
        let changed = net
            .with_bridge(name, |b| b.set_region_identity("campus", 2, vlan_map(&[(2, "100-110")])))
            .unwrap();
        assert!(changed);
        assert_eq!(net.bridge(name).unwrap().counters().reelections, before + 1);
        assert_eq!(net.bridge(name).unwrap().instance_ids(), vec![CIST, msti(2)]);
    }

    // the same identity again is a no-op
    let before = net.bridge(OPS2).unwrap().counters().reelections;
    let changed = net
        .with_bridge(OPS2, |b| b.set_region_identity("campus", 2, vlan_map(&[(2, "100-110")])))
        .unwrap();
    assert!(!changed);
    assert_eq!(net.bridge(OPS2).unwrap().counters().reelections, before);

    net.run_for(35).unwrap();
    assert_root(&net, CIST, OPS1).unwrap();
    assert_root(&net, msti(2), OPS1).unwrap();
    assert_loop_free(&net, msti(2), &RING).unwrap();
    for name in [OPS1, OPS2, OPS3] {
        let state = instance_state(&net, name, msti(2)).unwrap();
        assert!(state.ports.iter().all(|p| !p.boundary));
    }
}

#[test]
fn test_instance_removal_reports_to_forwarding_plane() {
    let mut net = triangle_with(|_, bridge| {
        bridge
            .set_region_identity("campus", 1, vlan_map(&[(1, "10"), (2, "20")]))
            .unwrap();
    });
    net.run_for(4).unwrap();
    net.take_events();

    net.with_bridge(OPS1, |b| b.remove_instance(msti(2))).unwrap();
    assert!(net
        .events()
        .iter()
        .any(|(name, e)| name == OPS1 && *e == Outbound::InstanceRemoved { instance: msti(2) }));
    assert!(instance_state(&net, OPS1, msti(2)).is_err());
    assert_eq!(net.bridge(OPS1).unwrap().query_region().instances.len(), 1);

    // ops1 left the shared region, so its links are now boundaries
    assert!(net.bridge(OPS2).unwrap().counters().region_mismatches > 0);
}
