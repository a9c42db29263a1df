//! CIST convergence on the three-bridge ring
//!
//! Topology:
//!
//! ```text
//!        ops1
//!      p1/  \p2
//!    p2/      \p1
//!   ops3 ---- ops2
//!      p1    p2
//! ```

use pretty_assertions::assert_eq;
use sonic_mstp::{InstanceId, PortRole, PortState};
use sonic_mstp_test::{
    assert_loop_free, assert_root, assert_settled, count_in_state, port_view, port_views, state_changes, triangle,
    Endpoint, PortView, OPS1, OPS2, OPS3,
};

const RING: [((&str, u16), (&str, u16)); 3] = [((OPS1, 2), (OPS2, 1)), ((OPS2, 2), (OPS3, 1)), ((OPS3, 2), (OPS1, 1))];

const CIST: InstanceId = InstanceId::CIST;

#[test]
fn test_ring_converges_with_one_blocked_port() {
    let mut net = triangle();
    net.run_for(4).unwrap();

    assert_root(&net, CIST, OPS1).unwrap();
    assert_loop_free(&net, CIST, &RING).unwrap();
    assert_settled(&net, CIST).unwrap();
    assert_eq!(count_in_state(&net, CIST, PortState::Forwarding).unwrap(), 5);
    assert_eq!(count_in_state(&net, CIST, PortState::Discarding).unwrap(), 1);

    assert_eq!(
        port_view(&net, OPS3, CIST, 1).unwrap(),
        Some(PortView {
            role: PortRole::Alternate,
            state: PortState::Discarding,
        })
    );
    assert_eq!(port_view(&net, OPS2, CIST, 1).unwrap().map(|v| v.role), Some(PortRole::Root));
    assert_eq!(port_view(&net, OPS3, CIST, 2).unwrap().map(|v| v.role), Some(PortRole::Root));
    assert_eq!(
        port_view(&net, OPS2, CIST, 2).unwrap().map(|v| v.role),
        Some(PortRole::Designated)
    );

    let root = net.bridge(OPS1).unwrap().query_state(CIST).unwrap();
    assert!(root.is_root);
    assert_eq!(root.root_port, None);
    assert_eq!(root.count_in_role(PortRole::Designated), 2);

    let ops3 = net.bridge(OPS3).unwrap().query_state(CIST).unwrap();
    assert_eq!(ops3.root_path_cost, 20000);
    assert_eq!(ops3.root_port, Some(2));
}

#[test]
fn test_ring_reconverges_after_link_failure() {
    let mut net = triangle();
    net.run_for(4).unwrap();

    net.set_link(&Endpoint::new(OPS3, 2), &Endpoint::new(OPS1, 1), false)
        .unwrap();
    net.run_for(4).unwrap();

    assert_root(&net, CIST, OPS1).unwrap();
    assert_loop_free(&net, CIST, &RING).unwrap();
    assert_eq!(
        port_view(&net, OPS3, CIST, 1).unwrap(),
        Some(PortView {
            role: PortRole::Root,
            state: PortState::Forwarding,
        })
    );
    assert_eq!(
        port_view(&net, OPS3, CIST, 2).unwrap().map(|v| v.role),
        Some(PortRole::Disabled)
    );
    assert_eq!(count_in_state(&net, CIST, PortState::Forwarding).unwrap(), 4);

    let ops3 = net.bridge(OPS3).unwrap().query_state(CIST).unwrap();
    assert_eq!(ops3.root_path_cost, 40000);

    // link restored: the original tree comes back
    net.set_link(&Endpoint::new(OPS3, 2), &Endpoint::new(OPS1, 1), true)
        .unwrap();
    net.run_for(35).unwrap();
    assert_root(&net, CIST, OPS1).unwrap();
    assert_loop_free(&net, CIST, &RING).unwrap();
    assert_eq!(
        port_view(&net, OPS3, CIST, 1).unwrap().map(|v| v.role),
        Some(PortRole::Alternate)
    );
    assert_eq!(count_in_state(&net, CIST, PortState::Forwarding).unwrap(), 5);
}

#[test]
fn test_steady_state_is_stable() {
    let mut net = triangle();
    net.run_for(10).unwrap();
    let before = port_views(&net, CIST).unwrap();
    let changes = state_changes(&net);

    net.run_for(30).unwrap();
    assert_eq!(port_views(&net, CIST).unwrap(), before);
    assert_eq!(state_changes(&net), changes);
    assert!(net.errors().is_empty());
}

#[test]
fn test_root_moves_with_priority() {
    let mut net = triangle();
    net.run_for(4).unwrap();

    net.with_bridge(OPS3, |b| b.set_bridge_priority(CIST, 4096))
        .unwrap();
    net.run_for(35).unwrap();

    assert_root(&net, CIST, OPS3).unwrap();
    assert_loop_free(&net, CIST, &RING).unwrap();
    assert_eq!(count_in_state(&net, CIST, PortState::Forwarding).unwrap(), 5);
    // ops1 and ops2 tie on cost to ops3; ops1 has the lower bridge id
    assert_eq!(
        port_view(&net, OPS2, CIST, 1).unwrap().map(|v| v.role),
        Some(PortRole::Alternate)
    );
}
