//! Topology change propagation and die-out

use pretty_assertions::assert_eq;
use sonic_mstp::InstanceId;
use sonic_mstp_test::{flushes, instance_state, topology_changes_quiet, triangle, Endpoint, OPS1, OPS2, OPS3};

const CIST: InstanceId = InstanceId::CIST;

#[test]
fn test_windows_close_after_convergence() {
    let mut net = triangle();
    net.run_for(10).unwrap();
    assert!(topology_changes_quiet(&net, CIST).unwrap());

    // the initial forwarding transitions were reported
    let counts: u64 = [OPS1, OPS2, OPS3]
        .iter()
        .map(|name| instance_state(&net, name, CIST).unwrap().topology_change_count)
        .sum();
    assert!(counts > 0);
}

#[test]
fn test_link_failure_flushes_and_dies_out() {
    let mut net = triangle();
    net.run_for(10).unwrap();
    net.take_events();
    let before = instance_state(&net, OPS3, CIST).unwrap().topology_change_count;

    net.set_link(&Endpoint::new(OPS3, 2), &Endpoint::new(OPS1, 1), false)
        .unwrap();

    // ops3's alternate port took over and started forwarding
    let ops3 = instance_state(&net, OPS3, CIST).unwrap();
    assert!(ops3.topology_change_count > before);
    assert_eq!(ops3.ticks_since_topology_change, Some(0));
    assert!(flushes(&net, CIST).contains_key(OPS3));
    // the change travelled up the tree
    assert!(flushes(&net, CIST).contains_key(OPS2));

    net.run_for(10).unwrap();
    assert!(topology_changes_quiet(&net, CIST).unwrap());
    let ops3 = instance_state(&net, OPS3, CIST).unwrap();
    assert!(matches!(ops3.ticks_since_topology_change, Some(t) if t >= 5));
}

#[test]
fn test_no_changes_in_steady_state() {
    let mut net = triangle();
    net.run_for(10).unwrap();
    net.take_events();

    net.run_for(20).unwrap();
    assert!(flushes(&net, CIST).is_empty());
    assert!(topology_changes_quiet(&net, CIST).unwrap());
}
