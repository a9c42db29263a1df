//! Verification helpers for simulated networks

use std::collections::BTreeMap;
use thiserror::Error;

use sonic_mstp::{BridgeId, InstanceId, InstanceState, Outbound, PortRole, PortState};

use crate::network::{SimError, SimNetwork};

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error(transparent)]
    Sim(#[from] SimError),

    #[error("Instance {instance} query failed on {bridge}: {message}")]
    Query {
        bridge: String,
        instance: InstanceId,
        message: String,
    },

    #[error("Bridges disagree on the {instance} root: {roots:?}")]
    RootDisagreement {
        instance: InstanceId,
        roots: BTreeMap<String, BridgeId>,
    },

    #[error("Expected {expected} as {instance} root, found {actual}")]
    WrongRoot {
        instance: InstanceId,
        expected: String,
        actual: BridgeId,
    },

    #[error("Forwarding loop in {instance} through {bridges:?}")]
    Loop {
        instance: InstanceId,
        bridges: Vec<String>,
    },

    #[error("Ports still learning in {instance}: {ports:?}")]
    Unsettled {
        instance: InstanceId,
        ports: Vec<(String, u16)>,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Role and state of one port, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortView {
    pub role: PortRole,
    pub state: PortState,
}

/// Snapshot of one instance on one bridge.
pub fn instance_state(net: &SimNetwork, bridge: &str, instance: InstanceId) -> VerifyResult<InstanceState> {
    net.bridge(bridge)?
        .query_state(instance)
        .map_err(|e| VerificationError::Query {
            bridge: bridge.to_string(),
            instance,
            message: e.to_string(),
        })
}

/// Role and state of a port. `None` if the port does not exist.
pub fn port_view(net: &SimNetwork, bridge: &str, instance: InstanceId, port: u16) -> VerifyResult<Option<PortView>> {
    let state = instance_state(net, bridge, instance)?;
    Ok(state.port(port).map(|p| PortView {
        role: p.role,
        state: p.state,
    }))
}

/// Every port of every bridge, keyed by (bridge, port).
pub fn port_views(net: &SimNetwork, instance: InstanceId) -> VerifyResult<BTreeMap<(String, u16), PortView>> {
    let mut views = BTreeMap::new();
    for name in net.bridge_names() {
        let state = instance_state(net, name, instance)?;
        for port in state.ports {
            views.insert(
                (name.to_string(), port.port),
                PortView {
                    role: port.role,
                    state: port.state,
                },
            );
        }
    }
    Ok(views)
}

/// Number of enabled ports in `state` across the network.
pub fn count_in_state(net: &SimNetwork, instance: InstanceId, state: PortState) -> VerifyResult<usize> {
    let mut count = 0;
    for name in net.bridge_names() {
        count += instance_state(net, name, instance)?.count_in_state(state);
    }
    Ok(count)
}

/// Checks that every bridge agrees the named bridge is root of `instance`.
pub fn assert_root(net: &SimNetwork, instance: InstanceId, expected: &str) -> VerifyResult<()> {
    let mut roots = BTreeMap::new();
    for name in net.bridge_names() {
        roots.insert(name.to_string(), instance_state(net, name, instance)?.root_bridge_id);
    }
    let expected_id = net.bridge(expected)?.bridge_id(instance);
    let first = roots.values().next().copied();
    if roots.values().any(|r| Some(*r) != first) {
        return Err(VerificationError::RootDisagreement { instance, roots });
    }
    match first {
        Some(actual) if actual != expected_id => Err(VerificationError::WrongRoot {
            instance,
            expected: expected.to_string(),
            actual,
        }),
        _ => Ok(()),
    }
}

/// Checks that the forwarding graph of `instance` has no cycle.
///
/// Two bridges are joined when each of them forwards on its end of a
/// link; the link list is rebuilt from the port pairs passed in.
pub fn assert_loop_free(
    net: &SimNetwork,
    instance: InstanceId,
    links: &[((&str, u16), (&str, u16))],
) -> VerifyResult<()> {
    let views = port_views(net, instance)?;
    let forwarding = |bridge: &str, port: u16| {
        views
            .get(&(bridge.to_string(), port))
            .map(|v| v.state == PortState::Forwarding)
            .unwrap_or(false)
    };

    let names: Vec<String> = net.bridge_names().map(str::to_string).collect();
    let mut parent: BTreeMap<String, String> = names.iter().map(|n| (n.clone(), n.clone())).collect();
    fn find(parent: &BTreeMap<String, String>, mut node: String) -> String {
        while let Some(next) = parent.get(&node) {
            if *next == node {
                break;
            }
            node = next.clone();
        }
        node
    }

    for ((a, pa), (b, pb)) in links {
        if !(forwarding(a, *pa) && forwarding(b, *pb)) {
            continue;
        }
        let (ra, rb) = (find(&parent, a.to_string()), find(&parent, b.to_string()));
        if ra == rb {
            return Err(VerificationError::Loop {
                instance,
                bridges: vec![a.to_string(), b.to_string()],
            });
        }
        parent.insert(ra, rb);
    }
    Ok(())
}

/// Checks that no enabled port is half way through the forward-delay
/// sequence.
pub fn assert_settled(net: &SimNetwork, instance: InstanceId) -> VerifyResult<()> {
    let ports: Vec<(String, u16)> = port_views(net, instance)?
        .into_iter()
        .filter(|(_, v)| v.role != PortRole::Disabled && v.state == PortState::Learning)
        .map(|(k, _)| k)
        .collect();
    if ports.is_empty() {
        Ok(())
    } else {
        Err(VerificationError::Unsettled { instance, ports })
    }
}

/// True when no port of any bridge has a running topology change window.
pub fn topology_changes_quiet(net: &SimNetwork, instance: InstanceId) -> VerifyResult<bool> {
    for name in net.bridge_names() {
        let state = instance_state(net, name, instance)?;
        if state.ports.iter().any(|p| p.timers.topology_change.is_some()) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// FDB flush notifications recorded for `instance`, per bridge.
pub fn flushes(net: &SimNetwork, instance: InstanceId) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for (name, event) in net.events() {
        if let Outbound::TopologyChange { instance: i } = event {
            if *i == instance {
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

/// Port state changes recorded so far.
pub fn state_changes(net: &SimNetwork) -> usize {
    net.events()
        .iter()
        .filter(|(_, e)| matches!(e, Outbound::PortState { .. }))
        .count()
}
