//! Spanning tree instance engine (CIST or one MSTI).
//!
//! Owns the root priority vector and one [`PortMachine`] per port. Role
//! selection runs whenever received information, port membership or bridge
//! identity changes; it is idempotent, so repeating it with unchanged inputs
//! never moves a port.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::bpdu::{BpduFlags, FlagRole};
use crate::outbound::{Effects, Outbound};
use crate::params::BridgeParams;
use crate::port::{PortFacts, PortMachine, PortStatus, ReceivedInfo, StateChange};
use crate::state::{InstanceState, PortSnapshot, PortTimers};
use crate::timer::{TimerKey, TimerKind, TimerService};
use crate::topology::{TcScope, TopologyNotifier};
use crate::types::{BridgeId, GuardKind, InstanceId, PortId, PortRole};
use crate::vector::PriorityVector;

/// Borrowed bridge state an instance works against.
pub(crate) struct EngineCtx<'a> {
    pub params: &'a BridgeParams,
    pub timers: &'a mut TimerService,
    pub facts: &'a BTreeMap<u16, PortFacts>,
    pub effects: &'a mut Effects,
}

impl EngineCtx<'_> {
    fn facts(&self, port: u16) -> PortFacts {
        self.facts.get(&port).copied().unwrap_or_default()
    }

    fn tc_scope(&mut self) -> TcScope<'_> {
        TcScope {
            window: self.params.tc_window(),
            timers: &mut *self.timers,
            effects: &mut *self.effects,
        }
    }
}

/// The part of a BPDU addressed to one instance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InstanceMessage {
    pub vector: PriorityVector,
    pub role: FlagRole,
    pub flags: BpduFlags,
    pub message_age: u16,
    pub remaining_hops: u8,
    /// Message age reached max age, or hop count ran out.
    pub expired: bool,
}

/// What a port advertises for this instance in its next BPDU.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PortAdvert {
    pub flags: BpduFlags,
    pub vector: PriorityVector,
    pub port_id: PortId,
    pub message_age: u16,
    pub remaining_hops: u8,
}

#[derive(Debug, Clone)]
pub struct InstanceEngine {
    id: InstanceId,
    bridge_id: BridgeId,
    root_vector: PriorityVector,
    root_port: Option<u16>,
    ports: BTreeMap<u16, PortMachine>,
    topology: TopologyNotifier,
}

impl InstanceEngine {
    pub fn new(id: InstanceId, bridge_id: BridgeId) -> Self {
        InstanceEngine {
            id,
            bridge_id,
            root_vector: PriorityVector::bridge(bridge_id),
            root_port: None,
            ports: BTreeMap::new(),
            topology: TopologyNotifier::default(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn bridge_id(&self) -> BridgeId {
        self.bridge_id
    }

    /// True while a topology change window is open on `port`.
    pub(crate) fn tc_active(&self, port: u16, timers: &TimerService) -> bool {
        self.topology.is_changing(self.id, port, timers)
    }

    pub fn root_vector(&self) -> PriorityVector {
        self.root_vector
    }

    pub fn root_port(&self) -> Option<u16> {
        self.root_port
    }

    pub fn is_root(&self) -> bool {
        self.root_port.is_none()
    }

    pub fn port(&self, number: u16) -> Option<&PortMachine> {
        self.ports.get(&number)
    }

    pub fn ports(&self) -> impl Iterator<Item = &PortMachine> {
        self.ports.values()
    }

    pub fn topology(&self) -> &TopologyNotifier {
        &self.topology
    }

    pub(crate) fn tick(&mut self) {
        self.topology.tick();
    }

    pub(crate) fn set_bridge_id(&mut self, bridge_id: BridgeId) -> bool {
        let changed = bridge_id != self.bridge_id;
        self.bridge_id = bridge_id;
        changed
    }

    pub(crate) fn add_port(&mut self, number: u16, priority: u8, path_cost: u32, enabled: bool, ctx: &mut EngineCtx) {
        let mut machine = PortMachine::new(self.id, number, priority, path_cost);
        machine.set_enabled(enabled, ctx.timers);
        self.ports.insert(number, machine);
    }

    pub(crate) fn remove_port(&mut self, number: u16, ctx: &mut EngineCtx) {
        let change = match self.ports.get_mut(&number) {
            Some(pm) => pm.set_enabled(false, ctx.timers),
            None => return,
        };
        self.record_change(number, change, ctx);
        self.topology.forget_port(self.id, number, ctx.timers);
        ctx.timers.cancel_port_instance(number, self.id);
        self.ports.remove(&number);
    }

    pub(crate) fn set_port_enabled(&mut self, number: u16, enabled: bool, ctx: &mut EngineCtx) {
        let change = match self.ports.get_mut(&number) {
            Some(pm) => pm.set_enabled(enabled, ctx.timers),
            None => return,
        };
        if !enabled {
            self.topology.forget_port(self.id, number, ctx.timers);
        }
        self.record_change(number, change, ctx);
    }

    pub(crate) fn set_port_params(&mut self, number: u16, priority: u8, path_cost: u32) -> bool {
        self.ports
            .get_mut(&number)
            .map(|pm| pm.set_params(priority, path_cost))
            .unwrap_or(false)
    }

    /// Processes this instance's part of a BPDU received on `number`.
    pub(crate) fn receive(&mut self, number: u16, msg: &InstanceMessage, ctx: &mut EngineCtx) {
        let designated = match self.ports.get(&number) {
            Some(pm) if pm.participates() => self.root_vector.designated(self.bridge_id, pm.port_id()),
            _ => return,
        };

        let reselect = match msg.role {
            FlagRole::Designated => self.receive_designated(number, msg, designated, ctx),
            FlagRole::Root | FlagRole::AlternateOrBackup => {
                self.receive_downstream(number, msg, designated, ctx);
                false
            }
            FlagRole::Unknown => false,
        };
        if reselect {
            self.reselect(ctx);
        } else {
            self.answer_proposals(ctx);
        }

        let role = match self.ports.get(&number) {
            Some(pm) => pm.status().role(),
            None => return,
        };
        if msg.flags.contains(BpduFlags::TOPOLOGY_CHANGE) && role.may_forward() {
            let others = self.active_ports(ctx, Some(number));
            self.topology
                .received(self.id, number, msg.role == FlagRole::Root, &others, ctx.tc_scope());
        }
        if msg.flags.contains(BpduFlags::TOPOLOGY_CHANGE_ACK) && role == PortRole::Root {
            self.topology.acknowledged(self.id, number, ctx.timers);
        }
    }

    /// A legacy TCN from a downstream STP bridge.
    pub(crate) fn receive_tcn(&mut self, number: u16, ctx: &mut EngineCtx) {
        let may_forward = self
            .ports
            .get(&number)
            .map(|pm| pm.status().role().may_forward())
            .unwrap_or(false);
        if may_forward {
            let others = self.active_ports(ctx, Some(number));
            self.topology.received(self.id, number, true, &others, ctx.tc_scope());
        }
    }

    /// Returns true when role selection must run.
    fn receive_designated(
        &mut self,
        number: u16,
        msg: &InstanceMessage,
        designated: PriorityVector,
        ctx: &mut EngineCtx,
    ) -> bool {
        let facts = ctx.facts(number);
        let Some(pm) = self.ports.get_mut(&number) else {
            return false;
        };
        if msg.expired {
            debug!(instance = %self.id, port = number, "discarding aged information");
            return false;
        }

        let vector = PriorityVector {
            port_id: pm.port_id(),
            ..msg.vector
        };
        let current = pm.received.map(|r| r.vector).unwrap_or(designated);
        let order = vector.cmp_message(&current);
        let superior = order == Ordering::Less || (order != Ordering::Equal && vector.same_sender(&current));
        let repeated = pm.received.is_some() && order == Ordering::Equal;
        let info = ReceivedInfo {
            vector,
            message_age: msg.message_age,
            remaining_hops: msg.remaining_hops,
        };
        let proposal = msg.flags.contains(BpduFlags::PROPOSAL);

        if superior {
            if facts.root_guard && vector.cmp_message(&designated) == Ordering::Less {
                let change = pm.block(GuardKind::RootGuard, ctx.timers);
                warn!(instance = %self.id, port = number, root = %vector.root_id, "root-guard blocked superior BPDU");
                ctx.effects.push(Outbound::GuardViolation {
                    port: number,
                    kind: GuardKind::RootGuard,
                });
                self.record_change(number, change, ctx);
                return true;
            }
            pm.accept(info, proposal, ctx.timers, ctx.params);
            true
        } else if repeated {
            if proposal && pm.agree {
                // neighbor missed our agreement
                ctx.effects.mark_dirty(number);
            }
            pm.accept(info, proposal, ctx.timers, ctx.params);
            false
        } else {
            // inferior designated information: answer with ours
            if pm.status().role() == PortRole::Designated {
                ctx.effects.mark_dirty(number);
            }
            false
        }
    }

    fn receive_downstream(&mut self, number: u16, msg: &InstanceMessage, designated: PriorityVector, ctx: &mut EngineCtx) {
        if !msg.flags.contains(BpduFlags::AGREEMENT) {
            return;
        }
        if msg.vector.root_id != designated.root_id || msg.vector.cmp_message(&designated) == Ordering::Less {
            return;
        }
        let change = match self.ports.get_mut(&number) {
            Some(pm) => pm.on_agreement(ctx.timers),
            None => return,
        };
        if change.is_some() {
            debug!(instance = %self.id, port = number, "agreement received");
        }
        self.record_change(number, change, ctx);
    }

    /// Root and designated port selection.
    pub(crate) fn reselect(&mut self, ctx: &mut EngineCtx) {
        let msti = !self.id.is_cist();
        let mut best = PriorityVector::bridge(self.bridge_id);
        let mut root_port = None;
        for (number, pm) in &self.ports {
            if !pm.participates() || (msti && ctx.facts(*number).boundary) {
                continue;
            }
            let Some(rx) = pm.received else {
                continue;
            };
            if rx.vector.designated_bridge_id.mac() == self.bridge_id.mac() {
                continue;
            }
            let candidate = rx.vector.root_path(pm.path_cost(), pm.port_id());
            if candidate < best {
                best = candidate;
                root_port = Some(*number);
            }
        }

        if best.root_id != self.root_vector.root_id || root_port != self.root_port {
            info!(
                instance = %self.id,
                root = %best.root_id,
                cost = best.root_path_cost,
                root_port = ?root_port,
                "root changed"
            );
        }
        self.root_vector = best;
        self.root_port = root_port;

        let numbers: Vec<u16> = self.ports.keys().copied().collect();
        for number in numbers {
            let facts = ctx.facts(number);
            let Some(pm) = self.ports.get_mut(&number) else {
                continue;
            };
            if matches!(pm.status(), PortStatus::Blocked(_)) || (msti && facts.boundary && pm.is_enabled()) {
                continue;
            }
            let designated = best.designated(self.bridge_id, pm.port_id());
            let role = if !pm.is_enabled() {
                PortRole::Disabled
            } else if root_port == Some(number) {
                PortRole::Root
            } else {
                match pm.received {
                    None => PortRole::Designated,
                    Some(rx) if designated.cmp_message(&rx.vector) != Ordering::Greater => PortRole::Designated,
                    Some(rx) if rx.vector.designated_bridge_id.mac() == self.bridge_id.mac() => PortRole::Backup,
                    Some(_) => PortRole::Alternate,
                }
            };

            if role != PortRole::Disabled && pm.designated != Some(designated) {
                pm.designated = Some(designated);
                pm.agreed = false;
                ctx.effects.mark_dirty(number);
            }
            let before = pm.status().role();
            let change = pm.assign_role(role, facts, ctx.timers, ctx.params);
            if before != role {
                ctx.effects.mark_dirty(number);
            }
            self.record_change(number, change, ctx);
        }
        self.answer_proposals(ctx);
    }

    /// Agrees to pending proposals on Root, Alternate and Backup ports.
    fn answer_proposals(&mut self, ctx: &mut EngineCtx) {
        let pending: Vec<u16> = self
            .ports
            .iter()
            .filter(|(_, pm)| pm.proposed && !pm.agree)
            .map(|(number, _)| *number)
            .collect();

        for number in pending {
            if !ctx.facts(number).point_to_point {
                continue;
            }
            let role = match self.ports.get(&number) {
                Some(pm) => pm.status().role(),
                None => continue,
            };
            match role {
                PortRole::Root => {
                    let others: Vec<u16> = self.ports.keys().copied().filter(|n| *n != number).collect();
                    for other in others {
                        let facts = ctx.facts(other);
                        let change = match self.ports.get_mut(&other) {
                            Some(pm) => pm.sync(facts, ctx.timers, ctx.params),
                            None => continue,
                        };
                        self.record_change(other, change, ctx);
                    }
                }
                PortRole::Alternate | PortRole::Backup => {}
                _ => continue,
            }
            if let Some(pm) = self.ports.get_mut(&number) {
                pm.agree = true;
                pm.proposed = false;
            }
            debug!(instance = %self.id, port = number, role = %role, "agreeing to proposal");
            ctx.effects.mark_dirty(number);
        }
    }

    pub(crate) fn on_timer(&mut self, number: u16, kind: TimerKind, ctx: &mut EngineCtx) {
        match kind {
            TimerKind::ForwardDelay => {
                let change = match self.ports.get_mut(&number) {
                    Some(pm) => pm.on_forward_delay(ctx.timers, ctx.params),
                    None => return,
                };
                self.record_change(number, change, ctx);
            }
            TimerKind::MessageAge => self.expire_info(number, ctx),
            TimerKind::TopologyChange => {
                debug!(instance = %self.id, port = number, "topology change window closed");
            }
            TimerKind::Hello | TimerKind::EdgeDelay => {}
        }
    }

    fn expire_info(&mut self, number: u16, ctx: &mut EngineCtx) {
        let facts = ctx.facts(number);
        let Some(pm) = self.ports.get_mut(&number) else {
            return;
        };
        let role = pm.status().role();
        if facts.loop_guard && matches!(role, PortRole::Root | PortRole::Alternate | PortRole::Backup) {
            let change = pm.block(GuardKind::LoopGuard, ctx.timers);
            warn!(instance = %self.id, port = number, role = %role, "loop-guard blocked port after information aged out");
            ctx.effects.push(Outbound::GuardViolation {
                port: number,
                kind: GuardKind::LoopGuard,
            });
            self.record_change(number, change, ctx);
        } else {
            debug!(instance = %self.id, port = number, "received information aged out");
            pm.received = None;
            pm.proposed = false;
            pm.agree = false;
        }
        self.reselect(ctx);
    }

    pub(crate) fn edge_gained(&mut self, number: u16, ctx: &mut EngineCtx) {
        let change = match self.ports.get_mut(&number) {
            Some(pm) => pm.edge_gained(ctx.timers),
            None => return,
        };
        self.record_change(number, change, ctx);
    }

    pub(crate) fn edge_lost(&mut self, number: u16, ctx: &mut EngineCtx) {
        let facts = ctx.facts(number);
        let change = match self.ports.get_mut(&number) {
            Some(pm) => pm.edge_lost(facts, ctx.timers, ctx.params),
            None => return,
        };
        self.record_change(number, change, ctx);
    }

    pub(crate) fn block(&mut self, number: u16, kind: GuardKind, ctx: &mut EngineCtx) {
        let change = match self.ports.get_mut(&number) {
            Some(pm) => pm.block(kind, ctx.timers),
            None => return,
        };
        self.topology.forget_port(self.id, number, ctx.timers);
        self.record_change(number, change, ctx);
    }

    pub(crate) fn clear_guard(&mut self, number: u16) -> bool {
        self.ports.get_mut(&number).map(|pm| pm.clear_block()).unwrap_or(false)
    }

    pub(crate) fn mirror(&mut self, number: u16, cist: PortStatus, ctx: &mut EngineCtx) {
        let change = match self.ports.get_mut(&number) {
            Some(pm) => {
                let before = pm.status();
                let change = pm.mirror(cist, ctx.timers);
                if pm.status() != before {
                    ctx.effects.mark_dirty(number);
                }
                change
            }
            None => return,
        };
        self.record_change(number, change, ctx);
    }

    /// Drops MSTI information learned on a port that became a region boundary.
    pub(crate) fn forget_received(&mut self, number: u16, ctx: &mut EngineCtx) {
        if let Some(pm) = self.ports.get_mut(&number) {
            if pm.received.take().is_some() {
                pm.proposed = false;
                pm.agree = false;
                ctx.timers.stop(&TimerKey::new(number, self.id, TimerKind::MessageAge));
            }
        }
    }

    /// Non-edge Root and Designated ports, optionally excluding one.
    fn active_ports(&self, ctx: &EngineCtx, except: Option<u16>) -> Vec<u16> {
        self.ports
            .values()
            .filter(|pm| Some(pm.number()) != except)
            .filter(|pm| pm.is_enabled() && pm.status().role().may_forward())
            .filter(|pm| !ctx.facts(pm.number()).edge)
            .map(|pm| pm.number())
            .collect()
    }

    fn record_change(&mut self, number: u16, change: Option<StateChange>, ctx: &mut EngineCtx) {
        let Some(change) = change else {
            return;
        };
        info!(
            instance = %self.id,
            port = number,
            from = %change.from,
            to = %change.to,
            "port state change"
        );
        ctx.effects.push(Outbound::PortState {
            port: number,
            instance: self.id,
            state: change.to,
        });
        ctx.effects.mark_dirty(number);
        if change.touches_forwarding() && !ctx.facts(number).edge {
            let active = self.active_ports(ctx, None);
            self.topology
                .detected(self.id, number, &active, ctx.tc_scope());
        }
    }

    fn root_info(&self) -> Option<ReceivedInfo> {
        self.root_port
            .and_then(|number| self.ports.get(&number))
            .and_then(|pm| pm.received)
    }

    /// Message age this bridge advertises, in seconds.
    pub(crate) fn message_age(&self) -> u16 {
        self.root_info().map(|rx| rx.message_age.saturating_add(1)).unwrap_or(0)
    }

    pub(crate) fn remaining_hops(&self, params: &BridgeParams) -> u8 {
        match self.root_info() {
            Some(rx) => rx.remaining_hops.saturating_sub(1),
            None => params.max_hops,
        }
    }

    /// Content of this instance's record in the next BPDU on `number`.
    pub(crate) fn advert(&mut self, number: u16, timers: &TimerService, params: &BridgeParams) -> Option<PortAdvert> {
        let pm = self.ports.get(&number)?;
        if !pm.participates() || pm.status() == PortStatus::Disabled {
            return None;
        }
        let status = pm.status();
        let port_id = pm.port_id();
        let mut flags = BpduFlags::default();
        flags.set_role(status.role().into());
        flags.set(BpduFlags::PROPOSAL, pm.proposing);
        flags.set(BpduFlags::AGREEMENT, pm.agree);
        let state = status.state();
        flags.set(BpduFlags::LEARNING, state != crate::types::PortState::Discarding);
        flags.set(BpduFlags::FORWARDING, state == crate::types::PortState::Forwarding);
        flags.set(
            BpduFlags::TOPOLOGY_CHANGE,
            self.topology.is_changing(self.id, number, timers),
        );
        let ack = self.topology.take_ack(number);
        flags.set(BpduFlags::TOPOLOGY_CHANGE_ACK, ack);

        Some(PortAdvert {
            flags,
            vector: self.root_vector.designated(self.bridge_id, port_id),
            port_id,
            message_age: self.message_age(),
            remaining_hops: self.remaining_hops(params),
        })
    }

    /// Verifies the single-root-port invariant.
    pub(crate) fn check(&self) -> Result<(), String> {
        let roots: Vec<u16> = self
            .ports
            .values()
            .filter(|pm| pm.status().role() == PortRole::Root)
            .map(|pm| pm.number())
            .collect();
        match (self.root_port, roots.as_slice()) {
            (None, []) => Ok(()),
            (Some(expected), [actual]) if expected == *actual => Ok(()),
            (expected, actual) => Err(format!(
                "{}: root port {:?} but ports {:?} hold the Root role",
                self.id, expected, actual
            )),
        }
    }

    pub(crate) fn snapshot(
        &self,
        timers: &TimerService,
        facts: &BTreeMap<u16, PortFacts>,
        params: &BridgeParams,
        vlans: String,
    ) -> InstanceState {
        let ports = self
            .ports
            .values()
            .map(|pm| {
                let number = pm.number();
                let port_facts = facts.get(&number).copied().unwrap_or_default();
                let remaining = |kind| timers.remaining(&TimerKey::new(number, self.id, kind));
                let designated_vector = pm
                    .received
                    .map(|rx| rx.vector)
                    .unwrap_or_else(|| self.root_vector.designated(self.bridge_id, pm.port_id()));
                PortSnapshot {
                    port: number,
                    port_id: pm.port_id(),
                    role: pm.status().role(),
                    state: pm.status().state(),
                    path_cost: pm.path_cost(),
                    designated_vector,
                    edge: port_facts.edge,
                    boundary: port_facts.boundary,
                    guard: pm.status().guard(),
                    timers: PortTimers {
                        hello: timers.remaining(&TimerKey::port(number, TimerKind::Hello)),
                        forward_delay: remaining(TimerKind::ForwardDelay),
                        message_age: remaining(TimerKind::MessageAge),
                        topology_change: remaining(TimerKind::TopologyChange),
                    },
                }
            })
            .collect();

        InstanceState {
            instance: self.id,
            bridge_id: self.bridge_id,
            root_bridge_id: self.root_vector.root_id,
            root_path_cost: self.root_vector.root_path_cost,
            root_port: self.root_port,
            is_root: self.is_root(),
            remaining_hops: self.remaining_hops(params),
            vlans,
            topology_change_count: self.topology.change_count(),
            ticks_since_topology_change: self.topology.ticks_since_change(),
            hello_time: params.hello_time,
            forward_delay: params.forward_delay,
            max_age: params.max_age,
            tx_hold_count: params.tx_hold_count,
            ports,
        }
    }
}
