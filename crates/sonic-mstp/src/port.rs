//! Per-port, per-instance state machine.
//!
//! Role and forwarding progress live in one [`PortStatus`] value, so a port
//! can only be Learning or Forwarding while it holds the Root or Designated
//! role. Alternate, Backup, Disabled and guard-blocked ports always discard.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::params::BridgeParams;
use crate::timer::{TimerKey, TimerKind, TimerService};
use crate::types::{GuardKind, InstanceId, PortId, PortRole, PortState};
use crate::vector::PriorityVector;

/// Forwarding progress of a Root or Designated port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Progress {
    Discarding,
    Learning,
    Forwarding,
}

impl From<Progress> for PortState {
    fn from(progress: Progress) -> Self {
        match progress {
            Progress::Discarding => PortState::Discarding,
            Progress::Learning => PortState::Learning,
            Progress::Forwarding => PortState::Forwarding,
        }
    }
}

/// Role and state of a port on one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortStatus {
    /// Interface down or not participating.
    Disabled,
    /// Fail-safe sub-state after a guard fired. Cleared only administratively.
    Blocked(GuardKind),
    Alternate,
    Backup,
    Root(Progress),
    Designated(Progress),
}

impl PortStatus {
    pub fn role(&self) -> PortRole {
        match self {
            PortStatus::Disabled | PortStatus::Blocked(_) => PortRole::Disabled,
            PortStatus::Alternate => PortRole::Alternate,
            PortStatus::Backup => PortRole::Backup,
            PortStatus::Root(_) => PortRole::Root,
            PortStatus::Designated(_) => PortRole::Designated,
        }
    }

    pub fn state(&self) -> PortState {
        match self {
            PortStatus::Root(progress) | PortStatus::Designated(progress) => (*progress).into(),
            _ => PortState::Discarding,
        }
    }

    pub fn guard(&self) -> Option<GuardKind> {
        match self {
            PortStatus::Blocked(kind) => Some(*kind),
            _ => None,
        }
    }

    fn progress(&self) -> Option<Progress> {
        match self {
            PortStatus::Root(progress) | PortStatus::Designated(progress) => Some(*progress),
            _ => None,
        }
    }
}

/// Facts about the physical port an instance needs for its decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortFacts {
    pub edge: bool,
    pub point_to_point: bool,
    pub root_guard: bool,
    pub loop_guard: bool,
    pub boundary: bool,
}

/// A forwarding state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: PortState,
    pub to: PortState,
}

impl StateChange {
    fn between(before: PortStatus, after: PortStatus) -> Option<StateChange> {
        let (from, to) = (before.state(), after.state());
        (from != to).then_some(StateChange { from, to })
    }

    pub fn touches_forwarding(&self) -> bool {
        self.from == PortState::Forwarding || self.to == PortState::Forwarding
    }
}

/// Information last accepted from the designated bridge of the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedInfo {
    /// Message vector, with `port_id` set to the receiving port.
    pub vector: PriorityVector,
    pub message_age: u16,
    pub remaining_hops: u8,
}

#[derive(Debug, Clone)]
pub struct PortMachine {
    instance: InstanceId,
    number: u16,
    port_id: PortId,
    path_cost: u32,
    enabled: bool,
    status: PortStatus,
    pub(crate) received: Option<ReceivedInfo>,
    pub(crate) designated: Option<PriorityVector>,
    /// Our Discarding designated port is asking the neighbor to agree.
    pub(crate) proposing: bool,
    /// The designated neighbor proposed and is waiting for us.
    pub(crate) proposed: bool,
    /// We agreed to the neighbor's proposal.
    pub(crate) agree: bool,
    /// The neighbor agreed to our proposal for the current designated vector.
    pub(crate) agreed: bool,
}

impl PortMachine {
    pub fn new(instance: InstanceId, number: u16, priority: u8, path_cost: u32) -> Self {
        PortMachine {
            instance,
            number,
            port_id: PortId::new(priority, number),
            path_cost,
            enabled: false,
            status: PortStatus::Disabled,
            received: None,
            designated: None,
            proposing: false,
            proposed: false,
            agree: false,
            agreed: false,
        }
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    pub fn path_cost(&self) -> u32 {
        self.path_cost
    }

    pub fn status(&self) -> PortStatus {
        self.status
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Takes part in role selection.
    pub fn participates(&self) -> bool {
        self.enabled && !matches!(self.status, PortStatus::Blocked(_))
    }

    pub(crate) fn set_params(&mut self, priority: u8, path_cost: u32) -> bool {
        let port_id = PortId::new(priority, self.number);
        let changed = port_id != self.port_id || path_cost != self.path_cost;
        self.port_id = port_id;
        self.path_cost = path_cost;
        changed
    }

    fn key(&self, kind: TimerKind) -> TimerKey {
        TimerKey::new(self.number, self.instance, kind)
    }

    fn forget_received(&mut self, timers: &mut TimerService) {
        self.received = None;
        self.proposed = false;
        self.agree = false;
        timers.stop(&self.key(TimerKind::MessageAge));
    }

    fn reset_handshake(&mut self) {
        self.proposing = false;
        self.proposed = false;
        self.agree = false;
        self.agreed = false;
    }

    /// Stores accepted designated information and (re)arms its lifetime.
    pub(crate) fn accept(&mut self, info: ReceivedInfo, proposal: bool, timers: &mut TimerService, params: &BridgeParams) {
        let changed = self.received.map(|r| r.vector) != Some(info.vector);
        self.received = Some(info);
        if changed {
            self.agree = false;
        }
        if proposal && !self.agree {
            self.proposed = true;
        }
        timers.start(self.key(TimerKind::MessageAge), params.info_lifetime());
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool, timers: &mut TimerService) -> Option<StateChange> {
        self.enabled = enabled;
        if enabled {
            return None;
        }
        let before = self.status;
        if !matches!(self.status, PortStatus::Blocked(_)) {
            self.status = PortStatus::Disabled;
        }
        self.forget_received(timers);
        self.reset_handshake();
        self.designated = None;
        timers.cancel_port_instance(self.number, self.instance);
        StateChange::between(before, self.status)
    }

    /// Applies the role chosen by role selection.
    pub(crate) fn assign_role(
        &mut self,
        role: PortRole,
        facts: PortFacts,
        timers: &mut TimerService,
        params: &BridgeParams,
    ) -> Option<StateChange> {
        if matches!(self.status, PortStatus::Blocked(_)) {
            return None;
        }
        let before = self.status;
        let fd = self.key(TimerKind::ForwardDelay);
        let fd_ticks = u32::from(params.forward_delay);
        let rapid = facts.point_to_point;

        self.status = match (before, role) {
            (_, PortRole::Disabled) => {
                timers.stop(&fd);
                PortStatus::Disabled
            }
            (_, PortRole::Alternate) => {
                timers.stop(&fd);
                PortStatus::Alternate
            }
            (_, PortRole::Backup) => {
                timers.stop(&fd);
                PortStatus::Backup
            }
            (PortStatus::Root(progress), PortRole::Root) => PortStatus::Root(progress),
            (PortStatus::Designated(progress), PortRole::Designated) => PortStatus::Designated(progress),
            (PortStatus::Designated(progress), PortRole::Root) => {
                if progress == Progress::Forwarding || rapid {
                    timers.stop(&fd);
                    PortStatus::Root(Progress::Forwarding)
                } else {
                    timers.start(fd, fd_ticks);
                    PortStatus::Root(progress)
                }
            }
            (PortStatus::Root(progress), PortRole::Designated) => {
                if progress != Progress::Forwarding {
                    timers.start(fd, fd_ticks);
                }
                PortStatus::Designated(progress)
            }
            (_, PortRole::Root) => {
                if rapid {
                    PortStatus::Root(Progress::Forwarding)
                } else {
                    timers.start(fd, fd_ticks);
                    PortStatus::Root(Progress::Discarding)
                }
            }
            (_, PortRole::Designated) => {
                if facts.edge {
                    PortStatus::Designated(Progress::Forwarding)
                } else {
                    timers.start(fd, fd_ticks);
                    PortStatus::Designated(Progress::Discarding)
                }
            }
        };

        match self.status {
            PortStatus::Designated(progress) => {
                // designated information is our own
                self.forget_received(timers);
                self.proposing = rapid && !facts.edge && progress != Progress::Forwarding;
            }
            PortStatus::Root(_) | PortStatus::Alternate | PortStatus::Backup => {
                self.proposing = false;
                self.agreed = false;
            }
            PortStatus::Disabled | PortStatus::Blocked(_) => {
                self.forget_received(timers);
                self.reset_handshake();
            }
        }

        if before.role() != self.status.role() {
            debug!(
                instance = %self.instance,
                port = self.number,
                from = %before.role(),
                to = %self.status.role(),
                "role change"
            );
        }
        StateChange::between(before, self.status)
    }

    /// Forward-delay expiry: one step along Discarding → Learning → Forwarding.
    pub(crate) fn on_forward_delay(&mut self, timers: &mut TimerService, params: &BridgeParams) -> Option<StateChange> {
        let before = self.status;
        let next = match before.progress() {
            Some(Progress::Discarding) => Progress::Learning,
            Some(Progress::Learning) => Progress::Forwarding,
            _ => return None,
        };
        self.status = match before {
            PortStatus::Root(_) => PortStatus::Root(next),
            PortStatus::Designated(_) => PortStatus::Designated(next),
            other => other,
        };
        if next == Progress::Learning {
            timers.start(self.key(TimerKind::ForwardDelay), u32::from(params.forward_delay));
        } else {
            self.proposing = false;
        }
        StateChange::between(before, self.status)
    }

    /// The downstream neighbor agreed: a proposing designated port forwards at once.
    pub(crate) fn on_agreement(&mut self, timers: &mut TimerService) -> Option<StateChange> {
        if !self.proposing {
            return None;
        }
        let before = self.status;
        if let PortStatus::Designated(progress) = before {
            self.agreed = true;
            self.proposing = false;
            if progress != Progress::Forwarding {
                timers.stop(&self.key(TimerKind::ForwardDelay));
                self.status = PortStatus::Designated(Progress::Forwarding);
            }
        }
        StateChange::between(before, self.status)
    }

    /// Puts a designated port back to Discarding unless it is already safe.
    pub(crate) fn sync(&mut self, facts: PortFacts, timers: &mut TimerService, params: &BridgeParams) -> Option<StateChange> {
        let PortStatus::Designated(progress) = self.status else {
            return None;
        };
        if facts.edge || self.agreed || progress == Progress::Discarding {
            return None;
        }
        let before = self.status;
        self.status = PortStatus::Designated(Progress::Discarding);
        self.proposing = facts.point_to_point;
        timers.start(self.key(TimerKind::ForwardDelay), u32::from(params.forward_delay));
        StateChange::between(before, self.status)
    }

    /// The port started operating as an edge port.
    pub(crate) fn edge_gained(&mut self, timers: &mut TimerService) -> Option<StateChange> {
        let before = self.status;
        if let PortStatus::Designated(progress) = before {
            if progress != Progress::Forwarding {
                timers.stop(&self.key(TimerKind::ForwardDelay));
                self.status = PortStatus::Designated(Progress::Forwarding);
                self.proposing = false;
            }
        }
        StateChange::between(before, self.status)
    }

    /// A BPDU arrived on an edge port: restart the normal sequence.
    pub(crate) fn edge_lost(&mut self, facts: PortFacts, timers: &mut TimerService, params: &BridgeParams) -> Option<StateChange> {
        let before = self.status;
        if let PortStatus::Designated(Progress::Forwarding) = before {
            self.status = PortStatus::Designated(Progress::Discarding);
            self.proposing = facts.point_to_point;
            self.agreed = false;
            timers.start(self.key(TimerKind::ForwardDelay), u32::from(params.forward_delay));
        }
        StateChange::between(before, self.status)
    }

    /// Forces the guard fail-safe sub-state.
    pub(crate) fn block(&mut self, kind: GuardKind, timers: &mut TimerService) -> Option<StateChange> {
        let before = self.status;
        self.status = PortStatus::Blocked(kind);
        self.forget_received(timers);
        self.reset_handshake();
        timers.cancel_port_instance(self.number, self.instance);
        StateChange::between(before, self.status)
    }

    /// Administrative clear of a guard. Role selection assigns the next role.
    pub(crate) fn clear_block(&mut self) -> bool {
        if matches!(self.status, PortStatus::Blocked(_)) {
            self.status = PortStatus::Disabled;
            true
        } else {
            false
        }
    }

    /// MSTI view of a region boundary port follows the CIST port.
    pub(crate) fn mirror(&mut self, cist: PortStatus, timers: &mut TimerService) -> Option<StateChange> {
        if matches!(self.status, PortStatus::Blocked(_)) || !self.enabled {
            return None;
        }
        let before = self.status;
        self.status = match cist {
            PortStatus::Root(progress) | PortStatus::Designated(progress) => PortStatus::Designated(progress),
            PortStatus::Alternate | PortStatus::Backup => PortStatus::Alternate,
            PortStatus::Disabled | PortStatus::Blocked(_) => PortStatus::Disabled,
        };
        self.forget_received(timers);
        self.reset_handshake();
        timers.stop(&self.key(TimerKind::ForwardDelay));
        StateChange::between(before, self.status)
    }
}
