//! Topology change notifier for one instance.
//!
//! A topology change opens a window of `hello_time + 1` ticks on every
//! non-edge Root or Designated port of the instance. While a port's window is
//! open, each BPDU sent on it carries the TC flag. Neighbors propagate the
//! change to their other Root/Designated ports only, so the notification
//! travels along the active tree and dies out at its leaves. A TC received
//! from a downstream Root port is acknowledged with TCA; a TCA received on
//! our Root port closes that port's window.

use std::collections::BTreeSet;
use tracing::debug;

use crate::outbound::{Effects, Outbound};
use crate::timer::{TimerKey, TimerKind, TimerService};
use crate::types::InstanceId;

/// Window length and the services a topology change writes to.
pub(crate) struct TcScope<'a> {
    pub window: u32,
    pub timers: &'a mut TimerService,
    pub effects: &'a mut Effects,
}

#[derive(Debug, Clone, Default)]
pub struct TopologyNotifier {
    change_count: u64,
    ticks_since_change: Option<u64>,
    /// Ports that owe the neighbor a TCA.
    ack_pending: BTreeSet<u16>,
    /// Suppresses repeated flush notifications within one window.
    notify_holdoff: u32,
}

impl TopologyNotifier {
    pub fn change_count(&self) -> u64 {
        self.change_count
    }

    pub fn ticks_since_change(&self) -> Option<u64> {
        self.ticks_since_change
    }

    fn key(instance: InstanceId, port: u16) -> TimerKey {
        TimerKey::new(port, instance, TimerKind::TopologyChange)
    }

    /// True while `port` is inside a topology change window.
    pub fn is_changing(&self, instance: InstanceId, port: u16, timers: &TimerService) -> bool {
        timers.is_running(&Self::key(instance, port))
    }

    pub(crate) fn tick(&mut self) {
        if let Some(ticks) = self.ticks_since_change.as_mut() {
            *ticks += 1;
        }
        self.notify_holdoff = self.notify_holdoff.saturating_sub(1);
    }

    fn record(&mut self, instance: InstanceId, window: u32, effects: &mut Effects) {
        self.change_count += 1;
        self.ticks_since_change = Some(0);
        if self.notify_holdoff == 0 {
            self.notify_holdoff = window;
            effects.push(Outbound::TopologyChange { instance });
        }
    }

    /// A non-edge port entered or left Forwarding.
    pub(crate) fn detected(&mut self, instance: InstanceId, port: u16, active_ports: &[u16], mut scope: TcScope<'_>) {
        debug!(%instance, port, "topology change detected");
        for p in active_ports {
            scope.timers.start(Self::key(instance, *p), scope.window);
            scope.effects.mark_dirty(*p);
        }
        self.record(instance, scope.window, scope.effects);
    }

    /// TC flag received on `port` from a neighbor. `from_root_port` is set
    /// when the sender is the neighbor's Root port (it expects a TCA).
    pub(crate) fn received(
        &mut self,
        instance: InstanceId,
        port: u16,
        from_root_port: bool,
        other_active_ports: &[u16],
        mut scope: TcScope<'_>,
    ) {
        if from_root_port && self.ack_pending.insert(port) {
            scope.effects.mark_dirty(port);
        }
        let mut started = false;
        for p in other_active_ports {
            if scope.timers.start_if_idle(Self::key(instance, *p), scope.window) {
                scope.effects.mark_dirty(*p);
                started = true;
            }
        }
        if started || self.notify_holdoff == 0 {
            self.record(instance, scope.window, scope.effects);
        }
    }

    /// TCA received on our Root port.
    pub(crate) fn acknowledged(&mut self, instance: InstanceId, port: u16, timers: &mut TimerService) {
        timers.stop(&Self::key(instance, port));
    }

    /// Consumes a pending TCA for the next BPDU on `port`.
    pub(crate) fn take_ack(&mut self, port: u16) -> bool {
        self.ack_pending.remove(&port)
    }

    pub(crate) fn forget_port(&mut self, instance: InstanceId, port: u16, timers: &mut TimerService) {
        self.ack_pending.remove(&port);
        timers.stop(&Self::key(instance, port));
    }
}
