//! Tick-driven timer service.
//!
//! The bridge advances every timer by one tick per second. Expired timers are
//! returned from [`TimerService::tick`] in key order and handled by the
//! caller as ordinary queued events, so a run is fully reproducible.

use std::collections::BTreeMap;

use crate::types::InstanceId;

/// What a timer measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// Periodic BPDU transmission (per port).
    Hello,
    /// Discarding→Learning and Learning→Forwarding delay.
    ForwardDelay,
    /// Lifetime of received information.
    MessageAge,
    /// Topology change propagation window.
    TopologyChange,
    /// No-BPDU period after which a port operates as an edge port.
    EdgeDelay,
}

/// Identifies one timer: port, instance and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey {
    pub port: u16,
    pub instance: InstanceId,
    pub kind: TimerKind,
}

impl TimerKey {
    pub fn new(port: u16, instance: InstanceId, kind: TimerKind) -> Self {
        TimerKey { port, instance, kind }
    }

    /// Port-level timer, not tied to an instance.
    pub fn port(port: u16, kind: TimerKind) -> Self {
        TimerKey {
            port,
            instance: InstanceId::CIST,
            kind,
        }
    }
}

/// One-shot countdown timers keyed by `K`.
#[derive(Debug, Clone)]
pub struct TimerService<K: Ord + Copy = TimerKey> {
    remaining: BTreeMap<K, u32>,
}

impl<K: Ord + Copy> Default for TimerService<K> {
    fn default() -> Self {
        TimerService {
            remaining: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy> TimerService<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) a timer that expires after `ticks` ticks. A zero
    /// duration expires on the next tick.
    pub fn start(&mut self, key: K, ticks: u32) {
        self.remaining.insert(key, ticks.max(1));
    }

    /// Starts a timer only if it is not already running.
    pub fn start_if_idle(&mut self, key: K, ticks: u32) -> bool {
        if self.remaining.contains_key(&key) {
            return false;
        }
        self.start(key, ticks);
        true
    }

    pub fn stop(&mut self, key: &K) -> bool {
        self.remaining.remove(key).is_some()
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.remaining.contains_key(key)
    }

    pub fn remaining(&self, key: &K) -> Option<u32> {
        self.remaining.get(key).copied()
    }

    /// Cancels every timer matching `predicate`, returning how many were removed.
    pub fn cancel_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let before = self.remaining.len();
        self.remaining.retain(|key, _| !predicate(key));
        before - self.remaining.len()
    }

    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Advances all timers by one tick and returns the expired keys in order.
    pub fn tick(&mut self) -> Vec<K> {
        let mut expired = Vec::new();
        for (key, left) in self.remaining.iter_mut() {
            *left -= 1;
            if *left == 0 {
                expired.push(*key);
            }
        }
        for key in &expired {
            self.remaining.remove(key);
        }
        expired
    }
}

impl TimerService<TimerKey> {
    /// Cancels all timers of a port, across instances.
    pub fn cancel_port(&mut self, port: u16) -> usize {
        self.cancel_where(|key| key.port == port)
    }

    /// Cancels all timers of a port on one instance.
    pub fn cancel_port_instance(&mut self, port: u16, instance: InstanceId) -> usize {
        self.cancel_where(|key| {
            key.port == port && key.instance == instance && key.kind != TimerKind::Hello && key.kind != TimerKind::EdgeDelay
        })
    }

    /// Cancels all per-instance timers of an instance.
    pub fn cancel_instance(&mut self, instance: InstanceId) -> usize {
        self.cancel_where(|key| {
            key.instance == instance && key.kind != TimerKind::Hello && key.kind != TimerKind::EdgeDelay
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn msti(id: u16) -> InstanceId {
        InstanceId::msti(id).unwrap()
    }

    #[test]
    fn test_expires_after_duration() {
        let mut timers: TimerService<u32> = TimerService::new();
        timers.start(1, 2);
        assert_eq!(timers.tick(), Vec::<u32>::new());
        assert_eq!(timers.remaining(&1), Some(1));
        assert_eq!(timers.tick(), vec![1]);
        assert!(!timers.is_running(&1));
        assert_eq!(timers.tick(), Vec::<u32>::new());
    }

    #[test]
    fn test_expiry_order_is_key_order() {
        let mut timers: TimerService<u32> = TimerService::new();
        timers.start(9, 1);
        timers.start(3, 1);
        timers.start(5, 1);
        assert_eq!(timers.tick(), vec![3, 5, 9]);
    }

    #[test]
    fn test_restart_and_zero_duration() {
        let mut timers: TimerService<u32> = TimerService::new();
        timers.start(1, 1);
        timers.start(1, 3);
        assert_eq!(timers.tick(), Vec::<u32>::new());
        assert!(!timers.start_if_idle(1, 1));
        assert_eq!(timers.remaining(&1), Some(2));

        timers.start(2, 0);
        assert_eq!(timers.tick(), vec![2]);
    }

    #[test]
    fn test_cancel_port_and_instance() {
        let mut timers = TimerService::new();
        timers.start(TimerKey::port(1, TimerKind::Hello), 2);
        timers.start(TimerKey::new(1, InstanceId::CIST, TimerKind::ForwardDelay), 15);
        timers.start(TimerKey::new(1, msti(2), TimerKind::MessageAge), 6);
        timers.start(TimerKey::new(2, msti(2), TimerKind::TopologyChange), 3);

        assert_eq!(timers.cancel_instance(msti(2)), 2);
        assert_eq!(timers.len(), 2);

        assert_eq!(timers.cancel_port_instance(1, InstanceId::CIST), 1);
        assert!(timers.is_running(&TimerKey::port(1, TimerKind::Hello)));

        assert_eq!(timers.cancel_port(1), 1);
        assert!(timers.is_empty());
    }
}
