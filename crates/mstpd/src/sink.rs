//! Outbound sinks: where engine actions leave the daemon.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sonic_mstp::{GuardKind, InstanceId, Outbound, PortState, VlanId};

/// Receiver of engine actions.
///
/// Every method is fire-and-forget: a failure is logged by the worker and
/// never fed back into the protocol.
#[async_trait]
pub trait MstpSink: Send + Sync {
    async fn transmit_bpdu(&self, port: u16, bytes: Vec<u8>) -> Result<(), String>;
    async fn set_port_state(&self, port: u16, instance: InstanceId, state: PortState) -> Result<(), String>;
    async fn flush_fdb(&self, instance: InstanceId) -> Result<(), String>;
    async fn instance_vlans(&self, instance: InstanceId, vlans: Vec<VlanId>) -> Result<(), String>;
    async fn instance_removed(&self, instance: InstanceId) -> Result<(), String>;
    async fn guard_violation(&self, port: u16, kind: GuardKind) -> Result<(), String>;

    /// Routes one action to its handler.
    async fn dispatch(&self, action: Outbound) -> Result<(), String> {
        match action {
            Outbound::TransmitBpdu { port, bytes } => self.transmit_bpdu(port, bytes).await,
            Outbound::PortState { port, instance, state } => self.set_port_state(port, instance, state).await,
            Outbound::TopologyChange { instance } => self.flush_fdb(instance).await,
            Outbound::InstanceVlans { instance, vlans } => self.instance_vlans(instance, vlans).await,
            Outbound::InstanceRemoved { instance } => self.instance_removed(instance).await,
            Outbound::GuardViolation { port, kind } => self.guard_violation(port, kind).await,
        }
    }
}

/// Sink that only logs. Used when no forwarding plane is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl MstpSink for LogSink {
    async fn transmit_bpdu(&self, port: u16, bytes: Vec<u8>) -> Result<(), String> {
        debug!(port, len = bytes.len(), "transmit BPDU");
        Ok(())
    }

    async fn set_port_state(&self, port: u16, instance: InstanceId, state: PortState) -> Result<(), String> {
        info!(port, %instance, %state, "port state");
        Ok(())
    }

    async fn flush_fdb(&self, instance: InstanceId) -> Result<(), String> {
        info!(%instance, "flush FDB");
        Ok(())
    }

    async fn instance_vlans(&self, instance: InstanceId, vlans: Vec<VlanId>) -> Result<(), String> {
        info!(%instance, vlans = vlans.len(), "instance VLANs");
        Ok(())
    }

    async fn instance_removed(&self, instance: InstanceId) -> Result<(), String> {
        info!(%instance, "instance removed");
        Ok(())
    }

    async fn guard_violation(&self, port: u16, kind: GuardKind) -> Result<(), String> {
        warn!(port, %kind, "guard violation");
        Ok(())
    }
}

/// Sink that forwards every action into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, action: Outbound) -> Result<(), String> {
        self.tx.send(action).map_err(|_| "outbound channel closed".to_string())
    }
}

#[async_trait]
impl MstpSink for ChannelSink {
    async fn transmit_bpdu(&self, port: u16, bytes: Vec<u8>) -> Result<(), String> {
        self.send(Outbound::TransmitBpdu { port, bytes })
    }

    async fn set_port_state(&self, port: u16, instance: InstanceId, state: PortState) -> Result<(), String> {
        self.send(Outbound::PortState { port, instance, state })
    }

    async fn flush_fdb(&self, instance: InstanceId) -> Result<(), String> {
        self.send(Outbound::TopologyChange { instance })
    }

    async fn instance_vlans(&self, instance: InstanceId, vlans: Vec<VlanId>) -> Result<(), String> {
        self.send(Outbound::InstanceVlans { instance, vlans })
    }

    async fn instance_removed(&self, instance: InstanceId) -> Result<(), String> {
        self.send(Outbound::InstanceRemoved { instance })
    }

    async fn guard_violation(&self, port: u16, kind: GuardKind) -> Result<(), String> {
        self.send(Outbound::GuardViolation { port, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelSink::new();
        let actions = vec![
            Outbound::PortState {
                port: 1,
                instance: InstanceId::CIST,
                state: PortState::Forwarding,
            },
            Outbound::TopologyChange {
                instance: InstanceId::CIST,
            },
            Outbound::GuardViolation {
                port: 2,
                kind: GuardKind::BpduGuard,
            },
        ];
        for action in actions.clone() {
            sink.dispatch(action).await.unwrap();
        }
        for expected in actions {
            assert_eq!(rx.recv().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        assert!(sink.flush_fdb(InstanceId::CIST).await.is_err());
    }

    #[tokio::test]
    async fn test_log_sink_accepts_everything() {
        let sink = LogSink;
        assert!(sink
            .dispatch(Outbound::TransmitBpdu {
                port: 1,
                bytes: vec![0; 35],
            })
            .await
            .is_ok());
    }
}
