//! Bridge worker: one task owns one bridge and serializes every event.
//!
//! Configuration, received BPDUs, ticks and queries all travel through a
//! single command queue, so the engine sees one total order of events.
//! Outbound actions are drained after each command and handed to the sink
//! outside the engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use sonic_mstp::{Bridge, BridgeCounters, InstanceId, InstanceState, MstpError, MstpResult, RegionState};

use crate::error::{MstpdError, Result};
use crate::mgr::{ConfigEntry, Intent, MstpMgr};
use crate::sink::MstpSink;

/// Commands accepted by a bridge worker.
#[derive(Debug)]
pub enum Command {
    /// Translate and apply a config-store batch.
    Configure {
        batch: Vec<ConfigEntry>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Apply one intent directly.
    Apply {
        intent: Intent,
        reply: oneshot::Sender<MstpResult<()>>,
    },
    DeliverBpdu {
        port: u16,
        bytes: Vec<u8>,
    },
    Tick,
    QueryState {
        instance: InstanceId,
        reply: oneshot::Sender<MstpResult<InstanceState>>,
    },
    QueryRegion {
        reply: oneshot::Sender<RegionState>,
    },
    QueryCounters {
        reply: oneshot::Sender<BridgeCounters>,
    },
    Shutdown,
}

/// Owner of one bridge and its config manager.
pub struct BridgeWorker {
    bridge: Bridge,
    mgr: MstpMgr,
    sink: Arc<dyn MstpSink>,
    rx: mpsc::Receiver<Command>,
    tick: Option<Duration>,
}

impl BridgeWorker {
    /// Spawns a worker task. With `tick` set the worker ticks the bridge on
    /// its own; without it only `Command::Tick` advances time.
    pub fn spawn(
        bridge: Bridge,
        mgr: MstpMgr,
        sink: Arc<dyn MstpSink>,
        tick: Option<Duration>,
        queue_depth: usize,
    ) -> (BridgeHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let worker = BridgeWorker {
            bridge,
            mgr,
            sink,
            rx,
            tick,
        };
        let task = tokio::spawn(worker.run());
        (BridgeHandle { tx }, task)
    }

    async fn run(mut self) {
        info!(mac = %self.bridge.mac(), "bridge worker started");
        // Anything queued while the bridge was being built goes out first.
        self.flush().await;

        let period = self.tick.unwrap_or(Duration::from_secs(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ticking = self.tick.is_some();

        loop {
            let keep_running = tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => false,
                },
                _ = ticker.tick(), if ticking => self.on_tick(),
            };
            self.flush().await;
            if !keep_running {
                break;
            }
        }
        info!("bridge worker stopped");
    }

    /// Processes one command. Returns false when the worker must stop.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Configure { batch, reply } => {
                let result = self.configure(&batch);
                let fatal = matches!(&result, Err(MstpdError::Engine(e)) if e.is_fatal());
                let _ = reply.send(result);
                !fatal
            }
            Command::Apply { intent, reply } => {
                let result = intent.apply(&mut self.bridge);
                let fatal = matches!(&result, Err(e) if e.is_fatal());
                let _ = reply.send(result);
                !fatal
            }
            Command::DeliverBpdu { port, bytes } => match self.bridge.deliver_bpdu(port, &bytes) {
                Ok(()) => true,
                Err(e) => self.report(e),
            },
            Command::Tick => self.on_tick(),
            Command::QueryState { instance, reply } => {
                let _ = reply.send(self.bridge.query_state(instance));
                true
            }
            Command::QueryRegion { reply } => {
                let _ = reply.send(self.bridge.query_region());
                true
            }
            Command::QueryCounters { reply } => {
                let _ = reply.send(self.bridge.counters());
                true
            }
            Command::Shutdown => {
                info!("bridge worker shutting down");
                false
            }
        }
    }

    fn on_tick(&mut self) -> bool {
        match self.bridge.tick() {
            Ok(()) => true,
            Err(e) => self.report(e),
        }
    }

    /// Applies every intent of a batch. Rejected intents do not stop the
    /// rest; the first error is returned.
    fn configure(&mut self, batch: &[ConfigEntry]) -> Result<()> {
        let intents = self.mgr.translate(batch)?;
        let mut first_error = None;
        for intent in intents {
            if let Err(e) = intent.clone().apply(&mut self.bridge) {
                warn!(?intent, error = %e, "intent rejected");
                if e.is_fatal() {
                    return Err(e.into());
                }
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Logs a protocol error. Returns false if the bridge halted.
    fn report(&self, e: MstpError) -> bool {
        match &e {
            MstpError::Internal { .. } => {
                error!(error = %e, "bridge halted");
                return false;
            }
            MstpError::GuardViolation { .. } => warn!(error = %e, "guard violation"),
            MstpError::RegionMismatch { .. } | MstpError::Decode(_) => debug!(error = %e, "BPDU handled with error"),
            _ => warn!(error = %e, "event rejected"),
        }
        true
    }

    async fn flush(&mut self) {
        for action in self.bridge.drain_outbound() {
            if let Err(e) = self.sink.dispatch(action).await {
                warn!(error = %e, "outbound action failed");
            }
        }
    }
}

/// Cloneable handle to a running bridge worker.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<Command>,
}

impl BridgeHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| MstpdError::WorkerGone)
    }

    async fn request<T>(&self, command: Command, rx: oneshot::Receiver<T>) -> Result<T> {
        self.send(command).await?;
        rx.await.map_err(|_| MstpdError::WorkerGone)
    }

    pub async fn configure(&self, batch: Vec<ConfigEntry>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Configure { batch, reply }, rx).await?
    }

    pub async fn apply(&self, intent: Intent) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        Ok(self.request(Command::Apply { intent, reply }, rx).await??)
    }

    pub async fn deliver_bpdu(&self, port: u16, bytes: Vec<u8>) -> Result<()> {
        self.send(Command::DeliverBpdu { port, bytes }).await
    }

    pub async fn tick(&self) -> Result<()> {
        self.send(Command::Tick).await
    }

    pub async fn query_state(&self, instance: InstanceId) -> Result<InstanceState> {
        let (reply, rx) = oneshot::channel();
        Ok(self.request(Command::QueryState { instance, reply }, rx).await??)
    }

    pub async fn query_region(&self) -> Result<RegionState> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::QueryRegion { reply }, rx).await
    }

    pub async fn counters(&self) -> Result<BridgeCounters> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::QueryCounters { reply }, rx).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;
    use crate::tables::{fields, CFG_MSTP_INSTANCE_TABLE_NAME, CFG_STP_PORT_TABLE_NAME};
    use pretty_assertions::assert_eq;
    use sonic_mstp::{BridgeParams, MacAddress, Outbound, PortRole, PortState};

    fn start() -> (BridgeHandle, JoinHandle<()>, mpsc::UnboundedReceiver<Outbound>) {
        let mac = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x01]);
        let bridge = Bridge::new(mac, BridgeParams::default()).unwrap();
        let (sink, rx) = ChannelSink::new();
        let (handle, task) = BridgeWorker::spawn(bridge, MstpMgr::new(mac), Arc::new(sink), None, 16);
        (handle, task, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(action) = rx.try_recv() {
            out.push(action);
        }
        out
    }

    #[tokio::test]
    async fn test_configure_and_query() {
        let (handle, _task, mut rx) = start();
        handle
            .configure(vec![
                ConfigEntry::set(CFG_MSTP_INSTANCE_TABLE_NAME, "1", [(fields::VLANS, "10-20")]),
                ConfigEntry::set(CFG_STP_PORT_TABLE_NAME, "Ethernet0", [(fields::PORT_ADMIN_STATUS, "up")]),
            ])
            .await
            .unwrap();

        let state = handle.query_state(InstanceId::CIST).await.unwrap();
        assert!(state.is_root);
        assert_eq!(state.port(1).unwrap().role, PortRole::Designated);

        let region = handle.query_region().await.unwrap();
        assert_eq!(region.instances.get(&1).map(String::as_str), Some("10-20"));

        let out = drain(&mut rx);
        assert!(out
            .iter()
            .any(|o| matches!(o, Outbound::TransmitBpdu { port: 1, .. })));
        assert!(out
            .iter()
            .any(|o| matches!(o, Outbound::InstanceVlans { instance, .. } if instance.get() == 1)));
    }

    #[tokio::test]
    async fn test_ticks_drive_auto_edge() {
        let (handle, _task, mut rx) = start();
        handle
            .apply(Intent::SetPortAdminState { port: 1, enabled: true })
            .await
            .unwrap();
        for _ in 0..3 {
            handle.tick().await.unwrap();
        }
        let state = handle.query_state(InstanceId::CIST).await.unwrap();
        assert_eq!(state.port(1).unwrap().state, PortState::Forwarding);
        assert!(drain(&mut rx).contains(&Outbound::PortState {
            port: 1,
            instance: InstanceId::CIST,
            state: PortState::Forwarding,
        }));
    }

    #[tokio::test]
    async fn test_errors_are_reported_not_fatal() {
        let (handle, _task, _rx) = start();
        let err = handle
            .apply(Intent::RemovePort { port: 9 })
            .await
            .unwrap_err();
        assert!(matches!(err, MstpdError::Engine(MstpError::PortNotFound(9))));

        handle.apply(Intent::SetPortAdminState { port: 1, enabled: true }).await.unwrap();
        handle.deliver_bpdu(1, vec![0x00, 0x00]).await.unwrap();
        let counters = handle.counters().await.unwrap();
        assert_eq!(counters.decode_errors, 1);

        let err = handle
            .query_state(InstanceId::msti(7).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, MstpdError::Engine(MstpError::InstanceNotFound(7))));
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let (handle, task, _rx) = start();
        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(handle.counters().await, Err(MstpdError::WorkerGone)));
    }

    #[tokio::test]
    async fn test_invalid_batch_is_rejected() {
        let (handle, _task, _rx) = start();
        let err = handle
            .configure(vec![ConfigEntry::set(
                CFG_STP_PORT_TABLE_NAME,
                "Ethernet0",
                [(fields::LINK_TYPE, "token-ring")],
            )])
            .await
            .unwrap_err();
        assert!(matches!(err, MstpdError::InvalidField { .. }));
        assert!(handle.query_state(InstanceId::CIST).await.unwrap().ports.is_empty());
    }
}
