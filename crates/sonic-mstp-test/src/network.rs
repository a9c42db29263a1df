//! Deterministic multi-bridge network
//!
//! Bridges exchange BPDUs over point-to-point links through a FIFO queue.
//! Time only moves when a test calls [`SimNetwork::tick`]; between ticks the
//! network runs until no BPDU is in flight.

use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::{debug, trace};

use sonic_mstp::{Bridge, MstpError, Outbound};

/// Upper bound on deliveries in one settle pass.
pub const MAX_DELIVERIES: usize = 100_000;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Unknown bridge '{0}'")]
    UnknownBridge(String),

    #[error("No link between {a} and {b}")]
    UnknownLink { a: String, b: String },

    #[error("Port {bridge}:{port} is already linked")]
    PortInUse { bridge: String, port: u16 },

    #[error("Network did not settle after {0} deliveries")]
    NotQuiescent(usize),

    #[error("Bridge {bridge} failed: {source}")]
    Engine {
        bridge: String,
        #[source]
        source: MstpError,
    },
}

pub type SimResult<T> = Result<T, SimError>;

/// One end of a link.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Endpoint {
    pub bridge: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(bridge: impl Into<String>, port: u16) -> Self {
        Self {
            bridge: bridge.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.bridge, self.port)
    }
}

#[derive(Debug, Clone)]
struct Link {
    a: Endpoint,
    b: Endpoint,
    up: bool,
}

impl Link {
    fn peer_of(&self, end: &Endpoint) -> Option<&Endpoint> {
        if &self.a == end {
            Some(&self.b)
        } else if &self.b == end {
            Some(&self.a)
        } else {
            None
        }
    }
}

/// A network of named bridges.
#[derive(Default)]
pub struct SimNetwork {
    bridges: BTreeMap<String, Bridge>,
    links: Vec<Link>,
    in_flight: VecDeque<(Endpoint, Vec<u8>)>,
    events: Vec<(String, Outbound)>,
    errors: Vec<(String, MstpError)>,
    ticks: u64,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bridge(&mut self, name: impl Into<String>, bridge: Bridge) {
        self.bridges.insert(name.into(), bridge);
    }

    pub fn bridge(&self, name: &str) -> SimResult<&Bridge> {
        self.bridges
            .get(name)
            .ok_or_else(|| SimError::UnknownBridge(name.to_string()))
    }

    pub fn bridge_mut(&mut self, name: &str) -> SimResult<&mut Bridge> {
        self.bridges
            .get_mut(name)
            .ok_or_else(|| SimError::UnknownBridge(name.to_string()))
    }

    pub fn bridge_names(&self) -> impl Iterator<Item = &str> {
        self.bridges.keys().map(String::as_str)
    }

    pub fn bridges(&self) -> impl Iterator<Item = (&str, &Bridge)> {
        self.bridges.iter().map(|(name, bridge)| (name.as_str(), bridge))
    }

    /// Cables two ports together. The link starts up.
    pub fn connect(&mut self, a: Endpoint, b: Endpoint) -> SimResult<()> {
        for end in [&a, &b] {
            self.bridge(&end.bridge)?;
            if self.links.iter().any(|l| l.peer_of(end).is_some()) {
                return Err(SimError::PortInUse {
                    bridge: end.bridge.clone(),
                    port: end.port,
                });
            }
        }
        debug!(%a, %b, "link connected");
        self.links.push(Link { a, b, up: true });
        Ok(())
    }

    /// Brings a link down or up. Both ends see carrier change, which is
    /// port admin state to the engine.
    pub fn set_link(&mut self, a: &Endpoint, b: &Endpoint, up: bool) -> SimResult<()> {
        let link = self
            .links
            .iter_mut()
            .find(|l| l.peer_of(a) == Some(b))
            .ok_or_else(|| SimError::UnknownLink {
                a: a.to_string(),
                b: b.to_string(),
            })?;
        link.up = up;
        debug!(%a, %b, up, "link state changed");
        for end in [a, b] {
            let result = self.bridge_mut(&end.bridge)?.set_port_admin_state(end.port, up);
            self.record(&end.bridge, result)?;
        }
        self.settle().map(|_| ())
    }

    /// Applies an operation to one bridge, then lets the network settle.
    pub fn with_bridge<T>(
        &mut self,
        name: &str,
        op: impl FnOnce(&mut Bridge) -> Result<T, MstpError>,
    ) -> SimResult<T> {
        let result = op(self.bridge_mut(name)?).map_err(|source| SimError::Engine {
            bridge: name.to_string(),
            source,
        })?;
        self.settle()?;
        Ok(result)
    }

    /// Delivers BPDUs until none are in flight. Returns the number delivered.
    pub fn settle(&mut self) -> SimResult<usize> {
        let mut delivered = 0;
        loop {
            self.collect();
            let Some((to, bytes)) = self.in_flight.pop_front() else {
                break;
            };
            if delivered >= MAX_DELIVERIES {
                return Err(SimError::NotQuiescent(delivered));
            }
            delivered += 1;
            trace!(%to, len = bytes.len(), "deliver");
            let result = self.bridge_mut(&to.bridge)?.deliver_bpdu(to.port, &bytes);
            self.record(&to.bridge, result)?;
        }
        Ok(delivered)
    }

    /// Advances every bridge by one second and settles.
    pub fn tick(&mut self) -> SimResult<()> {
        self.ticks += 1;
        let names: Vec<String> = self.bridges.keys().cloned().collect();
        for name in names {
            let result = self.bridge_mut(&name)?.tick();
            self.record(&name, result)?;
        }
        self.settle().map(|_| ())
    }

    pub fn run_for(&mut self, ticks: u64) -> SimResult<()> {
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Non-BPDU actions emitted so far, tagged with the bridge name.
    pub fn events(&self) -> &[(String, Outbound)] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<(String, Outbound)> {
        std::mem::take(&mut self.events)
    }

    /// Protocol errors returned by bridges, such as region mismatches.
    pub fn errors(&self) -> &[(String, MstpError)] {
        &self.errors
    }

    /// Moves transmitted BPDUs onto the wire and keeps every other action.
    fn collect(&mut self) {
        for (name, bridge) in self.bridges.iter_mut() {
            for action in bridge.drain_outbound() {
                match action {
                    Outbound::TransmitBpdu { port, bytes } => {
                        let from = Endpoint::new(name.clone(), port);
                        let peer = self
                            .links
                            .iter()
                            .filter(|l| l.up)
                            .find_map(|l| l.peer_of(&from));
                        if let Some(peer) = peer {
                            self.in_flight.push_back((peer.clone(), bytes));
                        }
                    }
                    other => self.events.push((name.clone(), other)),
                }
            }
        }
    }

    fn record(&mut self, name: &str, result: Result<(), MstpError>) -> SimResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(source) if source.is_fatal() => Err(SimError::Engine {
                bridge: name.to_string(),
                source,
            }),
            Err(e) => {
                debug!(bridge = name, error = %e, "protocol error");
                self.errors.push((name.to_string(), e));
                Ok(())
            }
        }
    }
}
