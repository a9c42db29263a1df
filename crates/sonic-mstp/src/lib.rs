//! Multiple Spanning Tree Protocol engine.
//!
//! The engine computes one loop-free topology per spanning tree instance (the
//! CIST plus up to 64 MSTIs) for a single bridge. It is a pure state machine:
//! callers feed it BPDUs, configuration intents and one-second ticks, then
//! drain the resulting [`Outbound`] actions (BPDUs to transmit, port states
//! to program, topology change notifications).
//!
//! # Example
//!
//! ```
//! use sonic_mstp::{Bridge, BridgeParams, InstanceId, MacAddress};
//!
//! let mut bridge = Bridge::new(MacAddress::new([0, 1, 2, 3, 4, 5]), BridgeParams::default()).unwrap();
//! bridge.set_port_admin_state(1, true).unwrap();
//! assert!(bridge.query_state(InstanceId::CIST).unwrap().is_root);
//! ```

pub mod bpdu;
pub mod bridge;
pub mod error;
pub mod instance;
pub mod outbound;
pub mod params;
pub mod port;
pub mod region;
pub mod state;
pub mod timer;
pub mod topology;
pub mod types;
pub mod vector;

pub use bpdu::{Bpdu, BpduFlags, CistInfo, MstBpdu, MstiRecord};
pub use bridge::Bridge;
pub use error::{DecodeError, MstpError, MstpResult};
pub use outbound::Outbound;
pub use params::{BridgeParams, PortParams};
pub use port::{PortStatus, Progress};
pub use region::{parse_vlan_list, format_vlan_list, ConfigDigest, MstConfigId, RegionIdentity, VlanMap};
pub use state::{BridgeCounters, InstanceState, PortSnapshot, RegionState};
pub use types::{BridgeId, GuardKind, InstanceId, LinkType, MacAddress, PortGuards, PortId, PortRole, PortState, VlanId};
pub use vector::PriorityVector;
