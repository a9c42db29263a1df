//! mstpd - Multiple Spanning Tree daemon for SONiC
//!
//! Runs one MSTP bridge in a dedicated worker task. Configuration arrives
//! from a TOML file at startup and from config-store tables at runtime;
//! engine actions leave through an [`MstpSink`].

mod config;
mod error;
mod mgr;
mod sink;
mod tables;
mod worker;

pub use config::*;
pub use error::{MstpdError, Result};
pub use mgr::{ConfigEntry, FieldValue, Intent, MstpMgr, Operation};
pub use sink::{ChannelSink, LogSink, MstpSink};
pub use tables::*;
pub use worker::{BridgeHandle, BridgeWorker, Command};
