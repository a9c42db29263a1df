//! Integration test infrastructure for the MSTP engine
//!
//! Provides:
//! - A deterministic simulated network of bridges and links
//! - Fixtures for common topologies
//! - Convergence and loop-freedom verification helpers

pub mod fixtures;
mod network;
mod verification;

pub use fixtures::*;
pub use network::{Endpoint, SimError, SimNetwork, SimResult, MAX_DELIVERIES};
pub use verification::*;
