//! Bridge and port parameters with their defaults and allowed ranges.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::error::{MstpError, MstpResult};
use crate::types::{LinkType, PortGuards, PortId};

pub mod defaults {
    pub const HELLO_TIME: u16 = 2;
    pub const FORWARD_DELAY: u16 = 15;
    pub const MAX_AGE: u16 = 20;
    pub const MAX_HOPS: u8 = 20;
    pub const TX_HOLD_COUNT: u8 = 6;
    pub const PATH_COST: u32 = 20000;
    /// Ticks without a BPDU before a designated port operates as edge.
    pub const EDGE_DELAY: u32 = 3;
}

pub mod ranges {
    use std::ops::RangeInclusive;

    pub const HELLO_TIME: RangeInclusive<u16> = 1..=10;
    pub const FORWARD_DELAY: RangeInclusive<u16> = 4..=30;
    pub const MAX_AGE: RangeInclusive<u16> = 6..=40;
    pub const MAX_HOPS: RangeInclusive<u8> = 1..=40;
    pub const TX_HOLD_COUNT: RangeInclusive<u8> = 1..=10;
    pub const PATH_COST: RangeInclusive<u32> = 1..=200_000_000;
}

fn check_range<T>(field: &str, value: T, range: RangeInclusive<T>) -> MstpResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if !range.contains(&value) {
        return Err(MstpError::invalid_config(
            field,
            format!("{} out of range {}-{}", value, range.start(), range.end()),
        ));
    }
    Ok(())
}

/// Bridge-wide protocol timers (seconds) and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeParams {
    pub hello_time: u16,
    pub forward_delay: u16,
    pub max_age: u16,
    pub max_hops: u8,
    pub tx_hold_count: u8,
}

impl Default for BridgeParams {
    fn default() -> Self {
        BridgeParams {
            hello_time: defaults::HELLO_TIME,
            forward_delay: defaults::FORWARD_DELAY,
            max_age: defaults::MAX_AGE,
            max_hops: defaults::MAX_HOPS,
            tx_hold_count: defaults::TX_HOLD_COUNT,
        }
    }
}

impl BridgeParams {
    /// Validates each range and the 802.1D relation
    /// `2 * (forward_delay - 1) >= max_age >= 2 * (hello_time + 1)`.
    pub fn validate(&self) -> MstpResult<()> {
        check_range("hello_time", self.hello_time, ranges::HELLO_TIME)?;
        check_range("forward_delay", self.forward_delay, ranges::FORWARD_DELAY)?;
        check_range("max_age", self.max_age, ranges::MAX_AGE)?;
        check_range("max_hops", self.max_hops, ranges::MAX_HOPS)?;
        check_range("tx_hold_count", self.tx_hold_count, ranges::TX_HOLD_COUNT)?;

        if self.max_age > 2 * (self.forward_delay - 1) {
            return Err(MstpError::invalid_config(
                "max_age",
                format!(
                    "max_age {} exceeds 2 * (forward_delay - 1) = {}",
                    self.max_age,
                    2 * (self.forward_delay - 1)
                ),
            ));
        }
        if self.max_age < 2 * (self.hello_time + 1) {
            return Err(MstpError::invalid_config(
                "max_age",
                format!(
                    "max_age {} is below 2 * (hello_time + 1) = {}",
                    self.max_age,
                    2 * (self.hello_time + 1)
                ),
            ));
        }
        Ok(())
    }

    /// Lifetime of received information in ticks.
    pub fn info_lifetime(&self) -> u32 {
        3 * u32::from(self.hello_time)
    }

    /// Length of the topology change window in ticks.
    pub fn tc_window(&self) -> u32 {
        u32::from(self.hello_time) + 1
    }
}

/// Per-port parameters. Cost and priority apply to one instance; the rest
/// belongs to the physical port and is shared by all instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortParams {
    pub path_cost: u32,
    pub priority: u8,
    pub admin_edge: bool,
    pub auto_edge: bool,
    pub link_type: LinkType,
    pub guards: PortGuards,
}

impl Default for PortParams {
    fn default() -> Self {
        PortParams {
            path_cost: defaults::PATH_COST,
            priority: PortId::DEFAULT_PRIORITY,
            admin_edge: false,
            auto_edge: true,
            link_type: LinkType::PointToPoint,
            guards: PortGuards::default(),
        }
    }
}

impl PortParams {
    pub fn validate(&self) -> MstpResult<()> {
        check_range("path_cost", self.path_cost, ranges::PATH_COST)?;
        PortId::validate_priority(self.priority)?;
        if self.guards.bpdu_filter && self.guards.bpdu_guard {
            return Err(MstpError::conflict(
                "bpdu-filter and bpdu-guard cannot both be enabled on a port",
            ));
        }
        Ok(())
    }
}
