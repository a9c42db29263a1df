//! Identifier and enum types shared by every engine component.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MstpError;

/// Highest MSTI identifier supported by the engine.
pub const MAX_MSTI: u16 = 64;

/// Highest port number that fits in the 12-bit port number field.
pub const MAX_PORT_NUMBER: u16 = 0x0FFF;

/// A 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = MstpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MstpError::invalid_config("mac", format!("'{}' is not a MAC address", s));
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }
        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = MstpError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

/// Spanning tree instance identifier. 0 is the CIST, 1..=64 are MSTIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(u16);

impl InstanceId {
    pub const CIST: InstanceId = InstanceId(0);

    /// Validates an MSTI identifier (1..=64).
    pub fn msti(id: u16) -> Result<Self, MstpError> {
        if (1..=MAX_MSTI).contains(&id) {
            Ok(InstanceId(id))
        } else {
            Err(MstpError::invalid_config(
                "instance",
                format!("MSTI {} out of range 1-{}", id, MAX_MSTI),
            ))
        }
    }

    /// Accepts the CIST or a valid MSTI.
    pub fn new(id: u16) -> Result<Self, MstpError> {
        if id == 0 {
            Ok(Self::CIST)
        } else {
            Self::msti(id)
        }
    }

    pub const fn get(&self) -> u16 {
        self.0
    }

    pub const fn is_cist(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cist() {
            write!(f, "CIST")
        } else {
            write!(f, "MSTI{}", self.0)
        }
    }
}

/// An IEEE 802.1Q VLAN ID (1..=4094).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    pub fn new(id: u16) -> Result<Self, MstpError> {
        if (Self::MIN..=Self::MAX).contains(&id) {
            Ok(VlanId(id))
        } else {
            Err(MstpError::invalid_config(
                "vlan",
                format!("VLAN {} out of range {}-{}", id, Self::MIN, Self::MAX),
            ))
        }
    }

    pub const fn get(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = MstpError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

/// Bridge identifier: 4-bit priority, 12-bit system ID extension, MAC.
///
/// The derived ordering compares the 16-bit priority field first and the MAC
/// second, which is the numeric order of the 8-byte wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BridgeId {
    priority: u16,
    mac: MacAddress,
}

impl BridgeId {
    /// Step between configurable bridge priorities.
    pub const PRIORITY_STEP: u16 = 4096;
    pub const MAX_PRIORITY: u16 = 61440;
    pub const DEFAULT_PRIORITY: u16 = 32768;

    /// Builds the identifier of `instance` on a bridge with base `priority`.
    pub fn new(priority: u16, instance: InstanceId, mac: MacAddress) -> Self {
        BridgeId {
            priority: (priority & 0xF000) | (instance.get() & 0x0FFF),
            mac,
        }
    }

    /// Checks a configurable bridge priority value.
    pub fn validate_priority(priority: u16) -> Result<(), MstpError> {
        if priority > Self::MAX_PRIORITY || priority % Self::PRIORITY_STEP != 0 {
            return Err(MstpError::invalid_config(
                "priority",
                format!(
                    "bridge priority {} must be a multiple of {} in 0-{}",
                    priority,
                    Self::PRIORITY_STEP,
                    Self::MAX_PRIORITY
                ),
            ));
        }
        Ok(())
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes[2..8]);
        BridgeId {
            priority: u16::from_be_bytes([bytes[0], bytes[1]]),
            mac: MacAddress::new(mac),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..2].copy_from_slice(&self.priority.to_be_bytes());
        out[2..].copy_from_slice(&self.mac.octets());
        out
    }

    /// Full 16-bit priority field including the system ID extension.
    pub const fn priority(&self) -> u16 {
        self.priority
    }

    /// The configurable 4-bit part, scaled back to 0..=61440.
    pub const fn base_priority(&self) -> u16 {
        self.priority & 0xF000
    }

    pub const fn system_id(&self) -> u16 {
        self.priority & 0x0FFF
    }

    pub const fn mac(&self) -> MacAddress {
        self.mac
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.priority, self.mac)
    }
}

/// Port identifier: 4-bit priority and 12-bit port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(u16);

impl PortId {
    pub const PRIORITY_STEP: u8 = 16;
    pub const DEFAULT_PRIORITY: u8 = 128;

    pub fn new(priority: u8, number: u16) -> Self {
        PortId((u16::from(priority & 0xF0) << 8) | (number & MAX_PORT_NUMBER))
    }

    pub fn validate_priority(priority: u8) -> Result<(), MstpError> {
        if priority % Self::PRIORITY_STEP != 0 {
            return Err(MstpError::invalid_config(
                "port_priority",
                format!(
                    "port priority {} must be a multiple of {} in 0-240",
                    priority,
                    Self::PRIORITY_STEP
                ),
            ));
        }
        Ok(())
    }

    pub const fn from_raw(raw: u16) -> Self {
        PortId(raw)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }

    pub const fn priority(&self) -> u8 {
        ((self.0 >> 8) & 0xF0) as u8
    }

    pub const fn number(&self) -> u16 {
        self.0 & MAX_PORT_NUMBER
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.priority(), self.number())
    }
}

/// Port role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortRole {
    Disabled,
    Root,
    Designated,
    Alternate,
    Backup,
}

impl PortRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortRole::Disabled => "disabled_port",
            PortRole::Root => "root_port",
            PortRole::Designated => "designated_port",
            PortRole::Alternate => "alternate_port",
            PortRole::Backup => "backup_port",
        }
    }

    /// Roles that may reach Forwarding.
    pub fn may_forward(&self) -> bool {
        matches!(self, PortRole::Root | PortRole::Designated)
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port forwarding state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Discarding,
    Learning,
    Forwarding,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Discarding => "Blocking",
            PortState::Learning => "Learning",
            PortState::Forwarding => "Forwarding",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The guard that put a port into its fail-safe sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardKind {
    RootGuard,
    LoopGuard,
    BpduGuard,
}

impl GuardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardKind::RootGuard => "root-guard",
            GuardKind::LoopGuard => "loop-guard",
            GuardKind::BpduGuard => "bpdu-guard",
        }
    }
}

impl fmt::Display for GuardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guard flags configured on a physical port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortGuards {
    pub root_guard: bool,
    pub loop_guard: bool,
    pub bpdu_guard: bool,
    pub bpdu_filter: bool,
}

/// Link type; rapid transitions only run on point-to-point links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    #[default]
    PointToPoint,
    Shared,
}

impl FromStr for LinkType {
    type Err = MstpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "point_to_point" | "point-to-point" | "p2p" => Ok(LinkType::PointToPoint),
            "shared" => Ok(LinkType::Shared),
            _ => Err(MstpError::invalid_config("link_type", format!("unknown link type '{}'", s))),
        }
    }
}
