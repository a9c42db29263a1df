//! BPDU wire codec.
//!
//! Payloads start at the protocol identifier; LLC and MAC framing belong to
//! the transport. Supported encodings:
//!
//! | Kind   | Version | Type | Length            |
//! |--------|---------|------|-------------------|
//! | TCN    | 0       | 0x80 | 4                 |
//! | Config | 0       | 0x00 | 35                |
//! | RST    | 2       | 0x02 | 36                |
//! | MST    | 3       | 0x02 | 102 + 16 per MSTI |
//!
//! Timer fields are kept in their raw 1/256 second units so that decoding an
//! encoded BPDU yields exactly the original value.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::DecodeError;
use crate::region::{ConfigDigest, MstConfigId, CONFIG_NAME_MAX_LEN};
use crate::types::{BridgeId, InstanceId, PortId, PortRole, MAX_MSTI};

pub const PROTOCOL_ID: u16 = 0x0000;

pub const VERSION_STP: u8 = 0;
pub const VERSION_RSTP: u8 = 2;
pub const VERSION_MSTP: u8 = 3;

pub const TYPE_CONFIG: u8 = 0x00;
pub const TYPE_RST: u8 = 0x02;
pub const TYPE_TCN: u8 = 0x80;

pub const TCN_BPDU_LEN: usize = 4;
pub const CONFIG_BPDU_LEN: usize = 35;
pub const RST_BPDU_LEN: usize = 36;
pub const MST_BPDU_MIN_LEN: usize = 102;
pub const MSTI_RECORD_LEN: usize = 16;
pub const MST_BPDU_MAX_LEN: usize = MST_BPDU_MIN_LEN + MSTI_RECORD_LEN * MAX_MSTI as usize;

/// Version 3 length without any MSTI records.
const VERSION3_BASE_LEN: u16 = 64;

// Field offsets shared by every non-TCN BPDU.
mod offset {
    pub const VERSION: usize = 2;
    pub const TYPE: usize = 3;
    pub const FLAGS: usize = 4;
    pub const ROOT_ID: usize = 5;
    pub const ROOT_PATH_COST: usize = 13;
    pub const BRIDGE_ID: usize = 17;
    pub const PORT_ID: usize = 25;
    pub const MESSAGE_AGE: usize = 27;
    pub const MAX_AGE: usize = 29;
    pub const HELLO_TIME: usize = 31;
    pub const FORWARD_DELAY: usize = 33;
    pub const VERSION1_LEN: usize = 35;
    pub const VERSION3_LEN: usize = 36;
    pub const FORMAT_SELECTOR: usize = 38;
    pub const CONFIG_NAME: usize = 39;
    pub const REVISION: usize = 71;
    pub const DIGEST: usize = 73;
    pub const INTERNAL_COST: usize = 89;
    pub const CIST_BRIDGE_ID: usize = 93;
    pub const REMAINING_HOPS: usize = 101;
    pub const MSTI_RECORDS: usize = 102;
}

/// The flags octet of a CIST or MSTI record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BpduFlags(u8);

impl BpduFlags {
    pub const TOPOLOGY_CHANGE: u8 = 0x01;
    pub const PROPOSAL: u8 = 0x02;
    pub const LEARNING: u8 = 0x10;
    pub const FORWARDING: u8 = 0x20;
    pub const AGREEMENT: u8 = 0x40;
    pub const TOPOLOGY_CHANGE_ACK: u8 = 0x80;

    const ROLE_SHIFT: u8 = 2;
    const ROLE_MASK: u8 = 0x0C;

    pub const fn from_bits(bits: u8) -> Self {
        BpduFlags(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u8, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    pub fn role(&self) -> FlagRole {
        match (self.0 & Self::ROLE_MASK) >> Self::ROLE_SHIFT {
            1 => FlagRole::AlternateOrBackup,
            2 => FlagRole::Root,
            3 => FlagRole::Designated,
            _ => FlagRole::Unknown,
        }
    }

    pub fn set_role(&mut self, role: FlagRole) {
        let bits = match role {
            FlagRole::Unknown => 0,
            FlagRole::AlternateOrBackup => 1,
            FlagRole::Root => 2,
            FlagRole::Designated => 3,
        };
        self.0 = (self.0 & !Self::ROLE_MASK) | (bits << Self::ROLE_SHIFT);
    }
}

/// Port role as encoded in the flags octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagRole {
    Unknown,
    AlternateOrBackup,
    Root,
    Designated,
}

impl From<PortRole> for FlagRole {
    fn from(role: PortRole) -> Self {
        match role {
            PortRole::Root => FlagRole::Root,
            PortRole::Designated => FlagRole::Designated,
            PortRole::Alternate | PortRole::Backup => FlagRole::AlternateOrBackup,
            PortRole::Disabled => FlagRole::Unknown,
        }
    }
}

/// Timer values in 1/256 second units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BpduTimers {
    pub message_age: u16,
    pub max_age: u16,
    pub hello_time: u16,
    pub forward_delay: u16,
}

impl BpduTimers {
    pub fn from_secs(message_age: u16, max_age: u16, hello_time: u16, forward_delay: u16) -> Self {
        BpduTimers {
            message_age: message_age.saturating_mul(256),
            max_age: max_age.saturating_mul(256),
            hello_time: hello_time.saturating_mul(256),
            forward_delay: forward_delay.saturating_mul(256),
        }
    }

    pub fn message_age_secs(&self) -> u16 {
        self.message_age >> 8
    }

    pub fn max_age_secs(&self) -> u16 {
        self.max_age >> 8
    }
}

/// CIST part common to Config, RST and MST BPDUs.
///
/// For MST BPDUs `bridge_id` is the CIST bridge identifier (octets 94-101);
/// octets 18-25 carry the regional root instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CistInfo {
    pub flags: BpduFlags,
    pub root_id: BridgeId,
    pub root_path_cost: u32,
    pub bridge_id: BridgeId,
    pub port_id: PortId,
    pub timers: BpduTimers,
}

/// One MSTI configuration message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MstiRecord {
    pub flags: BpduFlags,
    /// MSTI regional root; its system ID extension is the MSTID.
    pub regional_root_id: BridgeId,
    pub internal_root_path_cost: u32,
    /// Bridge priority in the high nibble.
    pub bridge_priority: u8,
    /// Port priority in the high nibble.
    pub port_priority: u8,
    pub remaining_hops: u8,
}

impl MstiRecord {
    pub fn instance(&self) -> u16 {
        self.regional_root_id.system_id()
    }

    /// Designated bridge of this MSTI: record priority, sender's CIST MAC.
    pub fn designated_bridge_id(&self, cist_bridge_id: BridgeId) -> BridgeId {
        let instance = InstanceId::msti(self.instance()).unwrap_or(InstanceId::CIST);
        BridgeId::new(u16::from(self.bridge_priority & 0xF0) << 8, instance, cist_bridge_id.mac())
    }

    /// Designated port of this MSTI: record priority, sender's port number.
    pub fn designated_port_id(&self, cist_port_id: PortId) -> PortId {
        PortId::new(self.port_priority, cist_port_id.number())
    }
}

/// MST BPDU body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MstBpdu {
    pub cist: CistInfo,
    pub regional_root_id: BridgeId,
    pub config_id: MstConfigId,
    pub internal_root_path_cost: u32,
    pub remaining_hops: u8,
    pub msti: Vec<MstiRecord>,
}

impl MstBpdu {
    /// Record an MSTI would carry if its information equals the CIST's.
    pub fn implied_record(&self, instance: InstanceId) -> MstiRecord {
        MstiRecord {
            flags: self.cist.flags,
            regional_root_id: BridgeId::new(
                self.regional_root_id.base_priority(),
                instance,
                self.regional_root_id.mac(),
            ),
            internal_root_path_cost: self.internal_root_path_cost,
            bridge_priority: (self.cist.bridge_id.base_priority() >> 8) as u8,
            port_priority: self.cist.port_id.priority(),
            remaining_hops: self.remaining_hops,
        }
    }

    /// Information for `instance`: its own record, or the CIST-implied one
    /// when the sender left it out.
    pub fn record(&self, instance: InstanceId) -> MstiRecord {
        self.msti
            .iter()
            .find(|r| r.instance() == instance.get())
            .copied()
            .unwrap_or_else(|| self.implied_record(instance))
    }

    /// Drops records that carry nothing beyond the CIST information.
    pub fn pack(&mut self) {
        let records = std::mem::take(&mut self.msti);
        self.msti = records
            .into_iter()
            .filter(|r| match InstanceId::msti(r.instance()) {
                Ok(instance) => *r != self.implied_record(instance),
                Err(_) => true,
            })
            .collect();
    }
}

/// A decoded BPDU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bpdu {
    Tcn,
    Config(CistInfo),
    Rst(CistInfo),
    Mst(MstBpdu),
}

impl Bpdu {
    /// CIST information, absent for TCN BPDUs.
    pub fn cist(&self) -> Option<&CistInfo> {
        match self {
            Bpdu::Tcn => None,
            Bpdu::Config(info) | Bpdu::Rst(info) => Some(info),
            Bpdu::Mst(mst) => Some(&mst.cist),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Bpdu::Tcn => "tcn",
            Bpdu::Config(_) => "config",
            Bpdu::Rst(_) => "rst",
            Bpdu::Mst(_) => "mst",
        }
    }

    /// Encodes the BPDU payload.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Bpdu::Tcn => {
                let mut buf = vec![0u8; TCN_BPDU_LEN];
                BigEndian::write_u16(&mut buf[0..2], PROTOCOL_ID);
                buf[offset::VERSION] = VERSION_STP;
                buf[offset::TYPE] = TYPE_TCN;
                buf
            }
            Bpdu::Config(info) => {
                let mut buf = vec![0u8; CONFIG_BPDU_LEN];
                write_cist(&mut buf, VERSION_STP, TYPE_CONFIG, info, info.bridge_id);
                buf
            }
            Bpdu::Rst(info) => {
                let mut buf = vec![0u8; RST_BPDU_LEN];
                write_cist(&mut buf, VERSION_RSTP, TYPE_RST, info, info.bridge_id);
                buf
            }
            Bpdu::Mst(mst) => encode_mst(mst),
        }
    }

    /// Decodes a BPDU payload. Trailing bytes past the declared length are
    /// ignored (frame padding).
    pub fn decode(bytes: &[u8]) -> Result<Bpdu, DecodeError> {
        require(bytes, TCN_BPDU_LEN)?;
        let protocol = BigEndian::read_u16(&bytes[0..2]);
        if protocol != PROTOCOL_ID {
            return Err(DecodeError::BadProtocolId(protocol));
        }
        let version = bytes[offset::VERSION];
        let kind = bytes[offset::TYPE];

        match (version, kind) {
            (VERSION_STP, TYPE_TCN) => Ok(Bpdu::Tcn),
            (VERSION_STP, TYPE_CONFIG) => {
                require(bytes, CONFIG_BPDU_LEN)?;
                Ok(Bpdu::Config(read_cist(bytes)))
            }
            (VERSION_RSTP, TYPE_RST) => {
                require(bytes, RST_BPDU_LEN)?;
                check_version1_len(bytes)?;
                Ok(Bpdu::Rst(read_cist(bytes)))
            }
            (VERSION_MSTP, TYPE_RST) => decode_mst(bytes),
            (VERSION_STP, _) | (VERSION_RSTP, _) | (VERSION_MSTP, _) => {
                Err(DecodeError::BadBpduType { version, kind })
            }
            _ => Err(DecodeError::UnsupportedVersion(version)),
        }
    }
}

fn require(bytes: &[u8], needed: usize) -> Result<(), DecodeError> {
    if bytes.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            got: bytes.len(),
        });
    }
    Ok(())
}

fn check_version1_len(bytes: &[u8]) -> Result<(), DecodeError> {
    match bytes[offset::VERSION1_LEN] {
        0 => Ok(()),
        other => Err(DecodeError::BadVersion1Length(other)),
    }
}

fn read_bridge_id(bytes: &[u8], at: usize) -> BridgeId {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    BridgeId::from_bytes(raw)
}

fn read_cist(bytes: &[u8]) -> CistInfo {
    CistInfo {
        flags: BpduFlags::from_bits(bytes[offset::FLAGS]),
        root_id: read_bridge_id(bytes, offset::ROOT_ID),
        root_path_cost: BigEndian::read_u32(&bytes[offset::ROOT_PATH_COST..]),
        bridge_id: read_bridge_id(bytes, offset::BRIDGE_ID),
        port_id: PortId::from_raw(BigEndian::read_u16(&bytes[offset::PORT_ID..])),
        timers: BpduTimers {
            message_age: BigEndian::read_u16(&bytes[offset::MESSAGE_AGE..]),
            max_age: BigEndian::read_u16(&bytes[offset::MAX_AGE..]),
            hello_time: BigEndian::read_u16(&bytes[offset::HELLO_TIME..]),
            forward_delay: BigEndian::read_u16(&bytes[offset::FORWARD_DELAY..]),
        },
    }
}

/// Writes the first 35 octets; `id_at_17` is the designated bridge for
/// Config/RST and the regional root for MST.
fn write_cist(buf: &mut [u8], version: u8, kind: u8, info: &CistInfo, id_at_17: BridgeId) {
    BigEndian::write_u16(&mut buf[0..2], PROTOCOL_ID);
    buf[offset::VERSION] = version;
    buf[offset::TYPE] = kind;
    buf[offset::FLAGS] = info.flags.bits();
    buf[offset::ROOT_ID..offset::ROOT_ID + 8].copy_from_slice(&info.root_id.to_bytes());
    BigEndian::write_u32(&mut buf[offset::ROOT_PATH_COST..], info.root_path_cost);
    buf[offset::BRIDGE_ID..offset::BRIDGE_ID + 8].copy_from_slice(&id_at_17.to_bytes());
    BigEndian::write_u16(&mut buf[offset::PORT_ID..], info.port_id.raw());
    BigEndian::write_u16(&mut buf[offset::MESSAGE_AGE..], info.timers.message_age);
    BigEndian::write_u16(&mut buf[offset::MAX_AGE..], info.timers.max_age);
    BigEndian::write_u16(&mut buf[offset::HELLO_TIME..], info.timers.hello_time);
    BigEndian::write_u16(&mut buf[offset::FORWARD_DELAY..], info.timers.forward_delay);
}

fn encode_mst(mst: &MstBpdu) -> Vec<u8> {
    let records = &mst.msti[..mst.msti.len().min(usize::from(MAX_MSTI))];
    let mut buf = vec![0u8; MST_BPDU_MIN_LEN + records.len() * MSTI_RECORD_LEN];

    write_cist(&mut buf, VERSION_MSTP, TYPE_RST, &mst.cist, mst.regional_root_id);
    buf[offset::VERSION1_LEN] = 0;
    let v3_len = VERSION3_BASE_LEN + (records.len() * MSTI_RECORD_LEN) as u16;
    BigEndian::write_u16(&mut buf[offset::VERSION3_LEN..], v3_len);

    buf[offset::FORMAT_SELECTOR] = mst.config_id.format_selector;
    let name = mst.config_id.name.as_bytes();
    let name_len = name.len().min(CONFIG_NAME_MAX_LEN);
    buf[offset::CONFIG_NAME..offset::CONFIG_NAME + name_len].copy_from_slice(&name[..name_len]);
    BigEndian::write_u16(&mut buf[offset::REVISION..], mst.config_id.revision);
    buf[offset::DIGEST..offset::DIGEST + 16].copy_from_slice(&mst.config_id.digest.0);

    BigEndian::write_u32(&mut buf[offset::INTERNAL_COST..], mst.internal_root_path_cost);
    buf[offset::CIST_BRIDGE_ID..offset::CIST_BRIDGE_ID + 8].copy_from_slice(&mst.cist.bridge_id.to_bytes());
    buf[offset::REMAINING_HOPS] = mst.remaining_hops;

    for (i, record) in records.iter().enumerate() {
        let at = offset::MSTI_RECORDS + i * MSTI_RECORD_LEN;
        let rec = &mut buf[at..at + MSTI_RECORD_LEN];
        rec[0] = record.flags.bits();
        rec[1..9].copy_from_slice(&record.regional_root_id.to_bytes());
        BigEndian::write_u32(&mut rec[9..13], record.internal_root_path_cost);
        rec[13] = record.bridge_priority;
        rec[14] = record.port_priority;
        rec[15] = record.remaining_hops;
    }
    buf
}

fn decode_mst(bytes: &[u8]) -> Result<Bpdu, DecodeError> {
    require(bytes, MST_BPDU_MIN_LEN)?;
    check_version1_len(bytes)?;

    let v3_len = BigEndian::read_u16(&bytes[offset::VERSION3_LEN..]);
    if v3_len < VERSION3_BASE_LEN || (v3_len - VERSION3_BASE_LEN) as usize % MSTI_RECORD_LEN != 0 {
        return Err(DecodeError::BadVersion3Length(v3_len));
    }
    let record_count = usize::from(v3_len - VERSION3_BASE_LEN) / MSTI_RECORD_LEN;
    if record_count > usize::from(MAX_MSTI) {
        return Err(DecodeError::BadVersion3Length(v3_len));
    }
    require(bytes, MST_BPDU_MIN_LEN + record_count * MSTI_RECORD_LEN)?;

    let mut cist = read_cist(bytes);
    let regional_root_id = cist.bridge_id;
    cist.bridge_id = read_bridge_id(bytes, offset::CIST_BRIDGE_ID);

    let raw_name = &bytes[offset::CONFIG_NAME..offset::CONFIG_NAME + CONFIG_NAME_MAX_LEN];
    let name_end = raw_name.iter().position(|b| *b == 0).unwrap_or(CONFIG_NAME_MAX_LEN);
    let name = std::str::from_utf8(&raw_name[..name_end])
        .map_err(|_| DecodeError::InvalidConfigName)?
        .to_string();
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&bytes[offset::DIGEST..offset::DIGEST + 16]);

    let mut seen = BTreeSet::new();
    let mut msti = Vec::with_capacity(record_count);
    for i in 0..record_count {
        let at = offset::MSTI_RECORDS + i * MSTI_RECORD_LEN;
        let rec = &bytes[at..at + MSTI_RECORD_LEN];
        let record = MstiRecord {
            flags: BpduFlags::from_bits(rec[0]),
            regional_root_id: read_bridge_id(rec, 1),
            internal_root_path_cost: BigEndian::read_u32(&rec[9..13]),
            bridge_priority: rec[13],
            port_priority: rec[14],
            remaining_hops: rec[15],
        };
        let instance = record.instance();
        if !(1..=MAX_MSTI).contains(&instance) {
            return Err(DecodeError::InvalidInstance(instance));
        }
        if !seen.insert(instance) {
            return Err(DecodeError::DuplicateInstance(instance));
        }
        msti.push(record);
    }

    Ok(Bpdu::Mst(MstBpdu {
        cist,
        regional_root_id,
        config_id: MstConfigId {
            format_selector: bytes[offset::FORMAT_SELECTOR],
            name,
            revision: BigEndian::read_u16(&bytes[offset::REVISION..]),
            digest: ConfigDigest(digest),
        },
        internal_root_path_cost: BigEndian::read_u32(&bytes[offset::INTERNAL_COST..]),
        remaining_hops: bytes[offset::REMAINING_HOPS],
        msti,
    }))
}
