//! MST region identity: configuration name, revision and VLAN map.
//!
//! Two bridges belong to the same region when name, revision and the
//! configuration digest all match. The digest is the IEEE 802.1Q HMAC-MD5
//! over the 4096-entry VLAN-to-MSTID table, so it depends only on the map
//! content and never on the order in which VLANs were mapped.

use hmac::{Hmac, Mac};
use md5::Md5;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{MstpError, MstpResult};
use crate::types::{InstanceId, MacAddress, VlanId};

/// Maximum configuration name length in bytes.
pub const CONFIG_NAME_MAX_LEN: usize = 32;

/// Format selector carried in every MST configuration identifier.
pub const FORMAT_SELECTOR: u8 = 0;

/// Fixed key for the configuration digest (IEEE 802.1Q 13.7).
const DIGEST_KEY: [u8; 16] = [
    0x13, 0xAC, 0x06, 0xA6, 0x2E, 0x47, 0xFD, 0x51, 0xF9, 0x5D, 0x2B, 0xA2, 0x43, 0xCD, 0x03, 0x46,
];

/// Number of entries in the digest table (VIDs 0..=4095).
const DIGEST_TABLE_LEN: usize = 4096;

type HmacMd5 = Hmac<Md5>;

static VLAN_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,4})(?:-(\d{1,4}))?$").expect("valid VLAN range regex"));

/// 16-byte MST configuration digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ConfigDigest(pub [u8; 16]);

impl fmt::Display for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// MST configuration identifier as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MstConfigId {
    pub format_selector: u8,
    pub name: String,
    pub revision: u16,
    pub digest: ConfigDigest,
}

/// VLAN to MSTI assignments. VLANs not present belong to the CIST.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VlanMap {
    instances: BTreeMap<InstanceId, BTreeSet<VlanId>>,
}

impl VlanMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from per-instance VLAN sets, rejecting any VLAN that
    /// appears under two instances.
    pub fn from_instances<I, V>(entries: I) -> MstpResult<Self>
    where
        I: IntoIterator<Item = (InstanceId, V)>,
        V: IntoIterator<Item = VlanId>,
    {
        let mut map = VlanMap::new();
        for (instance, vlans) in entries {
            map.map(instance, vlans)?;
        }
        Ok(map)
    }

    /// Maps `vlans` to `instance`. Fails without modification if any VLAN
    /// already belongs to another MSTI.
    pub fn map<V>(&mut self, instance: InstanceId, vlans: V) -> MstpResult<()>
    where
        V: IntoIterator<Item = VlanId>,
    {
        if instance.is_cist() {
            return Err(MstpError::invalid_config(
                "instance",
                "VLANs cannot be mapped to the CIST explicitly",
            ));
        }
        let vlans: BTreeSet<VlanId> = vlans.into_iter().collect();
        for vlan in &vlans {
            let owner = self.instance_of(*vlan);
            if !owner.is_cist() && owner != instance {
                return Err(MstpError::conflict(format!(
                    "This vlan {} is already mapped to MSTP instance {}",
                    vlan,
                    owner.get()
                )));
            }
        }
        if !vlans.is_empty() {
            self.instances.entry(instance).or_default().extend(vlans);
        }
        Ok(())
    }

    /// Returns `vlans` of `instance` to the CIST. Drops the instance once it
    /// has no VLANs left.
    pub fn unmap<V>(&mut self, instance: InstanceId, vlans: V)
    where
        V: IntoIterator<Item = VlanId>,
    {
        if let Some(set) = self.instances.get_mut(&instance) {
            for vlan in vlans {
                set.remove(&vlan);
            }
            if set.is_empty() {
                self.instances.remove(&instance);
            }
        }
    }

    pub fn remove_instance(&mut self, instance: InstanceId) -> bool {
        self.instances.remove(&instance).is_some()
    }

    /// Instance owning `vlan`; the CIST when unmapped.
    pub fn instance_of(&self, vlan: VlanId) -> InstanceId {
        self.instances
            .iter()
            .find(|(_, vlans)| vlans.contains(&vlan))
            .map(|(instance, _)| *instance)
            .unwrap_or(InstanceId::CIST)
    }

    /// MSTIs with at least one VLAN, ascending.
    pub fn instances(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.instances.keys().copied()
    }

    pub fn vlans(&self, instance: InstanceId) -> Option<&BTreeSet<VlanId>> {
        self.instances.get(&instance)
    }

    pub fn contains_instance(&self, instance: InstanceId) -> bool {
        self.instances.contains_key(&instance)
    }

    /// Computes the configuration digest of this map.
    pub fn digest(&self) -> ConfigDigest {
        let mut table = [0u16; DIGEST_TABLE_LEN];
        for (instance, vlans) in &self.instances {
            for vlan in vlans {
                table[usize::from(vlan.get())] = instance.get();
            }
        }

        let mut mac = HmacMd5::new_from_slice(&DIGEST_KEY).expect("HMAC accepts keys of any length");
        for entry in table {
            mac.update(&entry.to_be_bytes());
        }
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&mac.finalize().into_bytes());
        ConfigDigest(digest)
    }
}

/// The region this bridge belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionIdentity {
    name: String,
    revision: u16,
    vlan_map: VlanMap,
    digest: ConfigDigest,
}

impl RegionIdentity {
    /// Validates the name and computes the digest.
    pub fn new(name: impl Into<String>, revision: u16, vlan_map: VlanMap) -> MstpResult<Self> {
        let name = name.into();
        validate_config_name(&name)?;
        let digest = vlan_map.digest();
        Ok(RegionIdentity {
            name,
            revision,
            vlan_map,
            digest,
        })
    }

    /// Default region of a bridge: name is the bridge MAC, revision 0, no MSTIs.
    pub fn default_for(mac: MacAddress) -> Self {
        let vlan_map = VlanMap::new();
        RegionIdentity {
            name: mac.to_string(),
            revision: 0,
            digest: vlan_map.digest(),
            vlan_map,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn revision(&self) -> u16 {
        self.revision
    }

    pub fn vlan_map(&self) -> &VlanMap {
        &self.vlan_map
    }

    pub fn digest(&self) -> ConfigDigest {
        self.digest
    }

    pub fn config_id(&self) -> MstConfigId {
        MstConfigId {
            format_selector: FORMAT_SELECTOR,
            name: self.name.clone(),
            revision: self.revision,
            digest: self.digest,
        }
    }

    /// True when a received configuration identifier names this region.
    pub fn matches(&self, id: &MstConfigId) -> bool {
        id.format_selector == FORMAT_SELECTOR
            && id.name == self.name
            && id.revision == self.revision
            && id.digest == self.digest
    }
}

/// Checks the configuration name length limit.
pub fn validate_config_name(name: &str) -> MstpResult<()> {
    if name.len() > CONFIG_NAME_MAX_LEN {
        return Err(MstpError::invalid_config(
            "config_name",
            format!("Config-name string length exceeded ({} > {})", name.len(), CONFIG_NAME_MAX_LEN),
        ));
    }
    Ok(())
}

/// Parses a VLAN list such as `"10-20,30"`.
pub fn parse_vlan_list(list: &str) -> MstpResult<BTreeSet<VlanId>> {
    let mut vlans = BTreeSet::new();
    for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let caps = VLAN_RANGE_RE.captures(token).ok_or_else(|| {
            MstpError::invalid_config("vlan", format!("'{}' is not a VLAN or VLAN range", token))
        })?;
        let start: u16 = caps[1]
            .parse()
            .map_err(|_| MstpError::invalid_config("vlan", format!("bad VLAN '{}'", token)))?;
        let end: u16 = match caps.get(2) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| MstpError::invalid_config("vlan", format!("bad VLAN '{}'", token)))?,
            None => start,
        };
        if end < start {
            return Err(MstpError::invalid_config(
                "vlan",
                format!("range '{}' is reversed", token),
            ));
        }
        for id in start..=end {
            vlans.insert(VlanId::new(id)?);
        }
    }
    Ok(vlans)
}

/// Formats VLANs back into compact range notation.
pub fn format_vlan_list<'a>(vlans: impl IntoIterator<Item = &'a VlanId>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut run: Option<(u16, u16)> = None;
    for vlan in vlans {
        let id = vlan.get();
        run = match run {
            Some((start, end)) if id == end + 1 => Some((start, id)),
            Some((start, end)) => {
                parts.push(format_run(start, end));
                Some((id, id))
            }
            None => Some((id, id)),
        };
    }
    if let Some((start, end)) = run {
        parts.push(format_run(start, end));
    }
    parts.join(",")
}

fn format_run(start: u16, end: u16) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}-{}", start, end)
    }
}
