//! MstpMgr - translates config-store entries into engine intents
//!
//! Configuration flow:
//! 1. STP_GLOBAL → admin state, timers, CIST priority, region name/revision
//! 2. MSTP_INSTANCE → VLAN map and MSTI priorities
//! 3. STP_PORT → physical port parameters and admin state
//! 4. MSTP_INSTANCE_PORT → per-instance port cost and priority
//!
//! Region fields from a whole batch collapse into one `SetRegion` intent so
//! the engine reconfigures the region exactly once.

use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

use sonic_mstp::{
    parse_vlan_list, Bridge, BridgeParams, InstanceId, LinkType, MacAddress, MstpResult, PortParams,
    RegionIdentity, VlanMap,
};

use crate::config::MstpdConfig;
use crate::error::{MstpdError, Result};
use crate::tables::{
    fields, CFG_MSTP_INSTANCE_PORT_TABLE_NAME, CFG_MSTP_INSTANCE_TABLE_NAME, CFG_STP_GLOBAL_TABLE_NAME,
    CFG_STP_PORT_TABLE_NAME, KEY_SEPARATOR,
};

/// Operation type of a config-store entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Set operation (add or update)
    Set,
    /// Delete operation
    Del,
}

impl Operation {
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }
}

/// A field-value pair of a config-store entry.
pub type FieldValue = (String, String);

/// Table, key, operation and field-values of one config-store change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    /// Table name (e.g., "STP_PORT")
    pub table: String,
    /// The key (e.g., "Ethernet0", "1|Ethernet0")
    pub key: String,
    pub op: Operation,
    /// Field-value pairs (empty for Del operations)
    pub fields: Vec<FieldValue>,
}

impl ConfigEntry {
    pub fn set<F, V>(table: impl Into<String>, key: impl Into<String>, fields: impl IntoIterator<Item = (F, V)>) -> Self
    where
        F: Into<String>,
        V: Into<String>,
    {
        Self {
            table: table.into(),
            key: key.into(),
            op: Operation::Set,
            fields: fields.into_iter().map(|(f, v)| (f.into(), v.into())).collect(),
        }
    }

    pub fn del(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            op: Operation::Del,
            fields: vec![],
        }
    }

    /// Returns the value for a field, if present.
    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    fn invalid(&self, field: &str, value: &str) -> MstpdError {
        MstpdError::invalid_field(&self.table, &self.key, field, value)
    }

    fn parse_field<T: FromStr>(&self, field: &str) -> Result<Option<T>> {
        match self.get_field(field) {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(field, value)),
            None => Ok(None),
        }
    }

    fn flag_field(&self, field: &str) -> Result<Option<bool>> {
        match self.get_field(field) {
            Some(value) => parse_flag(value).map(Some).ok_or_else(|| self.invalid(field, value)),
            None => Ok(None),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "up" | "enable" | "enabled" | "yes" => Some(true),
        "false" | "down" | "disable" | "disabled" | "no" => Some(false),
        _ => None,
    }
}

/// One engine operation derived from configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SetEnabled(bool),
    SetBridgeParams(BridgeParams),
    SetBridgePriority {
        instance: InstanceId,
        priority: u16,
    },
    SetRegion {
        name: String,
        revision: u16,
        vlan_map: VlanMap,
    },
    SetPortAdminState {
        port: u16,
        enabled: bool,
    },
    SetPortParams {
        port: u16,
        instance: InstanceId,
        params: PortParams,
    },
    RemovePort {
        port: u16,
    },
    ClearGuard {
        port: u16,
    },
}

impl Intent {
    /// Applies the intent to a bridge.
    pub fn apply(self, bridge: &mut Bridge) -> MstpResult<()> {
        match self {
            Intent::SetEnabled(enabled) => bridge.set_enabled(enabled),
            Intent::SetBridgeParams(params) => bridge.set_bridge_params(params).map(|_| ()),
            Intent::SetBridgePriority { instance, priority } => {
                bridge.set_bridge_priority(instance, priority).map(|_| ())
            }
            Intent::SetRegion {
                name,
                revision,
                vlan_map,
            } => bridge.set_region_identity(&name, revision, vlan_map).map(|_| ()),
            Intent::SetPortAdminState { port, enabled } => bridge.set_port_admin_state(port, enabled),
            Intent::SetPortParams { port, instance, params } => bridge.set_port_params(port, instance, params),
            Intent::RemovePort { port } => bridge.remove_port(port),
            Intent::ClearGuard { port } => bridge.clear_guard_violation(port).map(|_| ()),
        }
    }
}

/// Cached view of the configuration already handed to the engine.
#[derive(Debug, Clone, Default)]
struct MgrState {
    params: BridgeParams,
    region_name: Option<String>,
    revision: u16,
    vlan_map: VlanMap,
    /// Interface name -> port number
    port_numbers: BTreeMap<String, u16>,
    /// Interface name -> CIST/physical parameters
    port_params: BTreeMap<String, PortParams>,
    /// (instance, interface) -> (priority, cost) overrides
    instance_port: BTreeMap<(InstanceId, String), (Option<u8>, Option<u32>)>,
}

/// MstpMgr owns interface naming and config caching for one bridge.
pub struct MstpMgr {
    mac: MacAddress,
    state: MgrState,
}

impl MstpMgr {
    pub fn new(mac: MacAddress) -> Self {
        Self {
            mac,
            state: MgrState::default(),
        }
    }

    /// Seeds the caches from the daemon configuration file.
    pub fn from_config(config: &MstpdConfig) -> Result<Self> {
        let mut state = MgrState {
            params: config.timers,
            region_name: config.region.name.clone(),
            revision: config.region.revision,
            vlan_map: config.vlan_map()?,
            ..MgrState::default()
        };
        for port in &config.ports {
            state.port_numbers.insert(port.name.clone(), port.number);
            state.port_params.insert(port.name.clone(), port.params());
        }
        Ok(Self {
            mac: config.bridge.mac,
            state,
        })
    }

    /// Port number assigned to an interface.
    pub fn port_number(&self, alias: &str) -> Option<u16> {
        self.state.port_numbers.get(alias).copied()
    }

    /// Interface name of a port number.
    pub fn port_alias(&self, number: u16) -> Option<&str> {
        self.state
            .port_numbers
            .iter()
            .find(|(_, n)| **n == number)
            .map(|(alias, _)| alias.as_str())
    }

    /// Translates one batch. Either the whole batch translates and the
    /// caches advance, or an error is returned and nothing changes.
    #[instrument(skip(self, batch), fields(entries = batch.len()))]
    pub fn translate(&mut self, batch: &[ConfigEntry]) -> Result<Vec<Intent>> {
        let mut staged = self.state.clone();
        let mut intents = Vec::new();
        let mut params_changed = false;
        let mut region_changed = false;

        for entry in batch {
            match entry.table.as_str() {
                CFG_STP_GLOBAL_TABLE_NAME => {
                    Self::global_entry(entry, &mut staged, &mut intents, &mut params_changed, &mut region_changed)?
                }
                CFG_MSTP_INSTANCE_TABLE_NAME => {
                    Self::instance_entry(entry, &mut staged, &mut intents, &mut region_changed)?
                }
                CFG_STP_PORT_TABLE_NAME => Self::port_entry(entry, &mut staged, &mut intents)?,
                CFG_MSTP_INSTANCE_PORT_TABLE_NAME => Self::instance_port_entry(entry, &mut staged, &mut intents)?,
                other => warn!("Ignoring entry for unknown table {}", other),
            }
        }

        // values the engine would refuse must not reach the cache
        let mut head = Vec::new();
        if params_changed {
            staged.params.validate()?;
            head.push(Intent::SetBridgeParams(staged.params));
        }
        if region_changed {
            let name = staged.region_name.clone().unwrap_or_else(|| self.mac.to_string());
            RegionIdentity::new(name.as_str(), staged.revision, staged.vlan_map.clone())?;
            head.push(Intent::SetRegion {
                name,
                revision: staged.revision,
                vlan_map: staged.vlan_map.clone(),
            });
        }
        head.append(&mut intents);

        self.state = staged;
        debug!("Translated batch into {} intents", head.len());
        Ok(head)
    }

    fn global_entry(
        entry: &ConfigEntry,
        staged: &mut MgrState,
        intents: &mut Vec<Intent>,
        params_changed: &mut bool,
        region_changed: &mut bool,
    ) -> Result<()> {
        if entry.op.is_del() {
            info!("Spanning tree global configuration removed");
            staged.params = BridgeParams::default();
            staged.region_name = None;
            staged.revision = 0;
            staged.vlan_map = VlanMap::new();
            *params_changed = true;
            *region_changed = true;
            intents.push(Intent::SetEnabled(false));
            return Ok(());
        }

        if let Some(enabled) = entry.flag_field(fields::ADMIN_STATUS)? {
            intents.push(Intent::SetEnabled(enabled));
        }

        let mut params = staged.params;
        if let Some(v) = entry.parse_field(fields::HELLO_TIME)? {
            params.hello_time = v;
        }
        if let Some(v) = entry.parse_field(fields::FORWARD_DELAY)? {
            params.forward_delay = v;
        }
        if let Some(v) = entry.parse_field(fields::MAX_AGE)? {
            params.max_age = v;
        }
        if let Some(v) = entry.parse_field(fields::TX_HOLD_COUNT)? {
            params.tx_hold_count = v;
        }
        if let Some(v) = entry.parse_field(fields::MAX_HOP_COUNT)? {
            params.max_hops = v;
        }
        if params != staged.params {
            staged.params = params;
            *params_changed = true;
        }

        if let Some(priority) = entry.parse_field(fields::BRIDGE_PRIORITY)? {
            intents.push(Intent::SetBridgePriority {
                instance: InstanceId::CIST,
                priority,
            });
        }
        if let Some(name) = entry.get_field(fields::CONFIG_NAME) {
            staged.region_name = Some(name.to_string());
            *region_changed = true;
        }
        if let Some(revision) = entry.parse_field(fields::CONFIG_REVISION)? {
            staged.revision = revision;
            *region_changed = true;
        }
        Ok(())
    }

    fn instance_entry(
        entry: &ConfigEntry,
        staged: &mut MgrState,
        intents: &mut Vec<Intent>,
        region_changed: &mut bool,
    ) -> Result<()> {
        let instance = entry
            .key
            .trim()
            .parse::<u16>()
            .ok()
            .and_then(|id| InstanceId::msti(id).ok())
            .ok_or_else(|| entry.invalid("key", &entry.key))?;

        if entry.op.is_del() {
            if staged.vlan_map.remove_instance(instance) {
                info!("Removed MSTI {}", instance);
                *region_changed = true;
            }
            return Ok(());
        }

        if let Some(list) = entry.get_field(fields::VLANS) {
            let vlans = parse_vlan_list(list).map_err(|_| entry.invalid(fields::VLANS, list))?;
            let mut map = staged.vlan_map.clone();
            map.remove_instance(instance);
            if !vlans.is_empty() {
                map.map(instance, vlans)?;
            }
            if map != staged.vlan_map {
                staged.vlan_map = map;
                *region_changed = true;
            }
        }
        if let Some(priority) = entry.parse_field(fields::BRIDGE_PRIORITY)? {
            intents.push(Intent::SetBridgePriority { instance, priority });
        }
        Ok(())
    }

    /// Returns the port number of an interface, assigning the lowest free
    /// number on first sight.
    fn allocate_port(staged: &mut MgrState, alias: &str) -> u16 {
        if let Some(number) = staged.port_numbers.get(alias) {
            return *number;
        }
        let mut number = 1;
        while staged.port_numbers.values().any(|n| *n == number) {
            number += 1;
        }
        debug!("Assigned port number {} to {}", number, alias);
        staged.port_numbers.insert(alias.to_string(), number);
        number
    }

    fn port_entry(entry: &ConfigEntry, staged: &mut MgrState, intents: &mut Vec<Intent>) -> Result<()> {
        let alias = entry.key.as_str();

        if entry.op.is_del() {
            if let Some(port) = staged.port_numbers.remove(alias) {
                staged.port_params.remove(alias);
                staged.instance_port.retain(|(_, name), _| name != alias);
                info!("Removed spanning tree port {}", alias);
                intents.push(Intent::RemovePort { port });
            }
            return Ok(());
        }

        let port = Self::allocate_port(staged, alias);
        let known = staged.port_params.contains_key(alias);
        let current = staged.port_params.get(alias).copied().unwrap_or_default();
        let mut params = current;
        if let Some(v) = entry.parse_field(fields::PORT_PRIORITY)? {
            params.priority = v;
        }
        if let Some(v) = entry.parse_field(fields::PORT_PATH_COST)? {
            params.path_cost = v;
        }
        if let Some(v) = entry.flag_field(fields::ADMIN_EDGE)? {
            params.admin_edge = v;
        }
        if let Some(v) = entry.flag_field(fields::AUTO_EDGE)? {
            params.auto_edge = v;
        }
        if let Some(value) = entry.get_field(fields::LINK_TYPE) {
            params.link_type = LinkType::from_str(value.trim()).map_err(|_| entry.invalid(fields::LINK_TYPE, value))?;
        }
        if let Some(v) = entry.flag_field(fields::BPDU_FILTER)? {
            params.guards.bpdu_filter = v;
        }
        if let Some(v) = entry.flag_field(fields::BPDU_GUARD)? {
            params.guards.bpdu_guard = v;
        }
        if let Some(v) = entry.flag_field(fields::LOOP_GUARD)? {
            params.guards.loop_guard = v;
        }
        if let Some(v) = entry.flag_field(fields::ROOT_GUARD)? {
            params.guards.root_guard = v;
        }

        if !known || params != current {
            params.validate()?;
            staged.port_params.insert(alias.to_string(), params);
            intents.push(Intent::SetPortParams {
                port,
                instance: InstanceId::CIST,
                params,
            });
        }
        if let Some(enabled) = entry.flag_field(fields::PORT_ADMIN_STATUS)? {
            intents.push(Intent::SetPortAdminState { port, enabled });
        }
        if entry.flag_field(fields::CLEAR_GUARD)? == Some(true) {
            intents.push(Intent::ClearGuard { port });
        }
        Ok(())
    }

    fn instance_port_entry(entry: &ConfigEntry, staged: &mut MgrState, intents: &mut Vec<Intent>) -> Result<()> {
        let (instance, alias) = entry
            .key
            .split_once(KEY_SEPARATOR)
            .and_then(|(id, alias)| {
                let instance = InstanceId::msti(id.trim().parse().ok()?).ok()?;
                Some((instance, alias.to_string()))
            })
            .ok_or_else(|| entry.invalid("key", &entry.key))?;

        let port = Self::allocate_port(staged, &alias);
        let base = staged.port_params.get(&alias).copied().unwrap_or_default();
        let slot = (instance, alias);

        let (priority, cost) = if entry.op.is_del() {
            staged.instance_port.remove(&slot);
            (None, None)
        } else {
            let (mut priority, mut cost) = staged.instance_port.get(&slot).copied().unwrap_or((None, None));
            if let Some(v) = entry.parse_field(fields::PORT_PRIORITY)? {
                priority = Some(v);
            }
            if let Some(v) = entry.parse_field(fields::PORT_PATH_COST)? {
                cost = Some(v);
            }
            staged.instance_port.insert(slot, (priority, cost));
            (priority, cost)
        };

        let params = PortParams {
            priority: priority.unwrap_or(base.priority),
            path_cost: cost.unwrap_or(base.path_cost),
            ..base
        };
        params.validate()?;
        intents.push(Intent::SetPortParams { port, instance, params });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_mstp::VlanId;

    fn mac() -> MacAddress {
        MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])
    }

    fn vlan_map(entries: &[(u16, &str)]) -> VlanMap {
        let mut map = VlanMap::new();
        for (id, list) in entries {
            map.map(InstanceId::msti(*id).unwrap(), parse_vlan_list(list).unwrap())
                .unwrap();
        }
        map
    }

    #[test]
    fn test_entry_fields() {
        let entry = ConfigEntry::set(CFG_STP_PORT_TABLE_NAME, "Ethernet0", [("admin_status", "up")]);
        assert!(entry.op.is_set());
        assert_eq!(entry.get_field("admin_status"), Some("up"));
        assert_eq!(entry.get_field("mtu"), None);
        assert!(ConfigEntry::del(CFG_STP_PORT_TABLE_NAME, "Ethernet0").op.is_del());
    }

    #[test]
    fn test_region_fields_collapse_into_one_intent() {
        let mut mgr = MstpMgr::new(mac());
        let batch = vec![
            ConfigEntry::set(
                CFG_STP_GLOBAL_TABLE_NAME,
                "GLOBAL",
                [(fields::CONFIG_NAME, "campus"), (fields::CONFIG_REVISION, "3")],
            ),
            ConfigEntry::set(CFG_MSTP_INSTANCE_TABLE_NAME, "1", [(fields::VLANS, "10-20")]),
            ConfigEntry::set(
                CFG_MSTP_INSTANCE_TABLE_NAME,
                "2",
                [(fields::VLANS, "30"), (fields::BRIDGE_PRIORITY, "4096")],
            ),
        ];

        let intents = mgr.translate(&batch).unwrap();
        assert_eq!(
            intents,
            vec![
                Intent::SetRegion {
                    name: "campus".to_string(),
                    revision: 3,
                    vlan_map: vlan_map(&[(1, "10-20"), (2, "30")]),
                },
                Intent::SetBridgePriority {
                    instance: InstanceId::msti(2).unwrap(),
                    priority: 4096,
                },
            ]
        );

        // same content again changes nothing
        let intents = mgr
            .translate(&[ConfigEntry::set(CFG_MSTP_INSTANCE_TABLE_NAME, "1", [(fields::VLANS, "10-20")])])
            .unwrap();
        assert!(intents.is_empty());
    }

    #[test]
    fn test_region_name_defaults_to_mac() {
        let mut mgr = MstpMgr::new(mac());
        let intents = mgr
            .translate(&[ConfigEntry::set(CFG_MSTP_INSTANCE_TABLE_NAME, "5", [(fields::VLANS, "100")])])
            .unwrap();
        assert_eq!(
            intents,
            vec![Intent::SetRegion {
                name: "00:11:22:33:44:55".to_string(),
                revision: 0,
                vlan_map: vlan_map(&[(5, "100")]),
            }]
        );

        let intents = mgr
            .translate(&[ConfigEntry::del(CFG_MSTP_INSTANCE_TABLE_NAME, "5")])
            .unwrap();
        assert!(matches!(&intents[..], [Intent::SetRegion { vlan_map, .. }] if vlan_map.instances().count() == 0));
    }

    #[test]
    fn test_global_timers_and_admin() {
        let mut mgr = MstpMgr::new(mac());
        let intents = mgr
            .translate(&[ConfigEntry::set(
                CFG_STP_GLOBAL_TABLE_NAME,
                "GLOBAL",
                [
                    (fields::ADMIN_STATUS, "up"),
                    (fields::HELLO_TIME, "1"),
                    (fields::BRIDGE_PRIORITY, "8192"),
                ],
            )])
            .unwrap();
        assert_eq!(
            intents,
            vec![
                Intent::SetBridgeParams(BridgeParams {
                    hello_time: 1,
                    ..BridgeParams::default()
                }),
                Intent::SetEnabled(true),
                Intent::SetBridgePriority {
                    instance: InstanceId::CIST,
                    priority: 8192,
                },
            ]
        );
    }

    #[test]
    fn test_port_numbers_are_allocated_and_reused() {
        let mut mgr = MstpMgr::new(mac());
        let batch = vec![
            ConfigEntry::set(CFG_STP_PORT_TABLE_NAME, "Ethernet0", [(fields::PORT_ADMIN_STATUS, "up")]),
            ConfigEntry::set(CFG_STP_PORT_TABLE_NAME, "Ethernet4", [(fields::PORT_ADMIN_STATUS, "up")]),
        ];
        mgr.translate(&batch).unwrap();
        assert_eq!(mgr.port_number("Ethernet0"), Some(1));
        assert_eq!(mgr.port_number("Ethernet4"), Some(2));

        let intents = mgr
            .translate(&[ConfigEntry::del(CFG_STP_PORT_TABLE_NAME, "Ethernet0")])
            .unwrap();
        assert_eq!(intents, vec![Intent::RemovePort { port: 1 }]);

        mgr.translate(&[ConfigEntry::set(CFG_STP_PORT_TABLE_NAME, "Ethernet8", [(fields::PORT_ADMIN_STATUS, "down")])])
            .unwrap();
        assert_eq!(mgr.port_number("Ethernet8"), Some(1));
        assert_eq!(mgr.port_alias(2), Some("Ethernet4"));
    }

    #[test]
    fn test_port_params() {
        let mut mgr = MstpMgr::new(mac());
        let intents = mgr
            .translate(&[ConfigEntry::set(
                CFG_STP_PORT_TABLE_NAME,
                "Ethernet0",
                [
                    (fields::PORT_PATH_COST, "2000"),
                    (fields::LINK_TYPE, "shared"),
                    (fields::BPDU_GUARD, "true"),
                    (fields::PORT_ADMIN_STATUS, "up"),
                ],
            )])
            .unwrap();
        let mut expected = PortParams {
            path_cost: 2000,
            link_type: LinkType::Shared,
            ..PortParams::default()
        };
        expected.guards.bpdu_guard = true;
        assert_eq!(
            intents,
            vec![
                Intent::SetPortParams {
                    port: 1,
                    instance: InstanceId::CIST,
                    params: expected,
                },
                Intent::SetPortAdminState { port: 1, enabled: true },
            ]
        );

        let intents = mgr
            .translate(&[ConfigEntry::set(CFG_STP_PORT_TABLE_NAME, "Ethernet0", [(fields::CLEAR_GUARD, "true")])])
            .unwrap();
        assert_eq!(intents, vec![Intent::ClearGuard { port: 1 }]);
    }

    #[test]
    fn test_instance_port_overrides() {
        let mut mgr = MstpMgr::new(mac());
        let msti = InstanceId::msti(3).unwrap();
        let intents = mgr
            .translate(&[ConfigEntry::set(
                CFG_MSTP_INSTANCE_PORT_TABLE_NAME,
                "3|Ethernet0",
                [(fields::PORT_PRIORITY, "64")],
            )])
            .unwrap();
        assert_eq!(
            intents,
            vec![Intent::SetPortParams {
                port: 1,
                instance: msti,
                params: PortParams {
                    priority: 64,
                    ..PortParams::default()
                },
            }]
        );

        let intents = mgr
            .translate(&[ConfigEntry::del(CFG_MSTP_INSTANCE_PORT_TABLE_NAME, "3|Ethernet0")])
            .unwrap();
        assert_eq!(
            intents,
            vec![Intent::SetPortParams {
                port: 1,
                instance: msti,
                params: PortParams::default(),
            }]
        );
    }

    #[test]
    fn test_invalid_field_rejects_whole_batch() {
        let mut mgr = MstpMgr::new(mac());
        let batch = vec![
            ConfigEntry::set(CFG_STP_PORT_TABLE_NAME, "Ethernet0", [(fields::PORT_ADMIN_STATUS, "up")]),
            ConfigEntry::set(CFG_STP_PORT_TABLE_NAME, "Ethernet4", [(fields::PORT_PRIORITY, "high")]),
        ];
        let err = mgr.translate(&batch).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid field mstp_port_priority='high' in STP_PORT|Ethernet4"
        );
        assert_eq!(mgr.port_number("Ethernet0"), None);

        let err = mgr
            .translate(&[ConfigEntry::set(CFG_MSTP_INSTANCE_TABLE_NAME, "0", [(fields::VLANS, "10")])])
            .unwrap_err();
        assert!(matches!(err, MstpdError::InvalidField { .. }));
    }

    #[test]
    fn test_rejected_values_are_not_cached() {
        let mut mgr = MstpMgr::new(mac());
        let err = mgr
            .translate(&[ConfigEntry::set(CFG_STP_GLOBAL_TABLE_NAME, "GLOBAL", [(fields::HELLO_TIME, "11")])])
            .unwrap_err();
        assert!(matches!(err, MstpdError::Engine(_)));

        // the next timer change starts from the last accepted values
        let intents = mgr
            .translate(&[ConfigEntry::set(CFG_STP_GLOBAL_TABLE_NAME, "GLOBAL", [(fields::FORWARD_DELAY, "20")])])
            .unwrap();
        assert_eq!(
            intents,
            vec![Intent::SetBridgeParams(BridgeParams {
                forward_delay: 20,
                ..BridgeParams::default()
            })]
        );

        let long_name = "x".repeat(40);
        let err = mgr
            .translate(&[ConfigEntry::set(
                CFG_STP_GLOBAL_TABLE_NAME,
                "GLOBAL",
                [(fields::CONFIG_NAME, long_name.as_str())],
            )])
            .unwrap_err();
        assert!(err.to_string().contains("Config-name string length exceeded (40 > 32)"));

        let intents = mgr
            .translate(&[ConfigEntry::set(CFG_MSTP_INSTANCE_TABLE_NAME, "1", [(fields::VLANS, "10")])])
            .unwrap();
        assert_eq!(
            intents,
            vec![Intent::SetRegion {
                name: "00:11:22:33:44:55".to_string(),
                revision: 0,
                vlan_map: vlan_map(&[(1, "10")]),
            }]
        );

        let mut bridge = Bridge::new(mac(), BridgeParams::default()).unwrap();
        for intent in intents {
            intent.apply(&mut bridge).unwrap();
        }
        assert!(bridge.instance(InstanceId::msti(1).unwrap()).is_some());
    }

    #[test]
    fn test_conflicting_port_guards_are_not_cached() {
        let mut mgr = MstpMgr::new(mac());
        let batch = [ConfigEntry::set(
            CFG_STP_PORT_TABLE_NAME,
            "Ethernet0",
            [(fields::BPDU_GUARD, "true"), (fields::BPDU_FILTER, "true")],
        )];
        assert!(mgr.translate(&batch).is_err());
        assert_eq!(mgr.port_number("Ethernet0"), None);

        let intents = mgr
            .translate(&[ConfigEntry::set(CFG_STP_PORT_TABLE_NAME, "Ethernet0", [(fields::BPDU_GUARD, "true")])])
            .unwrap();
        assert!(matches!(
            &intents[..],
            [Intent::SetPortParams { port: 1, params, .. }] if params.guards.bpdu_guard && !params.guards.bpdu_filter
        ));
    }

    #[test]
    fn test_global_delete_resets_region() {
        let mut mgr = MstpMgr::new(mac());
        mgr.translate(&[
            ConfigEntry::set(
                CFG_STP_GLOBAL_TABLE_NAME,
                "GLOBAL",
                [(fields::CONFIG_NAME, "campus"), (fields::CONFIG_REVISION, "3"), (fields::HELLO_TIME, "1")],
            ),
            ConfigEntry::set(CFG_MSTP_INSTANCE_TABLE_NAME, "1", [(fields::VLANS, "10-20")]),
        ])
        .unwrap();

        let intents = mgr
            .translate(&[ConfigEntry::del(CFG_STP_GLOBAL_TABLE_NAME, "GLOBAL")])
            .unwrap();
        assert_eq!(
            intents,
            vec![
                Intent::SetBridgeParams(BridgeParams::default()),
                Intent::SetRegion {
                    name: "00:11:22:33:44:55".to_string(),
                    revision: 0,
                    vlan_map: VlanMap::new(),
                },
                Intent::SetEnabled(false),
            ]
        );
    }

    #[test]
    fn test_from_config_seeds_ports() {
        let config = MstpdConfig::from_toml(
            r#"
[bridge]
mac = "00:11:22:33:44:55"

[[instance]]
id = 1
vlans = "10"

[[port]]
name = "Ethernet8"
number = 7
"#,
        )
        .unwrap();
        let mut mgr = MstpMgr::from_config(&config).unwrap();
        assert_eq!(mgr.port_number("Ethernet8"), Some(7));

        // unchanged port fields produce no parameter intent
        let intents = mgr
            .translate(&[ConfigEntry::set(CFG_STP_PORT_TABLE_NAME, "Ethernet8", [(fields::PORT_PATH_COST, "20000")])])
            .unwrap();
        assert!(intents.is_empty());

        let intents = mgr
            .translate(&[ConfigEntry::set(CFG_MSTP_INSTANCE_TABLE_NAME, "1", [(fields::VLANS, "10,11")])])
            .unwrap();
        let Intent::SetRegion { vlan_map, .. } = &intents[0] else {
            panic!("expected a region intent");
        };
        assert_eq!(
            vlan_map.instance_of(VlanId::new(11).unwrap()),
            InstanceId::msti(1).unwrap()
        );
    }

    #[test]
    fn test_intents_apply_to_bridge() {
        let mut bridge = Bridge::new(mac(), BridgeParams::default()).unwrap();
        let mut mgr = MstpMgr::new(mac());
        let batch = vec![
            ConfigEntry::set(CFG_MSTP_INSTANCE_TABLE_NAME, "1", [(fields::VLANS, "10-20")]),
            ConfigEntry::set(CFG_STP_PORT_TABLE_NAME, "Ethernet0", [(fields::PORT_ADMIN_STATUS, "up")]),
        ];
        for intent in mgr.translate(&batch).unwrap() {
            intent.apply(&mut bridge).unwrap();
        }
        assert_eq!(bridge.instance_ids().len(), 2);
        assert_eq!(bridge.port_numbers(), vec![1]);
        assert_eq!(bridge.query_region().instances.get(&1).map(String::as_str), Some("10-20"));
    }
}
