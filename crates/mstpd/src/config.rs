//! Configuration file support for mstpd
//!
//! Loads and validates the daemon configuration from TOML files.
//! Default location: /etc/sonic/mstpd.conf

use crate::error::{MstpdError, Result};
use serde::{Deserialize, Serialize};
use sonic_mstp::{
    parse_vlan_list, region::validate_config_name, Bridge, BridgeId, BridgeParams, InstanceId, LinkType, MacAddress,
    PortGuards, PortParams, VlanMap,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/mstpd.conf";

/// Daemon runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Length of one protocol tick in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Depth of the bridge worker command queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

/// Bridge identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge MAC address; also the default region name
    #[serde(default = "default_mac")]
    pub mac: MacAddress,

    /// Global spanning tree admin state
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// CIST bridge priority
    #[serde(default = "default_priority")]
    pub priority: u16,
}

/// MST region identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Region name; the bridge MAC text when absent
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub revision: u16,
}

/// One MSTI and its VLANs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: u16,

    /// VLAN list such as "10-20,30"
    pub vlans: String,

    #[serde(default)]
    pub priority: Option<u16>,
}

/// One physical port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Interface name, e.g. "Ethernet0"
    pub name: String,

    /// Port number used in port identifiers
    pub number: u16,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub path_cost: Option<u32>,

    #[serde(default)]
    pub priority: Option<u8>,

    #[serde(default)]
    pub admin_edge: bool,

    #[serde(default = "default_enabled")]
    pub auto_edge: bool,

    #[serde(default)]
    pub link_type: LinkType,

    #[serde(default)]
    pub root_guard: bool,

    #[serde(default)]
    pub loop_guard: bool,

    #[serde(default)]
    pub bpdu_guard: bool,

    #[serde(default)]
    pub bpdu_filter: bool,
}

impl PortConfig {
    pub fn params(&self) -> PortParams {
        let defaults = PortParams::default();
        PortParams {
            path_cost: self.path_cost.unwrap_or(defaults.path_cost),
            priority: self.priority.unwrap_or(defaults.priority),
            admin_edge: self.admin_edge,
            auto_edge: self.auto_edge,
            link_type: self.link_type,
            guards: PortGuards {
                root_guard: self.root_guard,
                loop_guard: self.loop_guard,
                bpdu_guard: self.bpdu_guard,
                bpdu_filter: self.bpdu_filter,
            },
        }
    }
}

/// Complete mstpd configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MstpdConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Protocol timers
    #[serde(default)]
    pub timers: BridgeParams,

    #[serde(default)]
    pub region: RegionConfig,

    #[serde(default, rename = "instance")]
    pub instances: Vec<InstanceConfig>,

    #[serde(default, rename = "port")]
    pub ports: Vec<PortConfig>,
}

// Default functions
fn default_tick_ms() -> u64 {
    1000
}

fn default_queue_depth() -> usize {
    1024
}

fn default_mac() -> MacAddress {
    MacAddress::ZERO
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> u16 {
    BridgeId::DEFAULT_PRIORITY
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mac: default_mac(),
            enabled: default_enabled(),
            priority: default_priority(),
        }
    }
}

impl Default for MstpdConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            bridge: BridgeConfig::default(),
            timers: BridgeParams::default(),
            region: RegionConfig::default(),
            instances: Vec::new(),
            ports: Vec::new(),
        }
    }
}

impl MstpdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| {
                MstpdError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(MstpdError::Io(e)),
        }
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MstpdError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.tick_ms)
    }

    /// Region name in effect.
    pub fn region_name(&self) -> String {
        self.region
            .name
            .clone()
            .unwrap_or_else(|| self.bridge.mac.to_string())
    }

    /// VLAN map described by the `[[instance]]` tables.
    pub fn vlan_map(&self) -> Result<VlanMap> {
        let mut map = VlanMap::new();
        for instance in &self.instances {
            let id = InstanceId::msti(instance.id)?;
            map.map(id, parse_vlan_list(&instance.vlans)?)?;
        }
        Ok(map)
    }

    /// Interface name to port number.
    pub fn port_index(&self) -> BTreeMap<String, u16> {
        self.ports.iter().map(|p| (p.name.clone(), p.number)).collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.daemon.tick_ms == 0 {
            return Err(MstpdError::Config("tick_ms must be > 0".to_string()));
        }
        if self.daemon.queue_depth == 0 {
            return Err(MstpdError::Config("queue_depth must be > 0".to_string()));
        }
        if self.bridge.mac == MacAddress::ZERO {
            return Err(MstpdError::Config("bridge.mac must be configured".to_string()));
        }
        BridgeId::validate_priority(self.bridge.priority)?;
        self.timers.validate()?;
        validate_config_name(&self.region_name())?;
        self.vlan_map()?;
        for instance in &self.instances {
            if let Some(priority) = instance.priority {
                BridgeId::validate_priority(priority)?;
            }
        }

        let mut names = BTreeSet::new();
        let mut numbers = BTreeSet::new();
        for port in &self.ports {
            if !names.insert(port.name.as_str()) {
                return Err(MstpdError::Config(format!("port {} configured twice", port.name)));
            }
            if !numbers.insert(port.number) {
                return Err(MstpdError::Config(format!("port number {} used twice", port.number)));
            }
            port.params().validate()?;
        }
        Ok(())
    }

    /// Builds a bridge with this configuration applied.
    pub fn build_bridge(&self) -> Result<Bridge> {
        self.validate()?;
        let mut bridge = Bridge::new(self.bridge.mac, self.timers)?;
        bridge.set_bridge_priority(InstanceId::CIST, self.bridge.priority)?;
        bridge.set_region_identity(&self.region_name(), self.region.revision, self.vlan_map()?)?;
        for instance in &self.instances {
            if let Some(priority) = instance.priority {
                bridge.set_bridge_priority(InstanceId::msti(instance.id)?, priority)?;
            }
        }
        for port in &self.ports {
            bridge.set_port_params(port.number, InstanceId::CIST, port.params())?;
            bridge.set_port_admin_state(port.number, port.enabled)?;
        }
        bridge.set_enabled(self.bridge.enabled)?;
        info!(
            mac = %self.bridge.mac,
            ports = self.ports.len(),
            instances = self.instances.len(),
            "bridge configured"
        );
        Ok(bridge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[daemon]
tick_ms = 250

[bridge]
mac = "00:11:22:33:44:55"
priority = 4096

[timers]
hello_time = 1
forward_delay = 10

[region]
name = "campus"
revision = 7

[[instance]]
id = 1
vlans = "10-20,30"
priority = 8192

[[port]]
name = "Ethernet0"
number = 1
link_type = "shared"

[[port]]
name = "Ethernet4"
number = 2
admin_edge = true
bpdu_guard = true
"#;

    #[test]
    fn test_default_config() {
        let config = MstpdConfig::default();
        assert_eq!(config.daemon.tick_ms, 1000);
        assert_eq!(config.daemon.queue_depth, 1024);
        assert!(config.bridge.enabled);
        assert_eq!(config.bridge.priority, 32768);
        assert_eq!(config.timers, BridgeParams::default());
        // a bridge MAC is mandatory
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_sample() {
        let config = MstpdConfig::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.timers.hello_time, 1);
        assert_eq!(config.timers.max_age, 20);
        assert_eq!(config.region_name(), "campus");
        assert_eq!(config.ports[0].params().link_type, LinkType::Shared);
        assert!(config.ports[1].params().guards.bpdu_guard);
        assert_eq!(config.port_index().get("Ethernet4"), Some(&2));

        let map = config.vlan_map().unwrap();
        assert_eq!(map.vlans(InstanceId::msti(1).unwrap()).map(|v| v.len()), Some(12));
    }

    #[test]
    fn test_region_name_defaults_to_mac() {
        let mut config = MstpdConfig::default();
        config.bridge.mac = "00:aa:bb:cc:dd:ee".parse().unwrap();
        assert_eq!(config.region_name(), "00:aa:bb:cc:dd:ee");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = MstpdConfig::from_toml(SAMPLE).unwrap();
        config.timers.max_age = 40;
        assert!(config.validate().is_err());

        let mut config = MstpdConfig::from_toml(SAMPLE).unwrap();
        config.instances.push(InstanceConfig {
            id: 2,
            vlans: "30".to_string(),
            priority: None,
        });
        assert!(matches!(config.validate(), Err(MstpdError::Engine(_))));

        let mut config = MstpdConfig::from_toml(SAMPLE).unwrap();
        config.ports[1].number = 1;
        assert!(matches!(config.validate(), Err(MstpdError::Config(_))));

        let mut config = MstpdConfig::from_toml(SAMPLE).unwrap();
        config.ports[1].bpdu_filter = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = MstpdConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.bridge.priority, 4096);

        let dir = tempfile::tempdir().unwrap();
        let config = MstpdConfig::load_or_default(dir.path().join("absent.conf")).unwrap();
        assert_eq!(config, MstpdConfig::default());
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[bridge\nmac = ").unwrap();
        let err = MstpdConfig::load_or_default(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_save_and_reload() {
        let config = MstpdConfig::from_toml(SAMPLE).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mstpd.conf");
        config.save(&path).unwrap();
        assert_eq!(MstpdConfig::load_or_default(&path).unwrap(), config);
    }

    #[test]
    fn test_build_bridge() {
        let config = MstpdConfig::from_toml(SAMPLE).unwrap();
        let bridge = config.build_bridge().unwrap();
        assert_eq!(bridge.region().name(), "campus");
        assert_eq!(bridge.instance_ids().len(), 2);
        assert_eq!(bridge.port_numbers(), vec![1, 2]);
        assert_eq!(bridge.bridge_id(InstanceId::CIST).base_priority(), 4096);
    }
}
