//! Table name constants for mstpd

/// CONFIG_DB global spanning tree table, single key `GLOBAL`
pub const CFG_STP_GLOBAL_TABLE_NAME: &str = "STP_GLOBAL";

/// CONFIG_DB MSTI table, keyed by instance id
pub const CFG_MSTP_INSTANCE_TABLE_NAME: &str = "MSTP_INSTANCE";

/// CONFIG_DB per-port spanning tree table, keyed by interface name
pub const CFG_STP_PORT_TABLE_NAME: &str = "STP_PORT";

/// CONFIG_DB per-instance port table, keyed by `<instance>|<interface>`
pub const CFG_MSTP_INSTANCE_PORT_TABLE_NAME: &str = "MSTP_INSTANCE_PORT";

/// Key of the only STP_GLOBAL entry
pub const GLOBAL_KEY: &str = "GLOBAL";

/// Separator inside composite keys
pub const KEY_SEPARATOR: char = '|';

/// Field names
pub mod fields {
    /// Global admin state, "up" or "down"
    pub const ADMIN_STATUS: &str = "mstp_admin_status";

    pub const HELLO_TIME: &str = "mstp_hello_time";
    pub const FORWARD_DELAY: &str = "mstp_forward_delay";
    pub const MAX_AGE: &str = "mstp_max_age";
    pub const TX_HOLD_COUNT: &str = "mstp_tx_hold_count";
    pub const MAX_HOP_COUNT: &str = "mstp_maximum_hop_count";

    /// Bridge priority; CIST in STP_GLOBAL, MSTI in MSTP_INSTANCE
    pub const BRIDGE_PRIORITY: &str = "mstp_priority";

    pub const CONFIG_NAME: &str = "mstp_config_name";
    pub const CONFIG_REVISION: &str = "mstp_config_revision";

    /// VLAN list of an instance, e.g. "10-20,30"
    pub const VLANS: &str = "mstp_vlans";

    /// Port admin state, "up" or "down"
    pub const PORT_ADMIN_STATUS: &str = "admin_status";

    pub const PORT_PRIORITY: &str = "mstp_port_priority";
    pub const PORT_PATH_COST: &str = "mstp_admin_path_cost";
    pub const ADMIN_EDGE: &str = "admin_edge_port";
    pub const AUTO_EDGE: &str = "auto_edge_port";
    pub const LINK_TYPE: &str = "link_type";
    pub const BPDU_FILTER: &str = "bpdu-filter";
    pub const BPDU_GUARD: &str = "bpdu-guard";
    pub const LOOP_GUARD: &str = "loop-guard";
    pub const ROOT_GUARD: &str = "root-guard";

    /// Write-only trigger on STP_PORT that clears a guard violation
    pub const CLEAR_GUARD: &str = "clear_guard";
}
