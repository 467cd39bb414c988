//! Table names and key separators shared across orchestrators.
//!
//! Separators are a compatibility surface with the store schema: most
//! app-layer composite keys use a colon, nested config keys use a pipe.

/// App-layer VLAN table (key: `Vlan100`).
pub const APP_VLAN_TABLE: &str = "VLAN_TABLE";

/// App-layer VLAN member table (key: `Vlan100:Ethernet0`).
pub const APP_VLAN_MEMBER_TABLE: &str = "VLAN_MEMBER_TABLE";

/// App-layer neighbor table (key: `Vlan100:10.0.0.5`).
pub const APP_NEIGH_TABLE: &str = "NEIGH_TABLE";

/// VXLAN tunnel config table (key: tunnel name).
pub const VXLAN_TUNNEL_TABLE: &str = "VXLAN_TUNNEL_TABLE";

/// VXLAN tunnel map config table (key: `tun1|Vlan100`).
pub const VXLAN_TUNNEL_MAP_TABLE: &str = "VXLAN_TUNNEL_MAP_TABLE";

/// EVPN network-virtualization-overlay table (key: NVO name).
pub const VXLAN_EVPN_NVO_TABLE: &str = "VXLAN_EVPN_NVO_TABLE";

/// VNET config table (key: VNET name).
pub const VNET_TABLE: &str = "VNET_TABLE";

/// MACsec profile config table (key: profile name).
pub const MACSEC_PROFILE_TABLE: &str = "MACSEC_PROFILE_TABLE";

/// MACsec port binding table (key: port alias).
pub const MACSEC_PORT_TABLE: &str = "MACSEC_PORT_TABLE";

/// Control-plane policing table (key: trap group name).
pub const COPP_TABLE: &str = "COPP_TABLE";

/// Debug counter config table (key: counter name).
pub const DEBUG_COUNTER_TABLE: &str = "DEBUG_COUNTER_TABLE";

/// Debug counter drop reason table (key: `counter|reason`).
pub const DEBUG_COUNTER_DROP_REASON_TABLE: &str = "DEBUG_COUNTER_DROP_REASON_TABLE";

/// State-layer port table; a key present here means the port is ready.
pub const STATE_PORT_TABLE: &str = "PORT_TABLE";

/// State-layer switch table carrying the system MAC (key: `switch`).
pub const STATE_SWITCH_TABLE: &str = "SWITCH_TABLE";

/// State-layer VLAN table; a key present here means the VLAN is ready.
pub const STATE_VLAN_TABLE: &str = "VLAN_TABLE";

/// State-layer VLAN member table.
pub const STATE_VLAN_MEMBER_TABLE: &str = "VLAN_MEMBER_TABLE";

/// State-layer neighbor table.
pub const STATE_NEIGH_TABLE: &str = "NEIGH_TABLE";

/// State-layer MACsec port table.
pub const STATE_MACSEC_PORT_TABLE: &str = "MACSEC_PORT_TABLE";

/// State-layer VXLAN tunnel table.
pub const STATE_VXLAN_TUNNEL_TABLE: &str = "VXLAN_TUNNEL_TABLE";

/// VLAN-to-VXLAN-device mapping published for neighbor suppression
/// (key: `Vlan100`, field `device`).
pub const VXLAN_VLAN_DEVICE_MAP_TABLE: &str = "VXLAN_VLAN_DEVICE_MAP_TABLE";

/// ASIC-facing neighbor table consumed by the syncing process.
pub const ASIC_NEIGH_TABLE: &str = "ASIC_NEIGH_TABLE";

/// ASIC-facing host-interface trap table.
pub const ASIC_TRAP_TABLE: &str = "ASIC_HOSTIF_TRAP_TABLE";

/// ASIC-facing trap group table.
pub const ASIC_TRAP_GROUP_TABLE: &str = "ASIC_HOSTIF_TRAP_GROUP_TABLE";

/// ASIC-facing policer table.
pub const ASIC_POLICER_TABLE: &str = "ASIC_POLICER_TABLE";

/// ASIC-facing host-interface channel table.
pub const ASIC_HOSTIF_TABLE: &str = "ASIC_HOSTIF_TABLE";

/// ASIC-facing debug counter table.
pub const ASIC_DEBUG_COUNTER_TABLE: &str = "ASIC_DEBUG_COUNTER_TABLE";

/// Port alias to ASIC handle map, published by the port syncing path.
pub const COUNTERS_PORT_NAME_MAP: &str = "COUNTERS_PORT_NAME_MAP";

/// Flex counter binding table in the counter database
/// (key: `GROUP:0x<vid>`).
pub const FLEX_COUNTER_TABLE: &str = "FLEX_COUNTER_TABLE";

/// Flex counter group configuration table (key: group name).
pub const FLEX_COUNTER_GROUP_TABLE: &str = "FLEX_COUNTER_GROUP_TABLE";

/// Virtual-to-real object id translation table, filled asynchronously by
/// the ASIC syncing process (key: `0x<vid>`, field `rid`).
pub const VID_TO_RID_TABLE: &str = "VIDTORID";

/// Composite-key separator for app-layer tables.
pub const APP_KEY_SEPARATOR: char = ':';

/// Composite-key separator for nested config keys.
pub const CONFIG_KEY_SEPARATOR: char = '|';

/// Field names shared across tables.
pub mod fields {
    pub const ADMIN_STATUS: &str = "admin_status";
    pub const OPER_STATUS: &str = "oper_status";
    pub const MTU: &str = "mtu";
    pub const MAC: &str = "mac";
    pub const TAGGING_MODE: &str = "tagging_mode";
    pub const SRC_IP: &str = "src_ip";
    pub const VNI: &str = "vni";
    pub const SOURCE_VTEP: &str = "source_vtep";
    pub const VXLAN_TUNNEL: &str = "vxlan_tunnel";
    pub const VRF: &str = "vrf";
    pub const NEIGH: &str = "neigh";
    pub const PROFILE: &str = "profile";
    pub const TRAP_IDS: &str = "trap_ids";
    pub const TRAP_ACTION: &str = "trap_action";
    pub const TRAP_PRIORITY: &str = "trap_priority";
    pub const QUEUE: &str = "queue";
    pub const METER_TYPE: &str = "meter_type";
    pub const MODE: &str = "mode";
    pub const CIR: &str = "cir";
    pub const CBS: &str = "cbs";
    pub const GENETLINK_NAME: &str = "genetlink_name";
    pub const GENETLINK_MCGRP_NAME: &str = "genetlink_mcgrp_name";
    pub const COUNTER_TYPE: &str = "type";
    pub const DEVICE: &str = "device";
    pub const STATE: &str = "state";
    pub const RID: &str = "rid";
}
