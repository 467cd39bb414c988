//! Shell command builders for VLAN and VXLAN device operations.

use super::shell::{self, shellquote};
use std::net::IpAddr;
use switchd_types::VlanId;

/// Dot1Q bridge name.
pub const DOT1Q_BRIDGE_NAME: &str = "Bridge";

/// Default VXLAN UDP destination port.
pub const VXLAN_DST_PORT: u16 = 4789;

/// Builds the VLAN host interface creation command.
///
/// Registers the VLAN on the bridge and creates the `Vlan<id>` netdev
/// carrying the system MAC.
pub fn build_add_vlan_cmd(vlan: VlanId, mac: &str) -> String {
    format!(
        "{} vlan add vid {} dev {} self && {} link add link {} up name {} address {} type vlan id {}",
        shell::BRIDGE_CMD,
        vlan,
        DOT1Q_BRIDGE_NAME,
        shell::IP_CMD,
        DOT1Q_BRIDGE_NAME,
        vlan.interface_name(),
        shellquote(mac),
        vlan,
    )
}

/// Builds the VLAN host interface removal command.
pub fn build_remove_vlan_cmd(vlan: VlanId) -> String {
    format!(
        "{} link del {} && {} vlan del vid {} dev {} self",
        shell::IP_CMD,
        vlan.interface_name(),
        shell::BRIDGE_CMD,
        vlan,
        DOT1Q_BRIDGE_NAME,
    )
}

/// Builds the VLAN admin state command.
pub fn build_set_vlan_admin_cmd(vlan: VlanId, admin_status: &str) -> String {
    format!(
        "{} link set {} {}",
        shell::IP_CMD,
        vlan.interface_name(),
        shellquote(admin_status),
    )
}

/// Builds the VLAN MTU command.
pub fn build_set_vlan_mtu_cmd(vlan: VlanId, mtu: u32) -> String {
    format!(
        "{} link set {} mtu {}",
        shell::IP_CMD,
        vlan.interface_name(),
        mtu,
    )
}

/// Builds the VLAN member attach command.
///
/// `tagging_flags` is the already-resolved bridge flag suffix
/// ("" for tagged, "untagged pvid" for untagged membership).
pub fn build_add_vlan_member_cmd(vlan: VlanId, port_alias: &str, tagging_flags: &str) -> String {
    let mut cmd = format!(
        "{} vlan add vid {} dev {}",
        shell::BRIDGE_CMD,
        vlan,
        shellquote(port_alias),
    );
    if !tagging_flags.is_empty() {
        cmd.push(' ');
        cmd.push_str(tagging_flags);
    }
    cmd
}

/// Builds the VLAN member detach command.
pub fn build_remove_vlan_member_cmd(vlan: VlanId, port_alias: &str) -> String {
    format!(
        "{} vlan del vid {} dev {}",
        shell::BRIDGE_CMD,
        vlan,
        shellquote(port_alias),
    )
}

/// Builds the VXLAN mapping device creation command.
///
/// The device bridges one VNI to one VLAN on top of a tunnel source IP.
pub fn build_add_vxlan_device_cmd(device: &str, vni: u32, src_ip: IpAddr) -> String {
    format!(
        "{} link add {} type vxlan id {} local {} dstport {} nolearning",
        shell::IP_CMD,
        shellquote(device),
        vni,
        src_ip,
        VXLAN_DST_PORT,
    )
}

/// Builds the command attaching a VXLAN device to the bridge VLAN.
pub fn build_attach_vxlan_device_cmd(device: &str, vlan: VlanId) -> String {
    format!(
        "{} link set {} master {} && {} vlan add vid {} dev {} untagged pvid && {} link set {} up",
        shell::IP_CMD,
        shellquote(device),
        DOT1Q_BRIDGE_NAME,
        shell::BRIDGE_CMD,
        vlan,
        shellquote(device),
        shell::IP_CMD,
        shellquote(device),
    )
}

/// Builds the net-device removal command.
pub fn build_del_device_cmd(device: &str) -> String {
    format!("{} link del {}", shell::IP_CMD, shellquote(device))
}

/// Builds the command listing VXLAN device names, one per line.
pub fn build_list_vxlan_devices_cmd() -> String {
    format!(
        "{} -o link show type vxlan | awk -F': ' '{{print $2}}'",
        shell::IP_CMD,
    )
}

/// Returns the kernel device name for a tunnel-to-VLAN mapping.
pub fn vxlan_device_name(tunnel: &str, vlan: VlanId) -> String {
    format!("{}-{}", tunnel, vlan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vlan(id: u16) -> VlanId {
        VlanId::new(id).unwrap()
    }

    #[test]
    fn test_build_add_vlan_cmd() {
        let cmd = build_add_vlan_cmd(vlan(100), "52:54:00:00:00:01");
        assert!(cmd.contains("bridge vlan add vid 100 dev Bridge self"));
        assert!(cmd.contains("name Vlan100"));
        assert!(cmd.contains("\"52:54:00:00:00:01\""));
        assert!(cmd.contains("type vlan id 100"));
    }

    #[test]
    fn test_build_remove_vlan_cmd() {
        let cmd = build_remove_vlan_cmd(vlan(100));
        assert!(cmd.contains("ip link del Vlan100"));
        assert!(cmd.contains("bridge vlan del vid 100"));
    }

    #[test]
    fn test_build_vlan_member_cmds() {
        let tagged = build_add_vlan_member_cmd(vlan(100), "Ethernet0", "");
        assert_eq!(tagged, "/sbin/bridge vlan add vid 100 dev \"Ethernet0\"");

        let untagged = build_add_vlan_member_cmd(vlan(100), "Ethernet0", "untagged pvid");
        assert!(untagged.ends_with("untagged pvid"));

        let del = build_remove_vlan_member_cmd(vlan(100), "Ethernet0");
        assert_eq!(del, "/sbin/bridge vlan del vid 100 dev \"Ethernet0\"");
    }

    #[test]
    fn test_build_vxlan_device_cmds() {
        let src: IpAddr = "10.0.0.1".parse().unwrap();
        let cmd = build_add_vxlan_device_cmd("tun1-100", 5000, src);
        assert!(cmd.contains("type vxlan id 5000"));
        assert!(cmd.contains("local 10.0.0.1"));
        assert!(cmd.contains("dstport 4789"));
        assert!(cmd.contains("nolearning"));

        let attach = build_attach_vxlan_device_cmd("tun1-100", vlan(100));
        assert!(attach.contains("master Bridge"));
        assert!(attach.contains("vlan add vid 100"));
        assert!(attach.contains("untagged pvid"));
    }

    #[test]
    fn test_vxlan_device_name() {
        assert_eq!(vxlan_device_name("tun1", vlan(100)), "tun1-100");
    }

    #[test]
    fn test_user_tokens_are_quoted() {
        let cmd = build_del_device_cmd("tun1;rm -rf /");
        assert!(cmd.contains("\"tun1;rm -rf /\""));
    }
}
