//! VXLAN orchestration types.

use std::net::IpAddr;
use switchd_orch_common::HasRefCount;
use switchd_types::VlanId;

/// VXLAN network identifier.
pub type Vni = u32;

/// Largest valid VNI (24-bit space, top value reserved).
pub const MAX_VNI: Vni = 16_777_214;

/// A tunnel endpoint, reference-counted by its dependent mappings.
#[derive(Debug, Clone)]
pub struct VxlanTunnelEntry {
    pub name: String,
    pub src_ip: Option<IpAddr>,
    refs: u32,
}

impl VxlanTunnelEntry {
    pub fn new(name: impl Into<String>, src_ip: Option<IpAddr>) -> Self {
        Self {
            name: name.into(),
            src_ip,
            refs: 0,
        }
    }

    /// A tunnel is active once its source IP is resolved.
    pub fn is_active(&self) -> bool {
        self.src_ip.is_some()
    }
}

impl HasRefCount for VxlanTunnelEntry {
    fn increment_ref(&mut self) -> u32 {
        self.refs += 1;
        self.refs
    }

    fn decrement_ref(&mut self) -> Option<u32> {
        self.refs = self.refs.checked_sub(1)?;
        Some(self.refs)
    }

    fn ref_count(&self) -> u32 {
        self.refs
    }
}

/// A VNI-to-VLAN bridging device on top of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VxlanMapEntry {
    pub tunnel: String,
    pub vlan: VlanId,
    pub vni: Vni,
    /// Kernel net-device name, e.g. `tun1-100`.
    pub device: String,
}

/// The single allowed network-virtualization-overlay binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvoEntry {
    pub name: String,
    pub tunnel: String,
}

/// An L3 tunnel endpoint wrapper binding tunnel + VNI + VRF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnetEntry {
    pub name: String,
    pub tunnel: String,
    pub vni: Vni,
    pub vrf: Option<String>,
}

/// VXLAN orchestrator statistics.
#[derive(Debug, Clone, Default)]
pub struct VxlanOrchStats {
    pub tunnels_created: u64,
    pub tunnels_removed: u64,
    pub maps_created: u64,
    pub maps_removed: u64,
    pub vnets_created: u64,
    pub vnets_removed: u64,
    pub stale_reconciled: u64,
    pub retries: u64,
    pub errors: u64,
}
