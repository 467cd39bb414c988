//! VxlanOrch - VXLAN tunnel and VNI mapping reconciliation.
//!
//! Maintains reference-counted tunnels, VNI-to-VLAN bridging devices built
//! on top of them, the single allowed NVO binding, and VNET wrappers.
//! Supports warm-restart reconciliation against already-existing kernel
//! devices and previously-published mapping rows.

mod orch;
mod types;

pub use orch::VxlanOrch;
pub use types::{NvoEntry, VnetEntry, Vni, VxlanMapEntry, VxlanOrchStats, VxlanTunnelEntry, MAX_VNI};
