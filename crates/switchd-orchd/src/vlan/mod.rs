//! VlanOrch - VLAN and VLAN-member reconciliation.
//!
//! Translates VLAN table entries into kernel bridge state and publishes
//! per-VLAN readiness consumed by the VXLAN mapping orchestrator.

mod orch;
mod types;

pub use orch::VlanOrch;
pub use types::{TaggingMode, VlanEntry, VlanOrchStats};
