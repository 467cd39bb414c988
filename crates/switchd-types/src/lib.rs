//! Common network primitive types for the switchd control plane.
//!
//! This crate provides type-safe representations of the primitives shared
//! by every switchd daemon:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers (1-4094)
//! - [`AdminState`] / [`OperState`]: port administrative and operational state

mod mac;
mod port;
mod vlan;

pub use mac::MacAddress;
pub use port::{AdminState, OperState};
pub use vlan::{VlanId, VLAN_PREFIX};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(String),

    #[error("invalid VLAN name: {0} (expected Vlan<id>)")]
    InvalidVlanName(String),

    #[error("invalid port state: {0}")]
    InvalidPortState(String),
}
