//! IEEE 802.1Q VLAN identifier type.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Interface-name prefix for VLAN host interfaces ("Vlan100").
pub const VLAN_PREFIX: &str = "Vlan";

/// A validated IEEE 802.1Q VLAN identifier (1-4094).
///
/// VLAN 0 (priority tagging) and 4095 (reserved) are rejected at
/// construction, so a `VlanId` held anywhere in the control plane is
/// always usable as a bridge VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    /// Creates a VLAN ID, rejecting values outside 1-4094.
    pub fn new(id: u16) -> Result<Self, ParseError> {
        if (1..=4094).contains(&id) {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id.to_string()))
        }
    }

    /// Returns the raw VLAN ID value.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Parses a VLAN interface name like `Vlan100`.
    pub fn from_interface_name(name: &str) -> Result<Self, ParseError> {
        let id = name
            .strip_prefix(VLAN_PREFIX)
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| ParseError::InvalidVlanName(name.to_string()))?;
        VlanId::new(id)
    }

    /// Returns the VLAN interface name, e.g. `Vlan100`.
    pub fn interface_name(&self) -> String {
        format!("{}{}", VLAN_PREFIX, self.0)
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u16 = s
            .parse()
            .map_err(|_| ParseError::InvalidVlanId(s.to_string()))?;
        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(id: VlanId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_valid_range() {
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(4094).is_ok());
        assert!(VlanId::new(0).is_err());
        assert!(VlanId::new(4095).is_err());
    }

    #[test]
    fn test_interface_name_round_trip() {
        let vlan = VlanId::from_interface_name("Vlan100").unwrap();
        assert_eq!(vlan.as_u16(), 100);
        assert_eq!(vlan.interface_name(), "Vlan100");

        assert!(VlanId::from_interface_name("Vlan0").is_err());
        assert!(VlanId::from_interface_name("vlan100").is_err());
        assert!(VlanId::from_interface_name("Ethernet0").is_err());
    }

    #[test]
    fn test_from_str() {
        assert_eq!("200".parse::<VlanId>().unwrap().as_u16(), 200);
        assert!("40950".parse::<VlanId>().is_err());
        assert!("abc".parse::<VlanId>().is_err());
    }
}
