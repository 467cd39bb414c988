//! VLAN orchestration types.

use std::collections::HashMap;
use std::str::FromStr;
use switchd_types::{MacAddress, VlanId};

/// Bridge membership tagging mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggingMode {
    Tagged,
    Untagged,
}

impl TaggingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaggingMode::Tagged => "tagged",
            TaggingMode::Untagged => "untagged",
        }
    }

    /// Returns the bridge command flag suffix for this mode.
    pub fn bridge_flags(&self) -> &'static str {
        match self {
            TaggingMode::Tagged => "",
            TaggingMode::Untagged => "untagged pvid",
        }
    }
}

impl FromStr for TaggingMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tagged" => Ok(TaggingMode::Tagged),
            "untagged" => Ok(TaggingMode::Untagged),
            _ => Err(()),
        }
    }
}

/// Cached state for one active VLAN.
#[derive(Debug, Clone)]
pub struct VlanEntry {
    pub vlan: VlanId,
    pub mac: MacAddress,
    pub admin_status: Option<String>,
    pub mtu: Option<u32>,
    /// port alias -> tagging mode
    pub members: HashMap<String, TaggingMode>,
}

impl VlanEntry {
    pub fn new(vlan: VlanId, mac: MacAddress) -> Self {
        Self {
            vlan,
            mac,
            admin_status: None,
            mtu: None,
            members: HashMap::new(),
        }
    }
}

/// VLAN orchestrator statistics.
#[derive(Debug, Clone, Default)]
pub struct VlanOrchStats {
    pub vlans_created: u64,
    pub vlans_removed: u64,
    pub members_added: u64,
    pub members_removed: u64,
    pub retries: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagging_mode_parse() {
        assert_eq!("tagged".parse::<TaggingMode>(), Ok(TaggingMode::Tagged));
        assert_eq!("untagged".parse::<TaggingMode>(), Ok(TaggingMode::Untagged));
        assert!("priority".parse::<TaggingMode>().is_err());
    }

    #[test]
    fn test_bridge_flags() {
        assert_eq!(TaggingMode::Tagged.bridge_flags(), "");
        assert_eq!(TaggingMode::Untagged.bridge_flags(), "untagged pvid");
    }
}
