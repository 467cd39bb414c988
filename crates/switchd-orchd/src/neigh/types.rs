//! Neighbor orchestration types.

use std::fmt;
use std::net::IpAddr;
use switchd_asic::NeighborEntryOid;
use switchd_types::MacAddress;

/// Identity of a neighbor: owning interface plus IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NeighborKey {
    pub interface: String,
    pub ip: IpAddr,
}

impl NeighborKey {
    pub fn new(interface: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            interface: interface.into(),
            ip,
        }
    }
}

impl fmt::Display for NeighborKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.interface, self.ip)
    }
}

/// A programmed neighbor entry.
#[derive(Debug, Clone)]
pub struct NeighborEntry {
    pub key: NeighborKey,
    pub mac: MacAddress,
    pub oid: NeighborEntryOid,
}

/// Neighbor orchestrator statistics.
#[derive(Debug, Clone, Default)]
pub struct NeighOrchStats {
    pub neighbors_added: u64,
    pub neighbors_updated: u64,
    pub neighbors_removed: u64,
    pub retries: u64,
    pub errors: u64,
}
