//! Debug counter types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use switchd_asic::DebugCounterOid;

/// What a debug counter counts and where it is scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugCounterType {
    PortIngressDrops,
    PortEgressDrops,
    SwitchIngressDrops,
    SwitchEgressDrops,
}

impl DebugCounterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebugCounterType::PortIngressDrops => "PORT_INGRESS_DROPS",
            DebugCounterType::PortEgressDrops => "PORT_EGRESS_DROPS",
            DebugCounterType::SwitchIngressDrops => "SWITCH_INGRESS_DROPS",
            DebugCounterType::SwitchEgressDrops => "SWITCH_EGRESS_DROPS",
        }
    }

    /// Returns true for counters installed per port.
    pub fn is_port_scoped(&self) -> bool {
        matches!(
            self,
            DebugCounterType::PortIngressDrops | DebugCounterType::PortEgressDrops
        )
    }

    /// Returns true for ingress-side counters.
    pub fn is_ingress(&self) -> bool {
        matches!(
            self,
            DebugCounterType::PortIngressDrops | DebugCounterType::SwitchIngressDrops
        )
    }
}

impl fmt::Display for DebugCounterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DebugCounterType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PORT_INGRESS_DROPS" => Ok(DebugCounterType::PortIngressDrops),
            "PORT_EGRESS_DROPS" => Ok(DebugCounterType::PortEgressDrops),
            "SWITCH_INGRESS_DROPS" => Ok(DebugCounterType::SwitchIngressDrops),
            "SWITCH_EGRESS_DROPS" => Ok(DebugCounterType::SwitchEgressDrops),
            _ => Err(()),
        }
    }
}

/// A live debug counter with its bound drop reasons.
#[derive(Debug, Clone)]
pub struct DebugCounterEntry {
    pub name: String,
    pub counter_type: DebugCounterType,
    pub oid: DebugCounterOid,
    pub reasons: BTreeSet<String>,
}

/// Debug counter orchestrator statistics.
#[derive(Debug, Clone, Default)]
pub struct DebugCounterOrchStats {
    pub counters_created: u64,
    pub counters_removed: u64,
    pub reasons_added: u64,
    pub reasons_removed: u64,
    pub retries: u64,
    pub errors: u64,
}
