//! Control-plane policing types.

use std::collections::BTreeSet;
use std::str::FromStr;
use switchd_asic::{HostifChannelOid, HostifTrapGroupOid, HostifTrapOid, PolicerOid};
use switchd_orch_common::HasRefCount;

/// Reserved trap group that always exists and can never be deleted.
pub const DEFAULT_TRAP_GROUP: &str = "default";

/// Baseline trap id that can never be removed from the default group.
pub const DEFAULT_TRAP_ID: &str = "default";

/// Packet action applied to trapped traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoppTrapAction {
    Drop,
    Forward,
    Copy,
    Trap,
    Log,
}

impl CoppTrapAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoppTrapAction::Drop => "drop",
            CoppTrapAction::Forward => "forward",
            CoppTrapAction::Copy => "copy",
            CoppTrapAction::Trap => "trap",
            CoppTrapAction::Log => "log",
        }
    }
}

impl FromStr for CoppTrapAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop" => Ok(CoppTrapAction::Drop),
            "forward" => Ok(CoppTrapAction::Forward),
            "copy" => Ok(CoppTrapAction::Copy),
            "trap" => Ok(CoppTrapAction::Trap),
            "log" => Ok(CoppTrapAction::Log),
            _ => Err(()),
        }
    }
}

/// Rate-limiting policer parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicerConfig {
    pub meter_type: String,
    pub mode: String,
    pub cir: u64,
    pub cbs: u64,
}

/// A policer object, reference-counted by the groups bound to it.
#[derive(Debug, Clone)]
pub struct PolicerEntry {
    pub oid: PolicerOid,
    pub config: PolicerConfig,
    refs: u32,
}

impl PolicerEntry {
    pub fn new(oid: PolicerOid, config: PolicerConfig) -> Self {
        Self {
            oid,
            config,
            refs: 0,
        }
    }
}

impl HasRefCount for PolicerEntry {
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

/// A dedicated genetlink receive channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenetlinkConfig {
    pub name: String,
    pub mcgrp: String,
}

/// A trap group and everything bound to it.
#[derive(Debug, Clone)]
pub struct TrapGroupEntry {
    pub name: String,
    pub oid: HostifTrapGroupOid,
    pub queue: u8,
    pub trap_action: CoppTrapAction,
    pub trap_priority: u32,
    pub trap_ids: BTreeSet<String>,
    /// Policer name (same as the group name) when rate limiting is bound.
    pub policer: Option<String>,
    pub genetlink: Option<(GenetlinkConfig, HostifChannelOid)>,
}

/// A trap object bound to some group.
#[derive(Debug, Clone)]
pub struct TrapEntry {
    pub oid: HostifTrapOid,
    pub group: String,
}

/// CoPP orchestrator statistics.
#[derive(Debug, Clone, Default)]
pub struct CoppOrchStats {
    pub groups_created: u64,
    pub groups_removed: u64,
    pub traps_bound: u64,
    pub traps_unbound: u64,
    pub policers_created: u64,
    pub policers_removed: u64,
    pub retries: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_action_round_trip() {
        for action in [
            CoppTrapAction::Drop,
            CoppTrapAction::Forward,
            CoppTrapAction::Copy,
            CoppTrapAction::Trap,
            CoppTrapAction::Log,
        ] {
            assert_eq!(action.as_str().parse::<CoppTrapAction>(), Ok(action));
        }
        assert!("mirror".parse::<CoppTrapAction>().is_err());
    }

    #[test]
    fn test_policer_ref_count() {
        let mut policer = PolicerEntry::new(
            PolicerOid::from_raw(0x99).unwrap(),
            PolicerConfig {
                meter_type: "packets".to_string(),
                mode: "sr_tcm".to_string(),
                cir: 600,
                cbs: 600,
            },
        );
        assert_eq!(policer.ref_count(), 0);
        assert_eq!(policer.increment_ref(), 1);
        assert_eq!(policer.decrement_ref(), Some(0));
        assert_eq!(policer.decrement_ref(), None);
    }
}
