//! Flex counter group definitions.

use std::fmt;
use std::str::FromStr;

/// Counter groups the orchestration daemon binds statistics under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlexCounterGroup {
    /// Host-interface trap flow counters
    FlowCntTrap,
    /// Debug/drop counters (port- and switch-scoped)
    DebugCounter,
}

impl FlexCounterGroup {
    /// Returns the group key used in the counter-service tables.
    pub fn table_key(&self) -> &'static str {
        match self {
            Self::FlowCntTrap => "FLOW_CNT_TRAP",
            Self::DebugCounter => "DEBUG_COUNTER",
        }
    }

    /// Returns the field carrying the stat-id list for this group.
    pub fn counter_id_list_field(&self) -> &'static str {
        match self {
            Self::FlowCntTrap => "FLOW_COUNTER_ID_LIST",
            Self::DebugCounter => "DEBUG_COUNTER_ID_LIST",
        }
    }

    /// Returns the default poll interval in milliseconds.
    pub fn default_poll_interval_ms(&self) -> u64 {
        match self {
            Self::FlowCntTrap => 10000,
            Self::DebugCounter => 10000,
        }
    }

    /// Returns all supported groups.
    pub fn all() -> &'static [FlexCounterGroup] {
        &[Self::FlowCntTrap, Self::DebugCounter]
    }
}

impl fmt::Display for FlexCounterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table_key())
    }
}

/// Error type for group parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFlexCounterGroupError {
    pub invalid_key: String,
}

impl fmt::Display for ParseFlexCounterGroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid flex counter group: {}", self.invalid_key)
    }
}

impl std::error::Error for ParseFlexCounterGroupError {}

impl FromStr for FlexCounterGroup {
    type Err = ParseFlexCounterGroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FLOW_CNT_TRAP" => Ok(Self::FlowCntTrap),
            "DEBUG_COUNTER" => Ok(Self::DebugCounter),
            _ => Err(ParseFlexCounterGroupError {
                invalid_key: s.to_string(),
            }),
        }
    }
}
