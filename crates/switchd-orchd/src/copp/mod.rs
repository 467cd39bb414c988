//! CoppOrch - control-plane policing reconciliation.
//!
//! Maps named trap groups to trap-id sets, optional rate-limiting
//! policers, and optional dedicated genetlink receive channels, with
//! default-group fallback and deferred flex-counter binding.

mod orch;
mod types;

pub use orch::{CoppOrch, CoppOrchCallbacks};
pub use types::{
    CoppOrchStats, CoppTrapAction, GenetlinkConfig, PolicerConfig, PolicerEntry, TrapEntry,
    TrapGroupEntry, DEFAULT_TRAP_GROUP, DEFAULT_TRAP_ID,
};
