//! DebugCounterOrch - debug/drop counter lifecycle.
//!
//! Counters and their drop reasons arrive independently; either side is
//! buffered until both exist, then reconciled into a live ASIC counter.
//! Port add/remove events fan out flex-counter statistic bindings for
//! port-scoped counters.

mod orch;
mod types;

pub use orch::{DebugCounterOrch, DebugCounterOrchCallbacks};
pub use types::{DebugCounterEntry, DebugCounterOrchStats, DebugCounterType};
