//! switchd orchestration daemon.
//!
//! Translates declarative network configuration (VLANs, VXLAN tunnels,
//! neighbor entries, MACsec links, control-plane trap policies, debug/drop
//! counters) from the shared store into imperative state in the forwarding
//! ASIC and the Linux kernel.
//!
//! # Architecture
//!
//! ```text
//! [config tables] ──> [Consumer task queues] ──> [domain Orchs] ──> ASIC
//!                                                     │              kernel
//!                                                     ↓
//!                                              [state tables]
//! ```
//!
//! Every domain orchestrator runs the same pull-based, level-triggered
//! reconciliation loop: entries whose dependencies are not yet met stay
//! queued and are reattempted each cycle until they succeed, are
//! superseded, or are deleted.
//!
//! # Key Components
//!
//! - [`daemon::OrchDaemon`]: event loop and Orch coordination
//! - [`vlan`], [`vxlan`], [`neigh`], [`macsec`], [`copp`],
//!   [`debug_counter`]: domain orchestrators
//! - [`flex_counter`]: statistic binding for dynamically created objects

pub mod asic_channel;
pub mod audit;
pub mod copp;
pub mod daemon;
pub mod debug_counter;
pub mod flex_counter;
pub mod kernel;
pub mod macsec;
pub mod neigh;
pub mod tables;
pub mod vlan;
pub mod vxlan;

// Re-export commonly used types.
pub use switchd_orch_common::{
    Consumer, ConsumerConfig, Db, KeyOpFieldsValues, Operation, Orch, OrchContext, TaskResult,
    TaskStatus,
};

pub use asic_channel::AsicChannel;
pub use copp::{CoppOrch, CoppOrchCallbacks};
pub use debug_counter::{DebugCounterOrch, DebugCounterOrchCallbacks};
pub use flex_counter::{FlexCounterGroup, FlexCounterManager};
pub use macsec::{MacsecOrch, MkaSessionManager, MkaTransport, SupplicantSpawner};
pub use neigh::{NeighOrch, NeighOrchCallbacks};
pub use vlan::VlanOrch;
pub use vxlan::VxlanOrch;
