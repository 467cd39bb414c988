//! Type-safe abstraction boundary for the forwarding ASIC.
//!
//! The ASIC is driven through a wide C object/attribute interface owned by a
//! separate syncing process; this crate models only what the orchestration
//! layer needs from it:
//!
//! - [`types`]: strongly-typed object handles that make it a compile error
//!   to pass, say, a policer handle where a trap-group handle is expected
//! - [`error`]: raw status codes with the shared retry/fatal classification
//!   every orchestrator uses to decide between retrying and dropping a task
//!
//! The actual create/remove/set-attribute calls are issued through
//! per-orchestrator callback traits so tests can substitute a mock ASIC.

pub mod error;
pub mod types;

pub use error::{AsicError, AsicResult, AsicStatus, StatusDisposition};
pub use types::{
    AsicObjectId, AsicObjectKind, BridgePortKind, BridgePortOid, DebugCounterKind,
    DebugCounterOid, HostifChannelKind, HostifChannelOid, HostifTrapGroupKind,
    HostifTrapGroupOid, HostifTrapKind, HostifTrapOid, NeighborEntryKind, NeighborEntryOid,
    PolicerKind, PolicerOid, PortKind, PortOid, RawAsicObjectId, SwitchKind, SwitchOid,
    TunnelKind, TunnelMapEntryKind, TunnelMapEntryOid, TunnelOid, VlanKind, VlanOid,
};
