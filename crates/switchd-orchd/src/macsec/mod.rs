//! MacsecOrch - MACsec profile and key-agreement session reconciliation.
//!
//! Profiles are validated declaratively and held by name; enabling a port
//! spawns a key-agreement supplicant process driven over a line-oriented
//! control socket, with a bounded readiness poll and an ordered
//! configuration sequence that commits the network profile last.

mod orch;
mod profile;
mod session;
mod types;

pub use orch::MacsecOrch;
pub use profile::{validate_profile, ValidationError};
pub use session::{
    MacsecError, MkaSessionManager, MkaTransport, SessionState, SupplicantProcess,
    SupplicantSpawner, UnixSocketTransport, WpaSupplicantSpawner,
};
pub use types::{CipherSuite, MacsecOrchStats, MacsecPolicy, MacsecProfile};
