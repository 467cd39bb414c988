//! Base Orch trait and shared context.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use switchd_types::MacAddress;

/// Context shared across all Orch modules.
///
/// Constructed once at process start and passed by reference into each
/// orchestrator constructor; this replaces ambient global state (system
/// MAC, batch size) with an explicit capability.
#[derive(Debug, Clone)]
pub struct OrchContext {
    /// The switch's system MAC, once learned from the hardware tables.
    pub system_mac: Option<MacAddress>,
    /// Pop batch size for consumers.
    pub batch_size: usize,
    /// Flag indicating if warm boot is in progress.
    pub warm_boot_in_progress: bool,
}

impl Default for OrchContext {
    fn default() -> Self {
        Self {
            system_mac: None,
            batch_size: 128,
            warm_boot_in_progress: false,
        }
    }
}

/// Shared handle to the context.
///
/// Read inside handlers, written only by the daemon between dispatch
/// cycles; never held across an await point.
pub type SharedContext = Arc<RwLock<OrchContext>>;

impl OrchContext {
    /// Wraps the context in a shared handle.
    pub fn into_shared(self) -> SharedContext {
        Arc::new(RwLock::new(self))
    }
}

/// Base trait for all orchestration agents.
///
/// Each Orch module implements this trait to participate in the daemon
/// event loop. The daemon calls these methods in response to change-table
/// notifications and timer events; no two methods of any Orch run
/// concurrently within one process.
#[async_trait]
pub trait Orch: Send {
    /// Returns the name of this Orch (for logging and debugging).
    fn name(&self) -> &str;

    /// Processes pending tasks from all consumers.
    ///
    /// Implementations drain each consumer, dispatch every entry to the
    /// per-table handler, and re-queue entries whose handler returned
    /// `NeedRetry`. Terminal failures are logged and erased; they never
    /// block later entries.
    async fn do_task(&mut self);

    /// Called periodically by the daemon's timer.
    ///
    /// Used for deferred work such as draining pending flex-counter
    /// bindings once object-id translations become available.
    async fn on_timer(&mut self) {}

    /// Returns the priority of this Orch (lower = higher priority).
    fn priority(&self) -> i32 {
        0
    }

    /// Returns true if this Orch has pending work.
    fn has_pending_tasks(&self) -> bool {
        false
    }

    /// Dumps pending tasks for debugging.
    fn dump_pending_tasks(&self) -> Vec<String> {
        vec![]
    }

    /// Prepares for warm boot by saving state.
    ///
    /// Returns `true` if preparation was successful.
    fn bake(&mut self) -> bool {
        true
    }

    /// Called once warm-restart reconciliation has finished.
    fn on_warm_boot_end(&mut self) {}

    /// Called on orderly shutdown, before the Orch is dropped.
    ///
    /// Teardown that must not be skipped (live child processes, kernel
    /// devices) happens here; `Drop` is only a best-effort backstop.
    async fn on_shutdown(&mut self) {}
}
