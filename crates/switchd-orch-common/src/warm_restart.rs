//! Warm-restart state coordination.
//!
//! One daemon publishes its reconciliation progress to the shared state
//! table; dependents poll it to gate reconciliation-sensitive operations
//! (a VXLAN mapping, for example, is only created once the VLAN manager
//! has reached `Replayed` or `Reconciled`).

use crate::store::Db;
use std::str::FromStr;

/// State table holding per-daemon warm restart progress.
pub const WARM_RESTART_TABLE: &str = "WARM_RESTART_TABLE";

/// Table holding the per-daemon warm restart enable flag.
pub const WARM_RESTART_ENABLE_TABLE: &str = "WARM_RESTART_ENABLE_TABLE";

const STATE_FIELD: &str = "state";
const ENABLE_FIELD: &str = "enable";

/// Warm restart progression for one daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmRestartState {
    /// Warm restart is disabled.
    Disabled,
    /// Fresh start, nothing restored yet.
    Initialized,
    /// Restoring state from the previous run.
    Restoring,
    /// State restored, waiting for replay.
    Restored,
    /// Configuration replayed.
    Replayed,
    /// Reconciliation complete.
    Reconciled,
}

impl WarmRestartState {
    /// Returns the state name as published to the state table.
    pub fn as_str(&self) -> &'static str {
        match self {
            WarmRestartState::Disabled => "disabled",
            WarmRestartState::Initialized => "initialized",
            WarmRestartState::Restoring => "restoring",
            WarmRestartState::Restored => "restored",
            WarmRestartState::Replayed => "replayed",
            WarmRestartState::Reconciled => "reconciled",
        }
    }

    /// Returns true once replay has finished, i.e. dependents may act on
    /// this daemon's published state.
    pub fn is_replayed(&self) -> bool {
        matches!(self, WarmRestartState::Replayed | WarmRestartState::Reconciled)
    }
}

impl FromStr for WarmRestartState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(WarmRestartState::Disabled),
            "initialized" => Ok(WarmRestartState::Initialized),
            "restoring" => Ok(WarmRestartState::Restoring),
            "restored" => Ok(WarmRestartState::Restored),
            "replayed" => Ok(WarmRestartState::Replayed),
            "reconciled" => Ok(WarmRestartState::Reconciled),
            _ => Err(()),
        }
    }
}

/// Publishes and polls warm restart state for one daemon.
#[derive(Debug, Clone)]
pub struct WarmRestartHelper {
    state_db: Db,
    app_name: String,
}

impl WarmRestartHelper {
    /// Creates a helper bound to the state database.
    pub fn new(state_db: Db, app_name: impl Into<String>) -> Self {
        Self {
            state_db,
            app_name: app_name.into(),
        }
    }

    /// Returns true if warm restart is enabled for this daemon.
    pub fn is_enabled(&self) -> bool {
        self.state_db
            .table(WARM_RESTART_ENABLE_TABLE)
            .hget(&self.app_name, ENABLE_FIELD)
            .is_some_and(|v| v == "true")
    }

    /// Publishes this daemon's warm restart state.
    pub fn set_state(&self, state: WarmRestartState) {
        log::info!("{} warm restart state: {}", self.app_name, state.as_str());
        self.state_db.table(WARM_RESTART_TABLE).set(
            &self.app_name,
            vec![(STATE_FIELD.to_string(), state.as_str().to_string())],
        );
    }

    /// Returns this daemon's published warm restart state.
    pub fn state(&self) -> Option<WarmRestartState> {
        self.peer_state(&self.app_name)
    }

    /// Polls another daemon's warm restart state.
    pub fn peer_state(&self, peer: &str) -> Option<WarmRestartState> {
        self.state_db
            .table(WARM_RESTART_TABLE)
            .hget(peer, STATE_FIELD)?
            .parse()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_state_round_trip() {
        for state in [
            WarmRestartState::Disabled,
            WarmRestartState::Initialized,
            WarmRestartState::Restoring,
            WarmRestartState::Restored,
            WarmRestartState::Replayed,
            WarmRestartState::Reconciled,
        ] {
            assert_eq!(state.as_str().parse::<WarmRestartState>(), Ok(state));
        }
        assert!("bogus".parse::<WarmRestartState>().is_err());
    }

    #[test]
    fn test_is_replayed() {
        assert!(WarmRestartState::Replayed.is_replayed());
        assert!(WarmRestartState::Reconciled.is_replayed());
        assert!(!WarmRestartState::Restored.is_replayed());
    }

    #[test]
    fn test_publish_and_poll() {
        let db = Db::new();
        let vlan = WarmRestartHelper::new(db.clone(), "vlanmgr");
        let vxlan = WarmRestartHelper::new(db, "vxlanmgr");

        assert_eq!(vxlan.peer_state("vlanmgr"), None);

        vlan.set_state(WarmRestartState::Replayed);
        assert_eq!(vxlan.peer_state("vlanmgr"), Some(WarmRestartState::Replayed));
    }

    #[test]
    fn test_enable_flag() {
        let db = Db::new();
        let helper = WarmRestartHelper::new(db.clone(), "orchd");
        assert!(!helper.is_enabled());

        db.table(WARM_RESTART_ENABLE_TABLE)
            .set("orchd", vec![("enable".to_string(), "true".to_string())]);
        assert!(helper.is_enabled());
    }
}
