//! MACsec orchestration logic.

use super::profile::validate_profile;
use super::session::{MacsecError, MkaSessionManager};
use super::types::{MacsecOrchStats, MacsecProfile};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::tables::{
    fields, MACSEC_PORT_TABLE, MACSEC_PROFILE_TABLE, STATE_MACSEC_PORT_TABLE, STATE_PORT_TABLE,
};
use async_trait::async_trait;
use log::{error, warn};
use std::collections::HashMap;
use switchd_orch_common::{
    Consumer, ConsumerConfig, Db, KeyOpFieldsValues, Operation, Orch, ProducerTable,
    SharedContext, SubscriberTable, Table, TaskError, TaskResult, TaskResultExt, TaskStatus,
};

/// MACsec orchestrator.
///
/// Owns the profile map and the per-port supplicant sessions built from
/// it.
pub struct MacsecOrch {
    ctx: SharedContext,
    profile_sub: SubscriberTable,
    port_sub: SubscriberTable,
    profile_consumer: Consumer,
    port_consumer: Consumer,
    state_port: Table,
    state_macsec: ProducerTable,
    profiles: HashMap<String, MacsecProfile>,
    sessions: MkaSessionManager,
    stats: MacsecOrchStats,
}

impl MacsecOrch {
    /// Creates a MacsecOrch wired to the app and state databases.
    pub fn new(
        app_db: &Db,
        state_db: &Db,
        ctx: SharedContext,
        sessions: MkaSessionManager,
    ) -> Self {
        Self {
            ctx,
            profile_sub: app_db.subscriber(MACSEC_PROFILE_TABLE),
            port_sub: app_db.subscriber(MACSEC_PORT_TABLE),
            profile_consumer: Consumer::new(ConsumerConfig::new(MACSEC_PROFILE_TABLE)),
            port_consumer: Consumer::new(ConsumerConfig::new(MACSEC_PORT_TABLE)),
            state_port: state_db.table(STATE_PORT_TABLE),
            state_macsec: state_db.producer(STATE_MACSEC_PORT_TABLE),
            profiles: HashMap::new(),
            sessions,
            stats: MacsecOrchStats::default(),
        }
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &MacsecOrchStats {
        &self.stats
    }

    /// Returns a loaded profile.
    pub fn get_profile(&self, name: &str) -> Option<&MacsecProfile> {
        self.profiles.get(name)
    }

    /// Returns the session manager (for state inspection).
    pub fn sessions(&self) -> &MkaSessionManager {
        &self.sessions
    }

    fn ports_bound_to(&self, profile_name: &str) -> Vec<String> {
        self.sessions
            .active_ports()
            .into_iter()
            .filter(|port| self.sessions.session_profile(port) == Some(profile_name))
            .collect()
    }

    async fn handle_profile_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let profile =
            validate_profile(&entry.fvs).map_err(|e| TaskError::conflict(e.to_string()))?;

        if let Some(existing) = self.profiles.get(&entry.key) {
            if *existing == profile {
                return Err(TaskError::ignored("profile unchanged"));
            }
            let bound = self.ports_bound_to(&entry.key);
            if !bound.is_empty() {
                // Known gap: a hot profile replace does not re-push bound
                // ports; they keep the old key material until a SET
                // rebinds them through a disable/enable cycle.
                warn!(
                    "profile {} changed while bound to {:?}; ports keep the previous configuration",
                    entry.key, bound
                );
            }
        } else {
            self.stats.profiles_loaded += 1;
        }
        self.profiles.insert(entry.key.clone(), profile);

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceModify,
            "MacsecOrch",
            "load_profile"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(entry.key.clone())
        .with_object_type("macsec_profile"));
        Ok(())
    }

    async fn handle_profile_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        if !self.profiles.contains_key(&entry.key) {
            return Err(TaskError::ignored(format!("unknown profile {}", entry.key)));
        }
        let bound = self.ports_bound_to(&entry.key);
        if !bound.is_empty() {
            return Err(TaskError::busy(entry.key.clone(), bound.len() as u32));
        }

        self.profiles.remove(&entry.key);
        self.stats.profiles_removed += 1;

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceDelete,
            "MacsecOrch",
            "remove_profile"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(entry.key.clone())
        .with_object_type("macsec_profile"));
        Ok(())
    }

    async fn handle_port_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let port = entry.key.clone();
        let profile_name = entry
            .get_field(fields::PROFILE)
            .ok_or_else(|| TaskError::conflict("port binding missing profile field"))?
            .to_string();

        let profile = self
            .profiles
            .get(&profile_name)
            .cloned()
            .ok_or_else(|| TaskError::dependency(format!("profile {} not loaded", profile_name)))?;

        let oper_up = self
            .state_port
            .hget(&port, fields::OPER_STATUS)
            .is_some_and(|s| s == "up");
        if !oper_up {
            return Err(TaskError::dependency(format!("port {} not ready", port)));
        }

        match self.sessions.session_profile(&port) {
            Some(bound) if bound == profile_name => {
                return Err(TaskError::ignored("binding unchanged"));
            }
            Some(_) => {
                // Rebinding to a different profile is a full
                // disable/enable cycle.
                if let Err(e) = self.sessions.disable(&port).await {
                    warn!("disable during rebind of {} failed: {}", port, e);
                }
                self.stats.ports_disabled += 1;
            }
            None => {}
        }

        match self.sessions.enable(&port, &profile_name, &profile).await {
            Ok(()) => {}
            Err(e @ MacsecError::SupplicantNotReady { .. }) => {
                // The supplicant may come up on a later cycle.
                self.stats.enable_failures += 1;
                return Err(TaskError::dependency(e.to_string()));
            }
            Err(e) => {
                self.stats.enable_failures += 1;
                return Err(TaskError::external(e.to_string()));
            }
        }

        self.stats.ports_enabled += 1;
        self.state_macsec.set(
            &port,
            vec![
                (fields::PROFILE.to_string(), profile_name.clone()),
                (fields::STATE.to_string(), "enabled".to_string()),
            ],
        );

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceCreate,
            "MacsecOrch",
            "enable_port"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(port)
        .with_object_type("macsec_port")
        .with_details(serde_json::json!({ "profile": profile_name })));
        Ok(())
    }

    async fn handle_port_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let port = entry.key.clone();
        if !self.sessions.has_session(&port) {
            return Err(TaskError::ignored(format!("MACsec not enabled on {}", port)));
        }

        let result = self.sessions.disable(&port).await;
        // The cache entry is gone regardless of how teardown went.
        self.stats.ports_disabled += 1;
        self.state_macsec.del(&port);

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceDelete,
            "MacsecOrch",
            "disable_port"
        )
        .with_outcome(if result.is_ok() {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        })
        .with_object_id(port)
        .with_object_type("macsec_port"));

        result.map_err(|e| TaskError::external(e.to_string()))
    }

    /// Disables every active port on orderly shutdown.
    pub async fn shutdown(&mut self) {
        self.sessions.shutdown().await;
    }
}

#[async_trait]
impl Orch for MacsecOrch {
    fn name(&self) -> &str {
        "MacsecOrch"
    }

    async fn do_task(&mut self) {
        let batch = self.ctx.read().expect("context lock poisoned").batch_size;
        self.profile_consumer.add_to_sync(self.profile_sub.pops(batch));
        self.port_consumer.add_to_sync(self.port_sub.pops(batch));

        // Port bindings depend on profiles; load profiles first.
        for entry in self.profile_consumer.drain() {
            let status = match entry.op {
                Operation::Set => self.handle_profile_set(&entry).await.to_status(),
                Operation::Del => self.handle_profile_del(&entry).await.to_status(),
            };
            match status {
                TaskStatus::NeedRetry => {
                    self.stats.retries += 1;
                    self.profile_consumer.retry(entry);
                }
                s if s.is_failure() => {
                    self.stats.errors += 1;
                    error!(
                        "{}: dropping {} after {:?}",
                        MACSEC_PROFILE_TABLE, entry.key, s
                    );
                }
                _ => {}
            }
        }

        for entry in self.port_consumer.drain() {
            let status = match entry.op {
                Operation::Set => self.handle_port_set(&entry).await.to_status(),
                Operation::Del => self.handle_port_del(&entry).await.to_status(),
            };
            match status {
                TaskStatus::NeedRetry => {
                    self.stats.retries += 1;
                    self.port_consumer.retry(entry);
                }
                s if s.is_failure() => {
                    self.stats.errors += 1;
                    error!("{}: dropping {} after {:?}", MACSEC_PORT_TABLE, entry.key, s);
                }
                _ => {}
            }
        }
    }

    fn priority(&self) -> i32 {
        40
    }

    fn has_pending_tasks(&self) -> bool {
        self.profile_consumer.has_pending()
            || self.port_consumer.has_pending()
            || self.profile_sub.has_pending()
            || self.port_sub.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        let mut tasks = self.profile_consumer.dump();
        tasks.extend(self.port_consumer.dump());
        tasks
    }

    async fn on_shutdown(&mut self) {
        self.sessions.shutdown().await;
    }
}
