//! Control-plane policing orchestration logic.

use super::types::{
    CoppOrchStats, CoppTrapAction, GenetlinkConfig, PolicerConfig, PolicerEntry, TrapEntry,
    TrapGroupEntry, DEFAULT_TRAP_GROUP, DEFAULT_TRAP_ID,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::flex_counter::{FlexCounterGroup, FlexCounterManager};
use crate::tables::{fields, COPP_TABLE};
use async_trait::async_trait;
use log::{error, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use switchd_asic::{AsicResult, HostifChannelOid, HostifTrapGroupOid, HostifTrapOid, PolicerOid};
use switchd_orch_common::{
    Consumer, ConsumerConfig, Db, KeyOpFieldsValues, Operation, Orch, SharedContext,
    SubscriberTable, SyncMap, TaskError, TaskResult, TaskResultExt, TaskStatus,
};

/// Statistics polled for every bound trap object.
const TRAP_STAT_IDS: &[&str] = &["HOSTIF_TRAP_IN_PACKETS", "HOSTIF_TRAP_IN_OCTETS"];

/// ASIC-facing side effects issued by CoppOrch.
pub trait CoppOrchCallbacks: Send + Sync {
    fn create_trap_group(&self, queue: u8) -> AsicResult<HostifTrapGroupOid>;
    fn set_trap_group_queue(&self, group: HostifTrapGroupOid, queue: u8) -> AsicResult<()>;
    fn remove_trap_group(&self, group: HostifTrapGroupOid) -> AsicResult<()>;

    fn create_policer(&self, config: &PolicerConfig) -> AsicResult<PolicerOid>;
    fn set_policer_attrs(&self, policer: PolicerOid, config: &PolicerConfig) -> AsicResult<()>;
    fn remove_policer(&self, policer: PolicerOid) -> AsicResult<()>;
    fn bind_group_policer(
        &self,
        group: HostifTrapGroupOid,
        policer: Option<PolicerOid>,
    ) -> AsicResult<()>;

    fn create_trap(
        &self,
        trap_id: &str,
        action: CoppTrapAction,
        priority: u32,
        group: HostifTrapGroupOid,
    ) -> AsicResult<HostifTrapOid>;
    fn set_trap_attrs(
        &self,
        trap: HostifTrapOid,
        action: CoppTrapAction,
        priority: u32,
        group: HostifTrapGroupOid,
    ) -> AsicResult<()>;
    fn remove_trap(&self, trap: HostifTrapOid) -> AsicResult<()>;

    fn create_genetlink_channel(&self, name: &str, mcgrp: &str) -> AsicResult<HostifChannelOid>;
    fn remove_genetlink_channel(&self, channel: HostifChannelOid) -> AsicResult<()>;
}

/// Control-plane policing orchestrator.
pub struct CoppOrch {
    ctx: SharedContext,
    callbacks: Arc<dyn CoppOrchCallbacks>,
    copp_sub: SubscriberTable,
    consumer: Consumer,
    groups: HashMap<String, TrapGroupEntry>,
    policers: SyncMap<String, PolicerEntry>,
    /// trap id -> bound trap object
    traps: HashMap<String, TrapEntry>,
    flex_counters: FlexCounterManager,
    default_ready: bool,
    stats: CoppOrchStats,
}

impl CoppOrch {
    /// Creates a CoppOrch wired to the app and counter databases.
    pub fn new(
        app_db: &Db,
        counter_db: &Db,
        ctx: SharedContext,
        callbacks: Arc<dyn CoppOrchCallbacks>,
    ) -> Self {
        Self {
            ctx,
            callbacks,
            copp_sub: app_db.subscriber(COPP_TABLE),
            consumer: Consumer::new(ConsumerConfig::new(COPP_TABLE)),
            groups: HashMap::new(),
            policers: SyncMap::new(),
            traps: HashMap::new(),
            flex_counters: FlexCounterManager::new(counter_db.clone(), FlexCounterGroup::FlowCntTrap),
            default_ready: false,
            stats: CoppOrchStats::default(),
        }
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &CoppOrchStats {
        &self.stats
    }

    /// Returns a trap group by name.
    pub fn get_group(&self, name: &str) -> Option<&TrapGroupEntry> {
        self.groups.get(name)
    }

    /// Returns the group a trap id is currently bound to.
    pub fn trap_binding(&self, trap_id: &str) -> Option<&str> {
        self.traps.get(trap_id).map(|t| t.group.as_str())
    }

    /// Returns the policer reference count for a group.
    pub fn policer_ref_count(&self, name: &str) -> Option<u32> {
        self.policers.ref_count(&name.to_string())
    }

    /// Returns the number of counter bindings waiting on id translation.
    pub fn pending_counter_bindings(&self) -> usize {
        self.flex_counters.pending_count()
    }

    /// The default group and its baseline trap must exist before any
    /// other group is processed; groups fall back to it on trap removal.
    fn ensure_default_group(&mut self) -> bool {
        if self.default_ready {
            return true;
        }
        let oid = match self.callbacks.create_trap_group(0) {
            Ok(oid) => oid,
            Err(e) => {
                warn!("default trap group creation failed, will retry: {}", e);
                return false;
            }
        };
        let trap_oid =
            match self
                .callbacks
                .create_trap(DEFAULT_TRAP_ID, CoppTrapAction::Trap, 0, oid)
            {
                Ok(trap_oid) => trap_oid,
                Err(e) => {
                    warn!("baseline trap creation failed, will retry: {}", e);
                    return false;
                }
            };

        let mut trap_ids = BTreeSet::new();
        trap_ids.insert(DEFAULT_TRAP_ID.to_string());
        self.groups.insert(
            DEFAULT_TRAP_GROUP.to_string(),
            TrapGroupEntry {
                name: DEFAULT_TRAP_GROUP.to_string(),
                oid,
                queue: 0,
                trap_action: CoppTrapAction::Trap,
                trap_priority: 0,
                trap_ids,
                policer: None,
                genetlink: None,
            },
        );
        self.traps.insert(
            DEFAULT_TRAP_ID.to_string(),
            TrapEntry {
                oid: trap_oid,
                group: DEFAULT_TRAP_GROUP.to_string(),
            },
        );
        self.default_ready = true;
        self.stats.groups_created += 1;
        info!("default trap group initialized");
        true
    }

    fn parse_policer_config(entry: &KeyOpFieldsValues) -> TaskResult<Option<PolicerConfig>> {
        if !entry.has_field(fields::CIR) && !entry.has_field(fields::CBS) {
            return Ok(None);
        }
        let cir: u64 = entry
            .get_field(fields::CIR)
            .ok_or_else(|| TaskError::conflict("policer missing cir"))?
            .parse()
            .map_err(|_| TaskError::parse("bad cir"))?;
        let cbs: u64 = entry
            .get_field(fields::CBS)
            .ok_or_else(|| TaskError::conflict("policer missing cbs"))?
            .parse()
            .map_err(|_| TaskError::parse("bad cbs"))?;
        Ok(Some(PolicerConfig {
            meter_type: entry
                .get_field(fields::METER_TYPE)
                .unwrap_or("packets")
                .to_string(),
            mode: entry.get_field(fields::MODE).unwrap_or("sr_tcm").to_string(),
            cir,
            cbs,
        }))
    }

    fn parse_genetlink_config(entry: &KeyOpFieldsValues) -> TaskResult<Option<GenetlinkConfig>> {
        match (
            entry.get_field(fields::GENETLINK_NAME),
            entry.get_field(fields::GENETLINK_MCGRP_NAME),
        ) {
            (Some(name), Some(mcgrp)) => Ok(Some(GenetlinkConfig {
                name: name.to_string(),
                mcgrp: mcgrp.to_string(),
            })),
            (None, None) => Ok(None),
            _ => Err(TaskError::conflict(
                "genetlink requires both name and mcgrp",
            )),
        }
    }

    fn requested_trap_ids(&self, group: &str, entry: &KeyOpFieldsValues) -> Option<BTreeSet<String>> {
        let mut requested: BTreeSet<String> = entry.get_field(fields::TRAP_IDS).map(|raw| {
            raw.split(',')
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect()
        })?;
        // The baseline trap can never leave the default group.
        if group == DEFAULT_TRAP_GROUP {
            requested.insert(DEFAULT_TRAP_ID.to_string());
        }
        Some(requested)
    }

    fn apply_policer(&mut self, group: &str, config: Option<PolicerConfig>) -> TaskResult<()> {
        let group_oid = self.groups[group].oid;
        let bound = self.groups[group].policer.clone();
        match (config, bound) {
            (Some(config), None) => {
                let oid = self
                    .callbacks
                    .create_policer(&config)
                    .map_err(|e| TaskError::from_asic(group, e))?;
                self.callbacks
                    .bind_group_policer(group_oid, Some(oid))
                    .map_err(|e| TaskError::from_asic(group, e))?;
                self.policers
                    .insert(group.to_string(), PolicerEntry::new(oid, config));
                self.policers
                    .increase_ref(&group.to_string())
                    .map_err(|e| TaskError::internal(e.to_string()))?;
                if let Some(entry) = self.groups.get_mut(group) {
                    entry.policer = Some(group.to_string());
                }
                self.stats.policers_created += 1;
            }
            (Some(config), Some(name)) => {
                let entry = self
                    .policers
                    .get_mut(&name)
                    .ok_or_else(|| TaskError::internal("policer cache out of sync"))?;
                if entry.config != config {
                    self.callbacks
                        .set_policer_attrs(entry.oid, &config)
                        .map_err(|e| TaskError::from_asic(group, e))?;
                    entry.config = config;
                }
            }
            (None, Some(name)) => {
                self.callbacks
                    .bind_group_policer(group_oid, None)
                    .map_err(|e| TaskError::from_asic(group, e))?;
                let refs = self
                    .policers
                    .decrease_ref(&name)
                    .map_err(|e| TaskError::internal(e.to_string()))?;
                if refs == 0 {
                    if let Some(entry) = self.policers.remove(&name) {
                        self.callbacks
                            .remove_policer(entry.oid)
                            .map_err(|e| TaskError::from_asic(group, e))?;
                        self.stats.policers_removed += 1;
                    }
                }
                if let Some(entry) = self.groups.get_mut(group) {
                    entry.policer = None;
                }
            }
            (None, None) => {}
        }
        Ok(())
    }

    fn apply_genetlink(&mut self, group: &str, config: Option<GenetlinkConfig>) -> TaskResult<()> {
        let current = self.groups[group].genetlink.clone();
        match (config, current) {
            (Some(config), None) => {
                let oid = self
                    .callbacks
                    .create_genetlink_channel(&config.name, &config.mcgrp)
                    .map_err(|e| TaskError::from_asic(group, e))?;
                if let Some(entry) = self.groups.get_mut(group) {
                    entry.genetlink = Some((config, oid));
                }
            }
            (Some(config), Some((existing, oid))) if existing != config => {
                self.callbacks
                    .remove_genetlink_channel(oid)
                    .map_err(|e| TaskError::from_asic(group, e))?;
                let new_oid = self
                    .callbacks
                    .create_genetlink_channel(&config.name, &config.mcgrp)
                    .map_err(|e| TaskError::from_asic(group, e))?;
                if let Some(entry) = self.groups.get_mut(group) {
                    entry.genetlink = Some((config, new_oid));
                }
            }
            (None, Some((_, oid))) => {
                self.callbacks
                    .remove_genetlink_channel(oid)
                    .map_err(|e| TaskError::from_asic(group, e))?;
                if let Some(entry) = self.groups.get_mut(group) {
                    entry.genetlink = None;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Binds a trap id into a group: rebinds the existing object if one
    /// exists, creates it otherwise.
    fn bind_trap(&mut self, trap_id: &str, group: &str) -> TaskResult<()> {
        let entry = &self.groups[group];
        let (oid, action, priority) = (entry.oid, entry.trap_action, entry.trap_priority);

        if let Some(bound) = self.traps.get_mut(trap_id) {
            self.callbacks
                .set_trap_attrs(bound.oid, action, priority, oid)
                .map_err(|e| TaskError::from_asic(trap_id, e))?;
            let old_group = std::mem::replace(&mut bound.group, group.to_string());
            if let Some(old) = self.groups.get_mut(&old_group) {
                old.trap_ids.remove(trap_id);
            }
        } else {
            let trap_oid = self
                .callbacks
                .create_trap(trap_id, action, priority, oid)
                .map_err(|e| TaskError::from_asic(trap_id, e))?;
            self.traps.insert(
                trap_id.to_string(),
                TrapEntry {
                    oid: trap_oid,
                    group: group.to_string(),
                },
            );
            // Counter identity resolves asynchronously; the manager
            // defers until the translation shows up.
            self.flex_counters.bind(
                &format!("trap:{}", trap_id),
                trap_oid.as_raw(),
                TRAP_STAT_IDS.iter().map(|s| s.to_string()).collect(),
            );
        }
        if let Some(entry) = self.groups.get_mut(group) {
            entry.trap_ids.insert(trap_id.to_string());
        }
        self.stats.traps_bound += 1;
        Ok(())
    }

    /// Unbinds a trap id from a group, destroying the trap object unless
    /// another group's configured set claims it.
    fn unbind_trap(&mut self, trap_id: &str, group: &str) -> TaskResult<()> {
        let claimant = self
            .groups
            .iter()
            .find(|(name, g)| *name != group && g.trap_ids.contains(trap_id))
            .map(|(name, _)| name.clone());

        if let Some(claimant) = claimant {
            self.bind_trap(trap_id, &claimant)?;
        } else if let Some(bound) = self.traps.remove(trap_id) {
            self.callbacks
                .remove_trap(bound.oid)
                .map_err(|e| TaskError::from_asic(trap_id, e))?;
            self.flex_counters.unbind(bound.oid.as_raw());
        }
        if let Some(entry) = self.groups.get_mut(group) {
            entry.trap_ids.remove(trap_id);
        }
        self.stats.traps_unbound += 1;
        Ok(())
    }

    async fn handle_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let group = entry.key.clone();
        let policer_cfg = Self::parse_policer_config(entry)?;
        let genetlink_cfg = Self::parse_genetlink_config(entry)?;
        let action = match entry.get_field(fields::TRAP_ACTION) {
            Some(raw) => raw
                .parse()
                .map_err(|_| TaskError::parse(format!("bad trap_action: {}", raw)))?,
            None => CoppTrapAction::Trap,
        };
        let priority: u32 = match entry.get_field(fields::TRAP_PRIORITY) {
            Some(raw) => raw.parse().map_err(|_| TaskError::parse("bad trap_priority"))?,
            None => 1,
        };
        let queue: u8 = match entry.get_field(fields::QUEUE) {
            Some(raw) => raw.parse().map_err(|_| TaskError::parse("bad queue"))?,
            None => 0,
        };

        // Group attributes first: traps must never bind to a group that
        // is not yet fully configured.
        let is_new = !self.groups.contains_key(&group);
        if is_new {
            let oid = self
                .callbacks
                .create_trap_group(queue)
                .map_err(|e| TaskError::from_asic(group.clone(), e))?;
            self.groups.insert(
                group.clone(),
                TrapGroupEntry {
                    name: group.clone(),
                    oid,
                    queue,
                    trap_action: action,
                    trap_priority: priority,
                    trap_ids: BTreeSet::new(),
                    policer: None,
                    genetlink: None,
                },
            );
            self.stats.groups_created += 1;
        } else {
            let (oid, old_queue) = {
                let existing = &self.groups[&group];
                (existing.oid, existing.queue)
            };
            if old_queue != queue {
                self.callbacks
                    .set_trap_group_queue(oid, queue)
                    .map_err(|e| TaskError::from_asic(group.clone(), e))?;
            }
        }

        let attrs_changed = match self.groups.get_mut(&group) {
            Some(cached) => {
                let changed = cached.trap_action != action || cached.trap_priority != priority;
                cached.queue = queue;
                cached.trap_action = action;
                cached.trap_priority = priority;
                changed
            }
            None => return Err(TaskError::internal("trap group cache out of sync")),
        };

        // Then the policer, then the receive channel.
        self.apply_policer(&group, policer_cfg)?;
        self.apply_genetlink(&group, genetlink_cfg)?;

        // Then per-trap attributes and membership changes.
        let current = self.groups[&group].trap_ids.clone();
        let requested = self
            .requested_trap_ids(&group, entry)
            .unwrap_or_else(|| current.clone());

        if attrs_changed {
            for trap_id in requested.intersection(&current) {
                if let Some(bound) = self.traps.get(trap_id) {
                    self.callbacks
                        .set_trap_attrs(bound.oid, action, priority, self.groups[&group].oid)
                        .map_err(|e| TaskError::from_asic(trap_id.clone(), e))?;
                }
            }
        }

        let add_ids: Vec<String> = requested.difference(&current).cloned().collect();
        let remove_ids: Vec<String> = current.difference(&requested).cloned().collect();
        for trap_id in &add_ids {
            self.bind_trap(trap_id, &group)?;
        }
        for trap_id in &remove_ids {
            self.unbind_trap(trap_id, &group)?;
        }

        audit_log!(AuditRecord::new(
            if is_new {
                AuditCategory::ResourceCreate
            } else {
                AuditCategory::ResourceModify
            },
            "CoppOrch",
            "apply_trap_group"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(group.clone())
        .with_object_type("copp_trap_group")
        .with_details(serde_json::json!({
            "added": add_ids,
            "removed": remove_ids,
        })));
        Ok(())
    }

    async fn handle_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let group = entry.key.clone();
        if group == DEFAULT_TRAP_GROUP {
            audit_log!(AuditRecord::new(
                AuditCategory::ResourceDelete,
                "CoppOrch",
                "remove_trap_group"
            )
            .with_object_id(group.clone())
            .with_object_type("copp_trap_group")
            .with_error("reserved default group"));
            return Err(TaskError::conflict("cannot delete the default trap group"));
        }

        let oid = match self.groups.get(&group) {
            Some(existing) => existing.oid,
            None => return Err(TaskError::ignored(format!("unknown trap group {}", group))),
        };

        // Policer, receive channel, then bound traps, then the group.
        self.apply_policer(&group, None)?;
        self.apply_genetlink(&group, None)?;
        let bound: Vec<String> = self.groups[&group].trap_ids.iter().cloned().collect();
        for trap_id in &bound {
            self.unbind_trap(trap_id, &group)?;
        }
        self.callbacks
            .remove_trap_group(oid)
            .map_err(|e| TaskError::from_asic(group.clone(), e))?;
        self.groups.remove(&group);
        self.stats.groups_removed += 1;

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceDelete,
            "CoppOrch",
            "remove_trap_group"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(group)
        .with_object_type("copp_trap_group"));
        Ok(())
    }
}

#[async_trait]
impl Orch for CoppOrch {
    fn name(&self) -> &str {
        "CoppOrch"
    }

    async fn do_task(&mut self) {
        if !self.ensure_default_group() {
            return;
        }

        let batch = self.ctx.read().expect("context lock poisoned").batch_size;
        self.consumer.add_to_sync(self.copp_sub.pops(batch));

        for entry in self.consumer.drain() {
            let status = match entry.op {
                Operation::Set => self.handle_set(&entry).await.to_status(),
                Operation::Del => self.handle_del(&entry).await.to_status(),
            };
            match status {
                TaskStatus::NeedRetry => {
                    self.stats.retries += 1;
                    self.consumer.retry(entry);
                }
                s if s.is_failure() => {
                    self.stats.errors += 1;
                    error!("{}: dropping {} after {:?}", COPP_TABLE, entry.key, s);
                }
                _ => {}
            }
        }
    }

    async fn on_timer(&mut self) {
        let bound = self.flex_counters.drain_pending();
        if bound > 0 {
            info!("bound {} deferred trap counters", bound);
        }
    }

    fn priority(&self) -> i32 {
        30
    }

    fn has_pending_tasks(&self) -> bool {
        // Stays schedulable until the default group exists.
        !self.default_ready || self.consumer.has_pending() || self.copp_sub.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.consumer.dump()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{FLEX_COUNTER_TABLE, VID_TO_RID_TABLE};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use switchd_orch_common::OrchContext;

    #[derive(Default)]
    struct MockAsic {
        next_oid: AtomicU64,
        ops: Mutex<Vec<String>>,
    }

    impl MockAsic {
        fn alloc(&self) -> u64 {
            self.next_oid.fetch_add(1, Ordering::SeqCst) + 0x100
        }

        fn log(&self, op: String) {
            self.ops.lock().unwrap().push(op);
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    impl CoppOrchCallbacks for MockAsic {
        fn create_trap_group(&self, queue: u8) -> AsicResult<HostifTrapGroupOid> {
            let oid = self.alloc();
            self.log(format!("create_trap_group q={} -> 0x{:x}", queue, oid));
            Ok(HostifTrapGroupOid::from_raw(oid).unwrap())
        }

        fn set_trap_group_queue(&self, group: HostifTrapGroupOid, queue: u8) -> AsicResult<()> {
            self.log(format!("set_trap_group_queue {} q={}", group, queue));
            Ok(())
        }

        fn remove_trap_group(&self, group: HostifTrapGroupOid) -> AsicResult<()> {
            self.log(format!("remove_trap_group {}", group));
            Ok(())
        }

        fn create_policer(&self, config: &PolicerConfig) -> AsicResult<PolicerOid> {
            let oid = self.alloc();
            self.log(format!("create_policer cir={} -> 0x{:x}", config.cir, oid));
            Ok(PolicerOid::from_raw(oid).unwrap())
        }

        fn set_policer_attrs(&self, policer: PolicerOid, config: &PolicerConfig) -> AsicResult<()> {
            self.log(format!("set_policer_attrs {} cir={}", policer, config.cir));
            Ok(())
        }

        fn remove_policer(&self, policer: PolicerOid) -> AsicResult<()> {
            self.log(format!("remove_policer {}", policer));
            Ok(())
        }

        fn bind_group_policer(
            &self,
            group: HostifTrapGroupOid,
            policer: Option<PolicerOid>,
        ) -> AsicResult<()> {
            self.log(format!(
                "bind_group_policer {} {:?}",
                group,
                policer.map(|p| p.as_raw())
            ));
            Ok(())
        }

        fn create_trap(
            &self,
            trap_id: &str,
            action: CoppTrapAction,
            priority: u32,
            group: HostifTrapGroupOid,
        ) -> AsicResult<HostifTrapOid> {
            let oid = self.alloc();
            self.log(format!(
                "create_trap {} {} p={} g={} -> 0x{:x}",
                trap_id,
                action.as_str(),
                priority,
                group,
                oid
            ));
            Ok(HostifTrapOid::from_raw(oid).unwrap())
        }

        fn set_trap_attrs(
            &self,
            trap: HostifTrapOid,
            action: CoppTrapAction,
            priority: u32,
            group: HostifTrapGroupOid,
        ) -> AsicResult<()> {
            self.log(format!(
                "set_trap_attrs {} {} p={} g={}",
                trap,
                action.as_str(),
                priority,
                group
            ));
            Ok(())
        }

        fn remove_trap(&self, trap: HostifTrapOid) -> AsicResult<()> {
            self.log(format!("remove_trap {}", trap));
            Ok(())
        }

        fn create_genetlink_channel(&self, name: &str, mcgrp: &str) -> AsicResult<HostifChannelOid> {
            let oid = self.alloc();
            self.log(format!("create_genetlink {}/{} -> 0x{:x}", name, mcgrp, oid));
            Ok(HostifChannelOid::from_raw(oid).unwrap())
        }

        fn remove_genetlink_channel(&self, channel: HostifChannelOid) -> AsicResult<()> {
            self.log(format!("remove_genetlink {}", channel));
            Ok(())
        }
    }

    struct Fixture {
        app_db: Db,
        counter_db: Db,
        orch: CoppOrch,
        asic: Arc<MockAsic>,
    }

    fn fixture() -> Fixture {
        let app_db = Db::new();
        let counter_db = Db::new();
        let asic = Arc::new(MockAsic::default());
        let orch = CoppOrch::new(
            &app_db,
            &counter_db,
            OrchContext::default().into_shared(),
            Arc::clone(&asic) as Arc<dyn CoppOrchCallbacks>,
        );
        Fixture {
            app_db,
            counter_db,
            orch,
            asic,
        }
    }

    fn fv(field: &str, value: &str) -> (String, String) {
        (field.to_string(), value.to_string())
    }

    fn trap_ids(f: &Fixture, group: &str) -> Vec<String> {
        f.orch
            .get_group(group)
            .map(|g| g.trap_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_group_create_applies_in_fixed_order() {
        let mut f = fixture();
        f.app_db.producer(COPP_TABLE).set(
            "g1",
            vec![
                fv(fields::TRAP_IDS, "bgp,lacp"),
                fv(fields::QUEUE, "3"),
                fv(fields::CIR, "600"),
                fv(fields::CBS, "600"),
                fv(fields::GENETLINK_NAME, "psample"),
                fv(fields::GENETLINK_MCGRP_NAME, "packets"),
            ],
        );

        f.orch.do_task().await;

        assert_eq!(trap_ids(&f, "g1"), vec!["bgp".to_string(), "lacp".to_string()]);
        let ops = f.asic.ops();
        let group_pos = ops
            .iter()
            .position(|o| o.contains("create_trap_group q=3"))
            .unwrap();
        let policer_pos = ops.iter().position(|o| o.contains("create_policer")).unwrap();
        let genetlink_pos = ops.iter().position(|o| o.contains("create_genetlink")).unwrap();
        let trap_pos = ops.iter().position(|o| o.contains("create_trap bgp")).unwrap();
        assert!(group_pos < policer_pos);
        assert!(policer_pos < genetlink_pos);
        assert!(genetlink_pos < trap_pos);
    }

    #[tokio::test]
    async fn test_trap_id_diff_add_remove_keep() {
        let mut f = fixture();
        f.app_db
            .producer(COPP_TABLE)
            .set("g1", vec![fv(fields::TRAP_IDS, "bgp,lacp")]);
        f.orch.do_task().await;
        let before = f.asic.ops().len();

        f.app_db
            .producer(COPP_TABLE)
            .set("g1", vec![fv(fields::TRAP_IDS, "lacp,arp_req")]);
        f.orch.do_task().await;

        assert_eq!(
            trap_ids(&f, "g1"),
            vec!["arp_req".to_string(), "lacp".to_string()]
        );
        assert_eq!(f.orch.trap_binding("bgp"), None);
        assert_eq!(f.orch.trap_binding("lacp"), Some("g1"));

        let after: Vec<String> = f.asic.ops()[before..].to_vec();
        assert!(after.iter().any(|o| o.contains("create_trap arp_req")));
        assert!(after.iter().any(|o| o.contains("remove_trap")));
        // lacp was untouched: no attr writes or recreate for it.
        assert!(!after.iter().any(|o| o.contains("create_trap lacp")));
        assert!(!after.iter().any(|o| o.contains("set_trap_attrs")));
    }

    #[tokio::test]
    async fn test_trap_moves_to_claiming_group_on_removal() {
        let mut f = fixture();
        f.app_db
            .producer(COPP_TABLE)
            .set("g1", vec![fv(fields::TRAP_IDS, "bgp")]);
        f.orch.do_task().await;
        f.app_db
            .producer(COPP_TABLE)
            .set("g2", vec![fv(fields::TRAP_IDS, "lacp,bgp")]);
        f.orch.do_task().await;

        // g2's SET claimed bgp away from g1.
        assert_eq!(f.orch.trap_binding("bgp"), Some("g2"));
        assert_eq!(trap_ids(&f, "g1"), Vec::<String>::new());
        // The object was rebound, not recreated.
        let creates = f
            .asic
            .ops()
            .iter()
            .filter(|o| o.contains("create_trap bgp"))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_default_group_delete_refused() {
        let mut f = fixture();
        f.orch.do_task().await;
        let before = f.asic.ops().len();

        f.app_db.producer(COPP_TABLE).del(DEFAULT_TRAP_GROUP);
        f.orch.do_task().await;

        // Permanent refusal: no retries and no mutation.
        assert!(f.orch.get_group(DEFAULT_TRAP_GROUP).is_some());
        assert!(!f.orch.has_pending_tasks());
        assert_eq!(f.orch.stats().errors, 1);
        assert_eq!(f.asic.ops().len(), before);
    }

    #[tokio::test]
    async fn test_baseline_trap_cannot_leave_default_group() {
        let mut f = fixture();
        f.app_db
            .producer(COPP_TABLE)
            .set(DEFAULT_TRAP_GROUP, vec![fv(fields::TRAP_IDS, "bgp")]);
        f.orch.do_task().await;

        let ids = trap_ids(&f, DEFAULT_TRAP_GROUP);
        assert!(ids.contains(&DEFAULT_TRAP_ID.to_string()));
        assert!(ids.contains(&"bgp".to_string()));
    }

    #[tokio::test]
    async fn test_policer_update_patches_in_place() {
        let mut f = fixture();
        f.app_db.producer(COPP_TABLE).set(
            "g1",
            vec![
                fv(fields::TRAP_IDS, "bgp"),
                fv(fields::CIR, "600"),
                fv(fields::CBS, "600"),
            ],
        );
        f.orch.do_task().await;
        assert_eq!(f.orch.policer_ref_count("g1"), Some(1));

        f.app_db.producer(COPP_TABLE).set(
            "g1",
            vec![
                fv(fields::TRAP_IDS, "bgp"),
                fv(fields::CIR, "1200"),
                fv(fields::CBS, "600"),
            ],
        );
        f.orch.do_task().await;

        let ops = f.asic.ops();
        assert_eq!(ops.iter().filter(|o| o.contains("create_policer")).count(), 1);
        assert!(ops.iter().any(|o| o.contains("set_policer_attrs") && o.contains("cir=1200")));
    }

    #[tokio::test]
    async fn test_group_delete_tears_down_everything() {
        let mut f = fixture();
        f.app_db.producer(COPP_TABLE).set(
            "g1",
            vec![
                fv(fields::TRAP_IDS, "bgp"),
                fv(fields::CIR, "600"),
                fv(fields::CBS, "600"),
                fv(fields::GENETLINK_NAME, "psample"),
                fv(fields::GENETLINK_MCGRP_NAME, "packets"),
            ],
        );
        f.orch.do_task().await;

        f.app_db.producer(COPP_TABLE).del("g1");
        f.orch.do_task().await;

        assert!(f.orch.get_group("g1").is_none());
        assert_eq!(f.orch.policer_ref_count("g1"), None);
        let ops = f.asic.ops();
        let policer_pos = ops.iter().position(|o| o.contains("remove_policer")).unwrap();
        let genetlink_pos = ops.iter().position(|o| o.contains("remove_genetlink")).unwrap();
        let trap_pos = ops.iter().position(|o| o.contains("remove_trap 0x")).unwrap();
        let group_pos = ops
            .iter()
            .rposition(|o| o.contains("remove_trap_group"))
            .unwrap();
        assert!(policer_pos < group_pos);
        assert!(genetlink_pos < group_pos);
        assert!(trap_pos < group_pos);
    }

    #[tokio::test]
    async fn test_counter_binding_deferred_until_translation() {
        let mut f = fixture();
        f.app_db
            .producer(COPP_TABLE)
            .set("g1", vec![fv(fields::TRAP_IDS, "bgp")]);
        f.orch.do_task().await;

        assert_eq!(f.orch.pending_counter_bindings(), 1);
        f.orch.on_timer().await;
        assert_eq!(f.orch.pending_counter_bindings(), 1);

        // The syncing process fills in the translation.
        let vid = {
            let ops = f.asic.ops();
            let line = ops
                .iter()
                .find(|o| o.contains("create_trap bgp"))
                .unwrap()
                .clone();
            let hex = line.rsplit("-> 0x").next().unwrap();
            u64::from_str_radix(hex, 16).unwrap()
        };
        f.counter_db.table(VID_TO_RID_TABLE).set(
            &format!("0x{:x}", vid),
            vec![(fields::RID.to_string(), "0x9999".to_string())],
        );

        f.orch.on_timer().await;
        assert_eq!(f.orch.pending_counter_bindings(), 0);
        assert!(f
            .counter_db
            .table(FLEX_COUNTER_TABLE)
            .exists(&format!("FLOW_CNT_TRAP:0x{:x}", vid)));
    }
}
