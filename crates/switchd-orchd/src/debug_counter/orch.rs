//! Debug counter orchestration logic.

use super::types::{DebugCounterEntry, DebugCounterOrchStats, DebugCounterType};
use crate::flex_counter::{FlexCounterGroup, FlexCounterManager};
use crate::tables::{
    fields, CONFIG_KEY_SEPARATOR, DEBUG_COUNTER_DROP_REASON_TABLE, DEBUG_COUNTER_TABLE,
};
use async_trait::async_trait;
use log::{debug, error, info};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use switchd_asic::{AsicResult, DebugCounterOid, PortOid};
use switchd_orch_common::{
    drain_events, split_key, Consumer, ConsumerConfig, Db, KeyOpFieldsValues, Operation, Orch,
    SharedContext, SubjectEvent, SubscriberTable, TaskError, TaskResult, TaskResultExt,
    TaskStatus,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// ASIC-facing side effects issued by DebugCounterOrch.
pub trait DebugCounterOrchCallbacks: Send + Sync {
    /// Creates a debug counter with an initial, non-empty reason set.
    fn create_debug_counter(
        &self,
        counter_type: DebugCounterType,
        reasons: &[String],
    ) -> AsicResult<DebugCounterOid>;

    fn remove_debug_counter(&self, oid: DebugCounterOid) -> AsicResult<()>;
    fn add_drop_reason(&self, oid: DebugCounterOid, reason: &str) -> AsicResult<()>;
    fn remove_drop_reason(&self, oid: DebugCounterOid, reason: &str) -> AsicResult<()>;

    /// Resolves a port alias to its ASIC handle.
    fn get_port_oid(&self, alias: &str) -> Option<PortOid>;
}

/// Debug counter orchestrator.
///
/// A counter cannot exist in the ASIC without at least one drop reason,
/// so half-configured sides wait in the free-counter / free-reason tables
/// until their other half arrives.
pub struct DebugCounterOrch {
    ctx: SharedContext,
    callbacks: Arc<dyn DebugCounterOrchCallbacks>,
    counter_sub: SubscriberTable,
    reason_sub: SubscriberTable,
    counter_consumer: Consumer,
    reason_consumer: Consumer,
    port_events: UnboundedReceiver<SubjectEvent>,
    /// Live ASIC counters.
    counters: HashMap<String, DebugCounterEntry>,
    /// Counters configured without any reason yet.
    free_counters: HashMap<String, DebugCounterType>,
    /// Reasons configured before their counter.
    free_reasons: HashMap<String, BTreeSet<String>>,
    /// Known ports, from the port add/remove fanout.
    ports: HashMap<String, PortOid>,
    flex_counters: FlexCounterManager,
    stats: DebugCounterOrchStats,
}

impl DebugCounterOrch {
    /// Creates a DebugCounterOrch wired to the app and counter databases.
    ///
    /// `port_events` is the receiver obtained by attaching to the port
    /// subject.
    pub fn new(
        app_db: &Db,
        counter_db: &Db,
        ctx: SharedContext,
        callbacks: Arc<dyn DebugCounterOrchCallbacks>,
        port_events: UnboundedReceiver<SubjectEvent>,
    ) -> Self {
        Self {
            ctx,
            callbacks,
            counter_sub: app_db.subscriber(DEBUG_COUNTER_TABLE),
            reason_sub: app_db.subscriber(DEBUG_COUNTER_DROP_REASON_TABLE),
            counter_consumer: Consumer::new(ConsumerConfig::new(DEBUG_COUNTER_TABLE)),
            reason_consumer: Consumer::new(ConsumerConfig::new(DEBUG_COUNTER_DROP_REASON_TABLE)),
            port_events,
            counters: HashMap::new(),
            free_counters: HashMap::new(),
            free_reasons: HashMap::new(),
            ports: HashMap::new(),
            flex_counters: FlexCounterManager::new(
                counter_db.clone(),
                FlexCounterGroup::DebugCounter,
            ),
            stats: DebugCounterOrchStats::default(),
        }
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &DebugCounterOrchStats {
        &self.stats
    }

    /// Returns a live counter.
    pub fn get_counter(&self, name: &str) -> Option<&DebugCounterEntry> {
        self.counters.get(name)
    }

    /// Returns true if a counter is configured but not yet live.
    pub fn is_free_counter(&self, name: &str) -> bool {
        self.free_counters.contains_key(name)
    }

    /// Returns buffered reasons for a not-yet-configured counter.
    pub fn free_reasons(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.free_reasons.get(name)
    }

    /// Returns the number of counter bindings waiting on id translation.
    pub fn pending_counter_bindings(&self) -> usize {
        self.flex_counters.pending_count()
    }

    /// Recomputes the per-port statistic list from every live
    /// port-scoped counter.
    fn refresh_port_binding(&mut self, alias: &str) {
        let oid = match self.ports.get(alias) {
            Some(oid) => *oid,
            None => return,
        };
        let stats: Vec<String> = self
            .counters
            .values()
            .filter(|c| c.counter_type.is_port_scoped())
            .map(|c| c.name.clone())
            .collect();
        if stats.is_empty() {
            self.flex_counters.unbind(oid.as_raw());
        } else {
            self.flex_counters.bind(alias, oid.as_raw(), stats);
        }
    }

    fn refresh_all_port_bindings(&mut self) {
        let aliases: Vec<String> = self.ports.keys().cloned().collect();
        for alias in aliases {
            self.refresh_port_binding(&alias);
        }
    }

    fn install_counter_bindings(&mut self, name: &str) {
        let entry = match self.counters.get(name) {
            Some(entry) => entry,
            None => return,
        };
        if entry.counter_type.is_port_scoped() {
            self.refresh_all_port_bindings();
        } else {
            let (oid, stat) = (entry.oid, entry.name.clone());
            self.flex_counters.bind(&stat.clone(), oid.as_raw(), vec![stat]);
        }
    }

    fn uninstall_counter_bindings(&mut self, entry: &DebugCounterEntry) {
        if entry.counter_type.is_port_scoped() {
            self.refresh_all_port_bindings();
        } else {
            self.flex_counters.unbind(entry.oid.as_raw());
        }
    }

    /// Creates the live ASIC counter once both the counter config and at
    /// least one reason exist.
    fn materialize(&mut self, name: &str, counter_type: DebugCounterType) -> TaskResult<()> {
        let reasons = self
            .free_reasons
            .remove(name)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| TaskError::internal("materialize without reasons"))?;

        let reason_list: Vec<String> = reasons.iter().cloned().collect();
        let oid = self
            .callbacks
            .create_debug_counter(counter_type, &reason_list)
            .map_err(|e| {
                // Put the reasons back so nothing is lost on retry.
                self.free_reasons.insert(name.to_string(), reasons.clone());
                TaskError::from_asic(name, e)
            })?;

        self.free_counters.remove(name);
        self.counters.insert(
            name.to_string(),
            DebugCounterEntry {
                name: name.to_string(),
                counter_type,
                oid,
                reasons,
            },
        );
        self.stats.counters_created += 1;
        self.install_counter_bindings(name);
        info!("debug counter {} created ({})", name, counter_type);
        Ok(())
    }

    fn remove_live_counter(&mut self, name: &str) -> TaskResult<DebugCounterEntry> {
        let entry = self
            .counters
            .remove(name)
            .ok_or_else(|| TaskError::internal("remove of unknown live counter"))?;
        self.uninstall_counter_bindings(&entry);
        self.callbacks
            .remove_debug_counter(entry.oid)
            .map_err(|e| TaskError::from_asic(name, e))?;
        self.stats.counters_removed += 1;
        Ok(entry)
    }

    async fn handle_counter_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let name = entry.key.clone();
        let counter_type: DebugCounterType = entry
            .get_field(fields::COUNTER_TYPE)
            .ok_or_else(|| TaskError::conflict("counter missing type"))?
            .parse()
            .map_err(|_| TaskError::parse("unknown counter type"))?;

        if let Some(live) = self.counters.get(&name) {
            if live.counter_type == counter_type {
                return Err(TaskError::ignored("counter unchanged"));
            }
            // Type is identity-relevant: tear down and recreate with the
            // same reason set.
            let old = self.remove_live_counter(&name)?;
            self.free_reasons.insert(name.clone(), old.reasons);
            return self.materialize(&name, counter_type);
        }

        match self.free_reasons.get(&name) {
            Some(reasons) if !reasons.is_empty() => self.materialize(&name, counter_type),
            _ => {
                debug!("counter {} has no reasons yet, buffering", name);
                self.free_counters.insert(name, counter_type);
                Ok(())
            }
        }
    }

    async fn handle_counter_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let name = entry.key.clone();
        if self.free_counters.remove(&name).is_some() {
            return Ok(());
        }
        if !self.counters.contains_key(&name) {
            return Err(TaskError::ignored(format!("unknown counter {}", name)));
        }

        let old = self.remove_live_counter(&name)?;
        // The reason rows are configured independently; keep them buffered
        // in case the counter comes back.
        self.free_reasons.insert(name, old.reasons);
        Ok(())
    }

    fn parse_reason_key(key: &str) -> TaskResult<(String, String)> {
        let (name, reason) = split_key(key, CONFIG_KEY_SEPARATOR)
            .ok_or_else(|| TaskError::parse(format!("bad drop reason key: {}", key)))?;
        Ok((name.to_string(), reason.to_string()))
    }

    async fn handle_reason_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let (name, reason) = Self::parse_reason_key(&entry.key)?;

        if let Some(live) = self.counters.get_mut(&name) {
            if live.reasons.contains(&reason) {
                return Err(TaskError::ignored("reason already bound"));
            }
            self.callbacks
                .add_drop_reason(live.oid, &reason)
                .map_err(|e| TaskError::from_asic(name.clone(), e))?;
            live.reasons.insert(reason);
            self.stats.reasons_added += 1;
            return Ok(());
        }

        self.free_reasons
            .entry(name.clone())
            .or_default()
            .insert(reason);
        self.stats.reasons_added += 1;

        // Both halves present now: reconcile into a live counter.
        if let Some(counter_type) = self.free_counters.get(&name).copied() {
            self.materialize(&name, counter_type)?;
        }
        Ok(())
    }

    async fn handle_reason_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let (name, reason) = Self::parse_reason_key(&entry.key)?;

        if let Some(live) = self.counters.get_mut(&name) {
            if !live.reasons.contains(&reason) {
                return Err(TaskError::ignored("reason not bound"));
            }
            if live.reasons.len() == 1 {
                // A counter must always retain at least one reason.
                return Err(TaskError::ignored(format!(
                    "refusing to remove last drop reason from {}",
                    name
                )));
            }
            self.callbacks
                .remove_drop_reason(live.oid, &reason)
                .map_err(|e| TaskError::from_asic(name.clone(), e))?;
            live.reasons.remove(&reason);
            self.stats.reasons_removed += 1;
            return Ok(());
        }

        match self.free_reasons.get_mut(&name) {
            Some(buffered) if buffered.contains(&reason) => {
                buffered.remove(&reason);
                if buffered.is_empty() {
                    self.free_reasons.remove(&name);
                }
                self.stats.reasons_removed += 1;
                Ok(())
            }
            _ => Err(TaskError::ignored("reason not configured")),
        }
    }

    fn handle_port_events(&mut self) {
        for event in drain_events(&mut self.port_events) {
            match event {
                SubjectEvent::PortAdded { alias } => {
                    if let Some(oid) = self.callbacks.get_port_oid(&alias) {
                        self.ports.insert(alias.clone(), oid);
                        self.refresh_port_binding(&alias);
                    }
                }
                SubjectEvent::PortRemoved { alias } => {
                    if let Some(oid) = self.ports.remove(&alias) {
                        self.flex_counters.unbind(oid.as_raw());
                    }
                }
                SubjectEvent::SystemMacLearned { .. } => {}
            }
        }
    }
}

#[async_trait]
impl Orch for DebugCounterOrch {
    fn name(&self) -> &str {
        "DebugCounterOrch"
    }

    async fn do_task(&mut self) {
        self.handle_port_events();

        let batch = self.ctx.read().expect("context lock poisoned").batch_size;
        self.counter_consumer.add_to_sync(self.counter_sub.pops(batch));
        self.reason_consumer.add_to_sync(self.reason_sub.pops(batch));

        for entry in self.counter_consumer.drain() {
            let status = match entry.op {
                Operation::Set => self.handle_counter_set(&entry).await.to_status(),
                Operation::Del => self.handle_counter_del(&entry).await.to_status(),
            };
            match status {
                TaskStatus::NeedRetry => {
                    self.stats.retries += 1;
                    self.counter_consumer.retry(entry);
                }
                s if s.is_failure() => {
                    self.stats.errors += 1;
                    error!("{}: dropping {} after {:?}", DEBUG_COUNTER_TABLE, entry.key, s);
                }
                _ => {}
            }
        }

        for entry in self.reason_consumer.drain() {
            let status = match entry.op {
                Operation::Set => self.handle_reason_set(&entry).await.to_status(),
                Operation::Del => self.handle_reason_del(&entry).await.to_status(),
            };
            match status {
                TaskStatus::NeedRetry => {
                    self.stats.retries += 1;
                    self.reason_consumer.retry(entry);
                }
                s if s.is_failure() => {
                    self.stats.errors += 1;
                    error!(
                        "{}: dropping {} after {:?}",
                        DEBUG_COUNTER_DROP_REASON_TABLE, entry.key, s
                    );
                }
                _ => {}
            }
        }
    }

    async fn on_timer(&mut self) {
        self.handle_port_events();
        let bound = self.flex_counters.drain_pending();
        if bound > 0 {
            info!("bound {} deferred debug counters", bound);
        }
    }

    fn priority(&self) -> i32 {
        50
    }

    fn has_pending_tasks(&self) -> bool {
        self.counter_consumer.has_pending()
            || self.reason_consumer.has_pending()
            || self.counter_sub.has_pending()
            || self.reason_sub.has_pending()
            || !self.port_events.is_empty()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        let mut tasks = self.counter_consumer.dump();
        tasks.extend(self.reason_consumer.dump());
        tasks
    }
}
