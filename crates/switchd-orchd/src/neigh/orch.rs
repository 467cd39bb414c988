//! Neighbor orchestration logic.

use super::types::{NeighOrchStats, NeighborEntry, NeighborKey};
use crate::tables::{
    fields, APP_NEIGH_TABLE, STATE_NEIGH_TABLE, STATE_PORT_TABLE, STATE_VLAN_TABLE,
};
use async_trait::async_trait;
use log::error;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use switchd_asic::{AsicResult, NeighborEntryOid};
use switchd_orch_common::{
    Consumer, ConsumerConfig, Db, KeyOpFieldsValues, Operation, Orch, ProducerTable,
    SharedContext, SubscriberTable, Table, TaskError, TaskResult, TaskResultExt, TaskStatus,
};
use switchd_types::{MacAddress, VLAN_PREFIX};

/// ASIC-facing side effects issued by NeighOrch.
pub trait NeighOrchCallbacks: Send + Sync {
    /// Creates a neighbor entry, returning its handle.
    fn create_neighbor(
        &self,
        interface: &str,
        ip: IpAddr,
        mac: MacAddress,
    ) -> AsicResult<NeighborEntryOid>;

    /// Patches the MAC attribute of an existing neighbor entry.
    fn set_neighbor_mac(&self, oid: NeighborEntryOid, mac: MacAddress) -> AsicResult<()>;

    /// Removes a neighbor entry.
    fn remove_neighbor(&self, oid: NeighborEntryOid) -> AsicResult<()>;
}

/// Neighbor orchestrator.
pub struct NeighOrch {
    ctx: SharedContext,
    callbacks: Arc<dyn NeighOrchCallbacks>,
    neigh_sub: SubscriberTable,
    consumer: Consumer,
    state_port: Table,
    state_vlan: Table,
    state_neigh: ProducerTable,
    neighbors: HashMap<NeighborKey, NeighborEntry>,
    /// Next-hop users currently referencing each neighbor.
    next_hop_refs: HashMap<NeighborKey, u32>,
    stats: NeighOrchStats,
}

impl NeighOrch {
    /// Creates a NeighOrch wired to the app and state databases.
    pub fn new(
        app_db: &Db,
        state_db: &Db,
        ctx: SharedContext,
        callbacks: Arc<dyn NeighOrchCallbacks>,
    ) -> Self {
        Self {
            ctx,
            callbacks,
            neigh_sub: app_db.subscriber(APP_NEIGH_TABLE),
            consumer: Consumer::new(ConsumerConfig::new(APP_NEIGH_TABLE)),
            state_port: state_db.table(STATE_PORT_TABLE),
            state_vlan: state_db.table(STATE_VLAN_TABLE),
            state_neigh: state_db.producer(STATE_NEIGH_TABLE),
            neighbors: HashMap::new(),
            next_hop_refs: HashMap::new(),
            stats: NeighOrchStats::default(),
        }
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &NeighOrchStats {
        &self.stats
    }

    /// Returns a programmed neighbor.
    pub fn get_neighbor(&self, key: &NeighborKey) -> Option<&NeighborEntry> {
        self.neighbors.get(key)
    }

    /// Returns the number of programmed neighbors.
    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Records a next-hop user of a neighbor.
    ///
    /// Callers may only release what they previously acquired.
    pub fn increase_next_hop_ref(&mut self, key: &NeighborKey) -> bool {
        if !self.neighbors.contains_key(key) {
            return false;
        }
        *self.next_hop_refs.entry(key.clone()).or_insert(0) += 1;
        true
    }

    /// Releases a next-hop user of a neighbor.
    pub fn decrease_next_hop_ref(&mut self, key: &NeighborKey) -> bool {
        match self.next_hop_refs.get_mut(key) {
            Some(refs) if *refs > 0 => {
                *refs -= 1;
                if *refs == 0 {
                    self.next_hop_refs.remove(key);
                }
                true
            }
            _ => false,
        }
    }

    /// Returns the next-hop reference count for a neighbor.
    pub fn next_hop_ref_count(&self, key: &NeighborKey) -> u32 {
        self.next_hop_refs.get(key).copied().unwrap_or(0)
    }

    /// The neighbor key embeds an IP, so only the first colon separates
    /// the interface (IPv6 addresses contain colons themselves).
    fn parse_key(key: &str) -> TaskResult<NeighborKey> {
        let (interface, ip_raw) = key
            .split_once(':')
            .filter(|(intf, ip)| !intf.is_empty() && !ip.is_empty())
            .ok_or_else(|| TaskError::parse(format!("bad neighbor key: {}", key)))?;
        let ip: IpAddr = ip_raw
            .parse()
            .map_err(|_| TaskError::parse(format!("bad neighbor IP: {}", ip_raw)))?;
        Ok(NeighborKey::new(interface, ip))
    }

    fn interface_ready(&self, interface: &str) -> bool {
        if interface.starts_with(VLAN_PREFIX) {
            self.state_vlan.exists(interface)
        } else {
            self.state_port.exists(interface)
        }
    }

    async fn handle_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let key = Self::parse_key(&entry.key)?;

        let mac: MacAddress = entry
            .get_field(fields::NEIGH)
            .ok_or_else(|| TaskError::conflict("neighbor missing MAC field"))?
            .parse()
            .map_err(|e: switchd_types::ParseError| TaskError::parse(e.to_string()))?;
        if mac.is_zero() {
            return Err(TaskError::dependency(format!(
                "{}: MAC not yet assigned",
                key
            )));
        }

        if !self.interface_ready(&key.interface) {
            return Err(TaskError::dependency(format!(
                "interface {} not ready",
                key.interface
            )));
        }

        if let Some(existing) = self.neighbors.get_mut(&key) {
            if existing.mac == mac {
                return Err(TaskError::ignored("neighbor unchanged"));
            }
            // MAC is a patchable attribute, not identity.
            self.callbacks
                .set_neighbor_mac(existing.oid, mac)
                .map_err(|e| TaskError::from_asic(key.to_string(), e))?;
            existing.mac = mac;
            self.stats.neighbors_updated += 1;
        } else {
            let oid = self
                .callbacks
                .create_neighbor(&key.interface, key.ip, mac)
                .map_err(|e| TaskError::from_asic(key.to_string(), e))?;
            self.neighbors.insert(
                key.clone(),
                NeighborEntry {
                    key: key.clone(),
                    mac,
                    oid,
                },
            );
            self.stats.neighbors_added += 1;
        }

        self.state_neigh.set(
            &entry.key,
            vec![(fields::NEIGH.to_string(), mac.to_string())],
        );
        Ok(())
    }

    async fn handle_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let key = Self::parse_key(&entry.key)?;

        let oid = match self.neighbors.get(&key) {
            Some(existing) => existing.oid,
            None => return Err(TaskError::ignored(format!("unknown neighbor {}", key))),
        };

        let refs = self.next_hop_ref_count(&key);
        if refs > 0 {
            return Err(TaskError::busy(key.to_string(), refs));
        }

        self.callbacks
            .remove_neighbor(oid)
            .map_err(|e| TaskError::from_asic(key.to_string(), e))?;
        self.neighbors.remove(&key);
        self.state_neigh.del(&entry.key);
        self.stats.neighbors_removed += 1;
        Ok(())
    }
}

#[async_trait]
impl Orch for NeighOrch {
    fn name(&self) -> &str {
        "NeighOrch"
    }

    async fn do_task(&mut self) {
        let batch = self.ctx.read().expect("context lock poisoned").batch_size;
        self.consumer.add_to_sync(self.neigh_sub.pops(batch));

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
                    error!("{}: dropping {} after {:?}", APP_NEIGH_TABLE, entry.key, s);
                }
                _ => {}
            }
        }
    }

    fn priority(&self) -> i32 {
        15
    }

    fn has_pending_tasks(&self) -> bool {
        self.consumer.has_pending() || self.neigh_sub.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.consumer.dump()
    }
}
