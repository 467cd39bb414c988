//! ASIC channel adapter.
//!
//! The forwarding ASIC is programmed by a separate syncing process that
//! consumes ASIC-facing change tables; this adapter implements the
//! orchestrators' callback traits by allocating virtual object ids and
//! publishing the corresponding rows. The syncing process fills the
//! virtual-to-real translation table as it realizes each object, which is
//! what the deferred flex-counter binding waits for.

use crate::copp::{CoppOrchCallbacks, CoppTrapAction, PolicerConfig};
use crate::debug_counter::{DebugCounterOrchCallbacks, DebugCounterType};
use crate::neigh::NeighOrchCallbacks;
use crate::tables::{
    ASIC_DEBUG_COUNTER_TABLE, ASIC_HOSTIF_TABLE, ASIC_NEIGH_TABLE, ASIC_POLICER_TABLE,
    ASIC_TRAP_GROUP_TABLE, ASIC_TRAP_TABLE, COUNTERS_PORT_NAME_MAP,
};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use switchd_asic::{
    AsicResult, DebugCounterOid, HostifChannelOid, HostifTrapGroupOid, HostifTrapOid,
    NeighborEntryOid, PolicerOid, PortOid, RawAsicObjectId,
};
use switchd_orch_common::{Db, FieldValue};
use switchd_types::MacAddress;

/// First virtual id handed out; keeps handles visibly distinct from the
/// real ids assigned by the syncing process.
const VID_BASE: u64 = 0x1000_0000;

/// Publishes ASIC programming to the syncing process's change tables.
pub struct AsicChannel {
    asic_db: Db,
    counter_db: Db,
    next_vid: AtomicU64,
}

impl AsicChannel {
    /// Creates an adapter over the ASIC-facing and counter databases.
    pub fn new(asic_db: Db, counter_db: Db) -> Self {
        Self {
            asic_db,
            counter_db,
            next_vid: AtomicU64::new(VID_BASE),
        }
    }

    fn alloc(&self) -> RawAsicObjectId {
        self.next_vid.fetch_add(1, Ordering::SeqCst)
    }

    fn set(&self, table: &str, vid: RawAsicObjectId, fvs: Vec<FieldValue>) {
        self.asic_db.producer(table).set(&format!("0x{:x}", vid), fvs);
    }

    fn del(&self, table: &str, vid: RawAsicObjectId) {
        self.asic_db.producer(table).del(&format!("0x{:x}", vid));
    }
}

fn fv(field: &str, value: impl ToString) -> FieldValue {
    (field.to_string(), value.to_string())
}

impl NeighOrchCallbacks for AsicChannel {
    fn create_neighbor(
        &self,
        interface: &str,
        ip: IpAddr,
        mac: MacAddress,
    ) -> AsicResult<NeighborEntryOid> {
        let vid = self.alloc();
        self.set(
            ASIC_NEIGH_TABLE,
            vid,
            vec![
                fv("interface", interface),
                fv("ip", ip),
                fv("dst_mac", mac),
            ],
        );
        Ok(NeighborEntryOid::from_raw_unchecked(vid))
    }

    fn set_neighbor_mac(&self, oid: NeighborEntryOid, mac: MacAddress) -> AsicResult<()> {
        self.set(ASIC_NEIGH_TABLE, oid.as_raw(), vec![fv("dst_mac", mac)]);
        Ok(())
    }

    fn remove_neighbor(&self, oid: NeighborEntryOid) -> AsicResult<()> {
        self.del(ASIC_NEIGH_TABLE, oid.as_raw());
        Ok(())
    }
}

impl CoppOrchCallbacks for AsicChannel {
    fn create_trap_group(&self, queue: u8) -> AsicResult<HostifTrapGroupOid> {
        let vid = self.alloc();
        self.set(ASIC_TRAP_GROUP_TABLE, vid, vec![fv("queue", queue)]);
        Ok(HostifTrapGroupOid::from_raw_unchecked(vid))
    }

    fn set_trap_group_queue(&self, group: HostifTrapGroupOid, queue: u8) -> AsicResult<()> {
        self.set(ASIC_TRAP_GROUP_TABLE, group.as_raw(), vec![fv("queue", queue)]);
        Ok(())
    }

    fn remove_trap_group(&self, group: HostifTrapGroupOid) -> AsicResult<()> {
        self.del(ASIC_TRAP_GROUP_TABLE, group.as_raw());
        Ok(())
    }

    fn create_policer(&self, config: &PolicerConfig) -> AsicResult<PolicerOid> {
        let vid = self.alloc();
        self.set(
            ASIC_POLICER_TABLE,
            vid,
            vec![
                fv("meter_type", &config.meter_type),
                fv("mode", &config.mode),
                fv("cir", config.cir),
                fv("cbs", config.cbs),
            ],
        );
        Ok(PolicerOid::from_raw_unchecked(vid))
    }

    fn set_policer_attrs(&self, policer: PolicerOid, config: &PolicerConfig) -> AsicResult<()> {
        self.set(
            ASIC_POLICER_TABLE,
            policer.as_raw(),
            vec![fv("cir", config.cir), fv("cbs", config.cbs)],
        );
        Ok(())
    }

    fn remove_policer(&self, policer: PolicerOid) -> AsicResult<()> {
        self.del(ASIC_POLICER_TABLE, policer.as_raw());
        Ok(())
    }

    fn bind_group_policer(
        &self,
        group: HostifTrapGroupOid,
        policer: Option<PolicerOid>,
    ) -> AsicResult<()> {
        let bound = policer
            .map(|p| format!("0x{:x}", p.as_raw()))
            .unwrap_or_else(|| "null".to_string());
        self.set(
            ASIC_TRAP_GROUP_TABLE,
            group.as_raw(),
            vec![fv("policer", bound)],
        );
        Ok(())
    }

    fn create_trap(
        &self,
        trap_id: &str,
        action: CoppTrapAction,
        priority: u32,
        group: HostifTrapGroupOid,
    ) -> AsicResult<HostifTrapOid> {
        let vid = self.alloc();
        self.set(
            ASIC_TRAP_TABLE,
            vid,
            vec![
                fv("trap_type", trap_id),
                fv("action", action.as_str()),
                fv("priority", priority),
                fv("group", format!("0x{:x}", group.as_raw())),
            ],
        );
        Ok(HostifTrapOid::from_raw_unchecked(vid))
    }

    fn set_trap_attrs(
        &self,
        trap: HostifTrapOid,
        action: CoppTrapAction,
        priority: u32,
        group: HostifTrapGroupOid,
    ) -> AsicResult<()> {
        self.set(
            ASIC_TRAP_TABLE,
            trap.as_raw(),
            vec![
                fv("action", action.as_str()),
                fv("priority", priority),
                fv("group", format!("0x{:x}", group.as_raw())),
            ],
        );
        Ok(())
    }

    fn remove_trap(&self, trap: HostifTrapOid) -> AsicResult<()> {
        self.del(ASIC_TRAP_TABLE, trap.as_raw());
        Ok(())
    }

    fn create_genetlink_channel(&self, name: &str, mcgrp: &str) -> AsicResult<HostifChannelOid> {
        let vid = self.alloc();
        self.set(
            ASIC_HOSTIF_TABLE,
            vid,
            vec![
                fv("type", "genetlink"),
                fv("name", name),
                fv("mcgrp", mcgrp),
            ],
        );
        Ok(HostifChannelOid::from_raw_unchecked(vid))
    }

    fn remove_genetlink_channel(&self, channel: HostifChannelOid) -> AsicResult<()> {
        self.del(ASIC_HOSTIF_TABLE, channel.as_raw());
        Ok(())
    }
}

impl DebugCounterOrchCallbacks for AsicChannel {
    fn create_debug_counter(
        &self,
        counter_type: DebugCounterType,
        reasons: &[String],
    ) -> AsicResult<DebugCounterOid> {
        let vid = self.alloc();
        self.set(
            ASIC_DEBUG_COUNTER_TABLE,
            vid,
            vec![
                fv("type", counter_type.as_str()),
                fv("drop_reasons", reasons.join(",")),
            ],
        );
        Ok(DebugCounterOid::from_raw_unchecked(vid))
    }

    fn remove_debug_counter(&self, oid: DebugCounterOid) -> AsicResult<()> {
        self.del(ASIC_DEBUG_COUNTER_TABLE, oid.as_raw());
        Ok(())
    }

    fn add_drop_reason(&self, oid: DebugCounterOid, reason: &str) -> AsicResult<()> {
        self.set(
            ASIC_DEBUG_COUNTER_TABLE,
            oid.as_raw(),
            vec![fv("add_reason", reason)],
        );
        Ok(())
    }

    fn remove_drop_reason(&self, oid: DebugCounterOid, reason: &str) -> AsicResult<()> {
        self.set(
            ASIC_DEBUG_COUNTER_TABLE,
            oid.as_raw(),
            vec![fv("del_reason", reason)],
        );
        Ok(())
    }

    fn get_port_oid(&self, alias: &str) -> Option<PortOid> {
        let raw = self.counter_db.table(COUNTERS_PORT_NAME_MAP).hget(alias, "oid")?;
        let raw = raw.strip_prefix("0x")?;
        PortOid::from_raw(u64::from_str_radix(raw, 16).ok()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_vids_are_unique_and_published() {
        let asic_db = Db::new();
        let channel = AsicChannel::new(asic_db.clone(), Db::new());

        let g1 = channel.create_trap_group(0).unwrap();
        let g2 = channel.create_trap_group(3).unwrap();
        assert_ne!(g1.as_raw(), g2.as_raw());

        let key = format!("0x{:x}", g2.as_raw());
        assert_eq!(
            asic_db.table(ASIC_TRAP_GROUP_TABLE).hget(&key, "queue"),
            Some("3".to_string())
        );
    }

    #[test]
    fn test_neighbor_round_trip() {
        let asic_db = Db::new();
        let channel = AsicChannel::new(asic_db.clone(), Db::new());

        let oid = channel
            .create_neighbor(
                "Vlan100",
                "10.0.0.5".parse().unwrap(),
                "52:54:00:00:00:05".parse().unwrap(),
            )
            .unwrap();
        let key = format!("0x{:x}", oid.as_raw());
        assert!(asic_db.table(ASIC_NEIGH_TABLE).exists(&key));

        channel.remove_neighbor(oid).unwrap();
        assert!(!asic_db.table(ASIC_NEIGH_TABLE).exists(&key));
    }

    #[test]
    fn test_port_oid_lookup() {
        let counter_db = Db::new();
        counter_db.table(COUNTERS_PORT_NAME_MAP).set(
            "Ethernet0",
            vec![("oid".to_string(), "0x1001".to_string())],
        );
        let channel = AsicChannel::new(Db::new(), counter_db);

        assert_eq!(
            channel.get_port_oid("Ethernet0").map(|o| o.as_raw()),
            Some(0x1001)
        );
        assert!(channel.get_port_oid("Ethernet4").is_none());
    }
}
