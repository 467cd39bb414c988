//! VXLAN orchestration logic.

use super::types::{NvoEntry, VnetEntry, Vni, VxlanMapEntry, VxlanOrchStats, VxlanTunnelEntry, MAX_VNI};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::kernel::commands::{
    build_add_vxlan_device_cmd, build_attach_vxlan_device_cmd, build_del_device_cmd,
    build_list_vxlan_devices_cmd, vxlan_device_name,
};
use crate::kernel::KernelClient;
use crate::tables::{
    fields, CONFIG_KEY_SEPARATOR, STATE_VLAN_TABLE, STATE_VXLAN_TUNNEL_TABLE, VNET_TABLE,
    VXLAN_EVPN_NVO_TABLE, VXLAN_TUNNEL_MAP_TABLE, VXLAN_TUNNEL_TABLE,
    VXLAN_VLAN_DEVICE_MAP_TABLE,
};
use async_trait::async_trait;
use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use switchd_orch_common::{
    split_key, Consumer, ConsumerConfig, Db, HasRefCount, KeyOpFieldsValues, Operation, Orch,
    ProducerTable, SharedContext, SubscriberTable, SyncMap, Table, TaskError, TaskResult,
    TaskResultExt, TaskStatus, WarmRestartHelper,
};
use switchd_types::VlanId;

/// The daemon name whose warm restart state gates mapping creation.
const VLAN_MANAGER_NAME: &str = "vlanmgr";

/// VXLAN orchestrator.
///
/// Owns tunnels (reference-counted by their mappings and NVO/VNET
/// bindings), VNI-to-VLAN mapping devices, and the VLAN-to-device table
/// consumed by neighbor suppression.
pub struct VxlanOrch {
    ctx: SharedContext,
    kernel: KernelClient,
    tunnel_sub: SubscriberTable,
    map_sub: SubscriberTable,
    nvo_sub: SubscriberTable,
    vnet_sub: SubscriberTable,
    tunnel_consumer: Consumer,
    map_consumer: Consumer,
    nvo_consumer: Consumer,
    vnet_consumer: Consumer,
    state_vlan: Table,
    state_tunnel: ProducerTable,
    device_map: ProducerTable,
    device_map_reader: Table,
    vlan_mgr_restart: WarmRestartHelper,
    tunnels: SyncMap<String, VxlanTunnelEntry>,
    maps: HashMap<String, VxlanMapEntry>,
    nvo: Option<NvoEntry>,
    vnets: HashMap<String, VnetEntry>,
    /// Kernel devices found at warm restart, not yet claimed by a mapping.
    pending_devices: HashSet<String>,
    /// Device-map rows found at warm restart, not yet re-published.
    pending_map_rows: HashSet<String>,
    reconciling: bool,
    stats: VxlanOrchStats,
}

impl VxlanOrch {
    /// Creates a VxlanOrch wired to the app and state databases.
    pub fn new(app_db: &Db, state_db: &Db, ctx: SharedContext, kernel: KernelClient) -> Self {
        Self {
            ctx,
            kernel,
            tunnel_sub: app_db.subscriber(VXLAN_TUNNEL_TABLE),
            map_sub: app_db.subscriber(VXLAN_TUNNEL_MAP_TABLE),
            nvo_sub: app_db.subscriber(VXLAN_EVPN_NVO_TABLE),
            vnet_sub: app_db.subscriber(VNET_TABLE),
            tunnel_consumer: Consumer::new(ConsumerConfig::new(VXLAN_TUNNEL_TABLE)),
            map_consumer: Consumer::new(ConsumerConfig::new(VXLAN_TUNNEL_MAP_TABLE)),
            nvo_consumer: Consumer::new(ConsumerConfig::new(VXLAN_EVPN_NVO_TABLE)),
            vnet_consumer: Consumer::new(ConsumerConfig::new(VNET_TABLE)),
            state_vlan: state_db.table(STATE_VLAN_TABLE),
            state_tunnel: state_db.producer(STATE_VXLAN_TUNNEL_TABLE),
            device_map: state_db.producer(VXLAN_VLAN_DEVICE_MAP_TABLE),
            device_map_reader: state_db.table(VXLAN_VLAN_DEVICE_MAP_TABLE),
            vlan_mgr_restart: WarmRestartHelper::new(state_db.clone(), VLAN_MANAGER_NAME),
            tunnels: SyncMap::new(),
            maps: HashMap::new(),
            nvo: None,
            vnets: HashMap::new(),
            pending_devices: HashSet::new(),
            pending_map_rows: HashSet::new(),
            reconciling: false,
            stats: VxlanOrchStats::default(),
        }
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &VxlanOrchStats {
        &self.stats
    }

    /// Returns a tunnel's reference count.
    pub fn tunnel_ref_count(&self, name: &str) -> Option<u32> {
        self.tunnels.ref_count(&name.to_string())
    }

    /// Returns true if a mapping exists.
    pub fn map_exists(&self, key: &str) -> bool {
        self.maps.contains_key(key)
    }

    /// Returns the active NVO binding.
    pub fn nvo(&self) -> Option<&NvoEntry> {
        self.nvo.as_ref()
    }

    /// Enumerates previously-created kernel devices and published mapping
    /// rows into the pending reconciliation sets.
    ///
    /// Called once at warm restart, before the first dispatch cycle.
    pub async fn begin_reconciliation(&mut self) {
        match self.kernel.exec_output(&build_list_vxlan_devices_cmd()).await {
            Ok(output) => {
                self.pending_devices = output
                    .lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect();
            }
            Err(e) => warn!("failed to enumerate kernel VXLAN devices: {}", e),
        }
        self.pending_map_rows = self.device_map_reader.keys().into_iter().collect();
        self.reconciling = true;
        info!(
            "warm restart: {} kernel devices, {} map rows pending reconciliation",
            self.pending_devices.len(),
            self.pending_map_rows.len()
        );
    }

    /// Deletes whatever is still pending after reconciliation: devices and
    /// rows the new configuration never claimed are stale.
    pub async fn finalize_reconciliation(&mut self) {
        if !self.reconciling {
            return;
        }
        for device in std::mem::take(&mut self.pending_devices) {
            info!("warm restart: removing stale device {}", device);
            if let Err(e) = self.kernel.exec(&build_del_device_cmd(&device)).await {
                warn!("failed to remove stale device {}: {}", device, e);
            }
            self.stats.stale_reconciled += 1;
        }
        for row in std::mem::take(&mut self.pending_map_rows) {
            info!("warm restart: removing stale device-map row {}", row);
            self.device_map.del(&row);
            self.stats.stale_reconciled += 1;
        }
        self.reconciling = false;
    }

    async fn handle_tunnel_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let name = entry.key.clone();
        let src_ip: Option<IpAddr> = match entry.get_field(fields::SRC_IP) {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|_| TaskError::parse(format!("bad src_ip: {}", raw)))?,
            ),
            None => None,
        };

        match self.tunnels.get_mut(&name) {
            Some(existing) => {
                if existing.src_ip == src_ip {
                    return Err(TaskError::ignored("tunnel unchanged"));
                }
                // Source IP is identity-relevant; refuse to patch a live
                // tunnel under its dependents.
                if existing.ref_count() > 0 {
                    return Err(TaskError::busy(name, existing.ref_count()));
                }
                existing.src_ip = src_ip;
            }
            None => {
                self.tunnels
                    .insert(name.clone(), VxlanTunnelEntry::new(name.clone(), src_ip));
                self.stats.tunnels_created += 1;

                audit_log!(AuditRecord::new(
                    AuditCategory::ResourceCreate,
                    "VxlanOrch",
                    "create_tunnel"
                )
                .with_outcome(AuditOutcome::Success)
                .with_object_id(name.clone())
                .with_object_type("vxlan_tunnel"));
            }
        }

        if let Some(ip) = src_ip {
            self.state_tunnel.set(
                &name,
                vec![
                    (fields::SRC_IP.to_string(), ip.to_string()),
                    (fields::STATE.to_string(), "active".to_string()),
                ],
            );
        }
        Ok(())
    }

    async fn handle_tunnel_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let name = entry.key.clone();
        let refs = match self.tunnels.ref_count(&name) {
            Some(refs) => refs,
            None => return Err(TaskError::ignored(format!("unknown tunnel {}", name))),
        };
        if refs > 0 {
            return Err(TaskError::busy(name, refs));
        }

        self.tunnels.remove(&name);
        self.state_tunnel.del(&name);
        self.stats.tunnels_removed += 1;

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceDelete,
            "VxlanOrch",
            "remove_tunnel"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(name)
        .with_object_type("vxlan_tunnel"));
        Ok(())
    }

    fn parse_map_key(key: &str) -> TaskResult<(String, VlanId)> {
        let (tunnel, vlan_name) = split_key(key, CONFIG_KEY_SEPARATOR)
            .ok_or_else(|| TaskError::parse(format!("bad tunnel map key: {}", key)))?;
        let vlan = VlanId::from_interface_name(vlan_name)
            .map_err(|e| TaskError::parse(e.to_string()))?;
        Ok((tunnel.to_string(), vlan))
    }

    fn vlan_manager_gate(&self) -> TaskResult<()> {
        if self.vlan_mgr_restart.is_enabled() {
            let replayed = self
                .vlan_mgr_restart
                .state()
                .is_some_and(|s| s.is_replayed());
            if !replayed {
                return Err(TaskError::dependency(
                    "VLAN manager warm restart not replayed",
                ));
            }
        }
        Ok(())
    }

    async fn create_map_device(
        &mut self,
        device: &str,
        vni: Vni,
        vlan: VlanId,
        src_ip: IpAddr,
    ) -> TaskResult<()> {
        if self.pending_devices.remove(device) {
            // Warm restart: the device survived from the previous run.
            info!("warm restart: reusing kernel device {}", device);
            return Ok(());
        }

        self.kernel
            .exec(&build_add_vxlan_device_cmd(device, vni, src_ip))
            .await
            .map_err(|e| TaskError::external(e.to_string()))?;

        if let Err(e) = self
            .kernel
            .exec(&build_attach_vxlan_device_cmd(device, vlan))
            .await
        {
            // Compensate for the step that already completed.
            if let Err(del_err) = self.kernel.exec(&build_del_device_cmd(device)).await {
                warn!("rollback of {} failed: {}", device, del_err);
            }
            return Err(TaskError::external(e.to_string()));
        }
        Ok(())
    }

    async fn remove_map(&mut self, key: &str) -> TaskResult<()> {
        let map = match self.maps.remove(key) {
            Some(map) => map,
            None => return Err(TaskError::ignored(format!("unknown mapping {}", key))),
        };

        if let Err(e) = self.kernel.exec(&build_del_device_cmd(&map.device)).await {
            warn!("failed to remove device {}: {}", map.device, e);
        }
        self.device_map.del(&map.vlan.interface_name());
        if self.tunnels.decrease_ref(&map.tunnel).is_err() {
            warn!("tunnel {} refcount inconsistent on map removal", map.tunnel);
        }
        self.stats.maps_removed += 1;

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceDelete,
            "VxlanOrch",
            "remove_tunnel_map"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(key.to_string())
        .with_object_type("vxlan_tunnel_map"));
        Ok(())
    }

    async fn handle_map_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let (tunnel_name, vlan) = Self::parse_map_key(&entry.key)?;
        let vni: Vni = entry
            .get_field(fields::VNI)
            .ok_or_else(|| TaskError::conflict("mapping missing vni"))?
            .parse()
            .map_err(|_| TaskError::parse("bad vni"))?;
        if vni == 0 || vni > MAX_VNI {
            return Err(TaskError::conflict(format!("vni {} out of range", vni)));
        }

        // Preconditions, cheapest first.
        let src_ip = match self.tunnels.get(&tunnel_name).map(|t| t.src_ip) {
            Some(Some(ip)) => ip,
            Some(None) => {
                return Err(TaskError::dependency(format!(
                    "tunnel {} has no source IP",
                    tunnel_name
                )))
            }
            None => {
                return Err(TaskError::dependency(format!(
                    "tunnel {} not created",
                    tunnel_name
                )))
            }
        };
        self.vlan_manager_gate()?;
        let vlan_name = vlan.interface_name();
        if !self.state_vlan.exists(&vlan_name) {
            return Err(TaskError::dependency(format!("{} not ready", vlan_name)));
        }

        if let Some(existing) = self.maps.get(&entry.key) {
            if existing.vni == vni {
                return Err(TaskError::ignored("mapping unchanged"));
            }
            // VNI is identity-relevant: full teardown before recreate.
            self.remove_map(&entry.key.clone()).await?;
        }

        let device = vxlan_device_name(&tunnel_name, vlan);
        self.create_map_device(&device, vni, vlan, src_ip).await?;

        self.tunnels
            .increase_ref(&tunnel_name)
            .map_err(|e| TaskError::internal(e.to_string()))?;
        self.maps.insert(
            entry.key.clone(),
            VxlanMapEntry {
                tunnel: tunnel_name.clone(),
                vlan,
                vni,
                device: device.clone(),
            },
        );
        self.pending_map_rows.remove(&vlan_name);
        self.device_map
            .set(&vlan_name, vec![(fields::DEVICE.to_string(), device.clone())]);
        self.stats.maps_created += 1;

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceCreate,
            "VxlanOrch",
            "create_tunnel_map"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(entry.key.clone())
        .with_object_type("vxlan_tunnel_map")
        .with_details(serde_json::json!({
            "tunnel": tunnel_name,
            "vlan": vlan_name,
            "vni": vni,
            "device": device,
        })));
        Ok(())
    }

    async fn handle_map_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        Self::parse_map_key(&entry.key)?;
        self.remove_map(&entry.key).await
    }

    async fn handle_nvo_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let tunnel = entry
            .get_field(fields::SOURCE_VTEP)
            .ok_or_else(|| TaskError::conflict("NVO missing source_vtep"))?
            .to_string();

        if let Some(existing) = &self.nvo {
            if existing.name != entry.key {
                return Err(TaskError::conflict(format!(
                    "NVO {} already active, only one allowed",
                    existing.name
                )));
            }
            if existing.tunnel == tunnel {
                return Err(TaskError::ignored("NVO unchanged"));
            }
        }

        if !self.tunnels.contains_key(&tunnel) {
            return Err(TaskError::dependency(format!("tunnel {} not created", tunnel)));
        }

        // Replacing the referenced tunnel releases the old reference.
        if let Some(existing) = self.nvo.take() {
            let _ = self.tunnels.decrease_ref(&existing.tunnel);
        }
        self.tunnels
            .increase_ref(&tunnel)
            .map_err(|e| TaskError::internal(e.to_string()))?;
        self.nvo = Some(NvoEntry {
            name: entry.key.clone(),
            tunnel,
        });
        Ok(())
    }

    async fn handle_nvo_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        match self.nvo.take() {
            Some(existing) if existing.name == entry.key => {
                let _ = self.tunnels.decrease_ref(&existing.tunnel);
                Ok(())
            }
            other => {
                self.nvo = other;
                Err(TaskError::ignored(format!("unknown NVO {}", entry.key)))
            }
        }
    }

    async fn handle_vnet_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let tunnel = entry
            .get_field(fields::VXLAN_TUNNEL)
            .ok_or_else(|| TaskError::conflict("VNET missing vxlan_tunnel"))?
            .to_string();
        let vni: Vni = entry
            .get_field(fields::VNI)
            .ok_or_else(|| TaskError::conflict("VNET missing vni"))?
            .parse()
            .map_err(|_| TaskError::parse("bad vni"))?;
        let vrf = entry.get_field(fields::VRF).map(str::to_string);

        let new_entry = VnetEntry {
            name: entry.key.clone(),
            tunnel: tunnel.clone(),
            vni,
            vrf,
        };

        if let Some(existing) = self.vnets.get(&entry.key) {
            if *existing == new_entry {
                return Err(TaskError::ignored("VNET unchanged"));
            }
        }

        // Preconditions: active tunnel and a configured router MAC.
        match self.tunnels.get(&tunnel) {
            Some(t) if t.is_active() => {}
            Some(_) => {
                return Err(TaskError::dependency(format!(
                    "tunnel {} has no source IP",
                    tunnel
                )))
            }
            None => return Err(TaskError::dependency(format!("tunnel {} not created", tunnel))),
        }
        if self
            .ctx
            .read()
            .expect("context lock poisoned")
            .system_mac
            .is_none()
        {
            return Err(TaskError::dependency("router MAC not yet learned"));
        }

        // Replacement is delete-then-recreate, never an in-place patch.
        if let Some(old) = self.vnets.remove(&entry.key) {
            let _ = self.tunnels.decrease_ref(&old.tunnel);
            self.stats.vnets_removed += 1;
        }

        self.tunnels
            .increase_ref(&tunnel)
            .map_err(|e| TaskError::internal(e.to_string()))?;
        self.vnets.insert(entry.key.clone(), new_entry);
        self.stats.vnets_created += 1;
        Ok(())
    }

    async fn handle_vnet_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        match self.vnets.remove(&entry.key) {
            Some(existing) => {
                let _ = self.tunnels.decrease_ref(&existing.tunnel);
                self.stats.vnets_removed += 1;
                Ok(())
            }
            None => Err(TaskError::ignored(format!("unknown VNET {}", entry.key))),
        }
    }

    async fn process_queue(&mut self, table: &'static str) {
        let entries = match table {
            VXLAN_TUNNEL_TABLE => self.tunnel_consumer.drain(),
            VXLAN_TUNNEL_MAP_TABLE => self.map_consumer.drain(),
            VXLAN_EVPN_NVO_TABLE => self.nvo_consumer.drain(),
            _ => self.vnet_consumer.drain(),
        };
        for entry in entries {
            let result = match (table, entry.op) {
                (VXLAN_TUNNEL_TABLE, Operation::Set) => self.handle_tunnel_set(&entry).await,
                (VXLAN_TUNNEL_TABLE, Operation::Del) => self.handle_tunnel_del(&entry).await,
                (VXLAN_TUNNEL_MAP_TABLE, Operation::Set) => self.handle_map_set(&entry).await,
                (VXLAN_TUNNEL_MAP_TABLE, Operation::Del) => self.handle_map_del(&entry).await,
                (VXLAN_EVPN_NVO_TABLE, Operation::Set) => self.handle_nvo_set(&entry).await,
                (VXLAN_EVPN_NVO_TABLE, Operation::Del) => self.handle_nvo_del(&entry).await,
                (_, Operation::Set) => self.handle_vnet_set(&entry).await,
                (_, Operation::Del) => self.handle_vnet_del(&entry).await,
            };
            match result.to_status() {
                TaskStatus::NeedRetry => {
                    self.stats.retries += 1;
                    match table {
                        VXLAN_TUNNEL_TABLE => self.tunnel_consumer.retry(entry),
                        VXLAN_TUNNEL_MAP_TABLE => self.map_consumer.retry(entry),
                        VXLAN_EVPN_NVO_TABLE => self.nvo_consumer.retry(entry),
                        _ => self.vnet_consumer.retry(entry),
                    }
                }
                s if s.is_failure() => {
                    self.stats.errors += 1;
                    error!("{}: dropping {} after {:?}", table, entry.key, s);
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl Orch for VxlanOrch {
    fn name(&self) -> &str {
        "VxlanOrch"
    }

    async fn do_task(&mut self) {
        let batch = self.ctx.read().expect("context lock poisoned").batch_size;
        self.tunnel_consumer.add_to_sync(self.tunnel_sub.pops(batch));
        self.map_consumer.add_to_sync(self.map_sub.pops(batch));
        self.nvo_consumer.add_to_sync(self.nvo_sub.pops(batch));
        self.vnet_consumer.add_to_sync(self.vnet_sub.pops(batch));

        // Mappings, NVO, and VNETs all depend on tunnels.
        self.process_queue(VXLAN_TUNNEL_TABLE).await;
        self.process_queue(VXLAN_TUNNEL_MAP_TABLE).await;
        self.process_queue(VXLAN_EVPN_NVO_TABLE).await;
        self.process_queue(VNET_TABLE).await;
    }

    async fn on_timer(&mut self) {
        // Once warm boot has ended, whatever reconciliation input is
        // still unclaimed is stale.
        let warm_boot_in_progress = self
            .ctx
            .read()
            .expect("context lock poisoned")
            .warm_boot_in_progress;
        if self.reconciling && !warm_boot_in_progress {
            self.finalize_reconciliation().await;
        }
    }

    fn priority(&self) -> i32 {
        20
    }

    fn has_pending_tasks(&self) -> bool {
        self.tunnel_consumer.has_pending()
            || self.map_consumer.has_pending()
            || self.nvo_consumer.has_pending()
            || self.vnet_consumer.has_pending()
            || self.tunnel_sub.has_pending()
            || self.map_sub.has_pending()
            || self.nvo_sub.has_pending()
            || self.vnet_sub.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        let mut tasks = self.tunnel_consumer.dump();
        tasks.extend(self.map_consumer.dump());
        tasks.extend(self.nvo_consumer.dump());
        tasks.extend(self.vnet_consumer.dump());
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::MockKernelState;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use switchd_orch_common::{OrchContext, WarmRestartState, WARM_RESTART_TABLE};

    struct Fixture {
        app_db: Db,
        state_db: Db,
        orch: VxlanOrch,
        kernel_state: Arc<Mutex<MockKernelState>>,
    }

    fn fixture() -> Fixture {
        let app_db = Db::new();
        let state_db = Db::new();
        let (kernel, kernel_state) = KernelClient::mock();
        let ctx = OrchContext {
            system_mac: Some("52:54:00:00:00:01".parse().unwrap()),
            ..OrchContext::default()
        }
        .into_shared();
        let orch = VxlanOrch::new(&app_db, &state_db, ctx, kernel);
        Fixture {
            app_db,
            state_db,
            orch,
            kernel_state,
        }
    }

    fn mark_vlan_ready(f: &Fixture, name: &str) {
        f.state_db
            .table(STATE_VLAN_TABLE)
            .set(name, vec![(fields::STATE.to_string(), "ok".to_string())]);
    }

    fn fv(field: &str, value: &str) -> (String, String) {
        (field.to_string(), value.to_string())
    }

    fn captured(f: &Fixture) -> Vec<String> {
        f.kernel_state.lock().unwrap().captured.clone()
    }

    #[tokio::test]
    async fn test_map_waits_for_vlan_then_creates_device() {
        let mut f = fixture();
        f.app_db
            .producer(VXLAN_TUNNEL_TABLE)
            .set("tun1", vec![fv(fields::SRC_IP, "10.0.0.1")]);
        f.app_db
            .producer(VXLAN_TUNNEL_MAP_TABLE)
            .set("tun1|Vlan100", vec![fv(fields::VNI, "5000")]);

        f.orch.do_task().await;

        // VLAN not ready: mapping absent, entry queued, no kernel calls.
        assert!(!f.orch.map_exists("tun1|Vlan100"));
        assert_eq!(f.orch.tunnel_ref_count("tun1"), Some(0));
        assert!(f.orch.has_pending_tasks());
        assert!(captured(&f).is_empty());

        mark_vlan_ready(&f, "Vlan100");
        f.orch.do_task().await;

        assert!(f.orch.map_exists("tun1|Vlan100"));
        assert_eq!(f.orch.tunnel_ref_count("tun1"), Some(1));
        let cmds = captured(&f);
        assert!(cmds
            .iter()
            .any(|c| c.contains("link add \"tun1-100\" type vxlan id 5000 local 10.0.0.1")));
        assert!(cmds.iter().any(|c| c.contains("master Bridge")));
        assert_eq!(
            f.state_db
                .table(VXLAN_VLAN_DEVICE_MAP_TABLE)
                .hget("Vlan100", fields::DEVICE),
            Some("tun1-100".to_string())
        );
    }

    #[tokio::test]
    async fn test_tunnel_del_blocked_by_refcount() {
        let mut f = fixture();
        mark_vlan_ready(&f, "Vlan100");
        f.app_db
            .producer(VXLAN_TUNNEL_TABLE)
            .set("tun1", vec![fv(fields::SRC_IP, "10.0.0.1")]);
        f.app_db
            .producer(VXLAN_TUNNEL_MAP_TABLE)
            .set("tun1|Vlan100", vec![fv(fields::VNI, "5000")]);
        f.orch.do_task().await;
        assert_eq!(f.orch.tunnel_ref_count("tun1"), Some(1));

        f.app_db.producer(VXLAN_TUNNEL_TABLE).del("tun1");
        f.orch.do_task().await;

        // Delete declined while the mapping holds a reference.
        assert_eq!(f.orch.tunnel_ref_count("tun1"), Some(1));
        assert!(f.orch.has_pending_tasks());

        f.app_db.producer(VXLAN_TUNNEL_MAP_TABLE).del("tun1|Vlan100");
        f.orch.do_task().await;
        f.orch.do_task().await;

        assert_eq!(f.orch.tunnel_ref_count("tun1"), None);
        assert_eq!(f.orch.stats().tunnels_removed, 1);
        assert!(!f
            .state_db
            .table(VXLAN_VLAN_DEVICE_MAP_TABLE)
            .exists("Vlan100"));
    }

    #[tokio::test]
    async fn test_map_vni_change_recreates_device() {
        let mut f = fixture();
        mark_vlan_ready(&f, "Vlan100");
        f.app_db
            .producer(VXLAN_TUNNEL_TABLE)
            .set("tun1", vec![fv(fields::SRC_IP, "10.0.0.1")]);
        f.app_db
            .producer(VXLAN_TUNNEL_MAP_TABLE)
            .set("tun1|Vlan100", vec![fv(fields::VNI, "5000")]);
        f.orch.do_task().await;

        f.app_db
            .producer(VXLAN_TUNNEL_MAP_TABLE)
            .set("tun1|Vlan100", vec![fv(fields::VNI, "6000")]);
        f.orch.do_task().await;

        let cmds = captured(&f);
        let del_pos = cmds
            .iter()
            .position(|c| c.contains("link del \"tun1-100\""))
            .expect("old device torn down");
        let add_pos = cmds
            .iter()
            .rposition(|c| c.contains("type vxlan id 6000"))
            .expect("new device created");
        assert!(del_pos < add_pos);
        // Teardown and recreate leave exactly one reference.
        assert_eq!(f.orch.tunnel_ref_count("tun1"), Some(1));
        assert_eq!(f.orch.stats().maps_created, 2);
        assert_eq!(f.orch.stats().maps_removed, 1);
    }

    #[tokio::test]
    async fn test_malformed_map_key_is_dropped() {
        let mut f = fixture();
        f.app_db
            .producer(VXLAN_TUNNEL_MAP_TABLE)
            .set("nopipe", vec![fv(fields::VNI, "5000")]);

        f.orch.do_task().await;

        assert_eq!(f.orch.stats().errors, 1);
        assert!(!f.orch.has_pending_tasks());
    }

    #[tokio::test]
    async fn test_attach_failure_rolls_back_device() {
        let mut f = fixture();
        mark_vlan_ready(&f, "Vlan100");
        f.kernel_state
            .lock()
            .unwrap()
            .fail_patterns
            .push("master Bridge".to_string());

        f.app_db
            .producer(VXLAN_TUNNEL_TABLE)
            .set("tun1", vec![fv(fields::SRC_IP, "10.0.0.1")]);
        f.app_db
            .producer(VXLAN_TUNNEL_MAP_TABLE)
            .set("tun1|Vlan100", vec![fv(fields::VNI, "5000")]);
        f.orch.do_task().await;

        // Creation failed after the first step; the device was removed.
        assert!(!f.orch.map_exists("tun1|Vlan100"));
        assert_eq!(f.orch.tunnel_ref_count("tun1"), Some(0));
        assert!(captured(&f).iter().any(|c| c.contains("link del \"tun1-100\"")));
    }

    #[tokio::test]
    async fn test_second_nvo_rejected() {
        let mut f = fixture();
        f.app_db
            .producer(VXLAN_TUNNEL_TABLE)
            .set("tun1", vec![fv(fields::SRC_IP, "10.0.0.1")]);
        f.app_db
            .producer(VXLAN_EVPN_NVO_TABLE)
            .set("nvo1", vec![fv(fields::SOURCE_VTEP, "tun1")]);
        f.orch.do_task().await;
        assert_eq!(f.orch.nvo().map(|n| n.tunnel.as_str()), Some("tun1"));
        assert_eq!(f.orch.tunnel_ref_count("tun1"), Some(1));

        f.app_db
            .producer(VXLAN_EVPN_NVO_TABLE)
            .set("nvo2", vec![fv(fields::SOURCE_VTEP, "tun1")]);
        f.orch.do_task().await;

        assert_eq!(f.orch.nvo().map(|n| n.name.as_str()), Some("nvo1"));
        assert_eq!(f.orch.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_vnet_replace_is_delete_then_recreate() {
        let mut f = fixture();
        for tunnel in ["tun1", "tun2"] {
            f.app_db
                .producer(VXLAN_TUNNEL_TABLE)
                .set(tunnel, vec![fv(fields::SRC_IP, "10.0.0.1")]);
        }
        f.app_db.producer(VNET_TABLE).set(
            "Vnet1",
            vec![fv(fields::VXLAN_TUNNEL, "tun1"), fv(fields::VNI, "8000")],
        );
        f.orch.do_task().await;
        assert_eq!(f.orch.tunnel_ref_count("tun1"), Some(1));

        f.app_db.producer(VNET_TABLE).set(
            "Vnet1",
            vec![fv(fields::VXLAN_TUNNEL, "tun2"), fv(fields::VNI, "8000")],
        );
        f.orch.do_task().await;

        assert_eq!(f.orch.tunnel_ref_count("tun1"), Some(0));
        assert_eq!(f.orch.tunnel_ref_count("tun2"), Some(1));
        assert_eq!(f.orch.stats().vnets_created, 2);
        assert_eq!(f.orch.stats().vnets_removed, 1);
    }

    #[tokio::test]
    async fn test_map_gated_on_vlan_manager_warm_restart() {
        let mut f = fixture();
        mark_vlan_ready(&f, "Vlan100");
        f.state_db.table("WARM_RESTART_ENABLE_TABLE").set(
            VLAN_MANAGER_NAME,
            vec![("enable".to_string(), "true".to_string())],
        );
        f.state_db.table(WARM_RESTART_TABLE).set(
            VLAN_MANAGER_NAME,
            vec![("state".to_string(), "restored".to_string())],
        );

        f.app_db
            .producer(VXLAN_TUNNEL_TABLE)
            .set("tun1", vec![fv(fields::SRC_IP, "10.0.0.1")]);
        f.app_db
            .producer(VXLAN_TUNNEL_MAP_TABLE)
            .set("tun1|Vlan100", vec![fv(fields::VNI, "5000")]);
        f.orch.do_task().await;

        // Gated until the VLAN manager reports replayed.
        assert!(!f.orch.map_exists("tun1|Vlan100"));

        f.state_db.table(WARM_RESTART_TABLE).set(
            VLAN_MANAGER_NAME,
            vec![(
                "state".to_string(),
                WarmRestartState::Replayed.as_str().to_string(),
            )],
        );
        f.orch.do_task().await;
        assert!(f.orch.map_exists("tun1|Vlan100"));
    }

    #[tokio::test]
    async fn test_warm_restart_reuses_devices_and_prunes_stale() {
        let mut f = fixture();
        mark_vlan_ready(&f, "Vlan100");

        // Rows and devices left behind by the previous incarnation.
        f.state_db
            .table(VXLAN_VLAN_DEVICE_MAP_TABLE)
            .set("Vlan100", vec![fv(fields::DEVICE, "tun1-100")]);
        f.state_db
            .table(VXLAN_VLAN_DEVICE_MAP_TABLE)
            .set("Vlan999", vec![fv(fields::DEVICE, "tun1-999")]);
        f.kernel_state
            .lock()
            .unwrap()
            .outputs
            .push_back("tun1-100\ntun1-999".to_string());

        f.orch.begin_reconciliation().await;

        f.app_db
            .producer(VXLAN_TUNNEL_TABLE)
            .set("tun1", vec![fv(fields::SRC_IP, "10.0.0.1")]);
        f.app_db
            .producer(VXLAN_TUNNEL_MAP_TABLE)
            .set("tun1|Vlan100", vec![fv(fields::VNI, "5000")]);
        f.orch.do_task().await;

        // Existing device claimed: no duplicate creation command.
        assert!(f.orch.map_exists("tun1|Vlan100"));
        assert!(!captured(&f).iter().any(|c| c.contains("type vxlan id 5000")));

        f.orch.finalize_reconciliation().await;

        // The unclaimed device and row are stale and removed.
        assert!(captured(&f).iter().any(|c| c.contains("link del \"tun1-999\"")));
        assert!(!f
            .state_db
            .table(VXLAN_VLAN_DEVICE_MAP_TABLE)
            .exists("Vlan999"));
        assert!(f
            .state_db
            .table(VXLAN_VLAN_DEVICE_MAP_TABLE)
            .exists("Vlan100"));
        assert_eq!(f.orch.stats().stale_reconciled, 2);
    }
}
