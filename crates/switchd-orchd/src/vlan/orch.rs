//! VLAN orchestration logic.

use super::types::{TaggingMode, VlanEntry, VlanOrchStats};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::kernel::commands::{
    build_add_vlan_cmd, build_add_vlan_member_cmd, build_remove_vlan_cmd,
    build_remove_vlan_member_cmd, build_set_vlan_admin_cmd, build_set_vlan_mtu_cmd,
};
use crate::kernel::KernelClient;
use crate::tables::{
    fields, APP_KEY_SEPARATOR, APP_VLAN_MEMBER_TABLE, APP_VLAN_TABLE, STATE_PORT_TABLE,
    STATE_VLAN_MEMBER_TABLE, STATE_VLAN_TABLE,
};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use switchd_orch_common::{
    split_key, Consumer, ConsumerConfig, Db, KeyOpFieldsValues, Operation, Orch, ProducerTable,
    SharedContext, SubscriberTable, Table, TaskError, TaskResult, TaskResultExt, TaskStatus,
};
use switchd_types::VlanId;

/// Prefix identifying link-aggregation member ports.
const LAG_PREFIX: &str = "PortChannel";

/// VLAN orchestrator.
///
/// Consumes the VLAN and VLAN-member tables, drives the kernel bridge,
/// and publishes readiness rows that gate dependent orchestrators.
pub struct VlanOrch {
    ctx: SharedContext,
    kernel: KernelClient,
    vlan_sub: SubscriberTable,
    member_sub: SubscriberTable,
    vlan_consumer: Consumer,
    member_consumer: Consumer,
    state_port: Table,
    state_vlan: ProducerTable,
    state_member: ProducerTable,
    vlans: HashMap<VlanId, VlanEntry>,
    stats: VlanOrchStats,
}

impl VlanOrch {
    /// Creates a VlanOrch wired to the app and state databases.
    pub fn new(app_db: &Db, state_db: &Db, ctx: SharedContext, kernel: KernelClient) -> Self {
        Self {
            ctx,
            kernel,
            vlan_sub: app_db.subscriber(APP_VLAN_TABLE),
            member_sub: app_db.subscriber(APP_VLAN_MEMBER_TABLE),
            vlan_consumer: Consumer::new(ConsumerConfig::new(APP_VLAN_TABLE)),
            member_consumer: Consumer::new(ConsumerConfig::new(APP_VLAN_MEMBER_TABLE)),
            state_port: state_db.table(STATE_PORT_TABLE),
            state_vlan: state_db.producer(STATE_VLAN_TABLE),
            state_member: state_db.producer(STATE_VLAN_MEMBER_TABLE),
            vlans: HashMap::new(),
            stats: VlanOrchStats::default(),
        }
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &VlanOrchStats {
        &self.stats
    }

    /// Returns true if a VLAN is active.
    pub fn vlan_exists(&self, vlan: VlanId) -> bool {
        self.vlans.contains_key(&vlan)
    }

    /// Returns the number of active VLANs.
    pub fn vlan_count(&self) -> usize {
        self.vlans.len()
    }

    async fn handle_vlan_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let vlan = VlanId::from_interface_name(&entry.key)
            .map_err(|e| TaskError::parse(e.to_string()))?;

        let mac = self
            .ctx
            .read()
            .expect("context lock poisoned")
            .system_mac
            .ok_or_else(|| TaskError::dependency("system MAC not yet learned"))?;

        let is_new = !self.vlans.contains_key(&vlan);
        if is_new {
            self.kernel
                .exec(&build_add_vlan_cmd(vlan, &mac.to_string()))
                .await
                .map_err(|e| TaskError::external(e.to_string()))?;
            self.vlans.insert(vlan, VlanEntry::new(vlan, mac));
            self.stats.vlans_created += 1;

            audit_log!(AuditRecord::new(
                AuditCategory::ResourceCreate,
                "VlanOrch",
                "create_vlan"
            )
            .with_outcome(AuditOutcome::Success)
            .with_object_id(entry.key.clone())
            .with_object_type("vlan"));
        }

        for (field, value) in &entry.fvs {
            match field.as_str() {
                fields::ADMIN_STATUS => {
                    self.kernel
                        .exec(&build_set_vlan_admin_cmd(vlan, value))
                        .await
                        .map_err(|e| TaskError::external(e.to_string()))?;
                    if let Some(cached) = self.vlans.get_mut(&vlan) {
                        cached.admin_status = Some(value.clone());
                    }
                }
                fields::MTU => {
                    let mtu: u32 = value
                        .parse()
                        .map_err(|_| TaskError::parse(format!("bad mtu: {}", value)))?;
                    // A member with a smaller MTU can make this fail; the
                    // next SET for the member resolves it, so don't fail
                    // the whole entry.
                    if let Err(e) = self.kernel.exec(&build_set_vlan_mtu_cmd(vlan, mtu)).await {
                        warn!("failed to set {} MTU to {}: {}", entry.key, mtu, e);
                    } else if let Some(cached) = self.vlans.get_mut(&vlan) {
                        cached.mtu = Some(mtu);
                    }
                }
                other => {
                    debug!("ignoring unknown VLAN field: {}", other);
                }
            }
        }

        self.state_vlan.set(
            &entry.key,
            vec![(fields::STATE.to_string(), "ok".to_string())],
        );
        Ok(())
    }

    async fn handle_vlan_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let vlan = VlanId::from_interface_name(&entry.key)
            .map_err(|e| TaskError::parse(e.to_string()))?;

        let cached = match self.vlans.get(&vlan) {
            Some(cached) => cached,
            None => return Err(TaskError::ignored(format!("unknown VLAN {}", entry.key))),
        };

        if !cached.members.is_empty() {
            return Err(TaskError::busy(
                entry.key.clone(),
                cached.members.len() as u32,
            ));
        }

        self.kernel
            .exec(&build_remove_vlan_cmd(vlan))
            .await
            .map_err(|e| TaskError::external(e.to_string()))?;
        self.vlans.remove(&vlan);
        self.state_vlan.del(&entry.key);
        self.stats.vlans_removed += 1;

        audit_log!(AuditRecord::new(
            AuditCategory::ResourceDelete,
            "VlanOrch",
            "remove_vlan"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(entry.key.clone())
        .with_object_type("vlan"));
        Ok(())
    }

    async fn handle_member_set(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let (vlan_name, port_alias) = split_key(&entry.key, APP_KEY_SEPARATOR)
            .ok_or_else(|| TaskError::parse(format!("bad member key: {}", entry.key)))?;
        let vlan = VlanId::from_interface_name(vlan_name)
            .map_err(|e| TaskError::parse(e.to_string()))?;
        let port_alias = port_alias.to_string();

        let tagging = entry
            .get_field(fields::TAGGING_MODE)
            .and_then(|v| v.parse().ok())
            .unwrap_or(TaggingMode::Tagged);

        if !self.vlans.contains_key(&vlan) {
            return Err(TaskError::dependency(format!("VLAN {} not active", vlan_name)));
        }
        if !self.state_port.exists(&port_alias) {
            return Err(TaskError::dependency(format!("port {} not ready", port_alias)));
        }

        match self
            .vlans
            .get(&vlan)
            .and_then(|v| v.members.get(&port_alias))
        {
            Some(existing) if *existing == tagging => {
                return Err(TaskError::ignored("membership unchanged"));
            }
            Some(_) => {
                // Tagging mode is identity-relevant: tear down the old
                // membership before creating the new one.
                self.kernel
                    .exec(&build_remove_vlan_member_cmd(vlan, &port_alias))
                    .await
                    .map_err(|e| TaskError::external(e.to_string()))?;
            }
            None => {}
        }

        let cmd = build_add_vlan_member_cmd(vlan, &port_alias, tagging.bridge_flags());
        if let Err(e) = self.kernel.exec(&cmd).await {
            // LAG netdevs appear asynchronously; retry rather than fail.
            if port_alias.starts_with(LAG_PREFIX) {
                return Err(TaskError::dependency(format!(
                    "LAG {} not yet in kernel: {}",
                    port_alias, e
                )));
            }
            return Err(TaskError::external(e.to_string()));
        }

        if let Some(cached) = self.vlans.get_mut(&vlan) {
            cached.members.insert(port_alias.clone(), tagging);
        }
        self.stats.members_added += 1;
        self.state_member.set(
            &entry.key,
            vec![(
                fields::TAGGING_MODE.to_string(),
                tagging.as_str().to_string(),
            )],
        );
        info!("added {} to {} as {}", port_alias, vlan_name, tagging.as_str());
        Ok(())
    }

    async fn handle_member_del(&mut self, entry: &KeyOpFieldsValues) -> TaskResult<()> {
        let (vlan_name, port_alias) = split_key(&entry.key, APP_KEY_SEPARATOR)
            .ok_or_else(|| TaskError::parse(format!("bad member key: {}", entry.key)))?;
        let vlan = VlanId::from_interface_name(vlan_name)
            .map_err(|e| TaskError::parse(e.to_string()))?;

        let is_member = self
            .vlans
            .get(&vlan)
            .is_some_and(|v| v.members.contains_key(port_alias));
        if !is_member {
            return Err(TaskError::ignored(format!("unknown member {}", entry.key)));
        }

        self.kernel
            .exec(&build_remove_vlan_member_cmd(vlan, port_alias))
            .await
            .map_err(|e| TaskError::external(e.to_string()))?;

        if let Some(cached) = self.vlans.get_mut(&vlan) {
            cached.members.remove(port_alias);
        }
        self.stats.members_removed += 1;
        self.state_member.del(&entry.key);
        Ok(())
    }

    async fn process_vlan_queue(&mut self) {
        for entry in self.vlan_consumer.drain() {
            let status = match entry.op {
                Operation::Set => self.handle_vlan_set(&entry).await.to_status(),
                Operation::Del => self.handle_vlan_del(&entry).await.to_status(),
            };
            self.finish(APP_VLAN_TABLE, entry, status);
        }
    }

    async fn process_member_queue(&mut self) {
        for entry in self.member_consumer.drain() {
            let status = match entry.op {
                Operation::Set => self.handle_member_set(&entry).await.to_status(),
                Operation::Del => self.handle_member_del(&entry).await.to_status(),
            };
            self.finish(APP_VLAN_MEMBER_TABLE, entry, status);
        }
    }

    fn finish(&mut self, table: &str, entry: KeyOpFieldsValues, status: TaskStatus) {
        match status {
            TaskStatus::NeedRetry => {
                self.stats.retries += 1;
                if table == APP_VLAN_TABLE {
                    self.vlan_consumer.retry(entry);
                } else {
                    self.member_consumer.retry(entry);
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

#[async_trait]
impl Orch for VlanOrch {
    fn name(&self) -> &str {
        "VlanOrch"
    }

    async fn do_task(&mut self) {
        let batch = self.ctx.read().expect("context lock poisoned").batch_size;
        self.vlan_consumer.add_to_sync(self.vlan_sub.pops(batch));
        self.member_consumer.add_to_sync(self.member_sub.pops(batch));

        // Members depend on their VLAN; resolve VLANs first each cycle.
        self.process_vlan_queue().await;
        self.process_member_queue().await;
    }

    fn priority(&self) -> i32 {
        10
    }

    fn has_pending_tasks(&self) -> bool {
        self.vlan_consumer.has_pending()
            || self.member_consumer.has_pending()
            || self.vlan_sub.has_pending()
            || self.member_sub.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        let mut tasks = self.vlan_consumer.dump();
        tasks.extend(self.member_consumer.dump());
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::MockKernelState;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use switchd_orch_common::OrchContext;

    struct Fixture {
        app_db: Db,
        state_db: Db,
        orch: VlanOrch,
        kernel_state: Arc<Mutex<MockKernelState>>,
    }

    fn fixture_with_mac(mac: Option<&str>) -> Fixture {
        let app_db = Db::new();
        let state_db = Db::new();
        let (kernel, kernel_state) = KernelClient::mock();
        let ctx = OrchContext {
            system_mac: mac.map(|m| m.parse().unwrap()),
            ..OrchContext::default()
        }
        .into_shared();
        let orch = VlanOrch::new(&app_db, &state_db, ctx, kernel);
        Fixture {
            app_db,
            state_db,
            orch,
            kernel_state,
        }
    }

    fn fixture() -> Fixture {
        let f = fixture_with_mac(Some("52:54:00:00:00:01"));
        f.state_db.table(STATE_PORT_TABLE).set(
            "Ethernet0",
            vec![(fields::OPER_STATUS.to_string(), "up".to_string())],
        );
        f
    }

    fn captured(f: &Fixture) -> Vec<String> {
        f.kernel_state.lock().unwrap().captured.clone()
    }

    #[tokio::test]
    async fn test_vlan_set_creates_kernel_device_and_readiness() {
        let mut f = fixture();
        f.app_db.producer(APP_VLAN_TABLE).set(
            "Vlan100",
            vec![(fields::ADMIN_STATUS.to_string(), "up".to_string())],
        );

        f.orch.do_task().await;

        assert!(f.orch.vlan_exists(VlanId::new(100).unwrap()));
        assert_eq!(f.orch.stats().vlans_created, 1);
        assert_eq!(
            f.state_db.table(STATE_VLAN_TABLE).hget("Vlan100", fields::STATE),
            Some("ok".to_string())
        );
        let cmds = captured(&f);
        assert!(cmds.iter().any(|c| c.contains("type vlan id 100")));
        assert!(cmds.iter().any(|c| c.contains("link set Vlan100 \"up\"")));
    }

    #[tokio::test]
    async fn test_vlan_set_waits_for_system_mac() {
        let mut f = fixture_with_mac(None);
        f.app_db.producer(APP_VLAN_TABLE).set("Vlan100", vec![]);

        f.orch.do_task().await;

        // No MAC yet: entry stays queued, nothing hit the kernel.
        assert!(!f.orch.vlan_exists(VlanId::new(100).unwrap()));
        assert!(f.orch.has_pending_tasks());
        assert!(captured(&f).is_empty());

        // The same entry succeeds once the dependency resolves.
        f.orch.ctx.write().unwrap().system_mac = Some("52:54:00:00:00:01".parse().unwrap());
        f.orch.do_task().await;
        assert!(f.orch.vlan_exists(VlanId::new(100).unwrap()));
        assert!(!f.orch.has_pending_tasks());
    }

    #[tokio::test]
    async fn test_malformed_vlan_key_is_dropped() {
        let mut f = fixture();
        f.app_db.producer(APP_VLAN_TABLE).set("Ethernet0", vec![]);

        f.orch.do_task().await;

        assert_eq!(f.orch.stats().errors, 1);
        assert!(!f.orch.has_pending_tasks());
    }

    #[tokio::test]
    async fn test_member_set_gated_on_port_readiness() {
        let mut f = fixture();
        f.app_db.producer(APP_VLAN_TABLE).set("Vlan100", vec![]);
        f.app_db.producer(APP_VLAN_MEMBER_TABLE).set(
            "Vlan100:Ethernet4",
            vec![(fields::TAGGING_MODE.to_string(), "untagged".to_string())],
        );

        f.orch.do_task().await;
        // VLAN created, member still waiting on port readiness.
        assert!(f.orch.has_pending_tasks());
        assert_eq!(f.orch.stats().members_added, 0);

        f.state_db.table(STATE_PORT_TABLE).set("Ethernet4", vec![]);
        f.orch.do_task().await;

        assert_eq!(f.orch.stats().members_added, 1);
        assert_eq!(
            f.state_db
                .table(STATE_VLAN_MEMBER_TABLE)
                .hget("Vlan100:Ethernet4", fields::TAGGING_MODE),
            Some("untagged".to_string())
        );
        assert!(captured(&f)
            .iter()
            .any(|c| c.contains("vlan add vid 100 dev \"Ethernet4\" untagged pvid")));
    }

    #[tokio::test]
    async fn test_vlan_del_with_members_retries_until_members_clear() {
        let mut f = fixture();
        f.app_db.producer(APP_VLAN_TABLE).set("Vlan100", vec![]);
        f.app_db
            .producer(APP_VLAN_MEMBER_TABLE)
            .set("Vlan100:Ethernet0", vec![]);
        f.orch.do_task().await;
        assert_eq!(f.orch.stats().members_added, 1);

        f.app_db.producer(APP_VLAN_TABLE).del("Vlan100");
        f.orch.do_task().await;

        // Delete declined while the member remains.
        assert!(f.orch.vlan_exists(VlanId::new(100).unwrap()));
        assert!(f.orch.has_pending_tasks());

        f.app_db
            .producer(APP_VLAN_MEMBER_TABLE)
            .del("Vlan100:Ethernet0");
        f.orch.do_task().await;
        // Member removal and queued VLAN delete both resolve this cycle.
        f.orch.do_task().await;

        assert!(!f.orch.vlan_exists(VlanId::new(100).unwrap()));
        assert_eq!(f.orch.stats().vlans_removed, 1);
        assert!(!f.state_db.table(STATE_VLAN_TABLE).exists("Vlan100"));
    }

    #[tokio::test]
    async fn test_member_tagging_change_recreates_membership() {
        let mut f = fixture();
        f.app_db.producer(APP_VLAN_TABLE).set("Vlan100", vec![]);
        f.app_db.producer(APP_VLAN_MEMBER_TABLE).set(
            "Vlan100:Ethernet0",
            vec![(fields::TAGGING_MODE.to_string(), "tagged".to_string())],
        );
        f.orch.do_task().await;

        f.app_db.producer(APP_VLAN_MEMBER_TABLE).set(
            "Vlan100:Ethernet0",
            vec![(fields::TAGGING_MODE.to_string(), "untagged".to_string())],
        );
        f.orch.do_task().await;

        let cmds = captured(&f);
        let del_pos = cmds
            .iter()
            .position(|c| c.contains("vlan del vid 100 dev \"Ethernet0\""))
            .expect("old membership torn down");
        let add_pos = cmds
            .iter()
            .rposition(|c| c.contains("vlan add vid 100 dev \"Ethernet0\" untagged pvid"))
            .expect("new membership created");
        assert!(del_pos < add_pos);
    }

    #[tokio::test]
    async fn test_lag_member_failure_is_retried() {
        let mut f = fixture();
        f.state_db.table(STATE_PORT_TABLE).set("PortChannel1", vec![]);
        f.kernel_state
            .lock()
            .unwrap()
            .fail_patterns
            .push("dev \"PortChannel1\"".to_string());

        f.app_db.producer(APP_VLAN_TABLE).set("Vlan100", vec![]);
        f.app_db
            .producer(APP_VLAN_MEMBER_TABLE)
            .set("Vlan100:PortChannel1", vec![]);
        f.orch.do_task().await;

        assert_eq!(f.orch.stats().members_added, 0);
        assert!(f.orch.has_pending_tasks());

        // The LAG netdev shows up; the replayed entry succeeds.
        f.kernel_state.lock().unwrap().fail_patterns.clear();
        f.orch.do_task().await;
        assert_eq!(f.orch.stats().members_added, 1);
    }
}
