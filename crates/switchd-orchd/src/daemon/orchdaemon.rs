//! OrchDaemon implementation.
//!
//! The OrchDaemon is the central coordinator for all Orch modules. One
//! selector loop drains ready consumers in priority order and fires the
//! periodic timer; no orchestrator method ever runs concurrently with
//! another.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::tables::{fields, STATE_PORT_TABLE, STATE_SWITCH_TABLE};
use log::{debug, error, info};
use std::collections::BTreeMap;
use switchd_orch_common::{
    Db, Operation, Orch, SharedContext, Subject, SubjectEvent, SubscriberTable,
};

/// Configuration for the OrchDaemon.
#[derive(Debug, Clone)]
pub struct OrchDaemonConfig {
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Periodic timer interval, in heartbeats.
    pub timer_beats: u64,
    /// Enable warm boot mode.
    pub warm_boot: bool,
}

impl Default for OrchDaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            timer_beats: 5,
            warm_boot: false,
        }
    }
}

/// The main orchestration daemon.
pub struct OrchDaemon {
    config: OrchDaemonConfig,
    /// Registered Orchs by priority (lower runs first).
    orchs: BTreeMap<i32, Vec<Box<dyn Orch>>>,
    context: SharedContext,
    /// Port add/remove fanout to interested orchestrators.
    port_subject: Subject,
    state_port_sub: SubscriberTable,
    state_switch: Db,
    running: bool,
    beats: u64,
}

impl OrchDaemon {
    /// Creates a new OrchDaemon.
    ///
    /// The subject should already carry the subscriptions of every
    /// orchestrator interested in port fanout.
    pub fn new(
        config: OrchDaemonConfig,
        context: SharedContext,
        port_subject: Subject,
        state_db: &Db,
    ) -> Self {
        Self {
            config,
            orchs: BTreeMap::new(),
            context,
            port_subject,
            state_port_sub: state_db.subscriber(STATE_PORT_TABLE),
            state_switch: state_db.clone(),
            running: false,
            beats: 0,
        }
    }

    /// Registers an Orch with the daemon.
    pub fn register_orch(&mut self, orch: Box<dyn Orch>) {
        let priority = orch.priority();
        let name = orch.name().to_string();
        info!("registering {} with priority {}", name, priority);

        audit_log!(AuditRecord::new(
            AuditCategory::SystemLifecycle,
            "OrchDaemon",
            "register_orch"
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(name)
        .with_object_type("orch_module")
        .with_details(serde_json::json!({ "priority": priority })));

        self.orchs.entry(priority).or_default().push(orch);
    }

    /// Returns the shared context.
    pub fn context(&self) -> SharedContext {
        SharedContext::clone(&self.context)
    }

    /// Learns global state the orchestrators depend on: the system MAC
    /// and port arrivals/departures.
    fn poll_system_state(&mut self) {
        if self.context.read().expect("context lock poisoned").system_mac.is_none() {
            let learned = self
                .state_switch
                .table(STATE_SWITCH_TABLE)
                .hget("switch", fields::MAC)
                .and_then(|raw| raw.parse().ok());
            if let Some(mac) = learned {
                info!("system MAC learned: {}", mac);
                self.context.write().expect("context lock poisoned").system_mac = Some(mac);
                self.port_subject
                    .notify(&SubjectEvent::SystemMacLearned { mac });
            }
        }

        for change in self.state_port_sub.pops(usize::MAX) {
            let event = match change.op {
                Operation::Set => SubjectEvent::PortAdded { alias: change.key },
                Operation::Del => SubjectEvent::PortRemoved { alias: change.key },
            };
            self.port_subject.notify(&event);
        }
    }

    /// Runs one dispatch cycle: system state, ready orchestrators in
    /// priority order, and the periodic timer.
    pub async fn cycle(&mut self) {
        self.poll_system_state();

        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                if orch.has_pending_tasks() {
                    debug!("processing tasks for {}", orch.name());
                    orch.do_task().await;
                }
            }
        }

        self.beats += 1;
        if self.beats % self.config.timer_beats == 0 {
            for orchs in self.orchs.values_mut() {
                for orch in orchs.iter_mut() {
                    orch.on_timer().await;
                }
            }
        }

        // Warm boot ends once every replayed entry has been consumed.
        let warm_boot_in_progress = self
            .context
            .read()
            .expect("context lock poisoned")
            .warm_boot_in_progress;
        if warm_boot_in_progress
            && self
                .orchs
                .values()
                .flatten()
                .all(|orch| !orch.has_pending_tasks())
        {
            info!("warm restart replay drained, ending warm boot");
            self.on_warm_boot_end();
        }
    }

    /// Runs the main event loop until [`stop`] is called.
    ///
    /// [`stop`]: OrchDaemon::stop
    pub async fn run(&mut self) {
        info!("starting OrchDaemon event loop");
        self.running = true;

        audit_log!(AuditRecord::new(
            AuditCategory::SystemLifecycle,
            "OrchDaemon",
            "event_loop_started"
        )
        .with_outcome(AuditOutcome::Success)
        .with_details(serde_json::json!({
            "heartbeat_interval_ms": self.config.heartbeat_interval_ms,
            "orch_count": self.orchs.values().map(|v| v.len()).sum::<usize>(),
        })));

        while self.running {
            self.cycle().await;
            tokio::time::sleep(tokio::time::Duration::from_millis(
                self.config.heartbeat_interval_ms,
            ))
            .await;
        }

        info!("OrchDaemon event loop stopped");
    }

    /// Stops the event loop.
    pub fn stop(&mut self) {
        info!("stopping OrchDaemon");
        self.running = false;
    }

    /// Prepares for warm boot by baking every orchestrator.
    pub fn prepare_warm_boot(&mut self) -> bool {
        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                if !orch.bake() {
                    error!("failed to bake {}", orch.name());

                    audit_log!(AuditRecord::new(
                        AuditCategory::WarmRestart,
                        "OrchDaemon",
                        "warm_boot_preparation"
                    )
                    .with_object_id(orch.name().to_string())
                    .with_error("bake failed"));
                    return false;
                }
            }
        }
        true
    }

    /// Signals the end of warm-restart reconciliation to every
    /// orchestrator.
    pub fn on_warm_boot_end(&mut self) {
        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                orch.on_warm_boot_end();
            }
        }
        self.context
            .write()
            .expect("context lock poisoned")
            .warm_boot_in_progress = false;

        audit_log!(AuditRecord::new(
            AuditCategory::WarmRestart,
            "OrchDaemon",
            "warm_boot_ended"
        )
        .with_outcome(AuditOutcome::Success));
    }

    /// Runs every orchestrator's shutdown hook on orderly termination.
    pub async fn shutdown(&mut self) {
        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                orch.on_shutdown().await;
            }
        }

        audit_log!(AuditRecord::new(
            AuditCategory::SystemLifecycle,
            "OrchDaemon",
            "shutdown"
        )
        .with_outcome(AuditOutcome::Success));
    }

    /// Dumps daemon and per-orch state for debugging.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = vec![format!("OrchDaemon running: {}", self.running)];
        for (priority, orchs) in &self.orchs {
            for orch in orchs {
                lines.push(format!(
                    "  [{:3}] {} - {} pending",
                    priority,
                    orch.name(),
                    orch.dump_pending_tasks().len()
                ));
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use switchd_orch_common::{drain_events, OrchContext};

    struct TestOrch {
        name: String,
        priority: i32,
        task_count: Arc<AtomicU32>,
        timer_count: Arc<AtomicU32>,
        has_pending: bool,
    }

    impl TestOrch {
        fn new(name: &str, priority: i32) -> Self {
            Self {
                name: name.to_string(),
                priority,
                task_count: Arc::new(AtomicU32::new(0)),
                timer_count: Arc::new(AtomicU32::new(0)),
                has_pending: false,
            }
        }

        fn with_pending(mut self) -> Self {
            self.has_pending = true;
            self
        }
    }

    #[async_trait]
    impl Orch for TestOrch {
        fn name(&self) -> &str {
            &self.name
        }

        async fn do_task(&mut self) {
            self.task_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_timer(&mut self) {
            self.timer_count.fetch_add(1, Ordering::SeqCst);
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn has_pending_tasks(&self) -> bool {
            self.has_pending
        }
    }

    fn daemon() -> (OrchDaemon, Db) {
        let state_db = Db::new();
        let daemon = OrchDaemon::new(
            OrchDaemonConfig {
                heartbeat_interval_ms: 1,
                timer_beats: 2,
                warm_boot: false,
            },
            OrchContext::default().into_shared(),
            Subject::new(),
            &state_db,
        );
        (daemon, state_db)
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let (mut d, _db) = daemon();
        d.register_orch(Box::new(TestOrch::new("Low", 100)));
        d.register_orch(Box::new(TestOrch::new("High", -10)));
        d.register_orch(Box::new(TestOrch::new("Mid", 50)));

        let priorities: Vec<i32> = d.orchs.keys().copied().collect();
        assert_eq!(priorities, vec![-10, 50, 100]);
    }

    #[tokio::test]
    async fn test_cycle_runs_pending_orchs_and_timer() {
        let (mut d, _db) = daemon();
        let pending = TestOrch::new("Pending", 0).with_pending();
        let tasks = Arc::clone(&pending.task_count);
        let timers = Arc::clone(&pending.timer_count);
        let idle = TestOrch::new("Idle", 0);
        let idle_tasks = Arc::clone(&idle.task_count);

        d.register_orch(Box::new(pending));
        d.register_orch(Box::new(idle));

        d.cycle().await;
        d.cycle().await;

        assert_eq!(tasks.load(Ordering::SeqCst), 2);
        assert_eq!(idle_tasks.load(Ordering::SeqCst), 0);
        // timer_beats = 2: the timer fired on the second cycle.
        assert_eq!(timers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_system_mac_learned_once() {
        let (mut d, db) = daemon();
        db.table(STATE_SWITCH_TABLE).set(
            "switch",
            vec![(fields::MAC.to_string(), "52:54:00:00:00:01".to_string())],
        );

        d.cycle().await;
        assert!(d.context().read().unwrap().system_mac.is_some());
    }

    #[tokio::test]
    async fn test_port_changes_fan_out() {
        let state_db = Db::new();
        let mut subject = Subject::new();
        let mut rx = subject.attach("test");
        let mut d = OrchDaemon::new(
            OrchDaemonConfig::default(),
            OrchContext::default().into_shared(),
            subject,
            &state_db,
        );

        state_db.producer(STATE_PORT_TABLE).set("Ethernet0", vec![]);
        state_db.producer(STATE_PORT_TABLE).del("Ethernet4");
        d.cycle().await;

        let events = drain_events(&mut rx);
        assert_eq!(
            events,
            vec![
                SubjectEvent::PortAdded {
                    alias: "Ethernet0".to_string()
                },
                SubjectEvent::PortRemoved {
                    alias: "Ethernet4".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_dump() {
        let (mut d, _db) = daemon();
        d.register_orch(Box::new(TestOrch::new("VlanOrch", 10)));
        let lines = d.dump();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("running: false"));
        assert!(lines[1].contains("VlanOrch"));
    }

    #[tokio::test]
    async fn test_prepare_warm_boot() {
        let (mut d, _db) = daemon();
        d.register_orch(Box::new(TestOrch::new("AnyOrch", 0)));
        assert!(d.prepare_warm_boot());
        d.on_warm_boot_end();
        assert!(!d.context().read().unwrap().warm_boot_in_progress);
    }
}
