//! Flex counter binding manager.

use super::group::FlexCounterGroup;
use crate::tables::{fields, FLEX_COUNTER_GROUP_TABLE, FLEX_COUNTER_TABLE, VID_TO_RID_TABLE};
use log::{debug, info};
use std::collections::HashMap;
use switchd_asic::RawAsicObjectId;
use switchd_orch_common::Db;

const POLL_INTERVAL_FIELD: &str = "POLL_INTERVAL";
const STATUS_FIELD: &str = "FLEX_COUNTER_STATUS";

#[derive(Debug, Clone)]
struct PendingBinding {
    label: String,
    stat_ids: Vec<String>,
}

/// Declares statistic bindings to the counter-polling service.
///
/// The service identifies objects by their real ASIC id, which is filled
/// into the translation table asynchronously by the syncing process; a
/// binding requested before the translation exists is parked in a pending
/// set that the owning orchestrator drains from its periodic timer.
pub struct FlexCounterManager {
    counter_db: Db,
    group: FlexCounterGroup,
    pending: HashMap<RawAsicObjectId, PendingBinding>,
    group_published: bool,
}

impl FlexCounterManager {
    /// Creates a manager for one counter group.
    pub fn new(counter_db: Db, group: FlexCounterGroup) -> Self {
        Self {
            counter_db,
            group,
            pending: HashMap::new(),
            group_published: false,
        }
    }

    /// Returns the managed group.
    pub fn group(&self) -> FlexCounterGroup {
        self.group
    }

    /// Returns the number of bindings waiting on id translation.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn binding_key(&self, vid: RawAsicObjectId) -> String {
        format!("{}:0x{:x}", self.group.table_key(), vid)
    }

    fn translation_exists(&self, vid: RawAsicObjectId) -> bool {
        self.counter_db
            .table(VID_TO_RID_TABLE)
            .hget(&format!("0x{:x}", vid), fields::RID)
            .is_some()
    }

    fn publish_group(&mut self) {
        if self.group_published {
            return;
        }
        self.counter_db.table(FLEX_COUNTER_GROUP_TABLE).set(
            self.group.table_key(),
            vec![
                (
                    POLL_INTERVAL_FIELD.to_string(),
                    self.group.default_poll_interval_ms().to_string(),
                ),
                (STATUS_FIELD.to_string(), "enable".to_string()),
            ],
        );
        self.group_published = true;
    }

    /// Declares the statistic set to poll for an object.
    ///
    /// Publishes immediately when the object's id translation is already
    /// available, otherwise parks the binding until [`drain_pending`]
    /// finds the translation.
    ///
    /// [`drain_pending`]: FlexCounterManager::drain_pending
    pub fn bind(&mut self, label: &str, vid: RawAsicObjectId, stat_ids: Vec<String>) {
        self.publish_group();

        if self.translation_exists(vid) {
            self.publish_binding(label, vid, &stat_ids);
        } else {
            debug!(
                "{}: deferring counter binding for {} (0x{:x}) until id translation",
                self.group, label, vid
            );
            self.pending.insert(
                vid,
                PendingBinding {
                    label: label.to_string(),
                    stat_ids,
                },
            );
        }
    }

    /// Removes the binding for an object, pending or published.
    pub fn unbind(&mut self, vid: RawAsicObjectId) {
        self.pending.remove(&vid);
        self.counter_db
            .table(FLEX_COUNTER_TABLE)
            .del(&self.binding_key(vid));
    }

    /// Retries pending bindings; returns how many were published.
    pub fn drain_pending(&mut self) -> usize {
        let ready: Vec<RawAsicObjectId> = self
            .pending
            .keys()
            .copied()
            .filter(|vid| self.translation_exists(*vid))
            .collect();

        for vid in &ready {
            if let Some(binding) = self.pending.remove(vid) {
                self.publish_binding(&binding.label, *vid, &binding.stat_ids);
            }
        }
        ready.len()
    }

    fn publish_binding(&self, label: &str, vid: RawAsicObjectId, stat_ids: &[String]) {
        info!(
            "{}: binding counters for {} (0x{:x})",
            self.group, label, vid
        );
        self.counter_db.table(FLEX_COUNTER_TABLE).set(
            &self.binding_key(vid),
            vec![(
                self.group.counter_id_list_field().to_string(),
                stat_ids.join(","),
            )],
        );
    }
}
