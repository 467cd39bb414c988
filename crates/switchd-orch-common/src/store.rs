//! The key/value store modeled at its interface.
//!
//! The real store lives in a separate process and is reached over a
//! pub-sub transport; orchestration code only ever sees three shapes,
//! which this module provides over a shared in-process map:
//!
//! - [`Table`]: read/write access to one table ("is this dependency
//!   ready"); absence of a key means not ready
//! - [`ProducerTable`]: idempotent `set`/`del` rows into a downstream
//!   change table consumed by a lower layer
//! - [`SubscriberTable`]: pop-batch retrieval of pending change entries
//!   for a subscribed table
//!
//! A [`ProducerTable`] write lands in the backing table *and* appends to
//! the table's change log, so a subscriber on the same table observes the
//! write with the same visibility the external store provides.

use crate::consumer::{FieldValue, KeyOpFieldsValues, Operation};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct DbInner {
    /// table name -> key -> field-values
    tables: HashMap<String, BTreeMap<String, Vec<FieldValue>>>,
    /// table name -> ordered change log
    changes: HashMap<String, VecDeque<KeyOpFieldsValues>>,
}

/// Handle to one logical database (e.g. config, application, state).
///
/// Cheap to clone; all clones share the same backing maps.
#[derive(Debug, Clone, Default)]
pub struct Db {
    inner: Arc<Mutex<DbInner>>,
}

impl Db {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a read/write table handle.
    pub fn table(&self, name: impl Into<String>) -> Table {
        Table {
            db: self.clone(),
            name: name.into(),
        }
    }

    /// Opens a producer handle for a downstream change table.
    pub fn producer(&self, name: impl Into<String>) -> ProducerTable {
        ProducerTable {
            db: self.clone(),
            name: name.into(),
        }
    }

    /// Opens a subscriber handle for a change table.
    pub fn subscriber(&self, name: impl Into<String>) -> SubscriberTable {
        SubscriberTable {
            db: self.clone(),
            name: name.into(),
        }
    }

    /// Returns true if any subscribed table has undelivered changes.
    pub fn has_pending_changes(&self) -> bool {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.changes.values().any(|q| !q.is_empty())
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut DbInner) -> R) -> R {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        f(&mut inner)
    }
}

/// Read/write access to one table.
#[derive(Debug, Clone)]
pub struct Table {
    db: Db,
    name: String,
}

impl Table {
    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns all field-values for a key, or `None` if absent.
    pub fn get(&self, key: &str) -> Option<Vec<FieldValue>> {
        self.db
            .with_inner(|inner| inner.tables.get(&self.name)?.get(key).cloned())
    }

    /// Returns one field's value for a key.
    pub fn hget(&self, key: &str, field: &str) -> Option<String> {
        self.get(key)?
            .into_iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    /// Returns true if the key exists.
    pub fn exists(&self, key: &str) -> bool {
        self.db.with_inner(|inner| {
            inner
                .tables
                .get(&self.name)
                .is_some_and(|t| t.contains_key(key))
        })
    }

    /// Writes field-values for a key, merging field-wise over any
    /// existing row.
    pub fn set(&self, key: &str, fvs: Vec<FieldValue>) {
        self.db.with_inner(|inner| {
            let row = inner
                .tables
                .entry(self.name.clone())
                .or_default()
                .entry(key.to_string())
                .or_default();
            for (field, value) in fvs {
                if let Some(existing) = row.iter_mut().find(|(f, _)| *f == field) {
                    existing.1 = value;
                } else {
                    row.push((field, value));
                }
            }
        });
    }

    /// Deletes a key.
    pub fn del(&self, key: &str) {
        self.db.with_inner(|inner| {
            if let Some(table) = inner.tables.get_mut(&self.name) {
                table.remove(key);
            }
        });
    }

    /// Returns all keys in the table.
    pub fn keys(&self) -> Vec<String> {
        self.db.with_inner(|inner| {
            inner
                .tables
                .get(&self.name)
                .map(|t| t.keys().cloned().collect())
                .unwrap_or_default()
        })
    }
}

/// Producer of rows into a downstream change table.
///
/// Writes are idempotent: the row state reflects the last `set`/`del`,
/// and each call appends a change entry for subscribers.
#[derive(Debug, Clone)]
pub struct ProducerTable {
    db: Db,
    name: String,
}

impl ProducerTable {
    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publishes a SET row.
    pub fn set(&self, key: &str, fvs: Vec<FieldValue>) {
        self.db.table(&self.name).set(key, fvs.clone());
        self.db.with_inner(|inner| {
            inner
                .changes
                .entry(self.name.clone())
                .or_default()
                .push_back(KeyOpFieldsValues::new(key, Operation::Set, fvs));
        });
    }

    /// Publishes a DEL row.
    pub fn del(&self, key: &str) {
        self.db.table(&self.name).del(key);
        self.db.with_inner(|inner| {
            inner
                .changes
                .entry(self.name.clone())
                .or_default()
                .push_back(KeyOpFieldsValues::del(key));
        });
    }
}

/// Pop-batch consumer of a change table.
#[derive(Debug, Clone)]
pub struct SubscriberTable {
    db: Db,
    name: String,
}

impl SubscriberTable {
    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pops up to `batch_size` pending change entries in arrival order.
    pub fn pops(&self, batch_size: usize) -> Vec<KeyOpFieldsValues> {
        self.db.with_inner(|inner| {
            let queue = match inner.changes.get_mut(&self.name) {
                Some(q) => q,
                None => return Vec::new(),
            };
            let n = batch_size.min(queue.len());
            queue.drain(..n).collect()
        })
    }

    /// Returns true if there are undelivered change entries.
    pub fn has_pending(&self) -> bool {
        self.db.with_inner(|inner| {
            inner
                .changes
                .get(&self.name)
                .is_some_and(|q| !q.is_empty())
        })
    }

    /// Reads the entire backing table as SET entries (initial load and
    /// warm-restart enumeration).
    pub fn read_table(&self) -> Vec<KeyOpFieldsValues> {
        self.db.with_inner(|inner| {
            inner
                .tables
                .get(&self.name)
                .map(|t| {
                    t.iter()
                        .map(|(k, fvs)| KeyOpFieldsValues::set(k.clone(), fvs.clone()))
                        .collect()
                })
                .unwrap_or_default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fv(field: &str, value: &str) -> FieldValue {
        (field.to_string(), value.to_string())
    }

    #[test]
    fn test_table_set_get() {
        let db = Db::new();
        let table = db.table("PORT_TABLE");

        assert!(table.get("Ethernet0").is_none());
        assert!(!table.exists("Ethernet0"));

        table.set("Ethernet0", vec![fv("oper_status", "up")]);
        assert!(table.exists("Ethernet0"));
        assert_eq!(table.hget("Ethernet0", "oper_status"), Some("up".to_string()));
        assert_eq!(table.hget("Ethernet0", "speed"), None);
    }

    #[test]
    fn test_table_set_merges_fields() {
        let db = Db::new();
        let table = db.table("PORT_TABLE");

        table.set("Ethernet0", vec![fv("oper_status", "down"), fv("mtu", "9100")]);
        table.set("Ethernet0", vec![fv("oper_status", "up")]);

        assert_eq!(table.hget("Ethernet0", "oper_status"), Some("up".to_string()));
        assert_eq!(table.hget("Ethernet0", "mtu"), Some("9100".to_string()));
    }

    #[test]
    fn test_producer_feeds_subscriber() {
        let db = Db::new();
        let producer = db.producer("VLAN_TABLE");
        let subscriber = db.subscriber("VLAN_TABLE");

        producer.set("Vlan100", vec![fv("mtu", "9100")]);
        producer.del("Vlan200");

        assert!(subscriber.has_pending());
        let entries = subscriber.pops(128);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].op.is_set());
        assert_eq!(entries[0].key, "Vlan100");
        assert!(entries[1].op.is_del());
        assert!(!subscriber.has_pending());

        // The backing table reflects the last write.
        assert!(db.table("VLAN_TABLE").exists("Vlan100"));
        assert!(!db.table("VLAN_TABLE").exists("Vlan200"));
    }

    #[test]
    fn test_pops_respects_batch_size() {
        let db = Db::new();
        let producer = db.producer("NEIGH_TABLE");
        let subscriber = db.subscriber("NEIGH_TABLE");

        for i in 0..5 {
            producer.set(&format!("Vlan100:10.0.0.{}", i), vec![]);
        }

        assert_eq!(subscriber.pops(2).len(), 2);
        assert_eq!(subscriber.pops(128).len(), 3);
        assert_eq!(subscriber.pops(128).len(), 0);
    }

    #[test]
    fn test_read_table_snapshot() {
        let db = Db::new();
        db.table("VLAN_TABLE").set("Vlan100", vec![fv("mtu", "9100")]);
        db.table("VLAN_TABLE").set("Vlan200", vec![]);

        let snapshot = db.subscriber("VLAN_TABLE").read_table();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|e| e.op.is_set()));
    }

    #[test]
    fn test_clones_share_state() {
        let db = Db::new();
        let db2 = db.clone();

        db.table("T").set("k", vec![fv("f", "v")]);
        assert!(db2.table("T").exists("k"));
    }
}
