//! Consumer task queue with coalescing-on-key.

use std::collections::HashMap;

/// Operation type from the change table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Set operation (add or update)
    Set,
    /// Delete operation
    Del,
}

impl Operation {
    /// Returns true if this is a Set operation.
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    /// Returns true if this is a Del operation.
    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }
}

/// A field-value pair from a table entry.
pub type FieldValue = (String, String);

/// Key, operation, and field-values tuple from a change table.
///
/// This is the fundamental unit of data consumed from subscribed tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOpFieldsValues {
    /// The key (e.g., "Ethernet0", "tun1|Vlan100")
    pub key: String,
    /// The operation (Set or Del)
    pub op: Operation,
    /// Field-value pairs (empty for Del operations)
    pub fvs: Vec<FieldValue>,
}

impl KeyOpFieldsValues {
    /// Creates a new entry.
    pub fn new(key: impl Into<String>, op: Operation, fvs: Vec<FieldValue>) -> Self {
        Self {
            key: key.into(),
            op,
            fvs,
        }
    }

    /// Creates a Set entry.
    pub fn set(key: impl Into<String>, fvs: Vec<FieldValue>) -> Self {
        Self::new(key, Operation::Set, fvs)
    }

    /// Creates a Del entry.
    pub fn del(key: impl Into<String>) -> Self {
        Self::new(key, Operation::Del, vec![])
    }

    /// Returns the value for a field, if present.
    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.fvs
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if this entry has the given field.
    pub fn has_field(&self, field: &str) -> bool {
        self.fvs.iter().any(|(f, _)| f == field)
    }
}

/// Splits a composite key on the given separator.
///
/// Returns `None` unless the key contains the separator exactly once with
/// non-empty halves, so malformed keys surface as permanent parse failures
/// rather than half-parsed state.
pub fn split_key(key: &str, sep: char) -> Option<(&str, &str)> {
    let (a, b) = key.split_once(sep)?;
    if a.is_empty() || b.is_empty() || b.contains(sep) {
        return None;
    }
    Some((a, b))
}

/// Configuration for a Consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Table name (e.g., "VLAN_TABLE", "VXLAN_TUNNEL_TABLE")
    pub table_name: String,
    /// Priority (lower = higher priority)
    pub priority: i32,
    /// Pop batch size
    pub batch_size: usize,
}

impl ConsumerConfig {
    /// Creates a new consumer config.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            priority: 0,
            batch_size: 128,
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Consumer task queue for one subscribed table.
///
/// A Consumer ingests change entries and presents them to an Orch for
/// processing, maintaining two invariants:
///
/// - **Coalescing**: at most one pending entry per key, representing the
///   cumulative intended state, not a history of edits. A newer SET merges
///   field-wise over a pending SET; a DEL discards any pending entry; a SET
///   after a pending DEL replaces it (last write wins).
/// - **Ordering**: entries are drained in original arrival order. A key
///   re-queued for retry keeps its place ahead of entries that arrive
///   later.
pub struct Consumer {
    config: ConsumerConfig,
    /// Pending entries indexed by key
    to_sync: HashMap<String, KeyOpFieldsValues>,
    /// Keys in arrival order
    order: Vec<String>,
}

impl Consumer {
    /// Creates a new consumer with the given configuration.
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            to_sync: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Returns the table name.
    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    /// Returns the priority.
    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    /// Returns the pop batch size.
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Returns true if there are pending entries.
    pub fn has_pending(&self) -> bool {
        !self.to_sync.is_empty()
    }

    /// Returns the number of pending entries.
    pub fn pending_count(&self) -> usize {
        self.to_sync.len()
    }

    /// Adds entries to the sync queue with coalescing.
    pub fn add_to_sync(&mut self, entries: Vec<KeyOpFieldsValues>) {
        for entry in entries {
            self.add_single_entry(entry);
        }
    }

    fn add_single_entry(&mut self, entry: KeyOpFieldsValues) {
        match self.to_sync.get_mut(&entry.key) {
            None => {
                self.order.push(entry.key.clone());
                self.to_sync.insert(entry.key.clone(), entry);
            }
            Some(pending) => match (pending.op, entry.op) {
                // Newer SET merges field-wise over a pending SET.
                (Operation::Set, Operation::Set) => {
                    for (field, value) in entry.fvs {
                        if let Some(existing) =
                            pending.fvs.iter_mut().find(|(f, _)| *f == field)
                        {
                            existing.1 = value;
                        } else {
                            pending.fvs.push((field, value));
                        }
                    }
                }
                // Anything superseded by the latest operation.
                _ => *pending = entry,
            },
        }
    }

    /// Drains all pending entries in arrival order.
    pub fn drain(&mut self) -> Vec<KeyOpFieldsValues> {
        let mut result = Vec::with_capacity(self.to_sync.len());
        for key in std::mem::take(&mut self.order) {
            if let Some(entry) = self.to_sync.remove(&key) {
                result.push(entry);
            }
        }
        result
    }

    /// Re-queues an entry that returned `NeedRetry`.
    ///
    /// If a newer entry for the same key arrived while the handler ran, the
    /// newer entry wins and the stale retry is dropped.
    pub fn retry(&mut self, entry: KeyOpFieldsValues) {
        if self.to_sync.contains_key(&entry.key) {
            return;
        }
        self.order.push(entry.key.clone());
        self.to_sync.insert(entry.key.clone(), entry);
    }

    /// Clears all pending entries.
    pub fn clear(&mut self) {
        self.to_sync.clear();
        self.order.clear();
    }

    /// Dumps pending entries for debugging.
    pub fn dump(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|key| self.to_sync.get(key))
            .map(|e| {
                format!(
                    "{}: {} {:?}",
                    e.key,
                    if e.op.is_set() { "SET" } else { "DEL" },
                    e.fvs
                )
            })
            .collect()
    }
}
