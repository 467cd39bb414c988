//! Typed publish/subscribe for cross-orchestrator fanout.
//!
//! Replaces raw observer lists with an explicit subject capability:
//! interested orchestrators attach and receive tagged event variants over
//! a channel they drain at the start of their own dispatch slot, keeping
//! all mutation on the single dispatch task.

use std::collections::HashMap;
use switchd_types::MacAddress;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Events fanned out across orchestrators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectEvent {
    /// A port became known to the system.
    PortAdded { alias: String },
    /// A port was removed from the system.
    PortRemoved { alias: String },
    /// The switch system MAC was learned.
    SystemMacLearned { mac: MacAddress },
}

/// A subject that interested parties attach to by name.
#[derive(Debug, Default)]
pub struct Subject {
    subscribers: HashMap<String, UnboundedSender<SubjectEvent>>,
}

impl Subject {
    /// Creates a subject with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a named subscriber and returns its event receiver.
    ///
    /// Re-attaching under the same name replaces the previous channel.
    pub fn attach(&mut self, name: impl Into<String>) -> UnboundedReceiver<SubjectEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(name.into(), tx);
        rx
    }

    /// Detaches a subscriber.
    pub fn detach(&mut self, name: &str) {
        self.subscribers.remove(name);
    }

    /// Notifies every attached subscriber.
    ///
    /// Subscribers whose receiver has been dropped are pruned.
    pub fn notify(&mut self, event: &SubjectEvent) {
        self.subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Drains all events currently queued on a receiver without blocking.
pub fn drain_events(rx: &mut UnboundedReceiver<SubjectEvent>) -> Vec<SubjectEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
