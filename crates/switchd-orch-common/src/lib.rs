//! Common orchestration abstractions for switchd.
//!
//! This crate provides the core traits and types used by every
//! orchestration module in the switchd control plane:
//!
//! - [`Orch`]: base trait for orchestration agents
//! - [`Consumer`]: per-table task queue with coalescing-on-key
//! - [`TaskStatus`] / [`TaskError`]: the uniform task disposition policy
//! - [`Db`] and friends: the key/value store modeled at its interface
//! - [`Subject`]: typed publish/subscribe for cross-orch fanout
//! - [`SyncMap`]: map that prevents auto-vivification bugs in
//!   reference-counted resource caches
//!
//! # Architecture
//!
//! The orchestration layer is a pull-based, level-triggered retry loop:
//!
//! 1. Configuration changes arrive as `(key, op, field-values)` entries on
//!    subscribed tables
//! 2. Each [`Consumer`] coalesces pending entries per key, keeping only
//!    the cumulative intended state
//! 3. The daemon calls [`Orch::do_task`] which drains the queue and
//!    dispatches each entry to a per-table handler
//! 4. A handler returning [`TaskStatus::NeedRetry`] leaves the entry
//!    queued; it is re-evaluated on the next dispatch cycle, after every
//!    other ready entry has had a chance to run
//! 5. Results are published to downstream change tables and the ASIC

mod consumer;
mod orch;
mod store;
mod subject;
mod sync_map;
mod task;
mod warm_restart;

pub use consumer::{split_key, Consumer, ConsumerConfig, FieldValue, KeyOpFieldsValues, Operation};
pub use orch::{Orch, OrchContext, SharedContext};
pub use store::{Db, ProducerTable, SubscriberTable, Table};
pub use subject::{drain_events, Subject, SubjectEvent};
pub use sync_map::{HasRefCount, SyncMap, SyncMapError};
pub use task::{TaskError, TaskResult, TaskResultExt, TaskStatus};
pub use warm_restart::{WarmRestartHelper, WarmRestartState, WARM_RESTART_TABLE};
