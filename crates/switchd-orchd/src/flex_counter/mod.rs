//! Flex counter binding for dynamically created objects.
//!
//! A flex counter is a declared binding between an ASIC object and a set
//! of statistics polled by an external counter service. Orchestrators
//! lazily bind and unbind counters as dependent objects appear and
//! disappear; binding defers until the object's identity has been resolved
//! in the asynchronously-filled id-translation table.

mod group;
mod manager;

pub use group::FlexCounterGroup;
pub use manager::FlexCounterManager;
