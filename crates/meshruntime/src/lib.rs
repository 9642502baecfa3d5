//! Dataflow execution runtime
//!
//! This crate owns workflow graphs (nodes, ports, edges), the node catalog
//! they are built from, and the tasks that execute them epoch by epoch.

mod executor;
mod port;
mod registry;
mod runtime;
mod sinks;

pub use registry::NodeRegistry;
pub use runtime::{Edge, RunHandle, Runtime, RuntimeConfig};
pub use sinks::{ActionFailure, Handoff, Receipt, SinkReceivers, WorkflowSinks};
