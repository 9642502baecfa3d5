//! Core abstractions for flowmesh
//!
//! This crate provides the types shared by the dataflow runtime and the peer
//! coordination layer: values, node templates, edges, protocol payloads and
//! errors. It spawns nothing itself.

mod error;
pub mod events;
pub mod message;
mod node;
mod peer;
mod plugin;
mod value;
mod workflow;

pub use error::{MeshError, NodeError, PeerError, PluginError, ProtocolError, WorkflowError};
pub use events::*;
pub use node::{Node, NodeContext, NodeMetadata, NodeOutput, Outputs, PortDefinition};
pub use peer::{PeerId, PeerInfo};
pub use plugin::{NodeDescriptor, PluginDescriptor, PluginInfo};
pub use value::Value;
pub use workflow::{
    ConsumerRef, DeploymentPlan, EdgeEnvelope, EdgeId, EdgePlan, NodeId, NodePlacement,
    WorkflowId,
};

/// Result type for flowmesh operations
pub type Result<T> = std::result::Result<T, MeshError>;
