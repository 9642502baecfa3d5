//! Peer coordination layer
//!
//! Peers find each other through discovery, keep linked peers alive with
//! heartbeats, and exchange one-message streams. A leader drives followers
//! through the control protocols; followers run their share of a workflow
//! and ship edge data, logs and results back over the same transport.

pub mod config;
mod events;
mod heartbeat;
mod leader;
mod listener;
mod mesh;
mod peer;
pub mod protocol;
mod router;
mod tcp;
mod transport;

pub use config::{HeartbeatConfig, MeshConfig};
pub use events::{MeshEvent, MeshEventBus};
pub use leader::Leader;
pub use listener::WorkflowListeners;
pub use mesh::Mesh;
pub use peer::PeerDirectory;
pub use protocol::Protocol;
pub use router::Router;
pub use tcp::{TcpTransport, DEFAULT_READ_TIMEOUT};
pub use transport::{InboundStream, MemoryNetwork, MemoryTransport, Transport};
