use crate::{EdgeId, NodeId, PeerId, WorkflowId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure returned by a node action. Routed to the workflow's error sink,
/// never fatal to the execution loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Unknown output port: {0}")]
    UnknownOutput(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Graph lookups and structural mutations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("Node {node} not found in workflow {workflow}")]
    NodeNotFound { workflow: WorkflowId, node: NodeId },

    #[error("Edge {edge} not found in workflow {workflow}")]
    EdgeNotFound { workflow: WorkflowId, edge: EdgeId },

    #[error("Port '{port}' not found on node {node}")]
    PortNotFound { node: NodeId, port: String },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Cannot delete node {0} with existing edges")]
    NodeHasEdges(NodeId),

    #[error("Workflow {0} is already running")]
    AlreadyRunning(WorkflowId),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PeerError {
    #[error("Peer not found: {0}")]
    NotFound(PeerId),

    #[error("No leader has been confirmed")]
    NoLeader,

    #[error("Peer {peer} has no usable address")]
    NoAddress { peer: PeerId },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid peer address '{0}', expected <peer-id>@<addr>")]
    InvalidAddress(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Failed to decode {protocol} message: {reason}")]
    Decode { protocol: String, reason: String },

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),
}

/// Validation of a plugin's node catalog, raised before anything runs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluginError {
    #[error("Invalid plugin: {0}")]
    InvalidPlugin(String),

    #[error("Invalid node '{node}': {reason}")]
    InvalidNode { node: String, reason: String },
}
