//! Control protocol payloads. Each protocol stream carries exactly one of
//! these, encoded as JSON.

use crate::{EdgeEnvelope, EdgeId, NodeId, PeerId, PluginDescriptor, Value, WorkflowId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNodeMessage {
    pub node_name: String,
    pub node_id: NodeId,
    pub workflow_id: WorkflowId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteNodeMessage {
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetParamMessage {
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub param_name: String,
    pub param_value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEdgeMessage {
    pub edge_id: EdgeId,
    pub destination: PeerId,
    pub workflow_id: WorkflowId,
    pub producer_node_id: NodeId,
    pub producer_port: String,
    pub consumer_node_id: NodeId,
    pub consumer_port: String,
    /// Where the destination can be dialed, for followers that never
    /// discovered it themselves
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_addrs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteEdgeMessage {
    pub workflow_id: WorkflowId,
    pub edge_id: EdgeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

/// Result uploads are tagged with their origin so the leader can tell
/// followers apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub workflow_id: WorkflowId,
    pub value: Value,
}

/// An envelope sent to the peer hosting its consumer. The receiver answers
/// with a [`DataAckMessage`] carrying the same `seq` once the value is in
/// the consumer port, or once it has given up on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPassMessage {
    pub seq: u64,
    pub envelope: EdgeEnvelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataAckMessage {
    pub workflow_id: WorkflowId,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityRole {
    /// Leader's first message to a follower
    Greeting,
    /// Follower's answer, carrying its node catalog
    Reply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMessage {
    pub role: IdentityRole,
    pub plugin: PluginDescriptor,
}
