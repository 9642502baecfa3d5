use crate::{events::EventEmitter, NodeError, NodeId, Value, WorkflowId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// An immutable node template supplied by a plugin.
///
/// The runtime instantiates fresh ports for every workflow node created from
/// a template, so one template may back many running nodes at once.
#[async_trait]
pub trait Node: Send + Sync {
    /// Catalog key (e.g. "time.ticker", "debug.log")
    fn node_type(&self) -> &str;

    /// Port declarations and flags
    fn metadata(&self) -> NodeMetadata;

    /// Run one epoch. Values may be written to `ctx.outputs` at any point,
    /// including from tasks the action spawns itself.
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// Declared shape of a node template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    /// Begin nodes skip waiting on their inputs in the first epoch
    #[serde(default)]
    pub is_begin: bool,
    #[serde(default)]
    pub inputs: Vec<PortDefinition>,
    #[serde(default)]
    pub outputs: Vec<PortDefinition>,
    #[serde(default)]
    pub params: Vec<PortDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub value_type: String,
}

impl PortDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        value_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            value_type: value_type.into(),
        }
    }
}

/// Execution context passed to each epoch of a node
#[derive(Clone)]
pub struct NodeContext {
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,

    /// Zero-based epoch counter of this node's loop
    pub epoch: u64,

    /// One value per declared parameter and input port. A begin node's
    /// first epoch carries parameters only.
    pub inputs: HashMap<String, Value>,

    /// Writers for the node's output ports
    pub outputs: Outputs,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Fires when the node or its workflow is stopped
    pub cancellation: CancellationToken,
}

impl NodeContext {
    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get input with default
    pub fn input_or(&self, name: &str, default: Value) -> Value {
        self.inputs.get(name).cloned().unwrap_or(default)
    }
}

/// Write half of a node's output ports.
///
/// Every port is a single-slot channel; `send` waits for the edge listener to
/// drain the slot and gives up when the node is cancelled.
#[derive(Clone)]
pub struct Outputs {
    ports: HashMap<String, mpsc::Sender<Value>>,
    cancellation: CancellationToken,
}

impl Outputs {
    pub fn new(ports: HashMap<String, mpsc::Sender<Value>>, cancellation: CancellationToken) -> Self {
        Self {
            ports,
            cancellation,
        }
    }

    pub async fn send(&self, port: &str, value: impl Into<Value>) -> Result<(), NodeError> {
        let tx = self
            .ports
            .get(port)
            .ok_or_else(|| NodeError::UnknownOutput(port.to_string()))?;
        let value = value.into();

        tokio::select! {
            res = tx.send(value) => res.map_err(|_| NodeError::Cancelled),
            _ = self.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }

    /// Write without waiting; fails if the slot is still occupied
    pub fn try_send(&self, port: &str, value: impl Into<Value>) -> Result<(), NodeError> {
        let tx = self
            .ports
            .get(port)
            .ok_or_else(|| NodeError::UnknownOutput(port.to_string()))?;

        tx.try_send(value.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                NodeError::ExecutionFailed(format!("output port '{}' is full", port))
            }
            mpsc::error::TrySendError::Closed(_) => NodeError::Cancelled,
        })
    }

    pub fn contains(&self, port: &str) -> bool {
        self.ports.contains_key(port)
    }

    pub fn port_names(&self) -> impl Iterator<Item = &str> {
        self.ports.keys().map(String::as_str)
    }
}

/// Outcome of one epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Forwarded to the workflow's result sink when present
    pub result: Option<Value>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, value: impl Into<Value>) -> Self {
        self.result = Some(value.into());
        self
    }
}
