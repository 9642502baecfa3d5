use crate::{NodeId, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while workflows run on this process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        workflow_id: WorkflowId,
        nodes: usize,
        edges: usize,
        timestamp: DateTime<Utc>,
    },
    WorkflowStopped {
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        workflow_id: WorkflowId,
        node_id: NodeId,
        epoch: u64,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        workflow_id: WorkflowId,
        node_id: NodeId,
        epoch: u64,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeEvent {
        workflow_id: WorkflowId,
        node_id: NodeId,
        event: NodeEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Events a node reports about itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum NodeEvent {
    Info { message: String },
    Warning { message: String },
    Data { port: String, value: Value },
}

/// Event emitter for nodes to send real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    workflow_id: WorkflowId,
    node_id: NodeId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        workflow_id: WorkflowId,
        node_id: NodeId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            workflow_id,
            node_id,
            sender,
        }
    }

    /// Emit a node-specific event
    pub fn emit(&self, event: NodeEvent) {
        let _ = self.sender.send(ExecutionEvent::NodeEvent {
            workflow_id: self.workflow_id,
            node_id: self.node_id,
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Warning {
            message: message.into(),
        });
    }

    /// Mirror a value written to a port
    pub fn data(&self, port: impl Into<String>, value: Value) {
        self.emit(NodeEvent::Data {
            port: port.into(),
            value,
        });
    }
}

/// Process-wide execution event bus
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, workflow_id: WorkflowId, node_id: NodeId) -> EventEmitter {
        EventEmitter::new(workflow_id, node_id, self.sender.clone())
    }
}
