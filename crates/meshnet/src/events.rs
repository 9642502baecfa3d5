use chrono::{DateTime, Utc};
use meshcore::message::LogLevel;
use meshcore::{PeerId, PluginDescriptor, Value, WorkflowId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What happened on the overlay, as seen by this process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MeshEvent {
    /// A leader greeted this process
    LeaderElected {
        leader: PeerId,
        timestamp: DateTime<Utc>,
    },
    /// A follower answered this process's greeting
    FollowerIdentified {
        peer: PeerId,
        plugin: PluginDescriptor,
        timestamp: DateTime<Utc>,
    },
    ResultReceived {
        peer: PeerId,
        workflow_id: WorkflowId,
        value: Value,
        timestamp: DateTime<Utc>,
    },
    LogReceived {
        peer: PeerId,
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
    PeerHeartbeatTimeout {
        peer: PeerId,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for `MeshEvent`s. All subscribers receive all events.
pub struct MeshEventBus {
    tx: broadcast::Sender<MeshEvent>,
}

impl MeshEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: MeshEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }
}

impl Default for MeshEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
