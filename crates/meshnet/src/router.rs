use chrono::Utc;
use meshcore::message::{
    CreateEdgeMessage, CreateNodeMessage, DataAckMessage, DataPassMessage, DeleteEdgeMessage,
    DeleteNodeMessage, IdentityMessage, IdentityRole, LogLevel, LogMessage, ResultMessage,
    SetParamMessage,
};
use meshcore::{MeshError, PeerError, PeerId, PeerInfo, WorkflowId};
use meshruntime::Runtime;
use std::sync::Arc;

use crate::events::{MeshEvent, MeshEventBus};
use crate::listener::WorkflowListeners;
use crate::peer::PeerDirectory;
use crate::protocol::{decode, Protocol};
use crate::transport::InboundStream;

/// Turns each inbound stream into exactly one runtime or directory
/// operation. Failures are logged here and never reach the sender.
pub struct Router {
    directory: Arc<PeerDirectory>,
    runtime: Arc<Runtime>,
    listeners: Arc<WorkflowListeners>,
    events: Arc<MeshEventBus>,
}

impl Router {
    pub fn new(
        directory: Arc<PeerDirectory>,
        runtime: Arc<Runtime>,
        listeners: Arc<WorkflowListeners>,
        events: Arc<MeshEventBus>,
    ) -> Self {
        Self {
            directory,
            runtime,
            listeners,
            events,
        }
    }

    pub async fn handle(&self, stream: InboundStream) {
        let InboundStream {
            remote,
            protocol,
            payload,
        } = stream;

        self.directory.touch(&remote);

        if let Err(e) = self.dispatch(&remote, protocol, &payload).await {
            tracing::warn!(%protocol, peer = %remote.id, error = %e, "Inbound stream failed");
        }
    }

    async fn dispatch(
        &self,
        remote: &PeerInfo,
        protocol: Protocol,
        payload: &[u8],
    ) -> Result<(), MeshError> {
        match protocol {
            Protocol::Heartbeat => {
                self.directory.record_heartbeat(remote.id);
            }
            Protocol::Identity => {
                let message: IdentityMessage = decode(protocol, payload)?;
                self.handle_identity(remote.id, message).await?;
            }
            Protocol::WorkflowCreate => {
                let workflow_id: WorkflowId = decode(protocol, payload)?;
                self.listeners.forget(workflow_id);
                for edge in self.runtime.init_workflow(workflow_id).await {
                    self.release_link(edge.consumer().destination);
                }
            }
            Protocol::WorkflowDelete => {
                let workflow_id: WorkflowId = decode(protocol, payload)?;
                let edges = self.runtime.delete_workflow(workflow_id).await?;
                self.listeners.forget(workflow_id);
                for edge in edges {
                    self.release_link(edge.consumer().destination);
                }
            }
            Protocol::WorkflowRun => {
                let workflow_id: WorkflowId = decode(protocol, payload)?;
                self.listeners.start(workflow_id).await?;
            }
            Protocol::WorkflowStop => {
                let workflow_id: WorkflowId = decode(protocol, payload)?;
                self.runtime.stop_workflow(workflow_id).await?;
                self.listeners.forget(workflow_id);
            }
            Protocol::NodeCreate => {
                let m: CreateNodeMessage = decode(protocol, payload)?;
                self.runtime
                    .create_node(&m.node_name, m.node_id, m.workflow_id)
                    .await?;
            }
            Protocol::NodeDelete => {
                let m: DeleteNodeMessage = decode(protocol, payload)?;
                self.runtime.delete_node(m.workflow_id, m.node_id).await?;
            }
            Protocol::NodeParam => {
                let m: SetParamMessage = decode(protocol, payload)?;
                self.runtime
                    .set_param(m.workflow_id, m.node_id, &m.param_name, m.param_value)
                    .await?;
            }
            Protocol::EdgeCreate => {
                let m: CreateEdgeMessage = decode(protocol, payload)?;
                self.create_edge(m).await?;
            }
            Protocol::EdgeDelete => {
                let m: DeleteEdgeMessage = decode(protocol, payload)?;
                let edge = self.runtime.delete_edge(m.workflow_id, m.edge_id).await?;
                self.release_link(edge.consumer().destination);
            }
            Protocol::LogUpload => {
                let m: LogMessage = decode(protocol, payload)?;
                self.handle_log(remote.id, m);
            }
            Protocol::ResultUpload => {
                let m: ResultMessage = decode(protocol, payload)?;
                tracing::info!(peer = %remote.id, workflow_id = m.workflow_id, "Result received");
                self.events.publish(MeshEvent::ResultReceived {
                    peer: remote.id,
                    workflow_id: m.workflow_id,
                    value: m.value,
                    timestamp: Utc::now(),
                });
            }
            Protocol::DataPass => {
                let m: DataPassMessage = decode(protocol, payload)?;
                let ack = DataAckMessage {
                    workflow_id: m.envelope.workflow_id,
                    seq: m.seq,
                };
                // Acked whether or not the delivery succeeded
                let delivered = self.runtime.deliver(m.envelope).await;
                self.directory.send_data_ack(remote.id, &ack).await?;
                delivered?;
            }
            Protocol::DataAck => {
                let m: DataAckMessage = decode(protocol, payload)?;
                self.listeners.acknowledge(m.workflow_id, m.seq);
            }
        }
        Ok(())
    }

    /// The first greeting makes its sender this process's leader; later
    /// greetings overwrite it. A reply carries a follower's catalog.
    async fn handle_identity(&self, peer: PeerId, message: IdentityMessage) -> Result<(), MeshError> {
        match message.role {
            IdentityRole::Greeting => {
                self.directory.set_leader(peer);
                tracing::info!(leader = %peer, "Leader confirmed");
                self.events.publish(MeshEvent::LeaderElected {
                    leader: peer,
                    timestamp: Utc::now(),
                });

                self.directory.add_link(peer)?;

                let reply = IdentityMessage {
                    role: IdentityRole::Reply,
                    plugin: self.runtime.registry().descriptor(),
                };
                self.directory.send_identity(peer, &reply).await?;
            }
            IdentityRole::Reply => {
                tracing::info!(
                    peer = %peer,
                    plugin = %message.plugin.plugin.name,
                    nodes = message.plugin.nodes.len(),
                    "Follower identified"
                );
                self.directory.set_plugin(peer, message.plugin.clone());
                self.events.publish(MeshEvent::FollowerIdentified {
                    peer,
                    plugin: message.plugin,
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(())
    }

    async fn create_edge(&self, m: CreateEdgeMessage) -> Result<(), MeshError> {
        let remote = m.destination != self.directory.local_id();
        if remote {
            if !m.destination_addrs.is_empty() {
                let mut info = PeerInfo::new(m.destination);
                info.addrs = m.destination_addrs.clone();
                self.directory.touch(&info);
            }
            if self.directory.peer(m.destination).is_none() {
                return Err(PeerError::NotFound(m.destination).into());
            }
        }

        let previous = self
            .runtime
            .create_edge(
                m.edge_id,
                m.destination,
                m.workflow_id,
                m.producer_node_id,
                &m.producer_port,
                m.consumer_node_id,
                &m.consumer_port,
            )
            .await?;

        if let Some(previous) = previous {
            self.release_link(previous.consumer().destination);
        }
        if remote {
            self.directory.add_link(m.destination)?;
        }
        Ok(())
    }

    fn handle_log(&self, peer: PeerId, m: LogMessage) {
        match m.level {
            LogLevel::Debug => tracing::debug!(peer = %peer, "{}", m.message),
            LogLevel::Info => tracing::info!(peer = %peer, "{}", m.message),
            LogLevel::Warn => tracing::warn!(peer = %peer, "{}", m.message),
            LogLevel::Error => tracing::error!(peer = %peer, "{}", m.message),
        }
        self.events.publish(MeshEvent::LogReceived {
            peer,
            level: m.level,
            message: m.message,
            timestamp: Utc::now(),
        });
    }

    /// Links are only held for edges leaving this process
    fn release_link(&self, destination: PeerId) {
        if destination == self.directory.local_id() {
            return;
        }
        if let Err(e) = self.directory.sub_link(destination) {
            tracing::warn!(peer = %destination, error = %e, "Failed to release link");
        }
    }
}
