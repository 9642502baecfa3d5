use meshcore::message::{
    CreateEdgeMessage, CreateNodeMessage, DeleteEdgeMessage, DeleteNodeMessage, IdentityMessage,
    IdentityRole, SetParamMessage,
};
use meshcore::{
    DeploymentPlan, EdgeId, MeshError, NodeId, PeerError, PeerId, PluginDescriptor, Value,
    WorkflowError, WorkflowId,
};
use std::sync::Arc;

use crate::peer::PeerDirectory;
use crate::protocol::Protocol;

/// Client side of the control protocols. Every call is fire-and-forget:
/// success means the message was written, not that the follower applied it.
pub struct Leader {
    directory: Arc<PeerDirectory>,
    plugin: PluginDescriptor,
}

impl Leader {
    pub fn new(directory: Arc<PeerDirectory>, plugin: PluginDescriptor) -> Self {
        Self { directory, plugin }
    }

    /// Claim a follower and hold a link to it
    pub async fn greet(&self, peer: PeerId) -> Result<(), MeshError> {
        let greeting = IdentityMessage {
            role: IdentityRole::Greeting,
            plugin: self.plugin.clone(),
        };
        self.directory.send_identity(peer, &greeting).await?;
        self.directory.add_link(peer)?;
        Ok(())
    }

    pub async fn create_workflow(&self, peer: PeerId, workflow_id: WorkflowId) -> Result<(), MeshError> {
        self.directory
            .send(peer, Protocol::WorkflowCreate, &workflow_id)
            .await
    }

    pub async fn delete_workflow(&self, peer: PeerId, workflow_id: WorkflowId) -> Result<(), MeshError> {
        self.directory
            .send(peer, Protocol::WorkflowDelete, &workflow_id)
            .await
    }

    pub async fn run_workflow(&self, peer: PeerId, workflow_id: WorkflowId) -> Result<(), MeshError> {
        self.directory
            .send(peer, Protocol::WorkflowRun, &workflow_id)
            .await
    }

    pub async fn stop_workflow(&self, peer: PeerId, workflow_id: WorkflowId) -> Result<(), MeshError> {
        self.directory
            .send(peer, Protocol::WorkflowStop, &workflow_id)
            .await
    }

    pub async fn create_node(
        &self,
        peer: PeerId,
        node_name: &str,
        node_id: NodeId,
        workflow_id: WorkflowId,
    ) -> Result<(), MeshError> {
        let message = CreateNodeMessage {
            node_name: node_name.to_string(),
            node_id,
            workflow_id,
        };
        self.directory
            .send(peer, Protocol::NodeCreate, &message)
            .await
    }

    pub async fn delete_node(
        &self,
        peer: PeerId,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<(), MeshError> {
        let message = DeleteNodeMessage {
            workflow_id,
            node_id,
        };
        self.directory
            .send(peer, Protocol::NodeDelete, &message)
            .await
    }

    pub async fn set_param(
        &self,
        peer: PeerId,
        workflow_id: WorkflowId,
        node_id: NodeId,
        param_name: &str,
        param_value: Value,
    ) -> Result<(), MeshError> {
        let message = SetParamMessage {
            workflow_id,
            node_id,
            param_name: param_name.to_string(),
            param_value,
        };
        self.directory
            .send(peer, Protocol::NodeParam, &message)
            .await
    }

    /// Ask `peer`, which hosts the producer, to register an edge
    pub async fn create_edge(&self, peer: PeerId, message: &CreateEdgeMessage) -> Result<(), MeshError> {
        self.directory
            .send(peer, Protocol::EdgeCreate, message)
            .await
    }

    pub async fn delete_edge(
        &self,
        peer: PeerId,
        workflow_id: WorkflowId,
        edge_id: EdgeId,
    ) -> Result<(), MeshError> {
        let message = DeleteEdgeMessage {
            workflow_id,
            edge_id,
        };
        self.directory
            .send(peer, Protocol::EdgeDelete, &message)
            .await
    }

    /// Lay a plan out across its peers and start it everywhere.
    ///
    /// Each hosting peer is greeted, gets the workflow, its nodes with their
    /// parameters and the edges leaving them, and is then told to run.
    pub async fn deploy(&self, plan: &DeploymentPlan) -> Result<(), MeshError> {
        let workflow_id = plan.workflow_id;
        check_plan(plan)?;

        for info in &plan.peers {
            self.directory.touch(info);
        }
        let peers = plan.placement_peers();
        for &peer in &peers {
            if self.directory.peer(peer).is_none() {
                return Err(PeerError::NotFound(peer).into());
            }
        }

        for &peer in &peers {
            self.greet(peer).await?;
            self.create_workflow(peer, workflow_id).await?;
        }

        for node in &plan.nodes {
            self.create_node(node.peer, &node.node_type, node.id, workflow_id)
                .await?;

            let mut params: Vec<_> = node.params.iter().collect();
            params.sort_by(|a, b| a.0.cmp(b.0));
            for (name, value) in params {
                self.set_param(node.peer, workflow_id, node.id, name, value.clone())
                    .await?;
            }
        }

        for edge in &plan.edges {
            let (Some(producer), Some(consumer)) =
                (plan.find_node(edge.from_node), plan.find_node(edge.to_node))
            else {
                continue;
            };

            let destination_addrs = if producer.peer == consumer.peer {
                Vec::new()
            } else {
                self.directory
                    .peer(consumer.peer)
                    .map(|info| info.addrs)
                    .unwrap_or_default()
            };

            let message = CreateEdgeMessage {
                edge_id: edge.id,
                destination: consumer.peer,
                workflow_id,
                producer_node_id: producer.id,
                producer_port: edge.from_port.clone(),
                consumer_node_id: consumer.id,
                consumer_port: edge.to_port.clone(),
                destination_addrs,
            };
            self.create_edge(producer.peer, &message).await?;
        }

        for &peer in &peers {
            self.run_workflow(peer, workflow_id).await?;
        }

        tracing::info!(
            workflow_id,
            name = %plan.name,
            peers = peers.len(),
            nodes = plan.nodes.len(),
            edges = plan.edges.len(),
            "Workflow deployed"
        );
        Ok(())
    }

    /// Stop and delete a deployed plan everywhere and drop the links
    /// `deploy` took. Keeps going past individual failures and returns the
    /// first one.
    pub async fn teardown(&self, plan: &DeploymentPlan) -> Result<(), MeshError> {
        let workflow_id = plan.workflow_id;
        let mut first_error = None;

        for peer in plan.placement_peers() {
            let res = async {
                self.stop_workflow(peer, workflow_id).await?;
                self.delete_workflow(peer, workflow_id).await?;
                self.directory.sub_link(peer)?;
                Ok::<(), MeshError>(())
            }
            .await;

            if let Err(e) = res {
                tracing::warn!(workflow_id, peer = %peer, error = %e, "Teardown failed");
                first_error.get_or_insert(e);
            }
        }

        tracing::info!(workflow_id, "Workflow torn down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Every edge must join two placed nodes
fn check_plan(plan: &DeploymentPlan) -> Result<(), WorkflowError> {
    for edge in &plan.edges {
        for node in [edge.from_node, edge.to_node] {
            if plan.find_node(node).is_none() {
                return Err(WorkflowError::NodeNotFound {
                    workflow: plan.workflow_id,
                    node,
                });
            }
        }
    }
    Ok(())
}
