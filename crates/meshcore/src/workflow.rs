use crate::{PeerId, PeerInfo, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type WorkflowId = u64;
pub type NodeId = u64;
pub type EdgeId = u64;

/// Where an edge delivers: a port of a node in a workflow on some peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerRef {
    pub destination: PeerId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub port: String,
}

/// A value in flight along an edge. This is the data-pass payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeEnvelope {
    pub destination: PeerId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub port: String,
    pub value: Value,
}

impl EdgeEnvelope {
    pub fn new(consumer: &ConsumerRef, value: Value) -> Self {
        Self {
            destination: consumer.destination,
            workflow_id: consumer.workflow_id,
            node_id: consumer.node_id,
            port: consumer.port.clone(),
            value,
        }
    }
}

/// A workflow laid out across peers, as the leader distributes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub workflow_id: WorkflowId,
    pub name: String,
    /// Address book for the peers named by placements
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
    #[serde(default)]
    pub nodes: Vec<NodePlacement>,
    #[serde(default)]
    pub edges: Vec<EdgePlan>,
}

impl DeploymentPlan {
    pub fn new(workflow_id: WorkflowId, name: impl Into<String>) -> Self {
        Self {
            workflow_id,
            name: name.into(),
            peers: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Record how to reach a peer. A later entry for the same peer replaces
    /// the earlier one.
    pub fn add_peer(&mut self, info: PeerInfo) {
        self.peers.retain(|p| p.id != info.id);
        self.peers.push(info);
    }

    pub fn peer_info(&self, id: PeerId) -> Option<&PeerInfo> {
        self.peers.iter().find(|p| p.id == id)
    }

    pub fn add_node(&mut self, node: NodePlacement) -> NodeId {
        let id = node.id;
        self.nodes.push(node);
        id
    }

    /// Connect an output port to an input port. Edge IDs are assigned in
    /// insertion order starting at 1.
    pub fn connect(
        &mut self,
        from_node: NodeId,
        from_port: impl Into<String>,
        to_node: NodeId,
        to_port: impl Into<String>,
    ) -> EdgeId {
        let id = self.edges.len() as EdgeId + 1;
        self.edges.push(EdgePlan {
            id,
            from_node,
            from_port: from_port.into(),
            to_node,
            to_port: to_port.into(),
        });
        id
    }

    pub fn find_node(&self, id: NodeId) -> Option<&NodePlacement> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Every distinct peer hosting at least one node
    pub fn placement_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.nodes.iter().map(|n| n.peer).collect();
        peers.sort();
        peers.dedup();
        peers
    }
}

/// A node of the plan and the peer it runs on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePlacement {
    pub id: NodeId,
    pub node_type: String,
    pub peer: PeerId,
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

impl NodePlacement {
    pub fn new(id: NodeId, node_type: impl Into<String>, peer: PeerId) -> Self {
        Self {
            id,
            node_type: node_type.into(),
            peer,
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Connection between two placed nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgePlan {
    pub id: EdgeId,
    pub from_node: NodeId,
    pub from_port: String,
    pub to_node: NodeId,
    pub to_port: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_numbers_edges_from_one() {
        let peer = PeerId::random();
        let mut plan = DeploymentPlan::new(1, "pipeline");
        plan.add_node(NodePlacement::new(1, "time.ticker", peer));
        plan.add_node(NodePlacement::new(2, "debug.log", peer));

        assert_eq!(plan.connect(1, "tick", 2, "message"), 1);
        assert_eq!(plan.connect(1, "tick", 2, "message"), 2);
        assert_eq!(plan.placement_peers(), vec![peer]);
    }

    #[test]
    fn plan_parses_without_optional_tables() {
        let plan: DeploymentPlan =
            serde_json::from_str(r#"{"workflow_id": 3, "name": "empty"}"#).unwrap();
        assert_eq!(plan.workflow_id, 3);
        assert!(plan.peers.is_empty());
        assert!(plan.nodes.is_empty());
        assert!(plan.edges.is_empty());
    }
}
