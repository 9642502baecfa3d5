use crate::executor::{self, EdgeTask, NodeTask};
use crate::port::{self, Port, PortReader};
use crate::registry::NodeRegistry;
use crate::sinks::WorkflowSinks;
use chrono::Utc;
use meshcore::{
    ConsumerRef, EdgeEnvelope, EdgeId, EventBus, ExecutionEvent, Node, NodeId, NodeMetadata,
    PeerId, Value, WorkflowError, WorkflowId,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Owns every workflow graph on this process and the tasks executing them.
///
/// Structural mutations and `run_workflow` are serialized by one lock. A run
/// works on the ports and edges present when it started: nodes and edges
/// added later take effect on the next run, while deleting a node or edge
/// stops that element's tasks right away.
pub struct Runtime {
    config: RuntimeConfig,
    registry: Arc<NodeRegistry>,
    event_bus: Arc<EventBus>,
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl Runtime {
    /// Create a new runtime with default settings
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_registry(registry, RuntimeConfig::default())
    }

    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        Self {
            registry,
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            workflows: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Create an empty workflow. An existing workflow with the same ID is
    /// stopped and replaced; its edges are returned so that whoever holds
    /// resources for their consumers can release them.
    pub async fn init_workflow(&self, workflow_id: WorkflowId) -> Vec<Edge> {
        let mut workflows = self.workflows.write().await;
        let replaced = match workflows.insert(workflow_id, Workflow::new(workflow_id)) {
            Some(previous) => {
                tracing::warn!(workflow_id, "Replacing existing workflow");
                previous.cancel.cancel();
                previous.edges.into_values().collect()
            }
            None => Vec::new(),
        };
        tracing::info!(workflow_id, "Workflow initialized");
        replaced
    }

    /// Bind a catalog template to a workflow-scoped node ID
    pub async fn create_node(
        &self,
        node_type: &str,
        node_id: NodeId,
        workflow_id: WorkflowId,
    ) -> Result<(), WorkflowError> {
        let template = self
            .registry
            .lookup(node_type)
            .ok_or_else(|| WorkflowError::UnknownNodeType(node_type.to_string()))?;

        let mut workflows = self.workflows.write().await;
        let wf = workflows
            .get_mut(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;

        if let Some(existing) = wf.nodes.get(&node_id) {
            if !existing.out_edges.is_empty() {
                return Err(WorkflowError::NodeHasEdges(node_id));
            }
            tracing::warn!(workflow_id, node_id, "Replacing existing node");
            existing.stop();
        }

        wf.nodes.insert(node_id, RuntimeNode::new(template));
        tracing::debug!(workflow_id, node_id, node_type, "Node created");
        Ok(())
    }

    /// Remove a node. Fails while the node still has outgoing edges.
    pub async fn delete_node(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<(), WorkflowError> {
        let mut workflows = self.workflows.write().await;
        let wf = workflows
            .get_mut(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;

        let node = wf.node(node_id)?;
        if !node.out_edges.is_empty() {
            return Err(WorkflowError::NodeHasEdges(node_id));
        }

        if let Some(node) = wf.nodes.remove(&node_id) {
            node.stop();
        }
        tracing::debug!(workflow_id, node_id, "Node deleted");
        Ok(())
    }

    /// Store a constant fed into a parameter port on every future run
    pub async fn set_param(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
        param_name: &str,
        value: Value,
    ) -> Result<(), WorkflowError> {
        let mut workflows = self.workflows.write().await;
        let wf = workflows
            .get_mut(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;
        let node = wf.node_mut(node_id)?;

        if find_port(&node.params, param_name).is_none() {
            return Err(WorkflowError::PortNotFound {
                node: node_id,
                port: param_name.to_string(),
            });
        }

        node.param_values.insert(param_name.to_string(), value);
        Ok(())
    }

    /// Register an edge from a local output port to a consumer that may live
    /// on any peer. Returns the edge previously registered under the same ID.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_edge(
        &self,
        edge_id: EdgeId,
        destination: PeerId,
        workflow_id: WorkflowId,
        producer_node: NodeId,
        producer_port: &str,
        consumer_node: NodeId,
        consumer_port: &str,
    ) -> Result<Option<Edge>, WorkflowError> {
        let mut workflows = self.workflows.write().await;
        let wf = workflows
            .get_mut(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;

        let producer = wf.node(producer_node)?;
        let reader = find_port(&producer.outputs, producer_port)
            .ok_or_else(|| WorkflowError::PortNotFound {
                node: producer_node,
                port: producer_port.to_string(),
            })?
            .reader();

        let edge = Edge {
            id: edge_id,
            producer_node,
            producer_port: producer_port.to_string(),
            consumer: ConsumerRef {
                destination,
                workflow_id,
                node_id: consumer_node,
                port: consumer_port.to_string(),
            },
            reader,
            stop: None,
        };

        let previous = wf.edges.insert(edge_id, edge);
        if let Some(previous) = &previous {
            tracing::warn!(workflow_id, edge_id, "Replacing existing edge");
            previous.stop();
            if let Some(node) = wf.nodes.get_mut(&previous.producer_node) {
                node.out_edges.remove(&edge_id);
            }
        }
        wf.node_mut(producer_node)?.out_edges.insert(edge_id);

        tracing::debug!(workflow_id, edge_id, producer_node, producer_port, "Edge created");
        Ok(previous)
    }

    /// Remove an edge from both tables and stop its listener
    pub async fn delete_edge(
        &self,
        workflow_id: WorkflowId,
        edge_id: EdgeId,
    ) -> Result<Edge, WorkflowError> {
        let mut workflows = self.workflows.write().await;
        let wf = workflows
            .get_mut(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;

        let edge = wf.edges.remove(&edge_id).ok_or(WorkflowError::EdgeNotFound {
            workflow: workflow_id,
            edge: edge_id,
        })?;
        if let Some(node) = wf.nodes.get_mut(&edge.producer_node) {
            node.out_edges.remove(&edge_id);
        }
        edge.stop();

        tracing::debug!(workflow_id, edge_id, "Edge deleted");
        Ok(edge)
    }

    /// Start every node loop, parameter feeder and edge listener of a
    /// workflow. The returned handle owns the workflow's cancellation scope.
    pub async fn run_workflow(
        &self,
        workflow_id: WorkflowId,
        sinks: WorkflowSinks,
    ) -> Result<RunHandle, WorkflowError> {
        let mut workflows = self.workflows.write().await;
        let wf = workflows
            .get_mut(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;

        if wf.is_running() {
            return Err(WorkflowError::AlreadyRunning(workflow_id));
        }
        if wf.cancel.is_cancelled() {
            wf.cancel = CancellationToken::new();
        }

        let tracker = TaskTracker::new();

        for (&node_id, node) in wf.nodes.iter_mut() {
            let token = wf.cancel.child_token();
            node.stop = Some(token.clone());

            for (name, value) in &node.param_values {
                // set_param only accepts declared parameter ports
                if let Some(port) = find_port(&node.params, name) {
                    tracker.spawn(executor::feed_param(
                        value.clone(),
                        port.sender(),
                        token.clone(),
                    ));
                }
            }

            tracker.spawn(executor::run_node(NodeTask {
                workflow_id,
                node_id,
                template: node.template.clone(),
                is_begin: node.metadata.is_begin,
                params: readers(&node.params),
                inputs: readers(&node.inputs),
                outputs: node
                    .outputs
                    .iter()
                    .map(|p| (p.name().to_string(), p.sender()))
                    .collect(),
                sinks: sinks.clone(),
                events: self.event_bus.clone(),
                cancel: token,
            }));
        }

        for edge in wf.edges.values_mut() {
            let token = wf.cancel.child_token();
            edge.stop = Some(token.clone());

            tracker.spawn(executor::listen_edge(EdgeTask {
                reader: edge.reader.clone(),
                consumer: edge.consumer.clone(),
                process: sinks.process.clone(),
                cancel: token,
            }));
        }

        tracker.close();
        wf.running = true;

        self.event_bus.emit(ExecutionEvent::WorkflowStarted {
            workflow_id,
            nodes: wf.nodes.len(),
            edges: wf.edges.len(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            workflow_id,
            nodes = wf.nodes.len(),
            edges = wf.edges.len(),
            "Workflow started"
        );

        Ok(RunHandle {
            workflow_id,
            cancel: wf.cancel.clone(),
            tracker,
        })
    }

    /// Cancel a workflow's scope, ending every task it spawned
    pub async fn stop_workflow(&self, workflow_id: WorkflowId) -> Result<(), WorkflowError> {
        let mut workflows = self.workflows.write().await;
        let wf = workflows
            .get_mut(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;

        wf.cancel.cancel();
        wf.running = false;

        self.event_bus.emit(ExecutionEvent::WorkflowStopped {
            workflow_id,
            timestamp: Utc::now(),
        });
        tracing::info!(workflow_id, "Workflow stopped");
        Ok(())
    }

    /// Cancel a workflow and drop it. Returns the edges it still had.
    pub async fn delete_workflow(&self, workflow_id: WorkflowId) -> Result<Vec<Edge>, WorkflowError> {
        let wf = self
            .workflows
            .write()
            .await
            .remove(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;

        wf.cancel.cancel();
        if wf.running {
            self.event_bus.emit(ExecutionEvent::WorkflowStopped {
                workflow_id,
                timestamp: Utc::now(),
            });
        }
        tracing::info!(workflow_id, "Workflow deleted");

        Ok(wf.edges.into_values().collect())
    }

    /// Hand a value arriving along an edge to the consumer's input port.
    ///
    /// Waits while the port's slot is occupied; gives up if the workflow is
    /// stopped or deleted meanwhile.
    pub async fn deliver(&self, envelope: EdgeEnvelope) -> Result<(), WorkflowError> {
        let (sender, cancel) = {
            let workflows = self.workflows.read().await;
            let wf = workflows
                .get(&envelope.workflow_id)
                .ok_or(WorkflowError::NotFound(envelope.workflow_id))?;
            let node = wf.node(envelope.node_id)?;
            let port = find_port(&node.inputs, &envelope.port).ok_or_else(|| {
                WorkflowError::PortNotFound {
                    node: envelope.node_id,
                    port: envelope.port.clone(),
                }
            })?;
            (port.sender(), wf.cancel.clone())
        };

        tokio::select! {
            res = sender.send(envelope.value) => {
                if res.is_err() {
                    tracing::debug!(workflow_id = envelope.workflow_id, "Input port closed");
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!(
                    workflow_id = envelope.workflow_id,
                    node_id = envelope.node_id,
                    "Dropping delivery to stopped workflow"
                );
            }
        }
        Ok(())
    }

    pub async fn has_workflow(&self, workflow_id: WorkflowId) -> bool {
        self.workflows.read().await.contains_key(&workflow_id)
    }

    pub async fn is_running(&self, workflow_id: WorkflowId) -> bool {
        self.workflows
            .read()
            .await
            .get(&workflow_id)
            .map(Workflow::is_running)
            .unwrap_or(false)
    }

    pub async fn node_ids(&self, workflow_id: WorkflowId) -> Result<Vec<NodeId>, WorkflowError> {
        let workflows = self.workflows.read().await;
        let wf = workflows
            .get(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;
        let mut ids: Vec<NodeId> = wf.nodes.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    pub async fn edge_ids(&self, workflow_id: WorkflowId) -> Result<Vec<EdgeId>, WorkflowError> {
        let workflows = self.workflows.read().await;
        let wf = workflows
            .get(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;
        let mut ids: Vec<EdgeId> = wf.edges.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Outgoing edges registered on a node
    pub async fn node_edges(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
    ) -> Result<Vec<EdgeId>, WorkflowError> {
        let workflows = self.workflows.read().await;
        let wf = workflows
            .get(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;
        Ok(wf.node(node_id)?.out_edges.iter().copied().collect())
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Capacity of each of a running workflow's three sinks
    pub sink_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            sink_capacity: 1,
        }
    }
}

/// The cancellation scope of one workflow run
#[derive(Clone)]
pub struct RunHandle {
    workflow_id: WorkflowId,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl RunHandle {
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of this run's tasks still alive
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Resolve once every task of the run has exited
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}

struct Workflow {
    id: WorkflowId,
    cancel: CancellationToken,
    nodes: HashMap<NodeId, RuntimeNode>,
    edges: HashMap<EdgeId, Edge>,
    running: bool,
}

impl Workflow {
    fn new(id: WorkflowId) -> Self {
        Self {
            id,
            cancel: CancellationToken::new(),
            nodes: HashMap::new(),
            edges: HashMap::new(),
            running: false,
        }
    }

    fn is_running(&self) -> bool {
        self.running && !self.cancel.is_cancelled()
    }

    fn node(&self, node_id: NodeId) -> Result<&RuntimeNode, WorkflowError> {
        self.nodes.get(&node_id).ok_or(WorkflowError::NodeNotFound {
            workflow: self.id,
            node: node_id,
        })
    }

    fn node_mut(&mut self, node_id: NodeId) -> Result<&mut RuntimeNode, WorkflowError> {
        self.nodes.get_mut(&node_id).ok_or(WorkflowError::NodeNotFound {
            workflow: self.id,
            node: node_id,
        })
    }
}

/// A template bound into a workflow, with its own port channels
struct RuntimeNode {
    template: Arc<dyn Node>,
    metadata: NodeMetadata,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    params: Vec<Port>,
    param_values: HashMap<String, Value>,
    out_edges: BTreeSet<EdgeId>,
    stop: Option<CancellationToken>,
}

impl RuntimeNode {
    fn new(template: Arc<dyn Node>) -> Self {
        let metadata = template.metadata();
        Self {
            inputs: port::instantiate(&metadata.inputs),
            outputs: port::instantiate(&metadata.outputs),
            params: port::instantiate(&metadata.params),
            template,
            metadata,
            param_values: HashMap::new(),
            out_edges: BTreeSet::new(),
            stop: None,
        }
    }

    fn stop(&self) {
        if let Some(token) = &self.stop {
            token.cancel();
        }
    }
}

/// Route from a local output port to a consumer port on some peer
pub struct Edge {
    id: EdgeId,
    producer_node: NodeId,
    producer_port: String,
    consumer: ConsumerRef,
    reader: PortReader,
    stop: Option<CancellationToken>,
}

impl Edge {
    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn producer_node(&self) -> NodeId {
        self.producer_node
    }

    pub fn producer_port(&self) -> &str {
        &self.producer_port
    }

    pub fn consumer(&self) -> &ConsumerRef {
        &self.consumer
    }

    fn stop(&self) {
        if let Some(token) = &self.stop {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("id", &self.id)
            .field("producer_node", &self.producer_node)
            .field("producer_port", &self.producer_port)
            .field("consumer", &self.consumer)
            .finish()
    }
}

fn find_port<'a>(ports: &'a [Port], name: &str) -> Option<&'a Port> {
    ports.iter().find(|p| p.name() == name)
}

fn readers(ports: &[Port]) -> Vec<(String, PortReader)> {
    ports
        .iter()
        .map(|p| (p.name().to_string(), p.reader()))
        .collect()
}
