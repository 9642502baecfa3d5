//! Task bodies spawned for a running workflow: one loop per node, one feeder
//! per configured parameter, one listener per edge.
//!
//! Every await in here races the task's cancellation token, so cancelling a
//! workflow scope ends all of them within one channel turnaround.

use crate::port::PortReader;
use crate::sinks::{ActionFailure, Handoff, WorkflowSinks};
use chrono::Utc;
use meshcore::{
    ConsumerRef, EdgeEnvelope, EventBus, ExecutionEvent, Node, NodeContext, NodeError, NodeId,
    Outputs, Value, WorkflowId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// Everything a node loop needs, detached from the runtime's tables
pub(crate) struct NodeTask {
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub template: Arc<dyn Node>,
    pub is_begin: bool,
    pub params: Vec<(String, PortReader)>,
    pub inputs: Vec<(String, PortReader)>,
    pub outputs: HashMap<String, mpsc::Sender<Value>>,
    pub sinks: WorkflowSinks,
    pub events: Arc<EventBus>,
    pub cancel: CancellationToken,
}

type Claimed = (String, OwnedMutexGuard<mpsc::Receiver<Value>>);

/// Run a node epoch after epoch until its token is cancelled
pub(crate) async fn run_node(task: NodeTask) {
    let NodeTask {
        workflow_id,
        node_id,
        template,
        is_begin,
        params,
        inputs,
        outputs,
        sinks,
        events,
        cancel,
    } = task;

    let Some(mut params) = claim_all(params, &cancel).await else {
        return;
    };
    let Some(mut inputs) = claim_all(inputs, &cancel).await else {
        return;
    };

    let outputs = Outputs::new(outputs, cancel.clone());
    let emitter = events.create_emitter(workflow_id, node_id);

    tracing::debug!(workflow_id, node_id, node_type = template.node_type(), "Node loop started");

    for epoch in 0u64.. {
        let mut values = HashMap::new();

        if !gather(&mut params, &mut values, &cancel).await {
            break;
        }

        // A begin node's first epoch runs without inputs so that a graph with
        // no external driver can make progress.
        if (epoch != 0 || !is_begin) && !gather(&mut inputs, &mut values, &cancel).await {
            break;
        }

        let ctx = NodeContext {
            workflow_id,
            node_id,
            epoch,
            inputs: values,
            outputs: outputs.clone(),
            events: emitter.clone(),
            cancellation: cancel.clone(),
        };

        let start = Instant::now();
        let outcome = tokio::select! {
            outcome = template.execute(ctx) => outcome,
            _ = cancel.cancelled() => break,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                events.emit(ExecutionEvent::NodeCompleted {
                    workflow_id,
                    node_id,
                    epoch,
                    duration_ms,
                    timestamp: Utc::now(),
                });

                if let Some(result) = output.result {
                    if !forward(&sinks.results, result, &cancel).await {
                        break;
                    }
                }
            }
            Err(NodeError::Cancelled) if cancel.is_cancelled() => break,
            Err(error) => {
                tracing::debug!(workflow_id, node_id, epoch, %error, "Node action failed");

                events.emit(ExecutionEvent::NodeFailed {
                    workflow_id,
                    node_id,
                    epoch,
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });

                let failure = ActionFailure {
                    workflow_id,
                    node_id,
                    epoch,
                    error,
                };
                if !forward(&sinks.errors, failure, &cancel).await {
                    break;
                }
            }
        }
    }

    tracing::debug!(workflow_id, node_id, "Node loop stopped");
}

/// Keep offering one constant on a parameter port for the life of the token
pub(crate) async fn feed_param(value: Value, port: mpsc::Sender<Value>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            res = port.send(value.clone()) => {
                if res.is_err() {
                    return;
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}

pub(crate) struct EdgeTask {
    pub reader: PortReader,
    pub consumer: ConsumerRef,
    pub process: mpsc::Sender<Handoff>,
    pub cancel: CancellationToken,
}

/// Wrap every value leaving the producer port into an envelope for the
/// workflow's process sink.
///
/// The port is claimed per value, so several edges leaving one output port
/// take turns and each value travels along exactly one of them. The next
/// value is not read until the previous one has reached its consumer port.
/// The producer therefore stays at most one value ahead of each edge.
pub(crate) async fn listen_edge(task: EdgeTask) {
    let EdgeTask {
        reader,
        consumer,
        process,
        cancel,
    } = task;

    loop {
        let value = {
            let mut rx = tokio::select! {
                rx = reader.clone().claim() => rx,
                _ = cancel.cancelled() => return,
            };
            tokio::select! {
                value = rx.recv() => match value {
                    Some(value) => value,
                    None => return,
                },
                _ = cancel.cancelled() => return,
            }
        };

        let (handoff, delivered) = Handoff::new(EdgeEnvelope::new(&consumer, value));
        if !forward(&process, handoff, &cancel).await {
            return;
        }
        tokio::select! {
            _ = delivered => {}
            _ = cancel.cancelled() => return,
        }
    }
}

async fn claim_all(
    readers: Vec<(String, PortReader)>,
    cancel: &CancellationToken,
) -> Option<Vec<Claimed>> {
    let mut claimed = Vec::with_capacity(readers.len());
    for (name, reader) in readers {
        let rx = tokio::select! {
            rx = reader.claim() => rx,
            _ = cancel.cancelled() => return None,
        };
        claimed.push((name, rx));
    }
    Some(claimed)
}

/// Read one value from every port, in declaration order
async fn gather(
    ports: &mut [Claimed],
    values: &mut HashMap<String, Value>,
    cancel: &CancellationToken,
) -> bool {
    for (name, rx) in ports.iter_mut() {
        let value = tokio::select! {
            value = rx.recv() => value,
            _ = cancel.cancelled() => None,
        };
        match value {
            Some(value) => {
                values.insert(name.clone(), value);
            }
            None => return false,
        }
    }
    true
}

async fn forward<T>(sink: &mpsc::Sender<T>, item: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        res = sink.send(item) => res.is_ok(),
        _ = cancel.cancelled() => false,
    }
}
