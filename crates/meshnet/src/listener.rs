use chrono::Utc;
use meshcore::message::{DataPassMessage, LogLevel, ResultMessage};
use meshcore::{MeshError, Value, WorkflowId};
use meshruntime::{ActionFailure, Handoff, Receipt, RunHandle, Runtime, SinkReceivers, WorkflowSinks};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::events::{MeshEvent, MeshEventBus};
use crate::peer::PeerDirectory;

/// Runs workflows on behalf of the leader and drains their sinks onto the
/// network. One listener task per running workflow.
pub struct WorkflowListeners {
    runtime: Arc<Runtime>,
    directory: Arc<PeerDirectory>,
    events: Arc<MeshEventBus>,
    running: Mutex<HashMap<WorkflowId, RunHandle>>,
    acks: Arc<PendingAcks>,
    tasks: TaskTracker,
}

impl WorkflowListeners {
    pub fn new(
        runtime: Arc<Runtime>,
        directory: Arc<PeerDirectory>,
        events: Arc<MeshEventBus>,
    ) -> Self {
        Self {
            runtime,
            directory,
            events,
            running: Mutex::new(HashMap::new()),
            acks: Arc::new(PendingAcks::default()),
            tasks: TaskTracker::new(),
        }
    }

    /// Run a workflow and start the listener for its sinks. The listener
    /// ends with the run's cancellation scope.
    pub async fn start(&self, workflow_id: WorkflowId) -> Result<RunHandle, MeshError> {
        let (sinks, receivers) = WorkflowSinks::channel(self.runtime.config().sink_capacity);
        let handle = self.runtime.run_workflow(workflow_id, sinks).await?;

        let bridge = Bridge {
            workflow_id,
            runtime: self.runtime.clone(),
            directory: self.directory.clone(),
            events: self.events.clone(),
            acks: self.acks.clone(),
            tasks: self.tasks.clone(),
            cancel: handle.cancellation(),
        };
        self.tasks.spawn(listen(bridge, receivers));

        self.lock().insert(workflow_id, handle.clone());
        Ok(handle)
    }

    /// Drop the table entry of a workflow whose scope was cancelled elsewhere
    pub fn forget(&self, workflow_id: WorkflowId) -> Option<RunHandle> {
        self.acks.release_workflow(workflow_id);
        self.lock().remove(&workflow_id)
    }

    /// A remote peer has put the value sent under `seq` into its consumer
    /// port, so the edge that produced it may read the next one.
    pub fn acknowledge(&self, workflow_id: WorkflowId, seq: u64) {
        match self.acks.take(workflow_id, seq) {
            Some(receipt) => receipt.confirm(),
            None => tracing::debug!(workflow_id, seq, "Ack for no pending delivery"),
        }
    }

    /// Remote deliveries still waiting for their ack
    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    pub fn is_listening(&self, workflow_id: WorkflowId) -> bool {
        self.lock()
            .get(&workflow_id)
            .map(|h| !h.is_cancelled())
            .unwrap_or(false)
    }

    /// Cancel every run started here
    pub fn stop_all(&self) {
        for (_, handle) in self.lock().drain() {
            handle.cancel();
        }
        self.acks.clear();
    }

    /// Resolve once every listener task has exited. Only meaningful after
    /// `stop_all`.
    pub async fn wait(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkflowId, RunHandle>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Receipts of envelopes sent to other peers, keyed by sequence number
#[derive(Default)]
struct PendingAcks {
    next_seq: AtomicU64,
    receipts: Mutex<HashMap<u64, (WorkflowId, Receipt)>>,
}

impl PendingAcks {
    fn register(&self, workflow_id: WorkflowId, receipt: Receipt) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut receipts = self.lock();
        prune(&mut receipts);
        receipts.insert(seq, (workflow_id, receipt));
        seq
    }

    fn take(&self, workflow_id: WorkflowId, seq: u64) -> Option<Receipt> {
        let mut receipts = self.lock();
        let owned = receipts
            .get(&seq)
            .map_or(false, |(owner, _)| *owner == workflow_id);
        if !owned {
            return None;
        }
        receipts.remove(&seq).map(|(_, receipt)| receipt)
    }

    fn release_workflow(&self, workflow_id: WorkflowId) {
        self.lock().retain(|_, (owner, _)| *owner != workflow_id);
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        let mut receipts = self.lock();
        prune(&mut receipts);
        receipts.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, (WorkflowId, Receipt)>> {
        self.receipts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Edges that were stopped or deleted no longer wait
fn prune(receipts: &mut HashMap<u64, (WorkflowId, Receipt)>) {
    receipts.retain(|_, (_, receipt)| !receipt.is_abandoned());
}

/// What a listener needs to hand sink items onward
struct Bridge {
    workflow_id: WorkflowId,
    runtime: Arc<Runtime>,
    directory: Arc<PeerDirectory>,
    events: Arc<MeshEventBus>,
    acks: Arc<PendingAcks>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

async fn listen(bridge: Bridge, receivers: SinkReceivers) {
    let SinkReceivers {
        mut results,
        mut errors,
        mut process,
    } = receivers;
    let workflow_id = bridge.workflow_id;
    let cancel = bridge.cancel.clone();

    tracing::debug!(workflow_id, "Workflow listener started");

    loop {
        tokio::select! {
            Some(handoff) = process.recv() => bridge.forward(handoff).await,
            Some(failure) = errors.recv() => bridge.report_failure(failure).await,
            Some(value) = results.recv() => bridge.upload_result(value).await,
            _ = cancel.cancelled() => break,
            else => break,
        }
    }

    tracing::debug!(workflow_id, "Workflow listener stopped");
}

impl Bridge {
    /// Local deliveries run as tracked tasks since they may wait on a port
    /// slot. Remote ones hold their receipt until the peer acks.
    async fn forward(&self, handoff: Handoff) {
        let (envelope, receipt) = handoff.into_parts();

        if envelope.destination == self.directory.local_id() {
            let runtime = self.runtime.clone();
            let cancel = self.cancel.clone();
            self.tasks.spawn(async move {
                let (workflow_id, node_id) = (envelope.workflow_id, envelope.node_id);
                tokio::select! {
                    res = runtime.deliver(envelope) => match res {
                        Ok(()) => receipt.confirm(),
                        Err(e) => {
                            tracing::warn!(workflow_id, node_id, error = %e, "Local delivery failed");
                        }
                    },
                    _ = cancel.cancelled() => {}
                }
            });
            return;
        }

        if self.cancel.is_cancelled() {
            return;
        }
        let destination = envelope.destination;
        let seq = self.acks.register(self.workflow_id, receipt);
        let message = DataPassMessage { seq, envelope };
        if let Err(e) = self.directory.send_process_data(&message).await {
            tracing::warn!(
                workflow_id = self.workflow_id,
                peer = %destination,
                error = %e,
                "Failed to forward edge data"
            );
            self.acks.take(self.workflow_id, seq);
        }
    }

    async fn report_failure(&self, failure: ActionFailure) {
        tracing::warn!(
            workflow_id = failure.workflow_id,
            node_id = failure.node_id,
            epoch = failure.epoch,
            error = %failure.error,
            "Node action failed"
        );

        if self.is_own_leader() {
            self.events.publish(MeshEvent::LogReceived {
                peer: self.directory.local_id(),
                level: LogLevel::Error,
                message: failure.to_string(),
                timestamp: Utc::now(),
            });
            return;
        }

        if let Err(e) = self
            .directory
            .send_log_to_leader(LogLevel::Error, failure.to_string())
            .await
        {
            tracing::debug!(workflow_id = self.workflow_id, error = %e, "Log upload failed");
        }
    }

    async fn upload_result(&self, value: Value) {
        if self.is_own_leader() {
            self.events.publish(MeshEvent::ResultReceived {
                peer: self.directory.local_id(),
                workflow_id: self.workflow_id,
                value,
                timestamp: Utc::now(),
            });
            return;
        }

        let message = ResultMessage {
            workflow_id: self.workflow_id,
            value,
        };
        if let Err(e) = self.directory.send_result_to_leader(&message).await {
            tracing::debug!(workflow_id = self.workflow_id, error = %e, "Result upload failed");
        }
    }

    /// A process with no leader, or leading itself, keeps its uploads local
    fn is_own_leader(&self) -> bool {
        match self.directory.leader() {
            Some(leader) => leader == self.directory.local_id(),
            None => true,
        }
    }
}
