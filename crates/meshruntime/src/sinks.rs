use meshcore::{EdgeEnvelope, NodeError, NodeId, Value, WorkflowId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Error returned by a node action, tagged with where it happened
#[derive(Error, Debug, Clone, PartialEq)]
#[error("node {node_id} of workflow {workflow_id} failed in epoch {epoch}: {error}")]
pub struct ActionFailure {
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub epoch: u64,
    pub error: NodeError,
}

/// An envelope leaving an edge, paired with the receipt its edge waits on.
///
/// The edge reads its next value only once the receipt is confirmed or
/// dropped, so each edge has at most one value in flight.
#[derive(Debug)]
pub struct Handoff {
    pub envelope: EdgeEnvelope,
    receipt: Receipt,
}

impl Handoff {
    /// Returns the handoff and the future its edge waits on
    pub fn new(envelope: EdgeEnvelope) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                envelope,
                receipt: Receipt(Some(tx)),
            },
            rx,
        )
    }

    pub fn into_parts(self) -> (EdgeEnvelope, Receipt) {
        (self.envelope, self.receipt)
    }
}

/// Releases the edge that produced an envelope. Dropping it releases too.
#[derive(Debug)]
pub struct Receipt(Option<oneshot::Sender<()>>);

impl Receipt {
    /// True once the edge has stopped waiting for this receipt
    pub fn is_abandoned(&self) -> bool {
        self.0.as_ref().map_or(true, |tx| tx.is_closed())
    }

    pub fn confirm(mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// The three outputs of a running workflow
#[derive(Clone)]
pub struct WorkflowSinks {
    pub results: mpsc::Sender<Value>,
    pub errors: mpsc::Sender<ActionFailure>,
    pub process: mpsc::Sender<Handoff>,
}

pub struct SinkReceivers {
    pub results: mpsc::Receiver<Value>,
    pub errors: mpsc::Receiver<ActionFailure>,
    pub process: mpsc::Receiver<Handoff>,
}

impl WorkflowSinks {
    /// Bounded sinks plus their receiving halves
    pub fn channel(capacity: usize) -> (WorkflowSinks, SinkReceivers) {
        let capacity = capacity.max(1);
        let (results_tx, results_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(capacity);
        let (process_tx, process_rx) = mpsc::channel(capacity);

        (
            WorkflowSinks {
                results: results_tx,
                errors: errors_tx,
                process: process_tx,
            },
            SinkReceivers {
                results: results_rx,
                errors: errors_rx,
                process: process_rx,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcore::{ConsumerRef, PeerId};

    fn envelope() -> EdgeEnvelope {
        let consumer = ConsumerRef {
            destination: PeerId::random(),
            workflow_id: 1,
            node_id: 2,
            port: "value".to_string(),
        };
        EdgeEnvelope::new(&consumer, Value::Number(7.0))
    }

    #[tokio::test]
    async fn confirmed_receipt_releases_edge() {
        let (handoff, released) = Handoff::new(envelope());
        let (envelope, receipt) = handoff.into_parts();
        assert_eq!(envelope.value, Value::Number(7.0));
        receipt.confirm();
        assert!(released.await.is_ok());
    }

    #[tokio::test]
    async fn dropped_receipt_releases_edge() {
        let (handoff, released) = Handoff::new(envelope());
        let (_, receipt) = handoff.into_parts();
        assert!(!receipt.is_abandoned());
        drop(receipt);
        // Sender gone; the edge sees an error and moves on
        assert!(released.await.is_err());
    }

    #[test]
    fn receipt_is_abandoned_once_edge_stops_waiting() {
        let (handoff, released) = Handoff::new(envelope());
        let (_, receipt) = handoff.into_parts();
        drop(released);
        assert!(receipt.is_abandoned());
    }
}
