use meshcore::{PortDefinition, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

/// Single-slot channel backing one declared port of one runtime node.
///
/// The write half is handed out freely; the read half sits behind a mutex so
/// that at most one task reads at a time.
pub(crate) struct Port {
    definition: PortDefinition,
    tx: mpsc::Sender<Value>,
    rx: PortReader,
}

impl Port {
    pub(crate) fn new(definition: PortDefinition) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            definition,
            tx,
            rx: PortReader(Arc::new(Mutex::new(rx))),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.definition.name
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<Value> {
        self.tx.clone()
    }

    pub(crate) fn reader(&self) -> PortReader {
        self.rx.clone()
    }
}

#[derive(Clone)]
pub(crate) struct PortReader(Arc<Mutex<mpsc::Receiver<Value>>>);

impl PortReader {
    /// Claim the read half until the guard drops
    pub(crate) async fn claim(self) -> OwnedMutexGuard<mpsc::Receiver<Value>> {
        self.0.lock_owned().await
    }
}

/// Instantiate one port per declaration, keeping declaration order
pub(crate) fn instantiate(definitions: &[PortDefinition]) -> Vec<Port> {
    definitions.iter().cloned().map(Port::new).collect()
}
