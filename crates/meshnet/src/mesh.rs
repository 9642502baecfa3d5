use meshcore::{PeerInfo, PluginDescriptor};
use meshruntime::Runtime;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::HeartbeatConfig;
use crate::events::{MeshEvent, MeshEventBus};
use crate::leader::Leader;
use crate::listener::WorkflowListeners;
use crate::peer::PeerDirectory;
use crate::router::Router;
use crate::transport::{InboundStream, Transport};

/// One process on the overlay: its peer directory, its runtime, and the
/// router applying inbound control messages to them.
pub struct Mesh {
    directory: Arc<PeerDirectory>,
    runtime: Arc<Runtime>,
    listeners: Arc<WorkflowListeners>,
    router: Arc<Router>,
    events: Arc<MeshEventBus>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Mesh {
    pub fn new(
        transport: Arc<dyn Transport>,
        runtime: Arc<Runtime>,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        let events = Arc::new(MeshEventBus::default());
        let directory = Arc::new(PeerDirectory::new(transport, heartbeat, events.clone()));
        let listeners = Arc::new(WorkflowListeners::new(
            runtime.clone(),
            directory.clone(),
            events.clone(),
        ));
        let router = Arc::new(Router::new(
            directory.clone(),
            runtime.clone(),
            listeners.clone(),
            events.clone(),
        ));

        Self {
            directory,
            runtime,
            listeners,
            router,
            events,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn local_peer(&self) -> &PeerInfo {
        self.directory.local()
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn listeners(&self) -> &Arc<WorkflowListeners> {
        &self.listeners
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Catalog this process offers to a leader
    pub fn plugin(&self) -> PluginDescriptor {
        self.runtime.registry().descriptor()
    }

    /// Control client acting as this process
    pub fn leader(&self) -> Leader {
        Leader::new(self.directory.clone(), self.plugin())
    }

    pub fn discover(&self, info: PeerInfo) {
        self.directory.discover(info);
    }

    /// Handle inbound streams until the transport closes or `shutdown` is
    /// called. Control messages are applied in arrival order.
    pub async fn serve(&self, mut inbound: mpsc::Receiver<InboundStream>) {
        tracing::info!(peer = %self.local_peer().id, "Mesh serving");

        loop {
            let stream = tokio::select! {
                stream = inbound.recv() => match stream {
                    Some(stream) => stream,
                    None => break,
                },
                _ = self.cancel.cancelled() => break,
            };

            // Each remote edge waits for its ack, so at most one of these
            // per edge is alive at a time
            if stream.protocol.is_data() {
                let router = self.router.clone();
                let cancel = self.cancel.clone();
                self.tasks.spawn(async move {
                    tokio::select! {
                        _ = router.handle(stream) => {}
                        _ = cancel.cancelled() => {}
                    }
                });
            } else {
                self.router.handle(stream).await;
            }
        }

        tracing::info!(peer = %self.local_peer().id, "Mesh stopped serving");
    }

    /// `serve` on a background task
    pub fn spawn(self: &Arc<Self>, inbound: mpsc::Receiver<InboundStream>) -> JoinHandle<()> {
        let mesh = self.clone();
        tokio::spawn(async move { mesh.serve(inbound).await })
    }

    /// Stop serving, cancel every workflow run started here and every
    /// heartbeat, then wait for the tasks this process owns.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.listeners.stop_all();
        self.directory.shutdown();

        self.tasks.close();
        self.tasks.wait().await;
        self.listeners.wait().await;
    }
}
