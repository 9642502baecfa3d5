use async_trait::async_trait;
use bytes::Bytes;
use meshcore::{PeerError, PeerId, PeerInfo};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::protocol::Protocol;

/// Buffer of streams accepted but not yet handled
pub const INBOUND_BUFFER: usize = 256;

/// One inbound stream: who opened it, for which protocol, and the single
/// message it carried.
#[derive(Debug, Clone)]
pub struct InboundStream {
    pub remote: PeerInfo,
    pub protocol: Protocol,
    pub payload: Bytes,
}

/// Opens one-message streams to peers.
///
/// Inbound streams are not part of the trait: each transport hands back an
/// `mpsc::Receiver<InboundStream>` when it is created.
#[async_trait]
pub trait Transport: Send + Sync {
    /// This process's identity and the addresses it accepts streams on
    fn local_peer(&self) -> &PeerInfo;

    /// Open a stream to `peer`, write `payload` and close it
    async fn send(&self, peer: &PeerInfo, protocol: Protocol, payload: Bytes)
        -> Result<(), PeerError>;
}

/// In-process network connecting any number of `MemoryTransport`s
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inboxes: Arc<Mutex<HashMap<PeerId, mpsc::Sender<InboundStream>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a peer under a fresh identity
    pub fn join(&self) -> (MemoryTransport, mpsc::Receiver<InboundStream>) {
        self.join_as(PeerInfo::new(PeerId::random()).with_addr("memory"))
    }

    pub fn join_as(&self, local: PeerInfo) -> (MemoryTransport, mpsc::Receiver<InboundStream>) {
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        if let Ok(mut inboxes) = self.inboxes.lock() {
            inboxes.insert(local.id, tx);
        }
        let transport = MemoryTransport {
            local,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Detach a peer; later sends to it fail
    pub fn leave(&self, peer: PeerId) {
        if let Ok(mut inboxes) = self.inboxes.lock() {
            inboxes.remove(&peer);
        }
    }

    fn inbox(&self, peer: PeerId) -> Option<mpsc::Sender<InboundStream>> {
        self.inboxes.lock().ok()?.get(&peer).cloned()
    }
}

pub struct MemoryTransport {
    local: PeerInfo,
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer(&self) -> &PeerInfo {
        &self.local
    }

    async fn send(
        &self,
        peer: &PeerInfo,
        protocol: Protocol,
        payload: Bytes,
    ) -> Result<(), PeerError> {
        let inbox = self
            .network
            .inbox(peer.id)
            .ok_or_else(|| PeerError::Transport(format!("peer {} is unreachable", peer.id)))?;

        inbox
            .send(InboundStream {
                remote: self.local.clone(),
                protocol,
                payload,
            })
            .await
            .map_err(|_| PeerError::Transport(format!("peer {} stopped accepting", peer.id)))
    }
}
