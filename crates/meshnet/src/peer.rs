use bytes::Bytes;
use meshcore::message::{
    DataAckMessage, DataPassMessage, IdentityMessage, LogLevel, LogMessage, ResultMessage,
};
use meshcore::{MeshError, PeerError, PeerId, PeerInfo, PluginDescriptor};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::HeartbeatConfig;
use crate::events::MeshEventBus;
use crate::heartbeat;
use crate::protocol::{self, Protocol};
use crate::transport::Transport;

/// Heartbeat state of a linked peer
struct HeartbeatScope {
    cancel: CancellationToken,
    reset: mpsc::Sender<()>,
}

struct PeerEntry {
    info: PeerInfo,
    link_count: usize,
    heartbeat: Option<HeartbeatScope>,
    plugin: Option<PluginDescriptor>,
}

impl PeerEntry {
    fn new(info: PeerInfo) -> Self {
        Self {
            info,
            link_count: 0,
            heartbeat: None,
            plugin: None,
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(scope) = self.heartbeat.take() {
            scope.cancel.cancel();
        }
    }
}

/// Table of known peers and the outbound side of every protocol.
///
/// A peer's heartbeat sender and liveness watch run exactly while its link
/// count is above zero. The table lock is only held for map operations.
pub struct PeerDirectory {
    transport: Arc<dyn Transport>,
    heartbeat: HeartbeatConfig,
    events: Arc<MeshEventBus>,
    peers: Mutex<HashMap<PeerId, PeerEntry>>,
    leader: Mutex<Option<PeerId>>,
}

impl PeerDirectory {
    pub fn new(
        transport: Arc<dyn Transport>,
        heartbeat: HeartbeatConfig,
        events: Arc<MeshEventBus>,
    ) -> Self {
        let local = transport.local_peer().clone();
        let mut peers = HashMap::new();
        peers.insert(local.id, PeerEntry::new(local));

        Self {
            transport,
            heartbeat,
            events,
            peers: Mutex::new(peers),
            leader: Mutex::new(None),
        }
    }

    pub fn local(&self) -> &PeerInfo {
        self.transport.local_peer()
    }

    pub fn local_id(&self) -> PeerId {
        self.transport.local_peer().id
    }

    /// Intake for discovery. Inserts the peer, or replaces its addresses and
    /// drops every link it had.
    pub fn discover(&self, info: PeerInfo) {
        let mut peers = self.lock_peers();
        match peers.get_mut(&info.id) {
            Some(entry) => {
                entry.stop_heartbeat();
                entry.link_count = 0;
                entry.info = info;
                tracing::debug!(peer = %entry.info.id, "Peer rediscovered");
            }
            None => {
                tracing::info!(peer = %info.id, addrs = ?info.addrs, "Peer discovered");
                peers.insert(info.id, PeerEntry::new(info));
            }
        }
    }

    /// Record a peer seen through protocol contact. Links are kept and
    /// addresses only replaced when new ones are known.
    pub fn touch(&self, info: &PeerInfo) {
        let mut peers = self.lock_peers();
        match peers.get_mut(&info.id) {
            Some(entry) => {
                if !info.addrs.is_empty() && entry.info.addrs != info.addrs {
                    entry.info.addrs = info.addrs.clone();
                }
            }
            None => {
                tracing::debug!(peer = %info.id, "Peer contacted us first");
                peers.insert(info.id, PeerEntry::new(info.clone()));
            }
        }
    }

    pub fn add_link(&self, peer: PeerId) -> Result<usize, PeerError> {
        let (info, cancel, reset_rx) = {
            let mut peers = self.lock_peers();
            let entry = peers.get_mut(&peer).ok_or(PeerError::NotFound(peer))?;
            entry.link_count += 1;

            if entry.link_count > 1 {
                tracing::debug!(peer = %peer, links = entry.link_count, "Link added");
                return Ok(entry.link_count);
            }

            let cancel = CancellationToken::new();
            let (reset, reset_rx) = mpsc::channel(1);
            entry.heartbeat = Some(HeartbeatScope {
                cancel: cancel.clone(),
                reset,
            });
            (entry.info.clone(), cancel, reset_rx)
        };

        tracing::debug!(peer = %peer, "First link, starting heartbeat");
        tokio::spawn(heartbeat::send_heartbeats(
            self.transport.clone(),
            info,
            self.heartbeat.interval(),
            cancel.clone(),
        ));
        tokio::spawn(heartbeat::watch_liveness(
            peer,
            self.heartbeat.timeout(),
            reset_rx,
            self.events.clone(),
            cancel,
        ));

        Ok(1)
    }

    /// Drop one link. The count never goes below zero.
    pub fn sub_link(&self, peer: PeerId) -> Result<usize, PeerError> {
        let mut peers = self.lock_peers();
        let entry = peers.get_mut(&peer).ok_or(PeerError::NotFound(peer))?;

        entry.link_count = entry.link_count.saturating_sub(1);
        if entry.link_count == 0 {
            if entry.heartbeat.is_some() {
                tracing::debug!(peer = %peer, "Last link gone, stopping heartbeat");
            }
            entry.stop_heartbeat();
        }
        Ok(entry.link_count)
    }

    pub fn link_count(&self, peer: PeerId) -> Option<usize> {
        self.lock_peers().get(&peer).map(|e| e.link_count)
    }

    pub fn is_heartbeat_active(&self, peer: PeerId) -> bool {
        self.lock_peers()
            .get(&peer)
            .map(|e| e.heartbeat.is_some())
            .unwrap_or(false)
    }

    /// Reset a peer's liveness timer. Returns false for unknown peers.
    pub fn record_heartbeat(&self, peer: PeerId) -> bool {
        let peers = self.lock_peers();
        let Some(entry) = peers.get(&peer) else {
            return false;
        };
        if let Some(scope) = &entry.heartbeat {
            // A pending reset already covers this one
            let _ = scope.reset.try_send(());
        }
        true
    }

    pub fn peer(&self, peer: PeerId) -> Option<PeerInfo> {
        self.lock_peers().get(&peer).map(|e| e.info.clone())
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.lock_peers().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn set_plugin(&self, peer: PeerId, plugin: PluginDescriptor) {
        if let Some(entry) = self.lock_peers().get_mut(&peer) {
            entry.plugin = Some(plugin);
        }
    }

    /// Catalog a follower reported in its identity reply
    pub fn plugin(&self, peer: PeerId) -> Option<PluginDescriptor> {
        self.lock_peers().get(&peer).and_then(|e| e.plugin.clone())
    }

    pub fn set_leader(&self, peer: PeerId) {
        *self.leader.lock().unwrap_or_else(|e| e.into_inner()) = Some(peer);
    }

    pub fn leader(&self) -> Option<PeerId> {
        *self.leader.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop every link and stop every heartbeat
    pub fn shutdown(&self) {
        for entry in self.lock_peers().values_mut() {
            entry.link_count = 0;
            entry.stop_heartbeat();
        }
    }

    /// Encode `message` and send it to a known peer on one stream
    pub async fn send<T: Serialize>(
        &self,
        peer: PeerId,
        protocol: Protocol,
        message: &T,
    ) -> Result<(), MeshError> {
        let payload = protocol::encode(message)?;
        self.send_raw(peer, protocol, Bytes::from(payload)).await
    }

    pub async fn send_raw(
        &self,
        peer: PeerId,
        protocol: Protocol,
        payload: Bytes,
    ) -> Result<(), MeshError> {
        let info = self.peer(peer).ok_or(PeerError::NotFound(peer))?;
        self.transport.send(&info, protocol, payload).await?;
        Ok(())
    }

    pub async fn send_heartbeat(&self, peer: PeerId) -> Result<(), MeshError> {
        self.send_raw(peer, Protocol::Heartbeat, Bytes::new()).await
    }

    pub async fn send_identity(
        &self,
        peer: PeerId,
        message: &IdentityMessage,
    ) -> Result<(), MeshError> {
        self.send(peer, Protocol::Identity, message).await
    }

    /// Ship an edge envelope to the follower hosting its consumer
    pub async fn send_process_data(&self, message: &DataPassMessage) -> Result<(), MeshError> {
        self.send(message.envelope.destination, Protocol::DataPass, message)
            .await
    }

    pub async fn send_data_ack(
        &self,
        peer: PeerId,
        message: &DataAckMessage,
    ) -> Result<(), MeshError> {
        self.send(peer, Protocol::DataAck, message).await
    }

    pub async fn send_log_to_leader(
        &self,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<(), MeshError> {
        let leader = self.leader().ok_or(PeerError::NoLeader)?;
        let message = LogMessage {
            level,
            message: message.into(),
        };
        self.send(leader, Protocol::LogUpload, &message).await
    }

    pub async fn send_result_to_leader(&self, result: &ResultMessage) -> Result<(), MeshError> {
        let leader = self.leader().ok_or(PeerError::NoLeader)?;
        self.send(leader, Protocol::ResultUpload, result).await
    }

    fn lock_peers(&self) -> MutexGuard<'_, HashMap<PeerId, PeerEntry>> {
        // Nothing panics while holding the lock, so a poisoned table is
        // still consistent.
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
