//! Per-peer heartbeat tasks, started on a peer's first link and stopped with
//! its last.

use bytes::Bytes;
use chrono::Utc;
use meshcore::{PeerId, PeerInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::{MeshEvent, MeshEventBus};
use crate::protocol::Protocol;
use crate::transport::Transport;

/// Send an empty heartbeat frame every `interval`. Failures are only logged.
pub(crate) async fn send_heartbeats(
    transport: Arc<dyn Transport>,
    peer: PeerInfo,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }

        tokio::select! {
            res = transport.send(&peer, Protocol::Heartbeat, Bytes::new()) => {
                if let Err(e) = res {
                    tracing::debug!(peer = %peer.id, error = %e, "Heartbeat send failed");
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    tracing::debug!(peer = %peer.id, "Heartbeat sender stopped");
}

/// Report a peer that stays silent for `timeout`. Every heartbeat received
/// from it arrives on `reset` and re-arms the timer.
pub(crate) async fn watch_liveness(
    peer: PeerId,
    timeout: Duration,
    mut reset: mpsc::Receiver<()>,
    events: Arc<MeshEventBus>,
    cancel: CancellationToken,
) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                // Marking the peer offline is left to subscribers
                tracing::warn!(peer = %peer, timeout_ms = timeout.as_millis() as u64, "Peer missed heartbeats");
                events.publish(MeshEvent::PeerHeartbeatTimeout {
                    peer,
                    timestamp: Utc::now(),
                });
                deadline.as_mut().reset(Instant::now() + timeout);
            }
            signal = reset.recv() => match signal {
                Some(()) => deadline.as_mut().reset(Instant::now() + timeout),
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }

    tracing::debug!(peer = %peer, "Liveness watch stopped");
}
