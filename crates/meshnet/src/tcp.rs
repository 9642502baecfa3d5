//! TCP transport.
//!
//! Every stream is one connection carrying two length-delimited frames: a
//! JSON header naming the protocol and the sender, then the payload.
//!
//! Inbound connections are read one at a time. A sender that connects and
//! then stalls holds up every later stream, heartbeats included, for up to
//! the read timeout. Keep that timeout well under the heartbeat timeout.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use meshcore::{MeshError, PeerError, PeerId, PeerInfo};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::protocol::Protocol;
use crate::transport::{InboundStream, Transport, INBOUND_BUFFER};

/// Default time allowed to read one inbound stream
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct FrameHeader {
    protocol: String,
    from: PeerInfo,
}

pub struct TcpTransport {
    local: PeerInfo,
}

impl TcpTransport {
    /// Start accepting streams on `listen_addr` until `cancel` fires.
    ///
    /// The bound address is advertised unless `advertise` overrides it.
    pub async fn bind(
        listen_addr: &str,
        advertise: Option<String>,
        peer_id: PeerId,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<InboundStream>), MeshError> {
        Self::bind_with_timeout(listen_addr, advertise, peer_id, DEFAULT_READ_TIMEOUT, cancel).await
    }

    /// Like [`TcpTransport::bind`], dropping any inbound stream that is not
    /// fully read within `read_timeout`.
    pub async fn bind_with_timeout(
        listen_addr: &str,
        advertise: Option<String>,
        peer_id: PeerId,
        read_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<InboundStream>), MeshError> {
        let listener = TcpListener::bind(listen_addr).await?;
        let bound = listener.local_addr()?;
        let local = PeerInfo::new(peer_id).with_addr(advertise.unwrap_or_else(|| bound.to_string()));

        tracing::info!(peer = %peer_id, addr = %bound, "Listening for peers");

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        tokio::spawn(accept_loop(listener, tx, read_timeout, cancel));

        Ok((Self { local }, rx))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_peer(&self) -> &PeerInfo {
        &self.local
    }

    async fn send(
        &self,
        peer: &PeerInfo,
        protocol: Protocol,
        payload: Bytes,
    ) -> Result<(), PeerError> {
        let socket = connect(peer).await?;
        let mut framed = Framed::new(socket, LengthDelimitedCodec::new());

        let header = FrameHeader {
            protocol: protocol.as_str().to_string(),
            from: self.local.clone(),
        };
        let header = serde_json::to_vec(&header).map_err(|e| PeerError::Transport(e.to_string()))?;

        framed.send(Bytes::from(header)).await.map_err(transport_error)?;
        framed.send(payload).await.map_err(transport_error)?;
        SinkExt::<Bytes>::close(&mut framed)
            .await
            .map_err(transport_error)?;
        Ok(())
    }
}

/// Streams are read one connection at a time so that messages from one
/// sender reach the inbound queue in the order they were written.
async fn accept_loop(
    listener: TcpListener,
    inbound: mpsc::Sender<InboundStream>,
    read_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let (socket, remote_addr) = tokio::select! {
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
            },
            _ = cancel.cancelled() => break,
        };

        let stream = match tokio::time::timeout(read_timeout, read_stream(socket)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::warn!(%remote_addr, error = %e, "Dropping malformed stream");
                continue;
            }
            Err(_) => {
                tracing::warn!(%remote_addr, "Timed out reading stream");
                continue;
            }
        };

        tokio::select! {
            res = inbound.send(stream) => {
                if res.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    tracing::debug!("Accept loop stopped");
}

async fn read_stream(socket: TcpStream) -> Result<InboundStream, MeshError> {
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());

    let header = framed
        .next()
        .await
        .ok_or_else(|| PeerError::Transport("stream closed before header".to_string()))??;
    let header: FrameHeader = serde_json::from_slice(&header)?;
    let protocol: Protocol = header.protocol.parse()?;

    let payload = match framed.next().await {
        Some(frame) => frame?.freeze(),
        None => Bytes::new(),
    };

    Ok(InboundStream {
        remote: header.from,
        protocol,
        payload,
    })
}

async fn connect(peer: &PeerInfo) -> Result<TcpStream, PeerError> {
    let mut last_error = None;
    for addr in &peer.addrs {
        match TcpStream::connect(addr.as_str()).await {
            Ok(socket) => return Ok(socket),
            Err(e) => last_error = Some(format!("{}: {}", addr, e)),
        }
    }

    Err(match last_error {
        Some(reason) => PeerError::Transport(reason),
        None => PeerError::NoAddress { peer: peer.id },
    })
}

fn transport_error(e: std::io::Error) -> PeerError {
    PeerError::Transport(e.to_string())
}
