// crates/flowmeshd/src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use meshcore::{PeerId, PeerInfo};
use meshnet::{Mesh, MeshConfig, MeshEvent, TcpTransport};
use meshruntime::Runtime;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Peer daemon: serves the standard node library to whichever leader greets
/// it first.
#[derive(Parser)]
#[command(name = "flowmeshd")]
#[command(about = "flowmesh peer daemon", long_about = None)]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Fixed peer identity
    #[arg(long)]
    peer_id: Option<PeerId>,

    /// Peer to discover at startup, as <peer-id>@<addr>. Repeatable.
    #[arg(short, long = "peer")]
    peers: Vec<PeerInfo>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match &args.config {
        Some(path) => MeshConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let mut config = MeshConfig::default();
            config.apply_env();
            config
        }
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(peer_id) = args.peer_id {
        config.peer_id = Some(peer_id);
    }
    config.bootstrap_peers.extend(args.peers);

    let registry = meshnodes::standard_registry();
    registry.validate().context("invalid node catalog")?;
    let runtime = Arc::new(Runtime::with_registry(
        Arc::new(registry),
        config.runtime.clone(),
    ));

    let peer_id = config.peer_id.unwrap_or_else(PeerId::random);
    let shutdown = CancellationToken::new();
    let (transport, inbound) = TcpTransport::bind_with_timeout(
        &config.listen_addr,
        config.advertise_addr.clone(),
        peer_id,
        config.read_timeout(),
        shutdown.clone(),
    )
    .await
    .with_context(|| format!("failed to listen on {}", config.listen_addr))?;

    let mesh = Arc::new(Mesh::new(
        Arc::new(transport),
        runtime,
        config.heartbeat.clone(),
    ));
    for peer in config.bootstrap_peers {
        mesh.discover(peer);
    }

    info!(
        peer = %peer_id,
        addrs = ?mesh.local_peer().addrs,
        "flowmeshd started"
    );

    let mut events = mesh.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                MeshEvent::LeaderElected { leader, .. } => {
                    info!(leader = %leader, "Serving leader");
                }
                MeshEvent::PeerHeartbeatTimeout { peer, .. } => {
                    info!(peer = %peer, "Peer considered offline");
                }
                _ => {}
            }
        }
    });

    let server = mesh.spawn(inbound);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    shutdown.cancel();
    mesh.shutdown().await;
    server.await?;

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
