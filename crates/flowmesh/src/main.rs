// crates/flowmesh/src/main.rs

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use meshcore::{DeploymentPlan, NodePlacement, PeerId, PeerInfo};
use meshnet::{HeartbeatConfig, Mesh, MeshEvent, TcpTransport};
use meshruntime::{NodeRegistry, Runtime, RuntimeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowmesh")]
#[command(about = "Distribute workflows across flowmesh peers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Act as leader and deploy a plan to its peers
    Deploy {
        /// Path to deployment plan JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Address the leader listens on for uploads
        #[arg(short, long, default_value = "127.0.0.1:7390")]
        listen: String,

        /// Address followers should use to reach the leader
        #[arg(long)]
        advertise: Option<String>,

        /// Tear the plan down after this many seconds instead of waiting for Ctrl-C
        #[arg(short, long)]
        duration: Option<u64>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check a plan against the standard node library
    Validate {
        /// Path to deployment plan JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create an example deployment plan
    Init {
        /// Output file path
        #[arg(short, long, default_value = "plan.json")]
        output: PathBuf,

        /// Peers to place the nodes on, as <peer-id>@<addr>
        #[arg(short, long = "peer")]
        peers: Vec<PeerInfo>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy {
            file,
            listen,
            advertise,
            duration,
            verbose,
        } => {
            let default = if verbose { "debug" } else { "info" };
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
            tracing_subscriber::fmt().with_env_filter(filter).init();

            deploy(file, listen, advertise, duration).await?;
        }

        Commands::Validate { file } => {
            validate_plan(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output, peers } => {
            create_example_plan(output, peers)?;
        }
    }

    Ok(())
}

fn load_plan(file: &PathBuf) -> Result<DeploymentPlan> {
    let json = std::fs::read_to_string(file)?;
    Ok(serde_json::from_str(&json)?)
}

async fn deploy(
    file: PathBuf,
    listen: String,
    advertise: Option<String>,
    duration: Option<u64>,
) -> Result<()> {
    println!("🚀 Loading plan from: {}", file.display());

    let plan = load_plan(&file)?;
    let registry = meshnodes::standard_registry();
    let problems = check_plan(&plan, &registry);
    if !problems.is_empty() {
        for problem in &problems {
            println!("  ❌ {}", problem);
        }
        bail!("plan {} has {} problem(s)", file.display(), problems.len());
    }

    println!("📋 Workflow {}: {}", plan.workflow_id, plan.name);
    println!("   Peers: {}", plan.placement_peers().len());
    println!("   Nodes: {}", plan.nodes.len());
    println!("   Edges: {}", plan.edges.len());
    println!();

    // The leader can host nodes of its own
    let runtime = Arc::new(Runtime::with_registry(
        Arc::new(registry),
        RuntimeConfig::default(),
    ));

    let shutdown = CancellationToken::new();
    let (transport, inbound) =
        TcpTransport::bind(&listen, advertise, PeerId::random(), shutdown.clone()).await?;
    let mesh = Arc::new(Mesh::new(
        Arc::new(transport),
        runtime,
        HeartbeatConfig::default(),
    ));
    let server = mesh.spawn(inbound);

    let mut events = mesh.subscribe();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                MeshEvent::FollowerIdentified { peer, plugin, .. } => {
                    println!(
                        "  🤝 {} joined ({} {}, {} node types)",
                        peer,
                        plugin.plugin.name,
                        plugin.plugin.version,
                        plugin.nodes.len()
                    );
                }
                MeshEvent::ResultReceived {
                    peer,
                    workflow_id,
                    value,
                    ..
                } => {
                    println!("  📤 [{}] workflow {}: {}", peer, workflow_id, value);
                }
                MeshEvent::LogReceived {
                    peer,
                    level,
                    message,
                    ..
                } => {
                    println!("  📝 [{}] {}: {}", peer, level, message);
                }
                MeshEvent::PeerHeartbeatTimeout { peer, .. } => {
                    println!("  ⚠️  {} stopped answering heartbeats", peer);
                }
                MeshEvent::LeaderElected { .. } => {}
            }
        }
    });

    let leader = mesh.leader();
    leader.deploy(&plan).await?;
    println!("▶️  Workflow running, press Ctrl-C to stop");

    match duration {
        Some(secs) => sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }

    println!();
    println!("🛑 Tearing down workflow {}", plan.workflow_id);
    if let Err(e) = leader.teardown(&plan).await {
        println!("  ❌ {}", e);
    }

    // Let the last control messages drain before the listener goes away
    sleep(Duration::from_millis(100)).await;
    event_task.abort();
    shutdown.cancel();
    mesh.shutdown().await;
    server.await?;

    Ok(())
}

/// Everything wrong with a plan, checked against the local catalog
fn check_plan(plan: &DeploymentPlan, registry: &NodeRegistry) -> Vec<String> {
    let mut problems = Vec::new();

    for peer in plan.placement_peers() {
        match plan.peer_info(peer) {
            Some(info) if !info.addrs.is_empty() => {}
            _ => problems.push(format!("peer {} has no address", peer)),
        }
    }

    for (i, node) in plan.nodes.iter().enumerate() {
        if plan.nodes[..i].iter().any(|n| n.id == node.id) {
            problems.push(format!("node {} is placed more than once", node.id));
        }
        let Some(metadata) = registry.get_metadata(&node.node_type) else {
            problems.push(format!("node {}: unknown type '{}'", node.id, node.node_type));
            continue;
        };
        for name in node.params.keys() {
            if !metadata.params.iter().any(|p| &p.name == name) {
                problems.push(format!("node {}: unknown parameter '{}'", node.id, name));
            }
        }
    }

    for edge in &plan.edges {
        let ends = [
            (edge.from_node, &edge.from_port, true),
            (edge.to_node, &edge.to_port, false),
        ];
        for (node_id, port, is_output) in ends {
            let Some(node) = plan.find_node(node_id) else {
                problems.push(format!("edge {}: node {} is not placed", edge.id, node_id));
                continue;
            };
            let Some(metadata) = registry.get_metadata(&node.node_type) else {
                continue;
            };
            let ports = if is_output {
                &metadata.outputs
            } else {
                &metadata.inputs
            };
            if !ports.iter().any(|p| &p.name == port) {
                problems.push(format!(
                    "edge {}: {} has no {} port '{}'",
                    edge.id,
                    node.node_type,
                    if is_output { "output" } else { "input" },
                    port
                ));
            }
        }
    }

    problems
}

fn validate_plan(file: PathBuf) -> Result<()> {
    println!("🔍 Validating plan: {}", file.display());

    let plan = load_plan(&file)?;
    let registry = meshnodes::standard_registry();
    let problems = check_plan(&plan, &registry);

    if !problems.is_empty() {
        for problem in &problems {
            println!("  ❌ {}", problem);
        }
        bail!("plan has {} problem(s)", problems.len());
    }

    println!("✅ Plan is valid:");
    println!("   Workflow: {} ({})", plan.name, plan.workflow_id);
    println!("   Peers: {}", plan.placement_peers().len());
    println!("   Nodes: {}", plan.nodes.len());
    println!("   Edges: {}", plan.edges.len());

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = meshnodes::standard_registry();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            let begin = if metadata.is_begin { ", begin" } else { "" };
            println!("  • {} ({}{})", node_type, metadata.category, begin);
            println!("    {}", metadata.description);
            for (kind, ports) in [
                ("in", &metadata.inputs),
                ("out", &metadata.outputs),
                ("param", &metadata.params),
            ] {
                for port in ports {
                    println!("      {:<5} {}: {}", kind, port.name, port.value_type);
                }
            }
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_plan(output: PathBuf, peers: Vec<PeerInfo>) -> Result<()> {
    let (source, sink) = match peers.as_slice() {
        [] => (
            PeerInfo::new(PeerId::random()).with_addr("127.0.0.1:7401"),
            PeerInfo::new(PeerId::random()).with_addr("127.0.0.1:7402"),
        ),
        [only] => (only.clone(), only.clone()),
        [first, second, ..] => (first.clone(), second.clone()),
    };

    let mut plan = DeploymentPlan::new(1, "Example ticker");
    plan.add_peer(source.clone());
    plan.add_peer(sink.clone());

    let ticker = plan.add_node(
        NodePlacement::new(1, "time.ticker", source.id).with_param("interval_ms", 1000u64),
    );
    let log = plan.add_node(NodePlacement::new(2, "debug.log", sink.id));
    plan.connect(ticker, "tick", log, "message");

    let json = serde_json::to_string_pretty(&plan)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example plan: {}", output.display());
    println!();
    println!("Start the peers with:");
    for info in plan.peers.iter() {
        let addr = info.addrs.first().map(String::as_str).unwrap_or("127.0.0.1:7401");
        println!("  flowmeshd --listen {} --peer-id {}", addr, info.id);
    }
    println!();
    println!("Then deploy it with:");
    println!("  flowmesh deploy --file {}", output.display());

    Ok(())
}
