use meshcore::{MeshError, PeerId, PeerInfo};
use meshruntime::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `listen_addr`
pub const LISTEN_ADDR_ENV: &str = "FLOWMESH_LISTEN_ADDR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Address the TCP transport binds. Default: "127.0.0.1:7400".
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Address advertised to peers when it differs from `listen_addr`
    #[serde(default)]
    pub advertise_addr: Option<String>,
    /// Fixed identity. A random one is generated when absent.
    #[serde(default)]
    pub peer_id: Option<PeerId>,
    /// Peers fed into discovery at startup
    #[serde(default)]
    pub bootstrap_peers: Vec<PeerInfo>,
    /// Time allowed to read one inbound stream. Default: 10000.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            advertise_addr: None,
            peer_id: None,
            bootstrap_peers: Vec::new(),
            read_timeout_ms: default_read_timeout(),
            heartbeat: HeartbeatConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl MeshConfig {
    /// Read a JSON config file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, MeshError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: MeshConfig = serde_json::from_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var(LISTEN_ADDR_ENV) {
            if !addr.trim().is_empty() {
                self.listen_addr = addr;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between heartbeats sent to a linked peer. Default: 30000.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
    /// Silence tolerated before a peer is reported, in intervals. Default: 3.
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_multiplier: default_timeout_multiplier(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        self.interval() * self.timeout_multiplier.max(1)
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:7400".to_string()
}

fn default_read_timeout() -> u64 {
    10_000
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_timeout_multiplier() -> u32 {
    3
}
