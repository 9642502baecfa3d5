use crate::PeerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identity of a process on the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identity plus the addresses a peer can be reached at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    #[serde(default)]
    pub addrs: Vec<String>,
}

impl PeerInfo {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            addrs: Vec::new(),
        }
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addrs.push(addr.into());
        self
    }
}

/// Parses `<peer-id>@<addr>`
impl std::str::FromStr for PeerInfo {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PeerError::InvalidAddress(s.to_string());
        let (id, addr) = s.split_once('@').ok_or_else(invalid)?;
        let id: PeerId = id.parse().map_err(|_| invalid())?;
        if addr.is_empty() {
            return Err(invalid());
        }
        Ok(PeerInfo::new(id).with_addr(addr))
    }
}
