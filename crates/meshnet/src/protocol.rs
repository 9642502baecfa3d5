use meshcore::{MeshError, ProtocolError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Every stream protocol spoken between peers. A stream carries exactly one
/// message of the protocol's payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Heartbeat,
    Identity,
    WorkflowCreate,
    WorkflowDelete,
    WorkflowRun,
    WorkflowStop,
    NodeCreate,
    NodeDelete,
    NodeParam,
    EdgeCreate,
    EdgeDelete,
    LogUpload,
    ResultUpload,
    DataPass,
    DataAck,
}

impl Protocol {
    pub const ALL: [Protocol; 15] = [
        Protocol::Heartbeat,
        Protocol::Identity,
        Protocol::WorkflowCreate,
        Protocol::WorkflowDelete,
        Protocol::WorkflowRun,
        Protocol::WorkflowStop,
        Protocol::NodeCreate,
        Protocol::NodeDelete,
        Protocol::NodeParam,
        Protocol::EdgeCreate,
        Protocol::EdgeDelete,
        Protocol::LogUpload,
        Protocol::ResultUpload,
        Protocol::DataPass,
        Protocol::DataAck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Heartbeat => "/flowmesh/heartbeat/1.0.0",
            Protocol::Identity => "/flowmesh/leader/identity/1.0.0",
            Protocol::WorkflowCreate => "/flowmesh/leader/workflow/create/1.0.0",
            Protocol::WorkflowDelete => "/flowmesh/leader/workflow/delete/1.0.0",
            Protocol::WorkflowRun => "/flowmesh/leader/workflow/run/1.0.0",
            Protocol::WorkflowStop => "/flowmesh/leader/workflow/stop/1.0.0",
            Protocol::NodeCreate => "/flowmesh/leader/node/create/1.0.0",
            Protocol::NodeDelete => "/flowmesh/leader/node/delete/1.0.0",
            Protocol::NodeParam => "/flowmesh/leader/node/param/1.0.0",
            Protocol::EdgeCreate => "/flowmesh/leader/edge/create/1.0.0",
            Protocol::EdgeDelete => "/flowmesh/leader/edge/delete/1.0.0",
            Protocol::LogUpload => "/flowmesh/follower/log/1.0.0",
            Protocol::ResultUpload => "/flowmesh/follower/result/1.0.0",
            Protocol::DataPass => "/flowmesh/follower/data/1.0.0",
            Protocol::DataAck => "/flowmesh/follower/data/ack/1.0.0",
        }
    }

    /// Data-pass handlers wait on a port slot, so they run off the inbound
    /// loop. Everything else is handled in arrival order.
    pub fn is_data(&self) -> bool {
        matches!(self, Protocol::DataPass)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownProtocol(s.to_string()))
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, MeshError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode<T: DeserializeOwned>(protocol: Protocol, payload: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(|e| ProtocolError::Decode {
        protocol: protocol.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_parse_back() {
        for protocol in Protocol::ALL {
            assert_eq!(protocol.as_str().parse::<Protocol>().unwrap(), protocol);
        }
    }

    #[test]
    fn only_data_pass_leaves_the_inbound_loop() {
        let data: Vec<_> = Protocol::ALL.iter().filter(|p| p.is_data()).collect();
        assert_eq!(data, vec![&Protocol::DataPass]);
    }

    #[test]
    fn unknown_identifier_rejected() {
        assert_eq!(
            "/flowmesh/unknown/1.0.0".parse::<Protocol>(),
            Err(ProtocolError::UnknownProtocol(
                "/flowmesh/unknown/1.0.0".to_string()
            ))
        );
    }

    #[test]
    fn decode_failure_names_protocol() {
        let err = decode::<u64>(Protocol::WorkflowRun, b"not a number").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode { ref protocol, .. }
            if protocol == "/flowmesh/leader/workflow/run/1.0.0"));
    }
}
