//! Node metadata: the self-describing record each cluster member advertises.
//!
//! A [`Meta`] travels two ways: stored as JSON in the discovery backend, and
//! embedded in gossip state payloads. Both use the same integer-coded JSON
//! shape, so the record round-trips bit-for-bit between sources:
//!
//! ```json
//! { "id": "node-1", "name": "starling", "addr": "10.0.1.4:7350",
//!   "type": 1, "status": 1, "vars": { "weight": "2" } }
//! ```

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::ClusterError;

/// Service name under which primary nodes register by default.
pub const DEFAULT_SERVICE: &str = "starling";

/// Reserved `vars` key parsed as the node's hash-ring weight.
pub const VAR_WEIGHT: &str = "weight";

/// Reserved `vars` key carrying the informational domain label.
pub const VAR_DOMAIN: &str = "domain";

// ─────────────────────────────────────────────
// NodeType
// ─────────────────────────────────────────────

/// The functional class of a cluster member. Application-defined meaning;
/// the runtime only transports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum NodeType {
    /// Main service node.
    Primary = 1,
    /// Auxiliary / microservice node.
    Auxiliary = 2,
}

impl TryFrom<i32> for NodeType {
    type Error = String;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(NodeType::Primary),
            2 => Ok(NodeType::Auxiliary),
            other => Err(format!("invalid node type {other}")),
        }
    }
}

impl From<NodeType> for i32 {
    fn from(t: NodeType) -> i32 {
        t as i32
    }
}

// ─────────────────────────────────────────────
// MetaStatus
// ─────────────────────────────────────────────

/// Lifecycle state a node advertises about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum MetaStatus {
    /// Started but not yet serving.
    WaitReady = 0,
    /// Serving traffic.
    Ready = 1,
    /// Shutting down or stopped.
    Stopped = 2,
}

impl TryFrom<i32> for MetaStatus {
    type Error = String;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(MetaStatus::WaitReady),
            1 => Ok(MetaStatus::Ready),
            2 => Ok(MetaStatus::Stopped),
            other => Err(format!("invalid meta status {other}")),
        }
    }
}

impl From<MetaStatus> for i32 {
    fn from(s: MetaStatus) -> i32 {
        s as i32
    }
}

// ─────────────────────────────────────────────
// Meta
// ─────────────────────────────────────────────

/// Identity and endpoint of a single cluster member.
///
/// Immutable by convention: registry reads hand out clones, and mutation
/// goes through `LocalPeer::update` or a full `sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Globally unique node id.
    pub id: String,

    /// Service name; nodes sharing a name form an interchangeable pool.
    pub name: String,

    /// `host:port` endpoint dialled by the transport pool.
    pub addr: String,

    /// Functional class.
    #[serde(rename = "type")]
    pub node_type: NodeType,

    /// Advertised lifecycle state.
    pub status: MetaStatus,

    /// Free-form string attributes. `weight` and `domain` are reserved.
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

impl Meta {
    /// Create a record in the `WaitReady` state.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        addr: impl Into<String>,
        node_type: NodeType,
        vars: HashMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            addr: addr.into(),
            node_type,
            status: MetaStatus::WaitReady,
            vars,
        }
    }

    /// Create a record from [`Config`], deriving the advertised endpoint.
    ///
    /// An empty or `"0.0.0.0"` `config.addr` selects the first private IPv4
    /// of this host (falling back to loopback). `vars["domain"]` is set from
    /// `config.domain`.
    pub fn from_config(
        id: impl Into<String>,
        name: impl Into<String>,
        node_type: NodeType,
        mut vars: HashMap<String, String>,
        config: &Config,
    ) -> Self {
        let host = if config.addr.is_empty() || config.addr == "0.0.0.0" {
            private_ipv4().unwrap_or_else(|| "127.0.0.1".to_string())
        } else {
            config.addr.clone()
        };
        vars.insert(VAR_DOMAIN.to_string(), config.domain.clone());
        Self::new(id, name, format!("{host}:{}", config.port), node_type, vars)
    }

    /// Serialize to the JSON advertisement form.
    pub fn to_json(&self) -> Result<Vec<u8>, ClusterError> {
        serde_json::to_vec(self).map_err(|e| ClusterError::Malformed(e.to_string()))
    }

    /// Deserialize from the JSON advertisement form.
    pub fn from_json(b: &[u8]) -> Result<Self, ClusterError> {
        serde_json::from_slice(b).map_err(|e| ClusterError::Malformed(e.to_string()))
    }

    /// Hash-ring weight parsed from `vars["weight"]`.
    ///
    /// Missing, unparseable, or sub-1 values are clamped to 1.
    pub fn weight(&self) -> usize {
        self.vars
            .get(VAR_WEIGHT)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|w| *w >= 1)
            .unwrap_or(1)
    }
}

/// Best-effort first private IPv4 of this host.
///
/// Uses a routing probe: connecting a UDP socket selects the outbound
/// interface without sending any packet.
fn private_ipv4() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("10.255.255.255:1").ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(v4) if !v4.ip().is_loopback() => Some(v4.ip().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with_weight(weight: Option<&str>) -> Meta {
        let mut vars = HashMap::new();
        if let Some(w) = weight {
            vars.insert(VAR_WEIGHT.to_string(), w.to_string());
        }
        Meta::new("n1", DEFAULT_SERVICE, "127.0.0.1:7350", NodeType::Primary, vars)
    }

    #[test]
    fn json_roundtrip_is_identity() {
        let mut vars = HashMap::new();
        vars.insert(VAR_WEIGHT.to_string(), "3".to_string());
        vars.insert(VAR_DOMAIN.to_string(), "eu-west".to_string());
        let mut meta = Meta::new("node-7", "matchmaker", "10.0.0.7:9100", NodeType::Auxiliary, vars);
        meta.status = MetaStatus::Ready;

        let bytes = meta.to_json().unwrap();
        let back = Meta::from_json(&bytes).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn enums_serialize_as_integers() {
        let meta = meta_with_weight(None);
        let value: serde_json::Value = serde_json::from_slice(&meta.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["status"], 0);
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = Meta::from_json(b"{\"id\": 42}").unwrap_err();
        assert!(matches!(err, ClusterError::Malformed(_)));

        let err = Meta::from_json(br#"{"id":"x","name":"y","addr":"z","type":9,"status":0}"#)
            .unwrap_err();
        assert!(matches!(err, ClusterError::Malformed(_)));
    }

    #[test]
    fn weight_clamps_invalid_values() {
        assert_eq!(meta_with_weight(None).weight(), 1);
        assert_eq!(meta_with_weight(Some("0")).weight(), 1);
        assert_eq!(meta_with_weight(Some("abc")).weight(), 1);
        assert_eq!(meta_with_weight(Some("9")).weight(), 9);
    }

    #[test]
    fn from_config_derives_endpoint_and_domain() {
        let config = Config {
            addr: "192.168.1.20".to_string(),
            port: 7351,
            domain: "local".to_string(),
            ..Config::default()
        };
        let meta =
            Meta::from_config("n1", DEFAULT_SERVICE, NodeType::Primary, HashMap::new(), &config);
        assert_eq!(meta.addr, "192.168.1.20:7351");
        assert_eq!(meta.vars.get(VAR_DOMAIN).map(String::as_str), Some("local"));
        assert_eq!(meta.status, MetaStatus::WaitReady);
    }

    #[test]
    fn from_config_falls_back_to_detected_host() {
        let config = Config { addr: "0.0.0.0".to_string(), port: 7350, ..Config::default() };
        let meta =
            Meta::from_config("n1", DEFAULT_SERVICE, NodeType::Primary, HashMap::new(), &config);
        assert!(meta.addr.ends_with(":7350"));
        assert!(!meta.addr.starts_with("0.0.0.0"));
    }
}
