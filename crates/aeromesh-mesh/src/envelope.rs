//! # Routing Envelopes
//!
//! The typed message structure the routing layer wraps around every link
//! payload. The wire representation is flat tagged JSON:
//!
//! ```text
//! {"type":"discovery","node_id":"n1","is_gateway":false,
//!  "battery_level":1.0,"timestamp":1738000000.0}
//! {"type":"data","source":"n1","destination":"n3","next_hop":"n2",
//!  "payload":{...}}
//! ```
//!
//! Broadcast types (discovery, heartbeat, route_update) carry no destination
//! or next hop — they are flood-limited to direct neighbours by the radio
//! itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ─── Node Identity ──────────────────────────────────────────────────────────

/// Opaque printable identifier, unique per device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// Sentinel destination meaning "the nearest gateway". Resolved by the
/// router at submit time; it never appears on the wire.
pub const GATEWAY_SENTINEL: &str = "@gateway";

// ─── Envelope ───────────────────────────────────────────────────────────────

/// One routing-layer message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Neighbour advertisement, broadcast periodically.
    Discovery {
        node_id: NodeId,
        is_gateway: bool,
        battery_level: f64,
        timestamp: f64,
    },
    /// Liveness refresh for an already-discovered neighbour.
    Heartbeat { node_id: NodeId, timestamp: f64 },
    /// The sender's routing table, advertised after a rebuild.
    RouteUpdate {
        node_id: NodeId,
        routes: Vec<(NodeId, NodeId)>,
        timestamp: f64,
    },
    /// Application payload travelling toward `destination`.
    Data {
        source: NodeId,
        destination: NodeId,
        next_hop: NodeId,
        payload: serde_json::Value,
    },
}

impl Envelope {
    /// Wire tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Discovery { .. } => "discovery",
            Envelope::Heartbeat { .. } => "heartbeat",
            Envelope::RouteUpdate { .. } => "route_update",
            Envelope::Data { .. } => "data",
        }
    }

    /// Serialize to link payload bytes.
    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::from(serde_json::to_vec(self).expect("envelope serialization is infallible"))
    }

    /// Parse a link payload. Unknown types and missing fields are errors;
    /// the caller counts and drops them.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Wall-clock timestamp for wire envelopes, seconds since the epoch.
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn discovery_wire_shape() {
        let env = Envelope::Discovery {
            node_id: NodeId::from("drone-7"),
            is_gateway: true,
            battery_level: 0.82,
            timestamp: 1_700_000_000.5,
        };
        let value: serde_json::Value = serde_json::from_slice(&env.to_bytes()).unwrap();
        assert_eq!(value["type"], "discovery");
        assert_eq!(value["node_id"], "drone-7");
        assert_eq!(value["is_gateway"], true);
        assert_eq!(value["battery_level"], 0.82);
        assert!(value.get("destination").is_none());
    }

    #[test]
    fn data_wire_shape() {
        let env = Envelope::Data {
            source: NodeId::from("a"),
            destination: NodeId::from("c"),
            next_hop: NodeId::from("b"),
            payload: json!({"tag": "telemetry", "body": {"alt_m": 120}}),
        };
        let value: serde_json::Value = serde_json::from_slice(&env.to_bytes()).unwrap();
        assert_eq!(value["type"], "data");
        assert_eq!(value["next_hop"], "b");
        assert_eq!(value["payload"]["tag"], "telemetry");
    }

    #[test]
    fn route_update_routes_as_pairs() {
        let env = Envelope::RouteUpdate {
            node_id: NodeId::from("b"),
            routes: vec![
                (NodeId::from("a"), NodeId::from("a")),
                (NodeId::from("c"), NodeId::from("c")),
            ],
            timestamp: 0.0,
        };
        let value: serde_json::Value = serde_json::from_slice(&env.to_bytes()).unwrap();
        assert_eq!(value["routes"], json!([["a", "a"], ["c", "c"]]));
    }

    #[test]
    fn round_trip_all_variants() {
        let envelopes = vec![
            Envelope::Discovery {
                node_id: NodeId::from("x"),
                is_gateway: false,
                battery_level: 1.0,
                timestamp: 1.0,
            },
            Envelope::Heartbeat {
                node_id: NodeId::from("x"),
                timestamp: 2.0,
            },
            Envelope::RouteUpdate {
                node_id: NodeId::from("x"),
                routes: vec![(NodeId::from("y"), NodeId::from("z"))],
                timestamp: 3.0,
            },
            Envelope::Data {
                source: NodeId::from("x"),
                destination: NodeId::from("y"),
                next_hop: NodeId::from("y"),
                payload: json!("raw string payload"),
            },
        ];
        for env in envelopes {
            let back = Envelope::from_bytes(&env.to_bytes()).unwrap();
            assert_eq!(back, env);
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = br#"{"type":"wormhole","node_id":"x"}"#;
        assert!(Envelope::from_bytes(raw).is_err());
    }

    #[test]
    fn epoch_now_is_positive() {
        assert!(epoch_now() > 1.0e9);
    }
}
