//! # Node Configuration
//!
//! Immutable configuration snapshot, loaded from TOML once at startup and
//! handed to each component at construction. Reconfiguration means
//! restarting the affected component; nothing mutates in place.
//!
//! ```toml
//! [lora]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [mesh]
//! node_id = "drone-7"
//! is_gateway = false
//! ```
//!
//! Validation failures here are the only fatal errors in the system.

use serde::Deserialize;
use std::time::Duration;

use aeromesh_link::engine::LinkConfig;
use aeromesh_link::wire::HEADER_BYTES;

use crate::envelope::NodeId;
use crate::router::RouterConfig;

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Startup configuration failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ─── Sections ───────────────────────────────────────────────────────────────

/// `[lora]` — radio and link-protocol settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    /// Serial device path.
    pub port: String,
    /// Serial link speed.
    pub baud_rate: u32,
    /// Maximum on-wire frame size in bytes.
    pub max_frame_bytes: usize,
    /// Retransmission deadline in seconds.
    pub ack_timeout_s: f64,
    /// Maximum retransmissions per message.
    pub retry_limit: u32,
    /// Bound on simultaneously tracked outbound messages.
    pub max_in_flight: usize,
}

impl Default for LoraConfig {
    fn default() -> Self {
        LoraConfig {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            max_frame_bytes: 230,
            ack_timeout_s: 2.0,
            retry_limit: 3,
            max_in_flight: 1024,
        }
    }
}

/// `[mesh]` — routing and liveness settings. `node_id` is required.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Unique node identity. Required; there is no sensible default.
    pub node_id: String,
    /// Whether this node bridges the mesh to external operators.
    pub is_gateway: bool,
    /// Discovery broadcast cadence in seconds.
    pub discovery_interval_s: f64,
    /// Heartbeat broadcast cadence in seconds.
    pub heartbeat_interval_s: f64,
    /// Neighbour eviction deadline in seconds.
    pub node_timeout_s: f64,
    /// Routing reach cap in hops.
    pub max_hops: u32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            node_id: String::new(),
            is_gateway: false,
            discovery_interval_s: 60.0,
            heartbeat_interval_s: 30.0,
            node_timeout_s: 180.0,
            max_hops: 5,
        }
    }
}

// ─── Node Config ────────────────────────────────────────────────────────────

/// The full startup snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub lora: LoraConfig,
    pub mesh: MeshConfig,
}

impl NodeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Fatal-at-startup validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mesh.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid("mesh.node_id is required".into()));
        }
        if self.lora.max_frame_bytes <= HEADER_BYTES {
            return Err(ConfigError::Invalid(format!(
                "lora.max_frame_bytes must exceed the {HEADER_BYTES}-byte header"
            )));
        }
        if self.lora.ack_timeout_s <= 0.0 {
            return Err(ConfigError::Invalid("lora.ack_timeout_s must be positive".into()));
        }
        if self.mesh.max_hops == 0 {
            return Err(ConfigError::Invalid("mesh.max_hops must be at least 1".into()));
        }
        for (key, value) in [
            ("mesh.discovery_interval_s", self.mesh.discovery_interval_s),
            ("mesh.heartbeat_interval_s", self.mesh.heartbeat_interval_s),
            ("mesh.node_timeout_s", self.mesh.node_timeout_s),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::Invalid(format!("{key} must be positive")));
            }
        }
        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.mesh.node_id.clone())
    }

    /// Link-engine view of this snapshot.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            id_prefix: self.mesh.node_id.clone(),
            max_frame_bytes: self.lora.max_frame_bytes,
            ack_timeout: Duration::from_secs_f64(self.lora.ack_timeout_s),
            retry_limit: self.lora.retry_limit,
            max_in_flight: self.lora.max_in_flight,
            ..LinkConfig::default()
        }
    }

    /// Router view of this snapshot.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            node_id: self.node_id(),
            is_gateway: self.mesh.is_gateway,
            battery_level: 1.0,
            max_hops: self.mesh.max_hops,
            node_timeout: Duration::from_secs_f64(self.mesh.node_timeout_s),
            heartbeat_interval: Duration::from_secs_f64(self.mesh.heartbeat_interval_s),
        }
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs_f64(self.mesh.discovery_interval_s)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.mesh.heartbeat_interval_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = NodeConfig::from_toml_str(
            r#"
            [mesh]
            node_id = "drone-1"
            "#,
        )
        .unwrap();

        assert_eq!(config.lora.port, "/dev/ttyUSB0");
        assert_eq!(config.lora.baud_rate, 115_200);
        assert_eq!(config.lora.max_frame_bytes, 230);
        assert_eq!(config.mesh.discovery_interval_s, 60.0);
        assert_eq!(config.mesh.node_timeout_s, 180.0);
        assert_eq!(config.mesh.max_hops, 5);
        assert!(!config.mesh.is_gateway);
    }

    #[test]
    fn full_config_overrides() {
        let config = NodeConfig::from_toml_str(
            r#"
            [lora]
            port = "/dev/ttyAMA0"
            baud_rate = 57600
            max_frame_bytes = 200
            ack_timeout_s = 1.5
            retry_limit = 5

            [mesh]
            node_id = "gw-1"
            is_gateway = true
            heartbeat_interval_s = 15.0
            max_hops = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.lora.port, "/dev/ttyAMA0");
        assert_eq!(config.lora.retry_limit, 5);
        assert!(config.mesh.is_gateway);
        assert_eq!(config.mesh.max_hops, 3);

        let link = config.link_config();
        assert_eq!(link.id_prefix, "gw-1");
        assert_eq!(link.max_frame_bytes, 200);
        assert_eq!(link.ack_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn missing_node_id_is_fatal() {
        let err = NodeConfig::from_toml_str("[mesh]\n");
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn undersized_frame_limit_is_fatal() {
        let err = NodeConfig::from_toml_str(
            r#"
            [lora]
            max_frame_bytes = 20
            [mesh]
            node_id = "x"
            "#,
        );
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_interval_is_fatal() {
        let err = NodeConfig::from_toml_str(
            r#"
            [mesh]
            node_id = "x"
            heartbeat_interval_s = 0.0
            "#,
        );
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = NodeConfig::from_toml_str("not toml at all [");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }
}
