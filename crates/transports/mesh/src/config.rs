//! Configuration types for the mesh session

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for `MeshSession` and the bundled bindings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// WebSocket signaling relay URL (ws:// or wss://)
    pub signaling_url: String,

    /// Application namespace rooms are scoped to on the relay
    pub namespace: String,

    /// How long `join` waits for the mesh to complete (default: 30s)
    #[serde(with = "duration_ms")]
    pub join_timeout: Duration,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Data channel mode (default: Reliable)
    pub data_channel_mode: DataChannelMode,

    /// Capacity of the session notification channel (default: 256)
    pub event_capacity: usize,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Data channel mode
///
/// Determines the reliability of message delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataChannelMode {
    /// Reliable, ordered delivery (default)
    Reliable,
    /// Unreliable, unordered delivery (low latency)
    ///
    /// Messages may arrive out of order or be lost.
    Unreliable,
}

impl DataChannelMode {
    /// Get the ordered setting for webrtc-rs
    pub fn ordered(&self) -> bool {
        match self {
            DataChannelMode::Reliable => true,
            DataChannelMode::Unreliable => false,
        }
    }

    /// Get the max retransmits setting for webrtc-rs
    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            DataChannelMode::Reliable => None,
            DataChannelMode::Unreliable => Some(0),
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            namespace: "default".to_string(),
            join_timeout: Duration::from_secs(30),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            data_channel_mode: DataChannelMode::Reliable,
            event_capacity: 256,
        }
    }
}

impl MeshConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `namespace` is empty
    /// - `join_timeout` is zero
    /// - `event_capacity` is zero
    /// - `signaling_url` is not a WebSocket URL
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.namespace.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "namespace must not be empty".to_string(),
            ));
        }

        if self.join_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "join_timeout must be greater than zero".to_string(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_capacity must be greater than zero".to_string(),
            ));
        }

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        Ok(())
    }

    /// Create a configuration preset for interactive use on a LAN or
    /// good broadband: short join bound, unreliable data channel.
    ///
    /// # Example
    ///
    /// ```
    /// use remotemedia_mesh::config::{DataChannelMode, MeshConfig};
    ///
    /// let config = MeshConfig::low_latency_preset("ws://localhost:8080");
    /// assert_eq!(config.data_channel_mode, DataChannelMode::Unreliable);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn low_latency_preset(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            join_timeout: Duration::from_secs(10),
            data_channel_mode: DataChannelMode::Unreliable,
            ..Default::default()
        }
    }

    /// Create a configuration preset for cellular or otherwise flaky
    /// networks: longer join bound, a backup STUN server. Pair it with
    /// `with_turn_servers()`.
    pub fn mobile_network_preset(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            join_timeout: Duration::from_secs(60),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            data_channel_mode: DataChannelMode::Reliable,
            ..Default::default()
        }
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Set the application namespace
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Set the join timeout
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
