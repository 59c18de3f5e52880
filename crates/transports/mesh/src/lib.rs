//! Full-mesh peer-to-peer sessions over WebRTC
//!
//! Joins a named room on a WebSocket signaling relay and keeps a direct
//! connection to every other participant, so a fixed set of peers can
//! exchange data and media without a server in the data path.
//!
//! # Features
//!
//! - **Room lifecycle**: create/join through a relay, with a bounded join
//! - **Full-mesh tracking**: one `FullConnect` notification per completion
//! - **Deterministic handshake roles**: existing occupants initiate, newcomers respond
//! - **Broadcast/unicast payloads**: text or canonical JSON over data channels
//! - **Media**: one broadcast stream attached to every connection
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  Application                                          │
//! │  ↓ MeshSession (handle)        ↑ SessionEvent stream  │
//! │  Session task (single writer)                         │
//! │  ├─ MeshTracker (room count, full-connect edge)       │
//! │  ├─ PeerManager (peer id → role/state/connection)     │
//! │  │   └─ PeerConnector / PeerConnection (webrtc-rs)   │
//! │  └─ SignalingChannel (JSON over WebSocket relay)      │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use remotemedia_mesh::MeshConfig;
//! use std::time::Duration;
//!
//! let config = MeshConfig::default()
//!     .with_namespace("whiteboard")
//!     .with_join_timeout(Duration::from_secs(15));
//!
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use remotemedia_mesh::{
//!     MeshConfig, MeshSession, RtcPeerConnector, SessionEvent, WebSocketSignaling,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> remotemedia_mesh::Result<()> {
//! let config = MeshConfig::default().with_namespace("whiteboard");
//! let signaling = Arc::new(WebSocketSignaling::new(&config.namespace));
//! let connector = Arc::new(RtcPeerConnector::new(&config));
//!
//! let session = MeshSession::connect(config, signaling, connector).await?;
//! let mut events = session.subscribe();
//!
//! session.join("lobby", None).await?;
//! session.broadcast(serde_json::json!({"x": 10, "y": 20})).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let SessionEvent::Data { peer_id, .. } = &event {
//!         println!("{}: {:?}", peer_id, event.text());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod mesh;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{DataChannelMode, MeshConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use media::{MediaStream, MediaTrack, TrackKind};
pub use peer::{
    PeerConnection, PeerConnector, PeerEvent, PeerEventSink, PeerId, PeerInfo, PeerOptions,
    PeerState, Role, RtcPeerConnector,
};
pub use session::{MeshSession, MeshStatus, Payload, SessionEvent};
pub use signaling::{SignalPayload, SignalingChannel, SignalingEvent, WebSocketSignaling};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
