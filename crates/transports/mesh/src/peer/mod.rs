//! Peer connection management
//!
//! Owns the per-remote-peer lifecycle: identity, handshake role, connection
//! state, and the capability trait the session drives.

pub mod capability;
pub mod manager;
pub mod rtc;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use capability::{
    PeerConnection, PeerConnector, PeerEnvelope, PeerEvent, PeerEventSink, PeerOptions,
};
pub use manager::PeerManager;
pub use rtc::{RtcPeer, RtcPeerConnector};

/// Relay-assigned identity of a room participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Handshake role of the local side for one peer pair
///
/// Fixed when the entry is created: the relay's `initialize` makes us the
/// initiator, an unsolicited `signal` makes us the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn is_initiator(&self) -> bool {
        matches!(self, Role::Initiator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// Lifecycle state of a live peer entry
///
/// `absent` and `closed` are represented by the entry not being in the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Handshake in progress
    Pending,
    /// Transport established; data and streams flow
    Connected,
}

/// Snapshot of one peer entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Peer identifier
    pub peer_id: PeerId,

    /// Local handshake role
    pub role: Role,

    /// Connection state
    pub state: PeerState,
}
