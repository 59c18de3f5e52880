//! Signaling relay seam
//!
//! The relay keeps room membership and carries handshake data between
//! participants. The session only needs the narrow [`SignalingChannel`]
//! surface; [`websocket::WebSocketSignaling`] is the bundled binding.

pub mod protocol;
pub mod websocket;

use crate::peer::PeerId;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use protocol::{ClientMessage, RelayMessage};
pub use websocket::WebSocketSignaling;

/// Opaque handshake data exchanged through the relay
///
/// The session never looks inside; only the peer binding that produced it
/// and its counterpart on the remote side understand the contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalPayload(serde_json::Value);

impl SignalPayload {
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for SignalPayload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Inbound relay notification, scoped to the joined room
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// Current room occupancy, including ourselves
    RoomCount(u32),
    /// Identity the relay assigned to this connection
    SelfId(PeerId),
    /// A new participant arrived; we initiate the handshake with it
    Initialize(PeerId),
    /// A participant left
    Destroy(PeerId),
    /// Handshake data from a participant
    Signal { from: PeerId, payload: SignalPayload },
    /// The relay link dropped
    Disconnected(String),
}

/// Where a signaling channel delivers inbound events
pub type SignalingSink = mpsc::UnboundedSender<SignalingEvent>;

/// Connection to a signaling relay
///
/// Outbound requests are fire-and-forget: they queue the message and return.
/// Events arrive on the sink passed to `connect`, in relay order.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Connect to the relay at `address`
    async fn connect(&self, address: &str, events: SignalingSink) -> Result<()>;

    /// Ask to join an existing room
    fn join(&self, room: &str, password: Option<&str>) -> Result<()>;

    /// Ask to create a room
    fn create(&self, room: &str, password: Option<&str>, hidden: bool) -> Result<()>;

    /// Relay one handshake payload to one participant
    fn send(&self, to: &PeerId, kind: &str, payload: SignalPayload) -> Result<()>;

    /// Disconnect from the relay; repeated calls are no-ops
    fn close(&self);
}
