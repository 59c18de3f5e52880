//! Session notifications delivered to the application

use crate::media::{MediaStream, MediaTrack};
use crate::peer::{PeerId, Role};
use bytes::Bytes;

/// Notification raised by a [`super::MeshSession`]
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Relay reported room occupancy (including us)
    RoomCount(u32),
    /// Relay assigned our identity
    SocketId(PeerId),
    /// Direct connection to a peer is up
    Connect(PeerId),
    /// A peer entry was closed
    Disconnect(PeerId),
    /// Data received from a peer
    Data { peer_id: PeerId, data: Bytes },
    /// A peer started sending a stream
    Stream { peer_id: PeerId, stream: MediaStream },
    /// A peer added a track
    Track {
        peer_id: PeerId,
        track: MediaTrack,
        stream: MediaStream,
    },
    /// A peer connection failed; siblings are unaffected
    Error {
        peer_id: PeerId,
        role: Role,
        cause: String,
    },
    /// Connected to every other occupant of the room
    FullConnect,
    /// Relay link dropped; established peer connections are kept
    SignalingLost(String),
}

impl SessionEvent {
    /// Peer the event concerns, if any
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            SessionEvent::Connect(peer_id) | SessionEvent::Disconnect(peer_id) => Some(peer_id),
            SessionEvent::Data { peer_id, .. }
            | SessionEvent::Stream { peer_id, .. }
            | SessionEvent::Track { peer_id, .. }
            | SessionEvent::Error { peer_id, .. } => Some(peer_id),
            SessionEvent::SocketId(_)
            | SessionEvent::RoomCount(_)
            | SessionEvent::FullConnect
            | SessionEvent::SignalingLost(_) => None,
        }
    }

    /// Received data as UTF-8 text, if this is a data event holding text
    pub fn text(&self) -> Option<&str> {
        match self {
            SessionEvent::Data { data, .. } => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }
}
