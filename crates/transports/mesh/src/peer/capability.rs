//! Peer connection capability seam
//!
//! The session never talks to a transport directly. It asks a
//! [`PeerConnector`] for a [`PeerConnection`] per remote peer and hears back
//! through a [`PeerEventSink`]. Every method is synchronous and must not
//! block: bindings queue the work and report outcomes as events.

use super::{PeerId, Role};
use crate::media::{MediaStream, MediaTrack};
use crate::signaling::SignalPayload;
use crate::Result;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Notification raised by a peer connection capability
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Handshake data to relay to the remote peer
    Signal(SignalPayload),
    /// Transport handshake completed
    Connect,
    /// Data received from the remote peer
    Data(Bytes),
    /// Remote peer added a stream
    Stream(MediaStream),
    /// Remote peer added a track to a stream
    Track {
        track: MediaTrack,
        stream: MediaStream,
    },
    /// Handshake or transport failure; `fatal` errors close the entry
    Error { cause: String, fatal: bool },
    /// Transport closed from either side
    Close,
}

/// A [`PeerEvent`] tagged with its origin
#[derive(Debug, Clone)]
pub struct PeerEnvelope {
    pub peer_id: PeerId,
    /// Distinguishes successive connections to the same peer id
    pub generation: u64,
    pub event: PeerEvent,
}

/// Handle a capability uses to report events upward
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    peer_id: PeerId,
    generation: u64,
    tx: mpsc::UnboundedSender<PeerEnvelope>,
}

impl PeerEventSink {
    pub fn new(peer_id: PeerId, generation: u64, tx: mpsc::UnboundedSender<PeerEnvelope>) -> Self {
        Self {
            peer_id,
            generation,
            tx,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns false once the session is gone.
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx
            .send(PeerEnvelope {
                peer_id: self.peer_id.clone(),
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Creation parameters for one peer connection
#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub role: Role,
    /// Stream to attach before the first offer/answer
    pub stream: Option<MediaStream>,
}

/// One direct connection to a remote peer
pub trait PeerConnection: Send + Sync {
    /// Feed handshake data received from the relay
    fn signal(&self, payload: SignalPayload);

    /// Send text over the data channel
    fn send(&self, text: &str);

    fn add_stream(&self, stream: &MediaStream);

    fn remove_stream(&self, stream: &MediaStream);

    /// Tear the connection down
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AlreadyDestroyed`] on a second call.
    fn destroy(&self) -> Result<()>;
}

/// Factory for [`PeerConnection`]s
pub trait PeerConnector: Send + Sync {
    fn create(
        &self,
        options: PeerOptions,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>>;
}
