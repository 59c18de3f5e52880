//! Peer lifecycle management
//!
//! `PeerManager` owns the map of live peer entries. It is driven from the
//! session's single control task, so it holds no locks: every method runs
//! to completion before the next event is looked at.

use super::capability::{PeerConnection, PeerConnector, PeerEnvelope, PeerEventSink, PeerOptions};
use super::{PeerId, PeerInfo, PeerState, Role};
use crate::media::MediaStream;
use crate::signaling::SignalPayload;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

struct PeerEntry {
    role: Role,
    state: PeerState,
    generation: u64,
    connection: Box<dyn PeerConnection>,
    /// Id of the broadcast stream currently attached to this connection
    stream_id: Option<String>,
}

/// Manages the peer connections of one mesh session
pub struct PeerManager {
    /// Map of peer_id to entry
    peers: HashMap<PeerId, PeerEntry>,

    connector: Arc<dyn PeerConnector>,

    /// Cloned into every capability's event sink
    events_tx: mpsc::UnboundedSender<PeerEnvelope>,

    next_generation: u64,
}

impl PeerManager {
    /// Create a new peer manager
    ///
    /// # Arguments
    ///
    /// * `connector` - Factory for per-peer connections
    /// * `events_tx` - Channel capability events are reported on
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        events_tx: mpsc::UnboundedSender<PeerEnvelope>,
    ) -> Self {
        Self {
            peers: HashMap::new(),
            connector,
            events_tx,
            next_generation: 1,
        }
    }

    /// Create a connection to a new peer
    ///
    /// # Errors
    ///
    /// Returns error if an entry for `peer_id` already exists or the
    /// connector fails; in both cases the map is unchanged.
    #[instrument(skip_all, fields(peer_id = %peer_id, role = %role))]
    pub fn add_peer(
        &mut self,
        peer_id: PeerId,
        role: Role,
        stream: Option<&MediaStream>,
    ) -> Result<()> {
        if self.peers.contains_key(&peer_id) {
            return Err(Error::PeerConnectionError(format!(
                "Peer {} already exists",
                peer_id
            )));
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let sink = PeerEventSink::new(peer_id.clone(), generation, self.events_tx.clone());
        let options = PeerOptions {
            role,
            stream: stream.cloned(),
        };
        let connection = self.connector.create(options, sink)?;

        info!("Adding peer to manager: {}", peer_id);
        self.peers.insert(
            peer_id,
            PeerEntry {
                role,
                state: PeerState::Pending,
                generation,
                connection,
                stream_id: stream.map(|s| s.id().to_string()),
            },
        );

        Ok(())
    }

    /// Route handshake data from the relay to a peer
    ///
    /// An unknown peer gets a new responder entry first. Returns true if an
    /// entry was created.
    pub fn signal(
        &mut self,
        peer_id: &PeerId,
        payload: SignalPayload,
        stream: Option<&MediaStream>,
    ) -> Result<bool> {
        let created = if self.peers.contains_key(peer_id) {
            false
        } else {
            self.add_peer(peer_id.clone(), Role::Responder, stream)?;
            true
        };

        if let Some(entry) = self.peers.get(peer_id) {
            entry.connection.signal(payload);
        }

        Ok(created)
    }

    /// Role of the live entry an event belongs to
    ///
    /// `None` if the peer is gone or the event came from a connection that
    /// has since been replaced.
    pub fn current_role(&self, envelope: &PeerEnvelope) -> Option<Role> {
        self.peers
            .get(&envelope.peer_id)
            .filter(|entry| entry.generation == envelope.generation)
            .map(|entry| entry.role)
    }

    /// Move a pending peer to connected; returns true on transition
    pub fn mark_connected(&mut self, peer_id: &PeerId) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(entry) if entry.state == PeerState::Pending => {
                debug!("Peer {} state transition: Pending -> Connected", peer_id);
                entry.state = PeerState::Connected;
                true
            }
            _ => false,
        }
    }

    /// Tear down and forget a peer
    ///
    /// Returns the removed role, or `None` if there was no entry.
    pub fn remove_peer(&mut self, peer_id: &PeerId) -> Option<Role> {
        let entry = self.peers.remove(peer_id)?;
        info!("Removing peer from manager: {}", peer_id);
        destroy_connection(peer_id, entry.connection.as_ref());
        Some(entry.role)
    }

    /// Check if a peer exists
    pub fn has_peer(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn connected_count(&self) -> usize {
        self.connected().count()
    }

    /// Send text to one connected peer; returns false if it was skipped
    pub fn send_to(&self, peer_id: &PeerId, text: &str) -> bool {
        match self.peers.get(peer_id) {
            Some(entry) if entry.state == PeerState::Connected => {
                entry.connection.send(text);
                true
            }
            _ => {
                debug!("Skipping send to {}: not connected", peer_id);
                false
            }
        }
    }

    /// Send text to every connected peer; returns how many were reached
    pub fn broadcast(&self, text: &str) -> usize {
        let mut sent = 0;
        for (_, entry) in self.connected() {
            entry.connection.send(text);
            sent += 1;
        }
        sent
    }

    /// Attach a stream to every connected peer
    pub fn add_stream(&mut self, stream: &MediaStream) -> usize {
        let mut attached = 0;
        for entry in self.peers.values_mut() {
            if entry.state != PeerState::Connected {
                continue;
            }
            if entry.stream_id.as_deref() == Some(stream.id()) {
                continue;
            }
            entry.connection.add_stream(stream);
            entry.stream_id = Some(stream.id().to_string());
            attached += 1;
        }
        attached
    }

    /// Detach a stream from every connected peer and from any pending peer
    /// that was created carrying it
    pub fn remove_stream(&mut self, stream: &MediaStream) -> usize {
        let mut detached = 0;
        for entry in self.peers.values_mut() {
            let carries = entry.stream_id.as_deref() == Some(stream.id());
            if entry.state != PeerState::Connected && !carries {
                continue;
            }
            entry.connection.remove_stream(stream);
            if carries {
                entry.stream_id = None;
            }
            detached += 1;
        }
        detached
    }

    /// Give a newly connected peer the broadcast stream if it was created
    /// before that stream was set. Returns true if the stream was attached.
    pub fn attach_missing_stream(&mut self, peer_id: &PeerId, stream: &MediaStream) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(entry)
                if entry.state == PeerState::Connected
                    && entry.stream_id.as_deref() != Some(stream.id()) =>
            {
                debug!("Attaching stream {} to late peer {}", stream.id(), peer_id);
                entry.connection.add_stream(stream);
                entry.stream_id = Some(stream.id().to_string());
                true
            }
            _ => false,
        }
    }

    /// List all peers regardless of state, ordered by id
    pub fn list_all_peers(&self) -> Vec<PeerInfo> {
        let mut all_peers: Vec<PeerInfo> = self
            .peers
            .iter()
            .map(|(peer_id, entry)| PeerInfo {
                peer_id: peer_id.clone(),
                role: entry.role,
                state: entry.state,
            })
            .collect();
        all_peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        all_peers
    }

    /// Remove all peers and close their connections
    pub fn clear(&mut self) -> Vec<PeerId> {
        debug!("Clearing all peers from manager");

        let mut removed = Vec::with_capacity(self.peers.len());
        for (peer_id, entry) in self.peers.drain() {
            destroy_connection(&peer_id, entry.connection.as_ref());
            removed.push(peer_id);
        }
        removed.sort();
        removed
    }

    fn connected(&self) -> impl Iterator<Item = (&PeerId, &PeerEntry)> {
        self.peers
            .iter()
            .filter(|(_, entry)| entry.state == PeerState::Connected)
    }
}

fn destroy_connection(peer_id: &PeerId, connection: &dyn PeerConnection) {
    match connection.destroy() {
        Ok(()) => {}
        Err(Error::AlreadyDestroyed(_)) => {
            debug!("Peer {} connection was already destroyed", peer_id);
        }
        Err(e) => warn!("Error closing peer connection for {}: {}", peer_id, e),
    }
}
