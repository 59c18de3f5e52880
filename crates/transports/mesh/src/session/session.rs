//! Mesh session orchestrator
//!
//! A `MeshSession` is a handle onto one actor task. The task owns the peer
//! map, the room count and the completion tracker; relay events, peer
//! events and API calls all reach it through channels and are applied one
//! at a time, so no handler ever sees a half-updated map.

use super::events::SessionEvent;
use super::payload::Payload;
use crate::config::MeshConfig;
use crate::media::MediaStream;
use crate::mesh::MeshTracker;
use crate::peer::{PeerConnector, PeerEnvelope, PeerEvent, PeerId, PeerInfo, PeerManager, Role};
use crate::signaling::{SignalingChannel, SignalingEvent};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Observable state of a session, published after every event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshStatus {
    /// Identity the relay assigned us
    pub local_id: Option<PeerId>,
    /// Last relay-reported occupancy; `None` until the first report
    pub room_count: Option<u32>,
    /// Peers in the connected state
    pub connected: usize,
    /// Whether the mesh is currently complete
    pub fully_connected: bool,
    /// Number of full-connect edges so far
    pub full_connects: u64,
    /// Number of room-count reports received so far
    pub room_reports: u64,
    /// Session was destroyed
    pub closed: bool,
}

enum Command {
    Broadcast {
        text: String,
        reply: oneshot::Sender<usize>,
    },
    Send {
        peer_id: PeerId,
        text: String,
        reply: oneshot::Sender<bool>,
    },
    BroadcastStream {
        stream: MediaStream,
        reply: oneshot::Sender<usize>,
    },
    RemoveStream {
        stream: MediaStream,
        reply: oneshot::Sender<usize>,
    },
    Peers(oneshot::Sender<Vec<PeerInfo>>),
    Destroy(oneshot::Sender<()>),
}

/// Full-mesh peer session for one room
pub struct MeshSession {
    config: MeshConfig,

    signaling: Arc<dyn SignalingChannel>,

    /// Queue into the actor task
    commands: mpsc::UnboundedSender<Command>,

    events: broadcast::Sender<SessionEvent>,

    /// Receiver created before the actor started; handed to the first
    /// `subscribe` call so early relay notifications are not missed
    first_subscriber: Mutex<Option<broadcast::Receiver<SessionEvent>>>,

    status: watch::Receiver<MeshStatus>,
}

impl MeshSession {
    /// Connect to the relay and start the session task
    ///
    /// # Arguments
    ///
    /// * `config` - Session configuration (relay URL, join timeout, ...)
    /// * `signaling` - Relay binding
    /// * `connector` - Peer connection factory
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the relay cannot be
    /// reached.
    pub async fn connect(
        config: MeshConfig,
        signaling: Arc<dyn SignalingChannel>,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self> {
        config.validate()?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        signaling.connect(&config.signaling_url, signal_tx).await?;

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, first_subscriber) = broadcast::channel(config.event_capacity);
        let (status_tx, status_rx) = watch::channel(MeshStatus::default());

        let actor = SessionActor {
            signaling: Arc::clone(&signaling),
            peers: PeerManager::new(connector, peer_tx),
            tracker: MeshTracker::new(),
            default_stream: None,
            local_id: None,
            events: events.clone(),
            status: status_tx,
        };
        tokio::spawn(actor.run(signal_rx, peer_rx, command_rx));

        info!(namespace = %config.namespace, "Mesh session started");

        Ok(Self {
            config,
            signaling,
            commands: command_tx,
            events,
            first_subscriber: Mutex::new(Some(first_subscriber)),
            status: status_rx,
        })
    }

    /// Subscribe to session notifications
    ///
    /// The first subscriber sees every notification since `connect`; later
    /// subscribers see notifications from the moment they subscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.first_subscriber
            .lock()
            .take()
            .unwrap_or_else(|| self.events.subscribe())
    }

    /// Ask the relay to create a room
    pub fn create(&self, room: &str, password: Option<&str>, hidden: bool) -> Result<()> {
        self.ensure_open()?;
        info!("Creating room {}", room);
        self.signaling.create(room, password, hidden)
    }

    /// Join a room and wait until meshed with everyone already in it
    ///
    /// Resolves once a room count reported after this call says we are
    /// alone, or once a full-connect edge is observed after this call.
    ///
    /// # Errors
    ///
    /// * [`Error::Timeout`] if neither happens within `join_timeout`
    /// * [`Error::SessionClosed`] if the session is destroyed meanwhile
    pub async fn join(&self, room: &str, password: Option<&str>) -> Result<()> {
        let mut status = self.status.clone();
        let (connects_before, reports_before) = {
            let current = status.borrow_and_update();
            if current.closed {
                return Err(Error::SessionClosed);
            }
            (current.full_connects, current.room_reports)
        };

        info!("Joining room {}", room);
        self.signaling.join(room, password)?;

        let timeout = self.config.join_timeout;
        let waited = tokio::time::timeout(
            timeout,
            status.wait_for(|s| {
                s.closed
                    || s.full_connects > connects_before
                    || (s.room_reports > reports_before && s.room_count == Some(1))
            }),
        )
        .await;

        match waited {
            Err(_) => {
                warn!("Join of room {} timed out after {:?}", room, timeout);
                Err(Error::Timeout(format!(
                    "room {} not fully connected within {:?}",
                    room, timeout
                )))
            }
            Ok(Err(_)) => Err(Error::SessionClosed),
            Ok(Ok(s)) if s.closed => Err(Error::SessionClosed),
            Ok(Ok(_)) => {
                info!("Joined room {}", room);
                Ok(())
            }
        }
    }

    /// Send a payload to every connected peer
    ///
    /// Returns the number of peers it was handed to. Peers still in the
    /// handshake are skipped.
    pub async fn broadcast(&self, payload: impl Into<Payload>) -> Result<usize> {
        let text = payload.into().encode();
        self.request(|reply| Command::Broadcast { text, reply }).await
    }

    /// Send a payload to one peer
    ///
    /// Returns false without error if the peer is unknown or not connected.
    pub async fn send(&self, peer_id: &PeerId, payload: impl Into<Payload>) -> Result<bool> {
        let text = payload.into().encode();
        let peer_id = peer_id.clone();
        self.request(|reply| Command::Send {
            peer_id,
            text,
            reply,
        })
        .await
    }

    /// Attach a stream to every connected peer and to every future peer
    pub async fn broadcast_stream(&self, stream: MediaStream) -> Result<usize> {
        self.request(|reply| Command::BroadcastStream { stream, reply })
            .await
    }

    /// Detach a stream from every connected peer and stop giving it to new ones
    pub async fn remove_stream(&self, stream: &MediaStream) -> Result<usize> {
        let stream = stream.clone();
        self.request(|reply| Command::RemoveStream { stream, reply })
            .await
    }

    /// Snapshot of all peer entries; empty once destroyed
    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.request(Command::Peers).await.unwrap_or_default()
    }

    /// Tear down the relay link and every peer connection
    ///
    /// Any pending `join` fails with [`Error::SessionClosed`]. Calling this
    /// again is a no-op.
    pub async fn destroy(&self) {
        if self.request(Command::Destroy).await.is_err() {
            debug!("Mesh session already destroyed");
        }
    }

    pub fn room_count(&self) -> Option<u32> {
        self.status.borrow().room_count
    }

    pub fn local_id(&self) -> Option<PeerId> {
        self.status.borrow().local_id.clone()
    }

    pub fn is_fully_connected(&self) -> bool {
        self.status.borrow().fully_connected
    }

    pub fn is_closed(&self) -> bool {
        self.status.borrow().closed
    }

    /// Current published status
    pub fn status(&self) -> MeshStatus {
        self.status.borrow().clone()
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() || self.commands.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)
    }
}

/// State owned by the session task
struct SessionActor {
    signaling: Arc<dyn SignalingChannel>,
    peers: PeerManager,
    tracker: MeshTracker,
    /// Stream attached to every new connection
    default_stream: Option<MediaStream>,
    local_id: Option<PeerId>,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Sender<MeshStatus>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut signal_rx: mpsc::UnboundedReceiver<SignalingEvent>,
        mut peer_rx: mpsc::UnboundedReceiver<PeerEnvelope>,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut signaling_open = true;

        loop {
            // Inbound events first, so a command observes every event that
            // was queued before it.
            tokio::select! {
                biased;

                event = signal_rx.recv(), if signaling_open => match event {
                    Some(event) => self.handle_signaling_event(event),
                    None => {
                        signaling_open = false;
                        self.emit(SessionEvent::SignalingLost(
                            "signaling channel closed".to_string(),
                        ));
                    }
                },

                Some(envelope) = peer_rx.recv() => self.handle_peer_event(envelope),

                command = command_rx.recv() => match command {
                    Some(Command::Destroy(reply)) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All session handles dropped");
                        self.teardown();
                        break;
                    }
                },
            }

            self.publish();
        }

        debug!("Mesh session task terminated");
    }

    fn handle_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::RoomCount(count) => {
                debug!("Room count: {}", count);
                self.tracker.set_room_count(count);
                self.emit(SessionEvent::RoomCount(count));
                self.recompute();
            }
            SignalingEvent::SelfId(peer_id) => {
                info!("Relay assigned identity {}", peer_id);
                self.local_id = Some(peer_id.clone());
                self.emit(SessionEvent::SocketId(peer_id));
            }
            SignalingEvent::Initialize(peer_id) => {
                if self.is_local(&peer_id) {
                    warn!("Ignoring initialize for our own identity {}", peer_id);
                    return;
                }
                if self.peers.has_peer(&peer_id) {
                    warn!("Ignoring initialize for known peer {}", peer_id);
                    return;
                }
                if let Err(e) =
                    self.peers
                        .add_peer(peer_id.clone(), Role::Initiator, self.default_stream.as_ref())
                {
                    warn!("Failed to create connection to {}: {}", peer_id, e);
                    self.emit(SessionEvent::Error {
                        peer_id,
                        role: Role::Initiator,
                        cause: e.to_string(),
                    });
                }
            }
            SignalingEvent::Destroy(peer_id) => {
                debug!("Relay reports {} left", peer_id);
                self.close_peer(&peer_id);
            }
            SignalingEvent::Signal { from, payload } => {
                if self.is_local(&from) {
                    warn!("Ignoring signal from our own identity");
                    return;
                }
                match self
                    .peers
                    .signal(&from, payload, self.default_stream.as_ref())
                {
                    Ok(true) => debug!("Created responder entry for {}", from),
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to create connection to {}: {}", from, e);
                        self.emit(SessionEvent::Error {
                            peer_id: from,
                            role: Role::Responder,
                            cause: e.to_string(),
                        });
                    }
                }
            }
            SignalingEvent::Disconnected(reason) => {
                warn!("Signaling connection lost: {}", reason);
                self.emit(SessionEvent::SignalingLost(reason));
            }
        }
    }

    fn handle_peer_event(&mut self, envelope: PeerEnvelope) {
        let Some(role) = self.peers.current_role(&envelope) else {
            debug!(
                "Dropping event from stale connection to {} (generation {})",
                envelope.peer_id, envelope.generation
            );
            return;
        };
        let peer_id = envelope.peer_id;

        match envelope.event {
            PeerEvent::Signal(payload) => {
                if let Err(e) = self.signaling.send(&peer_id, "signal", payload) {
                    warn!("Failed to relay signal to {}: {}", peer_id, e);
                }
            }
            PeerEvent::Connect => {
                if self.peers.mark_connected(&peer_id) {
                    if let Some(stream) = &self.default_stream {
                        self.peers.attach_missing_stream(&peer_id, stream);
                    }
                    info!("Peer {} connected ({})", peer_id, role);
                    self.emit(SessionEvent::Connect(peer_id));
                    self.recompute();
                }
            }
            PeerEvent::Data(data) => {
                self.emit(SessionEvent::Data { peer_id, data });
            }
            PeerEvent::Stream(stream) => {
                self.emit(SessionEvent::Stream { peer_id, stream });
            }
            PeerEvent::Track { track, stream } => {
                self.emit(SessionEvent::Track {
                    peer_id,
                    track,
                    stream,
                });
            }
            PeerEvent::Error { cause, fatal } => {
                warn!("Peer {} ({}) error: {}", peer_id, role, cause);
                self.emit(SessionEvent::Error {
                    peer_id: peer_id.clone(),
                    role,
                    cause,
                });
                if fatal {
                    self.close_peer(&peer_id);
                }
            }
            PeerEvent::Close => {
                debug!("Peer {} closed its connection", peer_id);
                self.close_peer(&peer_id);
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Broadcast { text, reply } => {
                let sent = self.peers.broadcast(&text);
                debug!("Broadcast {} bytes to {} peers", text.len(), sent);
                let _ = reply.send(sent);
            }
            Command::Send {
                peer_id,
                text,
                reply,
            } => {
                let _ = reply.send(self.peers.send_to(&peer_id, &text));
            }
            Command::BroadcastStream { stream, reply } => {
                let attached = self.peers.add_stream(&stream);
                info!("Broadcasting stream {} to {} peers", stream.id(), attached);
                self.default_stream = Some(stream);
                let _ = reply.send(attached);
            }
            Command::RemoveStream { stream, reply } => {
                let detached = self.peers.remove_stream(&stream);
                if self
                    .default_stream
                    .as_ref()
                    .is_some_and(|current| current.same_stream(&stream))
                {
                    self.default_stream = None;
                }
                info!("Removed stream {} from {} peers", stream.id(), detached);
                let _ = reply.send(detached);
            }
            Command::Peers(reply) => {
                let _ = reply.send(self.peers.list_all_peers());
            }
            Command::Destroy(reply) => {
                // handled by the run loop
                let _ = reply.send(());
            }
        }
    }

    fn close_peer(&mut self, peer_id: &PeerId) {
        if self.peers.remove_peer(peer_id).is_some() {
            self.emit(SessionEvent::Disconnect(peer_id.clone()));
            self.recompute();
        }
    }

    fn recompute(&mut self) {
        if self.tracker.recompute(self.peers.connected_count()) {
            info!(
                room_count = ?self.tracker.room_count(),
                "Mesh fully connected"
            );
            self.emit(SessionEvent::FullConnect);
        }
    }

    fn teardown(&mut self) {
        info!("Destroying mesh session");
        self.signaling.close();
        for peer_id in self.peers.clear() {
            self.emit(SessionEvent::Disconnect(peer_id));
        }
        self.default_stream = None;
        self.status.send_modify(|status| {
            status.connected = 0;
            status.fully_connected = false;
            status.closed = true;
        });
    }

    fn publish(&self) {
        let next = MeshStatus {
            local_id: self.local_id.clone(),
            room_count: self.tracker.room_count(),
            connected: self.peers.connected_count(),
            fully_connected: self.tracker.is_complete(),
            full_connects: self.tracker.completions(),
            room_reports: self.tracker.room_reports(),
            closed: false,
        };
        self.status.send_if_modified(|status| {
            if *status == next {
                false
            } else {
                *status = next;
                true
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn is_local(&self, peer_id: &PeerId) -> bool {
        self.local_id.as_ref() == Some(peer_id)
    }
}
