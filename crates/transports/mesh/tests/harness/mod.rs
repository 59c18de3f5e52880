//! Mesh session test harness
//!
//! Provides scripted stand-ins for both external seams so session behavior
//! can be driven deterministically:
//! - `MockSignaling`: records join/create/send and lets a test inject relay events
//! - `MockConnector`: records created connections and hands out a `PeerHandle`
//!   per connection for emitting capability events
//!
//! Basic usage pattern:
//!
//! 1. `TestMesh::start()` connects a session over the mocks
//! 2. `mesh.relay(...)` injects relay events
//! 3. `mesh.peer("id").connect()` completes a handshake
//! 4. `mesh.settle().await` waits until everything queued so far is applied
//! 5. Assert on `mesh.next_event()`, the handles, or the recorded relay traffic

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use remotemedia_mesh::peer::PeerInfo;
use remotemedia_mesh::{
    Error, MediaStream, MeshConfig, MeshSession, PeerConnection, PeerConnector, PeerEvent,
    PeerEventSink, PeerId, PeerOptions, Result, Role, SessionEvent, SignalPayload,
    SignalingChannel, SignalingEvent,
};
use remotemedia_mesh::signaling::SignalingSink;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// How long a test waits for an expected notification
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct SignalingState {
    sink: Option<SignalingSink>,
    joins: Vec<(String, Option<String>)>,
    creates: Vec<(String, Option<String>, bool)>,
    sent: Vec<(PeerId, String, SignalPayload)>,
    closes: usize,
}

/// Scripted relay binding
#[derive(Default)]
pub struct MockSignaling {
    state: Mutex<SignalingState>,
    fail_connect: bool,
}

impl MockSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// A relay that refuses connections
    pub fn unreachable() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    /// Inject a relay event; false once the session stopped listening
    pub fn push(&self, event: SignalingEvent) -> bool {
        match &self.state.lock().sink {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }

    /// Drop the event sink, as a lost relay connection would
    pub fn drop_link(&self) {
        self.state.lock().sink = None;
    }

    pub fn joins(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().joins.clone()
    }

    pub fn creates(&self) -> Vec<(String, Option<String>, bool)> {
        self.state.lock().creates.clone()
    }

    pub fn sent(&self) -> Vec<(PeerId, String, SignalPayload)> {
        self.state.lock().sent.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }
}

#[async_trait]
impl SignalingChannel for MockSignaling {
    async fn connect(&self, _address: &str, events: SignalingSink) -> Result<()> {
        if self.fail_connect {
            return Err(Error::WebSocketError("connection refused".to_string()));
        }
        self.state.lock().sink = Some(events);
        Ok(())
    }

    fn join(&self, room: &str, password: Option<&str>) -> Result<()> {
        self.state
            .lock()
            .joins
            .push((room.to_string(), password.map(str::to_string)));
        Ok(())
    }

    fn create(&self, room: &str, password: Option<&str>, hidden: bool) -> Result<()> {
        self.state
            .lock()
            .creates
            .push((room.to_string(), password.map(str::to_string), hidden));
        Ok(())
    }

    fn send(&self, to: &PeerId, kind: &str, payload: SignalPayload) -> Result<()> {
        self.state
            .lock()
            .sent
            .push((to.clone(), kind.to_string(), payload));
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.sink = None;
        state.closes += 1;
    }
}

/// Everything a mock connection was asked to do
#[derive(Debug, Default)]
pub struct PeerCalls {
    pub signals: Vec<SignalPayload>,
    pub sent: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Number of destroy calls, including rejected repeats
    pub destroy_calls: usize,
}

struct MockPeer {
    peer_id: PeerId,
    calls: Arc<Mutex<PeerCalls>>,
}

impl PeerConnection for MockPeer {
    fn signal(&self, payload: SignalPayload) {
        self.calls.lock().signals.push(payload);
    }

    fn send(&self, text: &str) {
        self.calls.lock().sent.push(text.to_string());
    }

    fn add_stream(&self, stream: &MediaStream) {
        self.calls.lock().added.push(stream.id().to_string());
    }

    fn remove_stream(&self, stream: &MediaStream) {
        self.calls.lock().removed.push(stream.id().to_string());
    }

    fn destroy(&self) -> Result<()> {
        let mut calls = self.calls.lock();
        calls.destroy_calls += 1;
        if calls.destroy_calls > 1 {
            return Err(Error::AlreadyDestroyed(self.peer_id.to_string()));
        }
        Ok(())
    }
}

/// Test-side view of one created connection
#[derive(Clone)]
pub struct PeerHandle {
    pub peer_id: PeerId,
    pub role: Role,
    pub initial_stream: Option<String>,
    sink: PeerEventSink,
    calls: Arc<Mutex<PeerCalls>>,
}

impl PeerHandle {
    pub fn emit(&self, event: PeerEvent) {
        self.sink.emit(event);
    }

    pub fn connect(&self) {
        self.emit(PeerEvent::Connect);
    }

    pub fn close(&self) {
        self.emit(PeerEvent::Close);
    }

    pub fn data(&self, text: &str) {
        self.emit(PeerEvent::Data(bytes::Bytes::copy_from_slice(text.as_bytes())));
    }

    pub fn error(&self, cause: &str, fatal: bool) {
        self.emit(PeerEvent::Error {
            cause: cause.to_string(),
            fatal,
        });
    }

    /// Ask the session to relay a handshake payload
    pub fn signal(&self, payload: serde_json::Value) {
        self.emit(PeerEvent::Signal(SignalPayload::from(payload)));
    }

    pub fn generation(&self) -> u64 {
        self.sink.generation()
    }

    pub fn signals(&self) -> Vec<SignalPayload> {
        self.calls.lock().signals.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.calls.lock().sent.clone()
    }

    pub fn added(&self) -> Vec<String> {
        self.calls.lock().added.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.calls.lock().removed.clone()
    }

    pub fn destroy_calls(&self) -> usize {
        self.calls.lock().destroy_calls
    }
}

/// Recording connection factory
#[derive(Default)]
pub struct MockConnector {
    created: Mutex<Vec<PeerHandle>>,
    refuse: Mutex<HashSet<PeerId>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make connection creation for `peer_id` fail
    pub fn refuse(&self, peer_id: &str) {
        self.refuse.lock().insert(PeerId::from(peer_id));
    }

    /// Every connection created so far, oldest first
    pub fn created(&self) -> Vec<PeerHandle> {
        self.created.lock().clone()
    }

    /// Most recent connection for `peer_id`
    pub fn latest(&self, peer_id: &str) -> Option<PeerHandle> {
        let peer_id = PeerId::from(peer_id);
        self.created
            .lock()
            .iter()
            .rev()
            .find(|handle| handle.peer_id == peer_id)
            .cloned()
    }

    pub fn count_for(&self, peer_id: &str) -> usize {
        let peer_id = PeerId::from(peer_id);
        self.created
            .lock()
            .iter()
            .filter(|handle| handle.peer_id == peer_id)
            .count()
    }
}

impl PeerConnector for MockConnector {
    fn create(
        &self,
        options: PeerOptions,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>> {
        let peer_id = events.peer_id().clone();
        if self.refuse.lock().contains(&peer_id) {
            return Err(Error::WebRtcError("no ICE agent available".to_string()));
        }

        let calls = Arc::new(Mutex::new(PeerCalls::default()));
        self.created.lock().push(PeerHandle {
            peer_id: peer_id.clone(),
            role: options.role,
            initial_stream: options.stream.as_ref().map(|s| s.id().to_string()),
            sink: events,
            calls: Arc::clone(&calls),
        });

        Ok(Box::new(MockPeer { peer_id, calls }))
    }
}

/// A session wired to mock seams
pub struct TestMesh {
    pub session: Arc<MeshSession>,
    pub signaling: Arc<MockSignaling>,
    pub connector: Arc<MockConnector>,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl TestMesh {
    /// Start a session with a short join timeout
    pub async fn start() -> Self {
        Self::start_with(MeshConfig::default().with_join_timeout(Duration::from_millis(500)))
            .await
    }

    pub async fn start_with(config: MeshConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();

        let signaling = Arc::new(MockSignaling::new());
        let connector = Arc::new(MockConnector::new());
        let session = MeshSession::connect(
            config,
            Arc::clone(&signaling) as Arc<dyn SignalingChannel>,
            Arc::clone(&connector) as Arc<dyn PeerConnector>,
        )
        .await
        .expect("session should connect over mock relay");
        let events = session.subscribe();

        Self {
            session: Arc::new(session),
            signaling,
            connector,
            events,
        }
    }

    /// Inject a relay event
    pub fn relay(&self, event: SignalingEvent) {
        assert!(self.signaling.push(event), "session stopped listening");
    }

    pub fn room_count(&self, count: u32) {
        self.relay(SignalingEvent::RoomCount(count));
    }

    pub fn initialize(&self, peer_id: &str) {
        self.relay(SignalingEvent::Initialize(PeerId::from(peer_id)));
    }

    pub fn destroy_peer(&self, peer_id: &str) {
        self.relay(SignalingEvent::Destroy(PeerId::from(peer_id)));
    }

    pub fn inbound_signal(&self, peer_id: &str, payload: serde_json::Value) {
        self.relay(SignalingEvent::Signal {
            from: PeerId::from(peer_id),
            payload: SignalPayload::from(payload),
        });
    }

    /// Latest connection for `peer_id`; panics if none was created
    pub fn peer(&self, peer_id: &str) -> PeerHandle {
        self.connector
            .latest(peer_id)
            .unwrap_or_else(|| panic!("no connection created for {}", peer_id))
    }

    /// Wait until every event queued so far has been applied
    ///
    /// Inbound events are served ahead of API calls, so a round trip through
    /// the command queue observes all of them.
    pub async fn settle(&self) -> Vec<PeerInfo> {
        self.session.peers().await
    }

    /// Start `join` in the background and wait until it reached the relay
    pub async fn spawn_join(&self, room: &str) -> tokio::task::JoinHandle<Result<()>> {
        let requested = self.signaling.joins().len();
        let session = Arc::clone(&self.session);
        let room = room.to_string();
        let join = tokio::spawn(async move { session.join(&room, None).await });

        tokio::time::timeout(EVENT_TIMEOUT, async {
            while self.signaling.joins().len() == requested {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("join request never reached the relay");
        join
    }

    /// Create an initiator entry for each id and complete its handshake
    pub async fn connect_peers(&self, ids: &[&str]) {
        for id in ids {
            self.initialize(id);
        }
        self.settle().await;
        for id in ids {
            self.peer(id).connect();
        }
        self.settle().await;
    }

    pub async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session event channel closed")
    }

    /// Skip notifications until one matches
    pub async fn wait_for<F>(&mut self, mut matches: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        loop {
            let event = self.next_event().await;
            if matches(&event) {
                return event;
            }
        }
    }

    /// Everything already delivered, without waiting
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    pub fn full_connects(events: &[SessionEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, SessionEvent::FullConnect))
            .count()
    }
}
