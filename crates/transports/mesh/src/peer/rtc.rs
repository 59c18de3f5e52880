//! webrtc-rs peer connection binding
//!
//! Each [`RtcPeer`] is a handle onto a driver task that owns one
//! `RTCPeerConnection`. Trait calls only enqueue commands; the driver does
//! the async SDP/ICE work and reports back through the [`PeerEventSink`].
//!
//! Handshake payloads are JSON objects tagged by `type`:
//!
//! * `offer` / `answer` carry an SDP string
//! * `candidate` carries an ICE candidate
//! * `renegotiate` asks the initiator for a fresh offer
//! * `transceiver_request` asks the initiator to open a media section the
//!   responder can send on
//!
//! Only the initiator ever creates offers, so there is no glare to resolve.

use super::capability::{PeerConnection, PeerConnector, PeerEvent, PeerEventSink, PeerOptions};
use super::{PeerId, Role};
use crate::config::{DataChannelMode, MeshConfig};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::signaling::SignalPayload;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Label of the data channel carrying application payloads
pub const DATA_CHANNEL_LABEL: &str = "mesh";

/// Handshake payload exchanged through the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RtcSignal {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: RTCIceCandidateInit },
    Renegotiate,
    TransceiverRequest { kind: TrackKind },
}

impl RtcSignal {
    pub fn into_payload(self) -> Result<SignalPayload> {
        Ok(SignalPayload::from(serde_json::to_value(self)?))
    }

    pub fn from_payload(payload: &SignalPayload) -> Result<Self> {
        serde_json::from_value(payload.as_value().clone()).map_err(|e| {
            Error::SerializationError(format!("Failed to parse handshake payload: {}", e))
        })
    }
}

/// Creates webrtc-rs backed peer connections
pub struct RtcPeerConnector {
    ice_servers: Vec<RTCIceServer>,
    data_channel_mode: DataChannelMode,
}

impl RtcPeerConnector {
    /// Create a connector using the ICE servers and data channel mode from
    /// `config`
    pub fn new(config: &MeshConfig) -> Self {
        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        Self {
            ice_servers,
            data_channel_mode: config.data_channel_mode,
        }
    }

    pub fn ice_servers(&self) -> &[RTCIceServer] {
        &self.ice_servers
    }
}

impl PeerConnector for RtcPeerConnector {
    fn create(
        &self,
        options: PeerOptions,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::WebRtcError(format!("No async runtime available: {}", e)))?;

        let peer_id = events.peer_id().clone();
        let (commands, rx) = mpsc::unbounded_channel();

        let setup = DriverSetup {
            ice_servers: self.ice_servers.clone(),
            data_channel_mode: self.data_channel_mode,
            options,
            events,
        };
        runtime.spawn(async move {
            let events = setup.events.clone();
            match RtcDriver::start(setup).await {
                Ok(driver) => driver.run(rx).await,
                Err(e) => {
                    warn!("Failed to set up peer connection to {}: {}", events.peer_id(), e);
                    events.emit(PeerEvent::Error {
                        cause: e.to_string(),
                        fatal: true,
                    });
                }
            }
        });

        Ok(Box::new(RtcPeer {
            peer_id,
            commands,
            destroyed: AtomicBool::new(false),
        }))
    }
}

enum DriverCommand {
    Signal(SignalPayload),
    Send(String),
    AddStream(MediaStream),
    RemoveStream(MediaStream),
    Destroy,
}

/// Handle onto one webrtc-rs peer connection
pub struct RtcPeer {
    peer_id: PeerId,
    commands: mpsc::UnboundedSender<DriverCommand>,
    destroyed: AtomicBool,
}

impl RtcPeer {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn queue(&self, command: DriverCommand) {
        if self.destroyed.load(Ordering::SeqCst) {
            debug!("Ignoring request for destroyed peer {}", self.peer_id);
            return;
        }
        if self.commands.send(command).is_err() {
            debug!("Peer {} driver has stopped", self.peer_id);
        }
    }
}

impl PeerConnection for RtcPeer {
    fn signal(&self, payload: SignalPayload) {
        self.queue(DriverCommand::Signal(payload));
    }

    fn send(&self, text: &str) {
        self.queue(DriverCommand::Send(text.to_string()));
    }

    fn add_stream(&self, stream: &MediaStream) {
        self.queue(DriverCommand::AddStream(stream.clone()));
    }

    fn remove_stream(&self, stream: &MediaStream) {
        self.queue(DriverCommand::RemoveStream(stream.clone()));
    }

    fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyDestroyed(self.peer_id.to_string()));
        }
        let _ = self.commands.send(DriverCommand::Destroy);
        Ok(())
    }
}

struct DriverSetup {
    ice_servers: Vec<RTCIceServer>,
    data_channel_mode: DataChannelMode,
    options: PeerOptions,
    events: PeerEventSink,
}

struct RtcDriver {
    role: Role,
    events: PeerEventSink,
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    /// RTP senders per local stream id
    senders: HashMap<String, Vec<Arc<RTCRtpSender>>>,
    /// Remote candidates that arrived before the remote description
    pending_candidates: Vec<RTCIceCandidateInit>,
    /// An offer was requested while one was already outstanding
    renegotiate_pending: bool,
}

impl RtcDriver {
    #[instrument(skip_all, fields(peer_id = %setup.events.peer_id(), role = %setup.options.role))]
    async fn start(setup: DriverSetup) -> Result<Self> {
        let DriverSetup {
            ice_servers,
            data_channel_mode,
            options,
            events,
        } = setup;

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        let mut driver = Self {
            role: options.role,
            events,
            pc,
            data_channel: Arc::new(Mutex::new(None)),
            senders: HashMap::new(),
            pending_candidates: Vec::new(),
            renegotiate_pending: false,
        };
        driver.install_handlers();

        if driver.role.is_initiator() {
            let init = RTCDataChannelInit {
                ordered: Some(data_channel_mode.ordered()),
                max_retransmits: data_channel_mode.max_retransmits(),
                ..Default::default()
            };
            let channel = driver
                .pc
                .create_data_channel(DATA_CHANNEL_LABEL, Some(init))
                .await
                .map_err(|e| {
                    Error::DataChannelError(format!("Failed to create data channel: {}", e))
                })?;
            wire_data_channel(channel, driver.events.clone(), Arc::clone(&driver.data_channel));
        }

        if let Some(stream) = &options.stream {
            driver.attach(stream).await?;
        }

        if driver.role.is_initiator() {
            driver.negotiate().await?;
        }

        info!("Peer connection created");
        Ok(driver)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<DriverCommand>) {
        while let Some(command) = commands.recv().await {
            let result = match command {
                DriverCommand::Signal(payload) => self.handle_signal(payload).await,
                DriverCommand::Send(text) => self.send_text(text).await,
                DriverCommand::AddStream(stream) => self.add_stream(&stream).await,
                DriverCommand::RemoveStream(stream) => self.remove_stream(&stream).await,
                DriverCommand::Destroy => break,
            };

            if let Err(e) = result {
                let fatal = matches!(
                    e,
                    Error::SdpError(_) | Error::PeerConnectionError(_) | Error::WebRtcError(_)
                );
                warn!("Peer {} error (fatal={}): {}", self.events.peer_id(), fatal, e);
                self.events.emit(PeerEvent::Error {
                    cause: e.to_string(),
                    fatal,
                });
            }
        }

        debug!("Closing peer connection to {}", self.events.peer_id());
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection to {}: {}", self.events.peer_id(), e);
        }
    }

    fn install_handlers(&self) {
        let events = self.events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        debug!("ICE gathering complete for peer {}", events.peer_id());
                        return;
                    };
                    match candidate.to_json() {
                        Ok(candidate) => emit_signal(&events, RtcSignal::Candidate { candidate }),
                        Err(e) => warn!("Failed to convert ICE candidate to JSON: {}", e),
                    }
                })
            }));

        let events = self.events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let events = events.clone();
                Box::pin(async move {
                    match state {
                        RTCPeerConnectionState::Failed => {
                            events.emit(PeerEvent::Error {
                                cause: "peer connection failed".to_string(),
                                fatal: true,
                            });
                        }
                        RTCPeerConnectionState::Closed => {
                            events.emit(PeerEvent::Close);
                        }
                        other => debug!("Peer {} connection state: {}", events.peer_id(), other),
                    }
                })
            }));

        let events = self.events.clone();
        let slot = Arc::clone(&self.data_channel);
        self.pc
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let events = events.clone();
                let slot = Arc::clone(&slot);
                Box::pin(async move {
                    if channel.label() != DATA_CHANNEL_LABEL {
                        debug!("Ignoring data channel '{}'", channel.label());
                        return;
                    }
                    wire_data_channel(channel, events, slot);
                })
            }));

        let events = self.events.clone();
        let seen_streams = Arc::new(Mutex::new(HashSet::new()));
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = events.clone();
                let seen_streams = Arc::clone(&seen_streams);
                Box::pin(async move {
                    let stream_id = track.stream_id();
                    let track = MediaTrack::from_remote(track);
                    let stream = MediaStream::new(stream_id.clone()).with_track(track.clone());
                    info!(
                        "Remote track {} ({:?}) from peer {}",
                        track.id(),
                        track.kind(),
                        events.peer_id()
                    );
                    if seen_streams.lock().insert(stream_id) {
                        events.emit(PeerEvent::Stream(stream.clone()));
                    }
                    events.emit(PeerEvent::Track { track, stream });
                })
            },
        ));
    }

    async fn handle_signal(&mut self, payload: SignalPayload) -> Result<()> {
        match RtcSignal::from_payload(&payload)? {
            RtcSignal::Offer { sdp } => {
                let offer = RTCSessionDescription::offer(sdp)
                    .map_err(|e| Error::SdpError(format!("Invalid SDP offer: {}", e)))?;
                self.pc
                    .set_remote_description(offer)
                    .await
                    .map_err(|e| Error::SdpError(format!("Failed to set remote offer: {}", e)))?;
                self.flush_candidates().await;

                let answer = self
                    .pc
                    .create_answer(None)
                    .await
                    .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
                self.pc
                    .set_local_description(answer.clone())
                    .await
                    .map_err(|e| Error::SdpError(format!("Failed to set local answer: {}", e)))?;

                debug!("Answer SDP: {} bytes", answer.sdp.len());
                emit_signal(&self.events, RtcSignal::Answer { sdp: answer.sdp });
                Ok(())
            }
            RtcSignal::Answer { sdp } => {
                let answer = RTCSessionDescription::answer(sdp)
                    .map_err(|e| Error::SdpError(format!("Invalid SDP answer: {}", e)))?;
                self.pc
                    .set_remote_description(answer)
                    .await
                    .map_err(|e| Error::SdpError(format!("Failed to set remote answer: {}", e)))?;
                self.flush_candidates().await;

                if std::mem::take(&mut self.renegotiate_pending) {
                    self.negotiate().await?;
                }
                Ok(())
            }
            RtcSignal::Candidate { candidate } => {
                if self.pc.remote_description().await.is_none() {
                    self.pending_candidates.push(candidate);
                    return Ok(());
                }
                self.pc
                    .add_ice_candidate(candidate)
                    .await
                    .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
            }
            RtcSignal::Renegotiate => {
                if self.role.is_initiator() {
                    self.negotiate().await
                } else {
                    warn!("Responder received renegotiate request; ignoring");
                    Ok(())
                }
            }
            RtcSignal::TransceiverRequest { kind } => {
                if !self.role.is_initiator() {
                    warn!("Responder received transceiver request; ignoring");
                    return Ok(());
                }
                self.pc
                    .add_transceiver_from_kind(
                        kind.into(),
                        Some(RTCRtpTransceiverInit {
                            direction: RTCRtpTransceiverDirection::Recvonly,
                            send_encodings: vec![],
                        }),
                    )
                    .await
                    .map_err(|e| Error::MediaTrackError(format!("Failed to add transceiver: {}", e)))?;
                self.negotiate().await
            }
        }
    }

    /// Initiator side: send a fresh offer, or queue one if an offer is
    /// already outstanding
    async fn negotiate(&mut self) -> Result<()> {
        if self.pc.signaling_state() != RTCSignalingState::Stable {
            self.renegotiate_pending = true;
            return Ok(());
        }

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local offer: {}", e)))?;

        debug!("Offer SDP: {} bytes", offer.sdp.len());
        emit_signal(&self.events, RtcSignal::Offer { sdp: offer.sdp });
        Ok(())
    }

    /// Ask the other side to renegotiate after a track change
    async fn request_renegotiation(&mut self) -> Result<()> {
        if self.role.is_initiator() {
            if self.pc.remote_description().await.is_some() {
                self.negotiate().await?;
            }
        } else {
            emit_signal(&self.events, RtcSignal::Renegotiate);
        }
        Ok(())
    }

    async fn flush_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!("Failed to add buffered ICE candidate: {}", e);
            }
        }
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let channel = self.data_channel.lock().clone();
        let channel = channel
            .ok_or_else(|| Error::DataChannelError("Data channel is not open".to_string()))?;
        channel
            .send_text(text)
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send: {}", e)))?;
        Ok(())
    }

    /// Add a stream's local tracks to the connection
    async fn attach(&mut self, stream: &MediaStream) -> Result<()> {
        if self.senders.contains_key(stream.id()) {
            return Ok(());
        }

        let mut senders = Vec::new();
        for track in stream.tracks() {
            let Some(local) = track.local() else {
                debug!("Skipping remote track {} in outbound stream", track.id());
                continue;
            };
            let sender = self
                .pc
                .add_track(Arc::clone(local) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| Error::MediaTrackError(format!("Failed to add track: {}", e)))?;

            // Drain RTCP so interceptors keep running
            let rtcp_sender = Arc::clone(&sender);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while rtcp_sender.read(&mut buf).await.is_ok() {}
            });

            if !self.role.is_initiator() {
                emit_signal(
                    &self.events,
                    RtcSignal::TransceiverRequest { kind: track.kind() },
                );
            }
            senders.push(sender);
        }

        self.senders.insert(stream.id().to_string(), senders);
        Ok(())
    }

    async fn add_stream(&mut self, stream: &MediaStream) -> Result<()> {
        self.attach(stream).await?;
        // responders already asked for transceivers in attach
        if self.role.is_initiator() {
            self.request_renegotiation().await?;
        }
        Ok(())
    }

    async fn remove_stream(&mut self, stream: &MediaStream) -> Result<()> {
        let Some(senders) = self.senders.remove(stream.id()) else {
            return Ok(());
        };
        for sender in &senders {
            self.pc
                .remove_track(sender)
                .await
                .map_err(|e| Error::MediaTrackError(format!("Failed to remove track: {}", e)))?;
        }
        self.request_renegotiation().await
    }
}

fn wire_data_channel(
    channel: Arc<RTCDataChannel>,
    events: PeerEventSink,
    slot: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
) {
    let open_events = events.clone();
    let open_channel = Arc::clone(&channel);
    channel.on_open(Box::new(move || {
        Box::pin(async move {
            debug!("Data channel open to peer {}", open_events.peer_id());
            *slot.lock() = Some(open_channel);
            open_events.emit(PeerEvent::Connect);
        })
    }));

    let message_events = events.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = message_events.clone();
        Box::pin(async move {
            events.emit(PeerEvent::Data(msg.data));
        })
    }));

    channel.on_close(Box::new(move || {
        let events = events.clone();
        Box::pin(async move {
            debug!("Data channel to peer {} closed", events.peer_id());
            events.emit(PeerEvent::Close);
        })
    }));
}

fn emit_signal(events: &PeerEventSink, signal: RtcSignal) {
    match signal.into_payload() {
        Ok(payload) => {
            events.emit(PeerEvent::Signal(payload));
        }
        Err(e) => warn!("Failed to encode handshake payload: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServerConfig;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_signal_wire_format() {
        let payload = RtcSignal::Offer {
            sdp: "v=0".to_string(),
        }
        .into_payload()
        .unwrap();
        assert_eq!(payload.as_value(), &json!({"type": "offer", "sdp": "v=0"}));

        let payload = RtcSignal::TransceiverRequest {
            kind: TrackKind::Video,
        }
        .into_payload()
        .unwrap();
        assert_eq!(
            payload.as_value(),
            &json!({"type": "transceiver_request", "kind": "video"})
        );

        let parsed =
            RtcSignal::from_payload(&SignalPayload::from(json!({"type": "renegotiate"}))).unwrap();
        assert_eq!(parsed, RtcSignal::Renegotiate);
    }

    #[test]
    fn test_malformed_signal_rejected() {
        let err = RtcSignal::from_payload(&SignalPayload::from(json!({"type": "bogus"})))
            .unwrap_err();
        assert!(matches!(err, Error::SerializationError(_)));
    }

    #[test]
    fn test_connector_ice_servers() {
        let config = MeshConfig::default().with_turn_servers(vec![TurnServerConfig {
            url: "turn:turn.example.com:3478".to_string(),
            username: "user".to_string(),
            credential: "pass".to_string(),
        }]);
        let connector = RtcPeerConnector::new(&config);

        assert_eq!(connector.ice_servers().len(), 2);
        assert_eq!(connector.ice_servers()[1].username, "user");
    }

    #[test]
    fn test_create_requires_runtime() {
        let connector = RtcPeerConnector::new(&MeshConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new(PeerId::from("p1"), 1, tx);
        let options = PeerOptions {
            role: Role::Responder,
            stream: None,
        };
        assert!(connector.create(options, sink).is_err());
    }

    #[tokio::test]
    async fn test_destroy_twice() {
        let config = MeshConfig {
            stun_servers: vec![],
            ..Default::default()
        };
        let connector = RtcPeerConnector::new(&config);
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new(PeerId::from("p1"), 1, tx);
        let options = PeerOptions {
            role: Role::Responder,
            stream: None,
        };

        let peer = connector.create(options, sink).unwrap();
        assert!(peer.destroy().is_ok());
        assert!(matches!(peer.destroy(), Err(Error::AlreadyDestroyed(_))));
        // requests after destroy are dropped silently
        peer.send("late");
    }

    #[tokio::test]
    async fn test_initiator_emits_offer() {
        let config = MeshConfig {
            stun_servers: vec![],
            ..Default::default()
        };
        let connector = RtcPeerConnector::new(&config);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new(PeerId::from("p1"), 1, tx);
        let options = PeerOptions {
            role: Role::Initiator,
            stream: None,
        };

        let peer = connector.create(options, sink).unwrap();

        // host candidates may be reported before the offer itself
        let offer = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let envelope = rx.recv().await.unwrap();
                if let PeerEvent::Signal(payload) = envelope.event {
                    if payload.as_value()["type"] == "offer" {
                        break payload;
                    }
                }
            }
        })
        .await
        .unwrap();

        assert!(offer.as_value()["sdp"]
            .as_str()
            .unwrap()
            .contains("m=application"));
        peer.destroy().unwrap();
    }
}
