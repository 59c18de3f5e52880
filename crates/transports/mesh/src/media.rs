//! Media stream handles shared between the session and peer bindings
//!
//! A [`MediaStream`] is a named group of tracks. Outbound tracks wrap a
//! webrtc-rs `TrackLocalStaticSample` the application writes samples into;
//! inbound tracks wrap the `TrackRemote` handed out by the peer connection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl From<RTPCodecType> for TrackKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Video => TrackKind::Video,
            _ => TrackKind::Audio,
        }
    }
}

impl From<TrackKind> for RTPCodecType {
    fn from(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => RTPCodecType::Audio,
            TrackKind::Video => RTPCodecType::Video,
        }
    }
}

/// Where a track's media comes from
#[derive(Clone)]
pub enum TrackSource {
    /// Produced locally and sent to peers
    Local(Arc<TrackLocalStaticSample>),
    /// Received from a remote peer
    Remote(Arc<TrackRemote>),
}

/// One audio or video track
#[derive(Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    source: TrackSource,
}

impl MediaTrack {
    /// Create an outbound Opus audio track
    pub fn local_audio(id: &str, stream_id: &str) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            id.to_string(),
            stream_id.to_string(),
        ));

        Self {
            id: id.to_string(),
            kind: TrackKind::Audio,
            source: TrackSource::Local(track),
        }
    }

    /// Create an outbound VP8 video track
    pub fn local_video(id: &str, stream_id: &str) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            id.to_string(),
            stream_id.to_string(),
        ));

        Self {
            id: id.to_string(),
            kind: TrackKind::Video,
            source: TrackSource::Local(track),
        }
    }

    /// Wrap a track received from a remote peer
    pub fn from_remote(track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id(),
            kind: track.kind().into(),
            source: TrackSource::Remote(track),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn source(&self) -> &TrackSource {
        &self.source
    }

    /// The sample writer for a local track, if this is one
    pub fn local(&self) -> Option<&Arc<TrackLocalStaticSample>> {
        match &self.source {
            TrackSource::Local(track) => Some(track),
            TrackSource::Remote(_) => None,
        }
    }

    /// The RTP reader for a remote track, if this is one
    pub fn remote(&self) -> Option<&Arc<TrackRemote>> {
        match &self.source {
            TrackSource::Remote(track) => Some(track),
            TrackSource::Local(_) => None,
        }
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            TrackSource::Local(_) => "local",
            TrackSource::Remote(_) => "remote",
        };
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("source", &source)
            .finish()
    }
}

/// A named group of tracks
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Create an empty stream with the given id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    /// Create a stream with a random id holding one local audio track
    pub fn local_audio() -> Self {
        let id = format!("stream-{}", uuid::Uuid::new_v4());
        let track = MediaTrack::local_audio(&format!("audio-{}", uuid::Uuid::new_v4()), &id);
        Self::new(id).with_track(track)
    }

    pub fn with_track(mut self, track: MediaTrack) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Streams are identified by id; two handles with the same id refer to
    /// the same stream.
    pub fn same_stream(&self, other: &MediaStream) -> bool {
        self.id == other.id
    }
}
