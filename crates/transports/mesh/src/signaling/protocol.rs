//! Relay wire protocol
//!
//! JSON text frames over WebSocket, internally tagged by `event`.

use super::{SignalPayload, SignalingEvent};
use crate::peer::PeerId;
use serde::{Deserialize, Serialize};

/// Frames sent from this client to the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join an existing room
    Join {
        namespace: String,
        room: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    /// Create a room; the creator still sends `Join` to enter it
    Create {
        namespace: String,
        room: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        /// Hidden rooms are left out of room listings
        hidden: bool,
    },

    /// Relay handshake data to one participant
    Signal {
        to: PeerId,
        kind: String,
        data: SignalPayload,
    },
}

/// Frames received from the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayMessage {
    RoomCount { count: u32 },
    SocketId { id: PeerId },
    Initialize { peer: PeerId },
    Destroy { peer: PeerId },
    Signal { from: PeerId, data: SignalPayload },
    /// Relay-side rejection (bad password, unknown room, ...)
    Error { message: String },
}

impl ClientMessage {
    /// Convert message to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize relay message: {}", e))
        })
    }
}

impl RelayMessage {
    /// Parse message from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to deserialize relay message: {}", e))
        })
    }

    /// Map to the session-facing event
    ///
    /// Relay errors have no session counterpart and map to `None`; the
    /// caller logs them.
    pub fn into_event(self) -> Option<SignalingEvent> {
        match self {
            RelayMessage::RoomCount { count } => Some(SignalingEvent::RoomCount(count)),
            RelayMessage::SocketId { id } => Some(SignalingEvent::SelfId(id)),
            RelayMessage::Initialize { peer } => Some(SignalingEvent::Initialize(peer)),
            RelayMessage::Destroy { peer } => Some(SignalingEvent::Destroy(peer)),
            RelayMessage::Signal { from, data } => Some(SignalingEvent::Signal {
                from,
                payload: data,
            }),
            RelayMessage::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_serialization() {
        let msg = ClientMessage::Join {
            namespace: "canvas".to_string(),
            room: "lobby".to_string(),
            password: None,
        };

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "join", "namespace": "canvas", "room": "lobby"})
        );
    }

    #[test]
    fn test_create_serialization() {
        let msg = ClientMessage::Create {
            namespace: "canvas".to_string(),
            room: "secret".to_string(),
            password: Some("hunter2".to_string()),
            hidden: true,
        };

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "create");
        assert_eq!(value["password"], "hunter2");
        assert_eq!(value["hidden"], true);
    }

    #[test]
    fn test_signal_serialization() {
        let msg = ClientMessage::Signal {
            to: PeerId::from("peer-bob"),
            kind: "signal".to_string(),
            data: SignalPayload::from(json!({"type": "answer", "sdp": "v=0"})),
        };

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["to"], "peer-bob");
        assert_eq!(value["kind"], "signal");
        assert_eq!(value["data"]["type"], "answer");
    }

    #[test]
    fn test_relay_frames_map_to_events() {
        let cases = [
            (r#"{"event":"room_count","count":3}"#, Some(SignalingEvent::RoomCount(3))),
            (
                r#"{"event":"socket_id","id":"me"}"#,
                Some(SignalingEvent::SelfId(PeerId::from("me"))),
            ),
            (
                r#"{"event":"initialize","peer":"p2"}"#,
                Some(SignalingEvent::Initialize(PeerId::from("p2"))),
            ),
            (
                r#"{"event":"destroy","peer":"p2"}"#,
                Some(SignalingEvent::Destroy(PeerId::from("p2"))),
            ),
            (r#"{"event":"error","message":"room is full"}"#, None),
        ];

        for (frame, expected) in cases {
            let event = RelayMessage::from_json(frame).unwrap().into_event();
            assert_eq!(event, expected, "frame {}", frame);
        }
    }

    #[test]
    fn test_relay_signal_frame() {
        let frame = r#"{"event":"signal","from":"p3","data":{"type":"candidate"}}"#;
        match RelayMessage::from_json(frame).unwrap().into_event() {
            Some(SignalingEvent::Signal { from, payload }) => {
                assert_eq!(from, PeerId::from("p3"));
                assert_eq!(payload.as_value()["type"], "candidate");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_frame_is_rejected() {
        assert!(RelayMessage::from_json(r#"{"event":"room_list","rooms":[]}"#).is_err());
        assert!(RelayMessage::from_json("not json").is_err());
    }
}
