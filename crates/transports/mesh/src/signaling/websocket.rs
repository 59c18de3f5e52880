//! WebSocket signaling client
//!
//! Speaks the JSON relay protocol in [`super::protocol`]. Outbound frames go
//! through an unbounded queue drained by a sender task, so every
//! [`SignalingChannel`] request returns without waiting on the network.

use super::protocol::{ClientMessage, RelayMessage};
use super::{SignalPayload, SignalingChannel, SignalingEvent, SignalingSink};
use crate::peer::PeerId;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket signaling client bound to one application namespace
pub struct WebSocketSignaling {
    /// Namespace rooms are scoped to
    namespace: String,

    /// Outgoing frame queue; `None` before connect and after close
    tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,

    /// Receiver task, aborted on close
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketSignaling {
    /// Create a new signaling client
    ///
    /// # Arguments
    ///
    /// * `namespace` - Application namespace sent with join/create requests
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            tx: Mutex::new(None),
            receiver: Mutex::new(None),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_connected(&self) -> bool {
        self.tx
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    fn queue(&self, msg: ClientMessage) -> Result<()> {
        let json = msg.to_json()?;
        let guard = self.tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::SignalingError("Not connected to relay".to_string()))?;
        tx.send(Message::Text(json))
            .map_err(|_| Error::SignalingError("Relay connection closed".to_string()))
    }

    /// Sender task: sends messages from channel to WebSocket
    async fn sender_task(
        mut write: SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        debug!("Sender task terminated");
    }

    /// Receiver task: parses relay frames and forwards them as events
    async fn receiver_task(mut read: SplitStream<WsStream>, events: SignalingSink) {
        let reason = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match RelayMessage::from_json(&text) {
                    Ok(RelayMessage::Error { message }) => {
                        warn!("Relay reported error: {}", message);
                    }
                    Ok(msg) => {
                        if let Some(event) = msg.into_event() {
                            if events.send(event).is_err() {
                                debug!("Session dropped, stopping relay receiver");
                                return;
                            }
                        }
                    }
                    Err(e) => warn!("Dropping relay frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by relay".to_string());
                }
                Some(Ok(other)) => debug!("Ignoring non-text relay frame: {:?}", other),
                Some(Err(e)) => break e.to_string(),
                None => break "relay stream ended".to_string(),
            }
        };

        info!("Signaling connection lost: {}", reason);
        let _ = events.send(SignalingEvent::Disconnected(reason));
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    async fn connect(&self, address: &str, events: SignalingSink) -> Result<()> {
        if self.is_connected() {
            return Err(Error::SignalingError("Already connected".to_string()));
        }

        info!("Connecting to signaling server: {}", address);

        let (ws_stream, _) = connect_async(address)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, rx));
        let receiver = tokio::spawn(Self::receiver_task(read, events));

        *self.tx.lock() = Some(tx);
        if let Some(previous) = self.receiver.lock().replace(receiver) {
            previous.abort();
        }

        Ok(())
    }

    fn join(&self, room: &str, password: Option<&str>) -> Result<()> {
        debug!("Requesting join of room {}", room);
        self.queue(ClientMessage::Join {
            namespace: self.namespace.clone(),
            room: room.to_string(),
            password: password.map(str::to_string),
        })
    }

    fn create(&self, room: &str, password: Option<&str>, hidden: bool) -> Result<()> {
        debug!("Requesting creation of room {} (hidden={})", room, hidden);
        self.queue(ClientMessage::Create {
            namespace: self.namespace.clone(),
            room: room.to_string(),
            password: password.map(str::to_string),
            hidden,
        })
    }

    fn send(&self, to: &PeerId, kind: &str, payload: SignalPayload) -> Result<()> {
        self.queue(ClientMessage::Signal {
            to: to.clone(),
            kind: kind.to_string(),
            data: payload,
        })
    }

    fn close(&self) {
        if let Some(tx) = self.tx.lock().take() {
            info!("Closing signaling connection");
            let _ = tx.send(Message::Close(None));
        }
        if let Some(receiver) = self.receiver.lock().take() {
            receiver.abort();
        }
    }
}

impl Drop for WebSocketSignaling {
    fn drop(&mut self) {
        self.close();
    }
}
